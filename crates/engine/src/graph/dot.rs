// MPDB - MicroPython Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Graphviz rendering of a [`HeapGraph`].

use std::fmt;

use super::{Cluster, Endpoint, GraphEdge, GraphNode, HeapGraph, NodeStyle, RecordField};

const FONT: &str = "Helvetica,Arial,sans-serif";
const INDENT: &str = "    ";

/// The graph as a DOT `digraph`.
pub fn render_dot(graph: &HeapGraph) -> String {
    graph.to_string()
}

impl fmt::Display for HeapGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph Heap {{")?;
        writeln!(f, "{INDENT}graph [fontname=\"{FONT}\", layout=dot, ranksep=\"2.0\", rankdir=LR];")?;
        writeln!(f, "{INDENT}node [fontsize=16, shape=ellipse, fontname=\"{FONT}\"];")?;
        writeln!(f, "{INDENT}edge [fontname=\"{FONT}\"];")?;
        for cluster in &self.clusters {
            write_cluster(f, cluster, 1)?;
        }
        for node in &self.nodes {
            write_node(f, node, 1)?;
        }
        for edge in &self.edges {
            write_edge(f, edge)?;
        }
        writeln!(f, "}}")
    }
}

fn write_cluster(f: &mut fmt::Formatter<'_>, cluster: &Cluster, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    writeln!(f, "{pad}subgraph {} {{", quote(&format!("cluster_{}", cluster.name)))?;
    writeln!(f, "{pad}{INDENT}label={};", quote(&cluster.label))?;
    writeln!(f, "{pad}{INDENT}color={};", cluster.color)?;
    if cluster.dashed {
        writeln!(f, "{pad}{INDENT}style=dashed;")?;
    }
    for node in &cluster.nodes {
        write_node(f, node, depth + 1)?;
    }
    for nested in &cluster.clusters {
        write_cluster(f, nested, depth + 1)?;
    }
    writeln!(f, "{pad}}}")
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &GraphNode, depth: usize) -> fmt::Result {
    let mut attrs = vec!["shape=record".to_string()];
    if !node.fields.is_empty() {
        attrs.push(format!("label=\"{}\"", record_label(&node.fields)));
    }
    if let NodeStyle::Filled { color, dashed } = node.style {
        attrs.push(if dashed { "style=\"filled,dashed\"".into() } else { "style=filled".into() });
        attrs.push(format!("fillcolor={color}"));
    }
    if let Some(key) = node.sort_key {
        attrs.push(format!("sortv={key}"));
    }
    writeln!(f, "{}{} [{}];", INDENT.repeat(depth), quote(&node.id), attrs.join(", "))
}

fn write_edge(f: &mut fmt::Formatter<'_>, edge: &GraphEdge) -> fmt::Result {
    writeln!(f, "{INDENT}{} -> {};", endpoint(&edge.from), endpoint(&edge.to))
}

fn endpoint(end: &Endpoint) -> String {
    match &end.port {
        Some(port) => format!("{}:{}", quote(&end.node), quote(port)),
        None => quote(&end.node),
    }
}

/// Record label: compartments separated by `|`, lines by `\n`.
fn record_label(fields: &[RecordField]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        if let Some(port) = &field.port {
            out.push_str(&format!("<{port}>"));
        }
        let lines = field.lines.iter().map(|line| escape_record(line)).collect::<Vec<_>>();
        out.push_str(&lines.join("\\n"));
    }
    out
}

fn escape_record(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn quote(id: &str) -> String {
    format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_label_escapes_metacharacters() {
        let fields = vec![
            RecordField::port("a0.b0", vec!["0x20000000".into(), "dict".into()]),
            RecordField::port("a0.b1", vec![]),
            RecordField::text("x = {..} | <y>"),
        ];
        assert_eq!(
            record_label(&fields),
            r"<a0.b0>0x20000000\ndict|<a0.b1>|x = \{..\} \| \<y\>"
        );
    }

    #[test]
    fn test_render_graph() {
        let mut heap = Cluster::new("heap", "heap", "blue");
        heap.nodes.push(GraphNode {
            id: "0x20000000".into(),
            fields: vec![RecordField::port("a0.b0", vec!["0x20000000".into()])],
            style: NodeStyle::Filled { color: "aliceblue", dashed: true },
            sort_key: Some(0x2000_0000),
        });
        let mut vm = Cluster::new("vm", "vm", "red");
        vm.clusters.push(Cluster::new("registered", "MP_REGISTER_ROOT_POINTER", "red").dashed());
        vm.nodes.push(GraphNode::new("last_pool"));

        let graph = HeapGraph {
            clusters: vec![heap, vm],
            nodes: vec![],
            edges: vec![GraphEdge {
                from: Endpoint::node("last_pool"),
                to: Endpoint::port("0x20000000", "a0.b0"),
            }],
        };
        let dot = render_dot(&graph);

        assert!(dot.starts_with("digraph Heap {\n"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("subgraph \"cluster_heap\" {"));
        assert!(dot.contains(
            "\"0x20000000\" [shape=record, label=\"<a0.b0>0x20000000\", \
             style=\"filled,dashed\", fillcolor=aliceblue, sortv=536870912];"
        ));
        assert!(dot.contains("        subgraph \"cluster_registered\" {\n            label=\"MP_REGISTER_ROOT_POINTER\";"));
        assert!(dot.contains("style=dashed;"));
        assert!(dot.contains("\"last_pool\" [shape=record];"));
        assert!(dot.contains("    \"last_pool\" -> \"0x20000000\":\"a0.b0\";\n"));
    }
}
