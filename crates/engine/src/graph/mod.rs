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

//! Object graph of the GC heap and of every root pointing into it.
//!
//! Nodes are heap objects (one record per block chain, one port per block)
//! and root slots: thread and VM state members, port-registered roots, the
//! scheduler queue, CPU registers, native stack slots and worker threads.
//! Edges run from a slot to the object its value points at. Only members a
//! struct layout marks as pointers are followed; nothing is guessed.
//!
//! [`HeapGraph`] is a plain data model; [`render_dot`] turns it into
//! Graphviz input.

mod dot;
pub mod roots;

pub use dot::render_dot;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::{
    context::FieldRef,
    gc::{BlockKind, Heap},
    target::{FieldKind, NativeFrame, StructLayout},
    InspectContext, InspectResult, TaggedValue, Target,
};
use roots::{registered_roots, RootField, RootKind, THREAD_ROOTS, VM_ROOTS};

/// Most native stack slots scanned.
pub const MAX_STACK_SLOTS: usize = 1 << 16;

/// Longest root array expanded.
pub const MAX_ROOT_ARRAY_LEN: u64 = 256;

/// Most worker threads followed along the `thread` list.
pub const MAX_WORKER_THREADS: usize = 64;

/// Global pointing at the first worker thread (`mpthreadport.c`).
pub const THREAD_LIST_SYMBOL: &str = "thread";

/// Struct type of one worker thread entry.
pub const THREAD_TYPE: &str = "mp_thread_t";

const MAX_STRUCT_DEPTH: usize = 2;

/// Node id of the object at `address`.
pub fn node_name(address: u64) -> String {
    format!("{address:#010x}")
}

/// Record port of `block` in heap region `region`.
pub fn block_port(region: usize, block: usize) -> String {
    format!("a{region}.b{block}")
}

/// Fill colour for a chain whose head block has `kind`.
pub fn fill_color(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Free => "gray",
        BlockKind::Head => "aliceblue",
        BlockKind::Tail => "lightgray",
        BlockKind::Mark => "lightcoral",
    }
}

/// One end of an edge: a node, optionally narrowed to a record port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Node id
    pub node: String,
    /// Record port inside the node
    pub port: Option<String>,
}

impl Endpoint {
    /// The node as a whole.
    pub fn node(node: impl Into<String>) -> Self {
        Self { node: node.into(), port: None }
    }

    /// One port of a record node.
    pub fn port(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self { node: node.into(), port: Some(port.into()) }
    }
}

/// A pointer from one slot to the object it references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphEdge {
    /// Slot holding the pointer
    pub from: Endpoint,
    /// Object pointed at
    pub to: Endpoint,
}

/// One compartment of a record node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordField {
    /// Port name edges can attach to
    pub port: Option<String>,
    /// Text lines
    pub lines: Vec<String>,
}

impl RecordField {
    /// A compartment with a port.
    pub fn port(port: impl Into<String>, lines: Vec<String>) -> Self {
        Self { port: Some(port.into()), lines }
    }

    /// A compartment without a port.
    pub fn text(line: impl Into<String>) -> Self {
        Self { port: None, lines: vec![line.into()] }
    }
}

/// Fill of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeStyle {
    /// Default look
    #[default]
    Plain,
    /// Filled with a colour; dashed outline for objects with a finaliser
    Filled {
        /// Graphviz colour name
        color: &'static str,
        /// Dashed outline
        dashed: bool,
    },
}

/// A record-shaped node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphNode {
    /// Unique id
    pub id: String,
    /// Compartments; empty shows the id
    pub fields: Vec<RecordField>,
    /// Fill
    pub style: NodeStyle,
    /// Ordering hint for layout
    pub sort_key: Option<u64>,
}

impl GraphNode {
    /// A node labelled with its id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    /// A node with compartments.
    pub fn record(id: impl Into<String>, fields: Vec<RecordField>) -> Self {
        Self { id: id.into(), fields, ..Default::default() }
    }

    /// Whether the node has a port named `port`.
    pub fn has_port(&self, port: &str) -> bool {
        self.fields.iter().any(|f| f.port.as_deref() == Some(port))
    }
}

/// A named group of nodes, drawn as a box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cluster {
    /// Unique name
    pub name: String,
    /// Caption
    pub label: String,
    /// Outline colour
    pub color: &'static str,
    /// Dashed outline
    pub dashed: bool,
    /// Nodes directly inside
    pub nodes: Vec<GraphNode>,
    /// Nested clusters
    pub clusters: Vec<Cluster>,
}

impl Cluster {
    /// An empty cluster.
    pub fn new(name: impl Into<String>, label: impl Into<String>, color: &'static str) -> Self {
        Self { name: name.into(), label: label.into(), color, ..Default::default() }
    }

    fn dashed(mut self) -> Self {
        self.dashed = true;
        self
    }

    fn collect_nodes<'a>(&'a self, out: &mut Vec<&'a GraphNode>) {
        out.extend(self.nodes.iter());
        for cluster in &self.clusters {
            cluster.collect_nodes(out);
        }
    }

    fn find(&self, name: &str) -> Option<&Cluster> {
        if self.name == name {
            return Some(self);
        }
        self.clusters.iter().find_map(|c| c.find(name))
    }
}

/// Nodes, clusters and edges of one heap snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapGraph {
    /// Top-level clusters
    pub clusters: Vec<Cluster>,
    /// Nodes outside any cluster
    pub nodes: Vec<GraphNode>,
    /// All edges
    pub edges: Vec<GraphEdge>,
}

impl HeapGraph {
    /// Every node, clusters included.
    pub fn all_nodes(&self) -> Vec<&GraphNode> {
        let mut out = self.nodes.iter().collect::<Vec<_>>();
        for cluster in &self.clusters {
            cluster.collect_nodes(&mut out);
        }
        out
    }

    /// Node by id.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.all_nodes().into_iter().find(|n| n.id == id)
    }

    /// Cluster by name, at any depth.
    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find_map(|c| c.find(name))
    }

    /// Edges leaving `node`.
    pub fn edges_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.from.node == node)
    }
}

/// Collects a [`HeapGraph`] one section at a time.
#[derive(Debug)]
pub struct HeapGraphBuilder<'a, T> {
    ctx: &'a InspectContext<T>,
    heap: Heap,
    graph: HeapGraph,
}

/// Build the complete graph of the process.
pub fn heap_graph<T: Target>(ctx: &InspectContext<T>) -> InspectResult<HeapGraph> {
    let mut builder = HeapGraphBuilder::new(ctx)?;
    builder
        .add_heap_blocks()
        .add_thread_roots()
        .add_vm_roots()
        .add_cpu_registers()
        .add_stack_slots()
        .add_worker_threads()
        .add_stats();
    let graph = builder.finish();
    debug!(nodes = graph.all_nodes().len(), edges = graph.edges.len(), "built heap graph");
    Ok(graph)
}

impl<'a, T: Target> HeapGraphBuilder<'a, T> {
    /// Start from the heap areas of the process.
    pub fn new(ctx: &'a InspectContext<T>) -> InspectResult<Self> {
        Ok(Self::with_heap(ctx, Heap::read(ctx)?))
    }

    /// Start from an already read heap.
    pub fn with_heap(ctx: &'a InspectContext<T>, heap: Heap) -> Self {
        Self { ctx, heap, graph: HeapGraph::default() }
    }

    /// The graph collected so far.
    pub fn finish(self) -> HeapGraph {
        self.graph
    }

    /// Where `word` points, if it is an object pointer worth drawing.
    ///
    /// Pointers into a heap area attach to the port of the block they hit on
    /// the node of the chain's head. Others become bare address nodes unless
    /// `heap_only` is set.
    fn target_of(&self, word: u64, heap_only: bool) -> Option<Endpoint> {
        let address = self.ctx.classify(word).as_pointer().filter(|a| *a != 0)?;
        match self.heap.region_containing(address, false) {
            Some((_, region)) => {
                let block = region.block_of(address, false)?;
                let head = region.previous_head(block);
                Some(Endpoint::port(node_name(region.block_address(head)), block_port(region.index, block)))
            }
            None if heap_only => None,
            None => Some(Endpoint::node(node_name(address))),
        }
    }

    fn link(&mut self, from: Endpoint, word: u64, heap_only: bool) -> bool {
        match self.target_of(word, heap_only) {
            Some(to) => {
                self.graph.edges.push(GraphEdge { from, to });
                true
            }
            None => false,
        }
    }

    /// Non-pointer rendering of a register or stack word.
    fn immediate_label(&self, word: u64) -> Option<String> {
        match self.ctx.classify(word) {
            TaggedValue::HeapPointer(_) => None,
            TaggedValue::SmallInt(n) => Some(format!("mp_int({n})")),
            TaggedValue::Qstr(id) => self.ctx.qstr(id).map(|s| format!("mp_qstr('{s}')")),
            TaggedValue::Immediate(imm) => Some(imm.to_string()),
            TaggedValue::Float(value) => Some(format!("mp_float({value:?})")),
        }
    }

    /// One node per block chain; edges for every block-aligned pointer
    /// stored in the chain.
    pub fn add_heap_blocks(&mut self) -> &mut Self {
        let mut cluster = Cluster::new("heap", "heap", "blue");
        let mut edges = Vec::new();
        let word_size = self.ctx.word_size();

        for region in self.heap.regions() {
            let words_per_block = (region.block_size as usize / word_size).max(1);
            for chain in region.chains() {
                let head_address = region.block_address(chain.head);
                let name = node_name(head_address);
                let words = self
                    .ctx
                    .read_words(head_address, chain.len * words_per_block)
                    .unwrap_or_else(|err| {
                        debug!(object = %name, "cannot read heap object: {err}");
                        Vec::new()
                    });

                let mut fields = Vec::with_capacity(chain.len);
                for (i, block) in chain.blocks().enumerate() {
                    let port = block_port(region.index, block);
                    let mut lines = Vec::new();
                    if i == 0 {
                        lines.push(name.clone());
                        if let Some(type_name) =
                            words.first().and_then(|ty| self.ctx.known_type_name(*ty))
                        {
                            lines.push(type_name.to_string());
                        }
                    }
                    for word in words.iter().skip(i * words_per_block).take(words_per_block) {
                        let aligned = self
                            .ctx
                            .classify(*word)
                            .as_pointer()
                            .is_some_and(|a| self.heap.region_containing(a, true).is_some());
                        if let Some(to) = aligned.then(|| self.target_of(*word, true)).flatten() {
                            edges.push(GraphEdge { from: Endpoint::port(&name, &port), to });
                        }
                    }
                    fields.push(RecordField::port(port, lines));
                }

                cluster.nodes.push(GraphNode {
                    id: name,
                    fields,
                    style: NodeStyle::Filled { color: fill_color(chain.kind), dashed: chain.finaliser },
                    sort_key: Some(head_address),
                });
            }
        }

        self.graph.edges.extend(edges);
        self.graph.clusters.push(cluster);
        self
    }

    /// Roots held in `mp_state_ctx.thread`.
    pub fn add_thread_roots(&mut self) -> &mut Self {
        let mut cluster = Cluster::new("thread", "thread", "green");
        if let Some((base, type_name)) = self.state_struct("thread") {
            for root in THREAD_ROOTS {
                self.add_root(&mut cluster, base, &type_name, *root, false);
            }
        }
        self.graph.clusters.push(cluster);
        self
    }

    /// Roots held in `mp_state_ctx.vm`, registered roots and the scheduler queue.
    pub fn add_vm_roots(&mut self) -> &mut Self {
        let mut cluster = Cluster::new("vm", "vm", "red");
        let mut registered = Cluster::new("registered", "MP_REGISTER_ROOT_POINTER", "red").dashed();
        let mut sched = Cluster::new("sched_queue", "sched_queue", "black");

        if let Some((base, type_name)) = self.state_struct("vm") {
            for root in VM_ROOTS {
                self.add_root(&mut cluster, base, &type_name, *root, false);
            }
            for root in registered_roots() {
                self.add_root(&mut registered, base, &type_name, root, true);
            }
            self.add_sched_queue(&mut sched, base, &type_name);
        }

        cluster.clusters.push(registered);
        cluster.clusters.push(sched);
        self.graph.clusters.push(cluster);
        self
    }

    /// Registers of the innermost native frame.
    pub fn add_cpu_registers(&mut self) -> &mut Self {
        let mut cluster = Cluster::new("cpu", "cpu", "purple");
        if let Some(frame) = self.frames().into_iter().next() {
            for (name, value) in &frame.registers {
                match self.immediate_label(*value) {
                    Some(label) => {
                        let field = RecordField { port: None, lines: vec![name.clone(), label] };
                        cluster.nodes.push(GraphNode::record(name, vec![field]));
                    }
                    None => {
                        self.link(Endpoint::node(name), *value, false);
                        cluster.nodes.push(GraphNode::new(name));
                    }
                }
            }
        }
        self.graph.clusters.push(cluster);
        self
    }

    /// Native stack words between the innermost stack pointer and
    /// `mp_state_ctx.thread.stack_top` that point into the heap, grouped by
    /// the frame they belong to.
    pub fn add_stack_slots(&mut self) -> &mut Self {
        let mut stack = Cluster::new("stack", "stack", "maroon");
        let frames = self.frames();
        let slots = frames.first().and_then(|innermost| self.stack_words(innermost));

        if let Some((bottom, words)) = slots {
            let word_size = self.ctx.word_size() as u64;
            let mut level = 0;
            let mut current = level_cluster(frames[0].level);

            for (i, value) in words.iter().enumerate() {
                let address = bottom + i as u64 * word_size;
                while let Some(older) = frames.get(level + 1).filter(|f| f.sp != 0 && address >= f.sp) {
                    let finished = std::mem::replace(&mut current, level_cluster(older.level));
                    stack.clusters.push(finished);
                    level += 1;
                }
                if self.immediate_label(*value).is_some() {
                    continue;
                }
                let name = node_name(address);
                if self.link(Endpoint::node(&name), *value, true) {
                    current.nodes.push(GraphNode::new(name));
                }
            }
            stack.clusters.push(current);
        }

        self.graph.clusters.push(stack);
        self
    }

    /// Worker threads on the port's `thread` list.
    pub fn add_worker_threads(&mut self) -> &mut Self {
        let mut cluster = Cluster::new("pthreads", "pthreads", "chartreuse");
        let first = match self.ctx.target().lookup_symbol(THREAD_LIST_SYMBOL) {
            Ok(symbol) => self.ctx.read_word(symbol.address).unwrap_or(0),
            Err(err) => {
                trace!("no worker threads: {err}");
                0
            }
        };

        let mut seen = HashSet::new();
        let mut current = first;
        while current != 0 && seen.len() < MAX_WORKER_THREADS && seen.insert(current) {
            let field = |name: &str| self.ctx.read_field(current, THREAD_TYPE, name);
            let (id, arg, next) = match (field("id"), field("arg"), field("next")) {
                (Ok(id), Ok(arg), Ok(next)) => (id, arg, next),
                _ => {
                    debug!(thread = %node_name(current), "thread list truncated");
                    break;
                }
            };
            let name = format!("pthread_{current:#010x}");
            cluster.nodes.push(GraphNode::record(
                &name,
                vec![
                    RecordField::text(format!("pthread {id}")),
                    RecordField::port("arg", vec!["arg".into()]),
                ],
            ));
            self.link(Endpoint::port(name, "arg"), arg, true);
            current = next;
        }

        self.graph.clusters.push(cluster);
        self
    }

    /// Allocation counters (`MICROPY_MEM_STATS`), when the build keeps them.
    pub fn add_stats(&mut self) -> &mut Self {
        let fields = ["total", "current", "peak"]
            .into_iter()
            .filter_map(|stat| {
                let value = self.ctx.read_state_field(&format!("mem.{stat}_bytes_allocated")).ok()?;
                Some(RecordField::text(format!("{stat}: {value}")))
            })
            .collect::<Vec<_>>();
        if !fields.is_empty() {
            self.graph.nodes.push(GraphNode::record("stats", fields));
        }
        self
    }

    fn frames(&self) -> Vec<NativeFrame> {
        self.ctx.target().frames().unwrap_or_else(|err| {
            debug!("no native frames: {err}");
            Vec::new()
        })
    }

    fn stack_words(&self, innermost: &NativeFrame) -> Option<(u64, Vec<u64>)> {
        let word_size = self.ctx.word_size() as u64;
        let top = match self.ctx.read_state_field("thread.stack_top") {
            Ok(top) => top,
            Err(err) => {
                self.ctx.warn_once("stack_top", format!("cannot scan the native stack: {err}"));
                return None;
            }
        };
        let bottom = innermost.sp - innermost.sp % word_size;
        if top <= bottom {
            debug!(sp = %node_name(bottom), top = %node_name(top), "empty native stack");
            return None;
        }
        let count = ((top - bottom) / word_size).min(MAX_STACK_SLOTS as u64) as usize;
        match self.ctx.read_words(bottom, count) {
            Ok(words) => Some((bottom, words)),
            Err(err) => {
                debug!("cannot read the native stack: {err}");
                None
            }
        }
    }

    /// Address and type of an embedded member of `mp_state_ctx`.
    fn state_struct(&self, member: &str) -> Option<(u64, String)> {
        match self.ctx.state_field(member) {
            Ok(FieldRef { address, layout }) => match layout.kind {
                FieldKind::Struct { type_name } => Some((address, type_name)),
                other => {
                    debug!(member, "state member is not a struct: {other:?}");
                    None
                }
            },
            Err(err) => {
                self.ctx.warn_once(member, format!("cannot read mp_state_ctx.{member}: {err}"));
                None
            }
        }
    }

    fn add_root(
        &mut self,
        cluster: &mut Cluster,
        base: u64,
        type_name: &str,
        root: RootField,
        registered: bool,
    ) {
        let field = match self.ctx.field_ref(base, type_name, root.name) {
            Ok(field) => field,
            Err(err) if err.is_unresolved() => {
                match root.feature {
                    Some(_) if registered => trace!(root = root.name, "root not registered by this port"),
                    Some(feature) => self
                        .ctx
                        .warn_once(root.name, format!("{feature} is disabled, skipping {}", root.name)),
                    None => self.ctx.warn_once(root.name, format!("skipping {}: {err}", root.name)),
                }
                return;
            }
            Err(err) => {
                debug!(root = root.name, "cannot locate root: {err}");
                return;
            }
        };

        let word_size = self.ctx.word_size() as u64;
        match (&field.layout.kind, root.kind) {
            (FieldKind::Pointer, RootKind::Pointer | RootKind::PointerOrArray) => {
                self.add_pointer_root(cluster, root.name, &field)
            }
            (FieldKind::Scalar, RootKind::Pointer) if field.layout.size == word_size => {
                self.add_pointer_root(cluster, root.name, &field)
            }
            (FieldKind::Array { element, element_size, len }, RootKind::Array | RootKind::PointerOrArray)
                if *element_size == word_size
                    && matches!(**element, FieldKind::Pointer | FieldKind::Scalar) =>
            {
                self.add_array_root(cluster, root.name, field.address, *len)
            }
            (FieldKind::Struct { type_name }, RootKind::Struct) => {
                self.add_struct_root(cluster, root.name, field.address, type_name)
            }
            (kind, _) => debug!(root = root.name, "unexpected root layout {kind:?}"),
        }
    }

    fn add_pointer_root(&mut self, cluster: &mut Cluster, name: &str, field: &FieldRef) {
        cluster.nodes.push(GraphNode::new(name));
        match self.ctx.read_field_ref(field) {
            Ok(value) => {
                self.link(Endpoint::node(name), value, false);
            }
            Err(err) => debug!(root = name, "cannot read root: {err}"),
        }
    }

    fn add_array_root(&mut self, cluster: &mut Cluster, name: &str, address: u64, len: u64) {
        let len = len.min(MAX_ROOT_ARRAY_LEN) as usize;
        let words = match self.ctx.read_words(address, len) {
            Ok(words) => words,
            Err(err) => {
                debug!(root = name, "cannot read root array: {err}");
                return;
            }
        };

        let mut fields = Vec::with_capacity(len);
        for (i, word) in words.into_iter().enumerate() {
            let port = format!("i{i}");
            self.link(Endpoint::port(name, &port), word, false);
            let lines = if i == 0 { vec![name.to_string()] } else { Vec::new() };
            fields.push(RecordField::port(port, lines));
        }
        cluster.nodes.push(GraphNode::record(name, fields));
    }

    /// A struct member: one compartment per member, nested structs
    /// flattened with dotted names. A leading object header shows the
    /// object's type instead of the raw pointer.
    fn add_struct_root(&mut self, cluster: &mut Cluster, name: &str, address: u64, type_name: &str) {
        let layout = match self.ctx.layout(type_name) {
            Ok(layout) => layout,
            Err(err) => {
                self.ctx.warn_once(type_name, format!("cannot expand {name}: {err}"));
                return;
            }
        };

        let mut fields = Vec::new();
        let mut edges = Vec::new();
        let object_type =
            self.ctx.read_word(address).ok().and_then(|ty| self.ctx.known_type_name(ty));
        let skip = match (object_type, layout.fields.first()) {
            (Some(ty), Some(first)) if first.offset == 0 => {
                fields.push(RecordField::port(&first.name, vec![ty.to_string()]));
                1
            }
            _ => 0,
        };
        self.struct_members(name, address, &layout, skip, "", 0, &mut fields, &mut edges);

        match fields.first_mut() {
            Some(first) => first.lines.insert(0, name.to_string()),
            None => fields.push(RecordField::text(name)),
        }
        self.graph.edges.extend(edges);
        cluster.nodes.push(GraphNode::record(name, fields));
    }

    #[allow(clippy::too_many_arguments)]
    fn struct_members(
        &self,
        node: &str,
        base: u64,
        layout: &StructLayout,
        skip: usize,
        prefix: &str,
        depth: usize,
        fields: &mut Vec<RecordField>,
        edges: &mut Vec<GraphEdge>,
    ) {
        for member in layout.fields.iter().skip(skip) {
            let path =
                if prefix.is_empty() { member.name.clone() } else { format!("{prefix}.{}", member.name) };
            let port = path.replace('.', "_");
            let field = FieldRef { address: base + member.offset, layout: member.clone() };

            let line = match &member.kind {
                FieldKind::Pointer => {
                    if let Some(to) =
                        self.ctx.read_field_ref(&field).ok().and_then(|word| self.target_of(word, false))
                    {
                        edges.push(GraphEdge { from: Endpoint::port(node, &port), to });
                    }
                    format!("*{path}")
                }
                FieldKind::Scalar => match self.ctx.read_field_ref(&field) {
                    Ok(value) => format!("{path} = {value}"),
                    Err(_) => format!("{path} = ?"),
                },
                FieldKind::Struct { type_name } if depth < MAX_STRUCT_DEPTH => {
                    match self.ctx.layout(type_name) {
                        Ok(inner) => {
                            let next = depth + 1;
                            self.struct_members(node, field.address, &inner, 0, &path, next, fields, edges);
                            continue;
                        }
                        Err(_) => format!("{path} = {{..}}"),
                    }
                }
                FieldKind::Struct { .. } => format!("{path} = {{..}}"),
                FieldKind::Array { len, .. } => format!("{path}[{len}]"),
            };
            fields.push(RecordField::port(port, vec![line]));
        }
    }

    fn add_sched_queue(&mut self, cluster: &mut Cluster, base: u64, type_name: &str) {
        let field = match self.ctx.field_ref(base, type_name, "sched_queue") {
            Ok(field) => field,
            Err(err) => {
                self.ctx.warn_once(
                    "sched_queue",
                    format!("MICROPY_ENABLE_SCHEDULER is disabled, skipping sched_queue ({err})"),
                );
                return;
            }
        };
        let FieldKind::Array { element, element_size, len } = &field.layout.kind else {
            debug!("sched_queue is not an array");
            return;
        };
        let FieldKind::Struct { type_name: item_type } = element.as_ref() else {
            debug!("sched_queue items are not structs");
            return;
        };

        for i in 0..(*len).min(MAX_ROOT_ARRAY_LEN) {
            let item = field.address + i * element_size;
            let name = format!("sched_item_{i}");
            cluster.nodes.push(GraphNode::record(
                &name,
                vec![
                    RecordField::port("func", vec![format!("sched_queue[{i}]"), "func".into()]),
                    RecordField::port("arg", vec!["arg".into()]),
                ],
            ));
            for member in ["func", "arg"] {
                match self.ctx.read_field(item, item_type, member) {
                    Ok(value) => {
                        self.link(Endpoint::port(&name, member), value, false);
                    }
                    Err(err) => debug!(item = i, member, "cannot read sched item: {err}"),
                }
            }
        }
    }
}

fn level_cluster(level: usize) -> Cluster {
    let name = format!("level{level}");
    Cluster::new(name.clone(), name, "maroon").dashed()
}
