use mpdb_engine::{
    graph::{block_port, node_name, Endpoint, GraphEdge, NodeStyle},
    heap_graph, render_dot,
    test_utils::{ImageBuilder, HEAP_BASE, STACK_BASE},
    HeapGraph,
};
use tracing::info;

struct Objects {
    text: u64,
    items: u64,
    list: u64,
    locals: u64,
    thread: u64,
}

fn block_of(address: u64) -> usize {
    ((address - HEAP_BASE) / 16) as usize
}

fn head_port(address: u64) -> Endpoint {
    Endpoint::port(node_name(address), block_port(0, block_of(address)))
}

/// A list reachable from `__main__`'s globals, the locals dict, a register,
/// a stack slot and a worker thread argument.
fn process() -> (HeapGraph, Objects) {
    let mut image = ImageBuilder::new(4);
    let text = image.str_obj("hi");
    let one = image.small_int(1);
    let list = image.list(&[one, text]);
    let items = list - 16;
    let key = image.qstr_obj("xs");
    let main = image.state_address("vm.dict_main");
    image.dict_at(main, &[(key, list)]);
    let locals = image.dict(&[]);
    image.set_state("thread.dict_locals", locals);

    image.native_frame("mp_hal_delay_ms", STACK_BASE, &[]);
    let three = image.small_int(3);
    image.registers(&[("r0", list), ("r1", three)]);
    image.stack(&[0, list, three]);
    let thread = image.worker_thread(7, text);

    let graph = heap_graph(&image.context()).unwrap();
    (graph, Objects { text, items, list, locals, thread })
}

#[test]
fn test_heap_objects_and_interior_edges() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (graph, objects) = process();
    let heap = graph.cluster("heap").unwrap();

    let list = graph.node(&node_name(objects.list)).unwrap();
    assert_eq!(list.fields[0].lines, vec![node_name(objects.list), "list".to_string()]);
    assert_eq!(list.style, NodeStyle::Filled { color: "aliceblue", dashed: false });
    assert!(heap.nodes.iter().any(|n| n.id == node_name(objects.text)));

    // list -> item array -> str; the type pointers and counters draw nothing.
    let from_list: Vec<&GraphEdge> = graph.edges_from(&list.id).collect();
    assert_eq!(from_list.len(), 1);
    assert_eq!(from_list[0].to, head_port(objects.items));
    let items_name = node_name(objects.items);
    let from_items: Vec<&GraphEdge> = graph.edges_from(&items_name).collect();
    assert_eq!(from_items.len(), 1);
    assert_eq!(from_items[0].to, head_port(objects.text));
    assert_eq!(graph.edges_from(&node_name(objects.text)).count(), 0);
}

#[test]
fn test_roots_point_into_the_heap() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (graph, objects) = process();

    let locals = graph.edges_from("dict_locals").map(|e| e.to.clone()).collect::<Vec<_>>();
    assert_eq!(locals, vec![head_port(objects.locals)]);
    assert!(graph.cluster("thread").unwrap().nodes.iter().any(|n| n.id == "dict_locals"));

    // dict_main is embedded in the state: its table pointer is the only edge.
    let main = graph.node("dict_main").unwrap();
    assert_eq!(main.fields[0].lines, vec!["dict_main".to_string(), "dict".to_string()]);
    assert!(main.has_port("map_table"));
    let from_main: Vec<&GraphEdge> = graph.edges_from("dict_main").collect();
    assert_eq!(from_main.len(), 1);
    assert_eq!(from_main[0].from.port.as_deref(), Some("map_table"));
    let table = &from_main[0].to.node;
    let from_table: Vec<&GraphEdge> = graph.edges_from(table).collect();
    assert_eq!(from_table.len(), 1);
    assert_eq!(from_table[0].to, head_port(objects.list));

    assert_eq!(graph.cluster("sched_queue").unwrap().nodes.len(), 4);
    assert!(graph.cluster("registered").unwrap().nodes.is_empty());
}

#[test]
fn test_registers_stack_and_threads() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (graph, objects) = process();

    let r0: Vec<&GraphEdge> = graph.edges_from("r0").collect();
    assert_eq!(r0.len(), 1);
    assert_eq!(r0[0].to, head_port(objects.list));
    let r1 = graph.node("r1").unwrap();
    assert_eq!(r1.fields[0].lines, vec!["r1".to_string(), "mp_int(3)".to_string()]);
    assert_eq!(graph.edges_from("r1").count(), 0);

    // Only the slot holding the list becomes a node.
    let level = graph.cluster("level0").unwrap();
    let slot = node_name(STACK_BASE + 4);
    assert_eq!(level.nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>(), vec![slot.clone()]);
    let from_slot = graph.edges_from(&slot).map(|e| e.to.clone()).collect::<Vec<_>>();
    assert_eq!(from_slot, vec![head_port(objects.list)]);

    let pthread = format!("pthread_{:#010x}", objects.thread);
    let node = graph.node(&pthread).unwrap();
    assert_eq!(node.fields[0].lines, vec!["pthread 7".to_string()]);
    let arg: Vec<&GraphEdge> = graph.edges_from(&pthread).collect();
    assert_eq!(arg.len(), 1);
    assert_eq!(arg[0].from.port.as_deref(), Some("arg"));
    assert_eq!(arg[0].to, head_port(objects.text));

    let stats = graph.node("stats").unwrap();
    assert_eq!(stats.fields.len(), 3);
    assert_eq!(stats.fields[0].lines, vec!["total: 0".to_string()]);
}

#[test]
fn test_dot_output() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (graph, objects) = process();
    let dot = render_dot(&graph);

    assert!(dot.starts_with("digraph Heap {\n"));
    assert!(dot.trim_end().ends_with('}'));
    for cluster in
        ["heap", "thread", "vm", "registered", "sched_queue", "cpu", "stack", "level0", "pthreads"]
    {
        assert!(dot.contains(&format!("subgraph \"cluster_{cluster}\" {{")), "missing {cluster}");
    }
    let locals = head_port(objects.locals);
    let edge = format!("    \"dict_locals\" -> \"{}\":\"{}\";", locals.node, locals.port.unwrap());
    assert!(dot.contains(&edge), "{dot}");
    assert!(dot.contains("label=\"MP_REGISTER_ROOT_POINTER\";"));
    assert_eq!(dot, graph.to_string());
}
