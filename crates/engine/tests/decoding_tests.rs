use mpdb_engine::{
    bytecode::{
        decode_prelude, BytecodeFunction, LineEntry, LineTable, Operand, PreludeCounts, PreludeSizes,
    },
    test_utils::{FunctionSpec, ImageBuilder},
    ObjRepr, TaggedValue,
};
use tracing::info;

fn word_size(repr: ObjRepr) -> usize {
    if repr == ObjRepr::D {
        8
    } else {
        4
    }
}

#[test]
fn test_small_int_range_round_trips_in_every_scheme() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    for repr in ObjRepr::ALL {
        let ws = word_size(repr);
        let range = repr.small_int_range(ws);
        for n in [*range.start(), -1, 0, 1, *range.end()] {
            let word = repr.encode(&TaggedValue::SmallInt(n), ws).unwrap();
            assert_eq!(repr.classify(word, ws), TaggedValue::SmallInt(n), "{repr} {n}");
        }
        assert_eq!(repr.encode(&TaggedValue::SmallInt(range.end() + 1), ws), None, "{repr}");
    }
}

#[test]
fn test_values_print_under_detected_scheme() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    for repr in ObjRepr::ALL {
        let mut image = ImageBuilder::new(word_size(repr)).with_repr(repr);
        let hello = image.qstr_obj("hello");
        let minus_seven = image.small_int(-7);
        let text = image.str_obj("it's");
        let ctx = image.context();

        assert_eq!(ctx.repr(), repr);
        assert_eq!(ctx.format_value(hello), "'hello'");
        assert_eq!(ctx.format_value(minus_seven), "-7");
        assert_eq!(ctx.format_value(text), "'it\\'s'");
    }
}

#[test]
fn test_unboxed_floats() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    for repr in [ObjRepr::C, ObjRepr::D] {
        let ws = word_size(repr);
        let ctx = ImageBuilder::new(ws).with_repr(repr).context();
        let word = repr.encode(&TaggedValue::Float(1.5), ws).unwrap();
        assert_eq!(ctx.classify(word), TaggedValue::Float(1.5));
        assert_eq!(ctx.format_value(word), "1.5");
    }
    assert_eq!(ObjRepr::A.encode(&TaggedValue::Float(1.5), 4), None);
}

#[test]
fn test_repr_parameter_overrides_detection() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut ctx = ImageBuilder::new(4).with_repr(ObjRepr::A).context();
    // `(3 << 2) | 1`: 6 under REPR_A, 3 under REPR_B
    assert_eq!(ctx.classify(0xd), TaggedValue::SmallInt(6));

    ctx.set_parameter("repr", "REPR_B").unwrap();
    assert_eq!(ctx.repr(), ObjRepr::B);
    assert_eq!(ctx.classify(0xd), TaggedValue::SmallInt(3));
    assert_eq!(ctx.show_parameter("repr").unwrap(), "REPR_B");

    ctx.set_parameter("repr", "auto").unwrap();
    assert_eq!(ctx.repr(), ObjRepr::A);
}

#[test]
fn test_two_argument_prelude() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let counts = PreludeCounts {
        n_state: 4,
        n_exc_stack: 0,
        scope_flags: 0,
        n_pos_args: 2,
        n_kwonly_args: 0,
        n_def_pos_args: 0,
    };
    let lines = LineTable::new(vec![LineEntry::new(1, 2), LineEntry::new(2, 3), LineEntry::new(0, 1)]);

    let mut bytes = vec![0xff, 0xff];
    counts.encode(&mut bytes);
    PreludeSizes { n_info: 6, n_cells: 0 }.encode(&mut bytes);
    bytes.extend([5, 6, 7]);
    bytes.extend(lines.encode().unwrap());
    let code_start = bytes.len();
    bytes.push(0x63);

    let signature = decode_prelude(&bytes, 2);
    assert!(signature.is_complete());
    assert_eq!(signature.counts, Some(counts));
    assert_eq!(signature.sizes, Some(PreludeSizes { n_info: 6, n_cells: 0 }));
    assert_eq!(signature.name, Some(5));
    assert_eq!(signature.args, vec![6, 7]);
    assert_eq!(signature.lines, lines);
    assert_eq!(signature.code_offset, Some(code_start));
}

#[test]
fn test_line_boundaries_belong_to_the_next_line() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let entries = vec![LineEntry::new(1, 2), LineEntry::new(2, 3), LineEntry::new(40, 9)];
    let table = LineTable::decode(&LineTable::new(entries.clone()).encode().unwrap()).unwrap();
    assert_eq!(table.entries(), entries.as_slice());

    let lines: Vec<u32> = [0, 1, 2, 4, 5, 13, 14, 100].iter().map(|ip| table.map_line(*ip)).collect();
    assert_eq!(lines, vec![1, 1, 2, 2, 4, 4, 44, 44]);
}

#[test]
fn test_function_listing() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut image = ImageBuilder::new(4);
    let seven = image.small_int(7);
    let spec = FunctionSpec::new("greet", "demo.py").args(&["who"]).qstrs(&["hello"]).consts(&[seven]);
    let hello = spec.qstr_index("hello").unwrap() as u8;
    // LOAD_CONST_STRING hello, LOAD_CONST_OBJ 0, LOAD_FAST_MULTI 0, POP_JUMP_IF_FALSE +1,
    // POP_TOP, RETURN_VALUE
    let spec = spec.code(&[0x10, hello, 0x23, 0x00, 0xb0, 0x44, 0x41, 0x59, 0x63]).line(1, 0).line(1, 4);
    let function = image.function(&spec);
    let ctx = image.context();

    let bc = BytecodeFunction::read(&ctx, function.fun_bc).unwrap();
    assert_eq!(bc.name(&ctx).as_deref(), Some("greet"));
    assert_eq!(bc.arg_names(&ctx), vec![Some("who".to_string())]);
    assert_eq!(bc.source_file(&ctx).as_deref(), Some("demo.py"));
    assert_eq!(bc.code_offset(), Some(function.code_offset as usize));
    assert_eq!(bc.line_of(function.code_offset + 4), Some(3));

    let dis = bc.disassemble();
    assert!(!dis.partial);
    assert_eq!(dis.instructions.len(), 6);
    assert_eq!(dis.instructions[3].operand, Operand::Jump { offset: 1, target: dis.start as i64 + 8 });

    let listing = bc.listing(&ctx);
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines[0], "greet(who) in demo.py");
    assert_eq!(lines[2], "  0000 LOAD_CONST_STRING hello");
    assert_eq!(lines[3], "  0002 LOAD_CONST_OBJ 7");
    assert_eq!(lines[4], "  0004 LOAD_FAST_MULTI 0");
    assert_eq!(lines[5], "  0005 POP_JUMP_IF_FALSE +1 -> 0008");
    assert_eq!(lines.last(), Some(&"  0008 RETURN_VALUE"));
}
