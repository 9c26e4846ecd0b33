use std::{cell::RefCell, rc::Rc};

use mpdb_engine::{
    backtrace, evaluate,
    frames::current_code_state,
    test_utils::{FunctionSpec, ImageBuilder, STACK_BASE},
    LogicalFrame, SnapshotTarget, StopDispatcher, StopOutcome,
};
use tracing::info;

/// `add(a, b)` stopped two instructions in, called from native code.
fn stopped_in_add() -> (ImageBuilder, u64) {
    let mut image = ImageBuilder::new(4);
    // LOAD_FAST_MULTI 0, LOAD_FAST_MULTI 1, BINARY_OP_MULTI ADD, RETURN_VALUE
    let spec = FunctionSpec::new("add", "demo.py")
        .args(&["a", "b"])
        .code(&[0xb0, 0xb1, 0xf2, 0x63])
        .line(4, 0)
        .line(1, 2);
    let function = image.function(&spec);
    let (one, two) = (image.small_int(1), image.small_int(2));
    let code_state = image.code_state(&function, spec.n_state, 2, &[one, two]);

    image.native_frame("mp_hal_delay_ms", STACK_BASE, &[]);
    image.python_call(code_state, STACK_BASE + 0x20);
    image.native_frame("main", STACK_BASE + 0x100, &[]);
    (image, code_state)
}

#[test]
fn test_backtrace_folds_interpreter_calls() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (image, _) = stopped_in_add();
    let ctx = image.context();
    let frames = backtrace(&ctx).unwrap();

    assert_eq!(frames.len(), 3);
    assert!(matches!(frames[0], LogicalFrame::Native(_)));
    assert_eq!(frames[0].function(), "mp_hal_delay_ms");

    let add = &frames[1];
    assert!(matches!(add, LogicalFrame::Python { decoded: Some(_), .. }));
    assert_eq!(add.function(), "add(a=1,b=2)");
    assert_eq!(add.filename(), Some("demo.py"));
    assert_eq!(add.line(), Some(6));
    let elided: Vec<_> = add.elided().iter().filter_map(|f| f.function.as_deref()).collect();
    assert_eq!(elided, vec!["fun_bc_call", "mp_call_function_n_kw"]);

    assert_eq!(frames[2].function(), "main");
    assert_eq!(frames[2].native().level, 4);

    let shown = add.to_string();
    assert!(shown.starts_with("#1 "), "{shown}");
    assert!(shown.contains(" in add(a=1,b=2) at demo.py:6"), "{shown}");
    assert!(shown.contains("\n    #2 "), "{shown}");
}

#[test]
fn test_current_code_state_is_innermost_interpreter_frame() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (image, code_state) = stopped_in_add();
    let ctx = image.context();
    let state = current_code_state(&ctx).unwrap();
    assert_eq!(state.address, code_state);
    assert_eq!(state.n_state, 3);
}

#[test]
fn test_expressions_reach_locals_and_symbols() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (mut image, code_state) = stopped_in_add();
    let counter = image.symbol("counter");
    image.put_word(counter, 41);
    let ctx = image.context();

    // `code_state` is not a local of the innermost frame, so it names nothing.
    assert!(evaluate(&ctx, "code_state").is_err());
    assert_eq!(evaluate(&ctx, "counter + 1").unwrap(), 42);
    assert_eq!(evaluate(&ctx, "&counter").unwrap(), counter);
    assert_eq!(evaluate(&ctx, &format!("*{code_state:#x}")).unwrap(), ctx.read_word(code_state).unwrap());
}

#[test]
fn test_stop_dispatcher_resumes_after_handler() {
    mpdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (mut image, _) = stopped_in_add();
    let hook = image.symbol("mp_hal_delay_ms");
    let ctx = image.context();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut dispatcher = StopDispatcher::<SnapshotTarget>::new();
    let log = seen.clone();
    dispatcher.register("mp_hal_delay_ms", move |ctx| {
        let top = backtrace(ctx).ok().and_then(|frames| frames.into_iter().nth(1));
        log.borrow_mut().push(top.map(|frame| frame.function()).unwrap_or_default());
    });
    dispatcher.register("mp_sched_schedule", |_| {});

    assert_eq!(dispatcher.symbols().collect::<Vec<_>>(), vec!["mp_hal_delay_ms", "mp_sched_schedule"]);
    assert_eq!(
        dispatcher.on_stop_event(&ctx).unwrap(),
        StopOutcome::Handled { symbol: "mp_hal_delay_ms".to_string(), continued: true }
    );
    assert_eq!(dispatcher.on_stop(&ctx, hook + 2), StopOutcome::Ignored);
    assert_eq!(*seen.borrow(), vec!["add(a=1,b=2)".to_string()]);
    assert_eq!(ctx.target().continue_requests(), 1);
}
