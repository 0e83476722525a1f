use almanac::TuningResolver;
use indoc::indoc;

fn resolver() -> TuningResolver {
    TuningResolver::new(indoc! {r#"
        local x = 2
        TUNING.BASE = 10
        TUNING.SCALED = "x * TUNING.BASE"
        TUNING.CYCLE = TUNING.CYCLE_B
        TUNING.CYCLE_B = TUNING.CYCLE
    "#})
}

#[test]
fn scaled_resolves_through_local_and_ref() {
    assert_eq!(resolver().resolve("TUNING.SCALED"), Some(20.0));
}

#[test]
fn trace_key_chain_ends_in_value() {
    let trace = resolver().trace_key("SCALED");
    assert_eq!(trace.value, Some(20.0));
    assert!(trace.chain.ends_with(" -> 20"), "chain was: {}", trace.chain);
    assert_eq!(trace.normalized, "SCALED");
}

#[test]
fn trace_expr_arithmetic() {
    let trace = resolver().trace_expr("TUNING.SCALED + 1");
    assert_eq!(trace.value, Some(21.0));
    assert_eq!(trace.expr_resolved, "20 + 1");
}

#[test]
fn cycle_yields_nil_with_loop_step() {
    let trace = resolver().trace_expr("TUNING.CYCLE");
    assert_eq!(trace.value, None);
    let cycle = trace.refs.get("CYCLE").expect("ref traced");
    assert_eq!(cycle.value, None);
    assert!(cycle
        .steps
        .iter()
        .any(|s| s.note.as_deref() == Some("loop")));
}

#[test]
fn depth_bound_stops_long_chains() {
    // A -> B -> ... ten hops deep exceeds the resolve depth of 8
    let mut src = String::from("TUNING.K0 = 1\n");
    for i in 1..=10 {
        src.push_str(&format!("TUNING.K{i} = TUNING.K{}\n", i - 1));
    }
    let tuning = TuningResolver::new(&src);
    assert_eq!(tuning.resolve("K1"), Some(1.0));
    assert_eq!(tuning.resolve("K10"), None);
}
