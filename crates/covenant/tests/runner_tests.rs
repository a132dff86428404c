use covenant::{
    LimitedMeter, MapResolver, MeterError, Runner, RuntimeError, Value, parse_program, values_equal,
};
use covenant::ast::ImportLocation;
use pretty_assertions::assert_eq;

/// The runner can be invoked repeatedly; globals persist between
/// invocations.
#[test]
fn repeat_invoke() {
    let mut runner = Runner::new(
        "var count = 0
         fun bump(): Int {
             count = count + 1
             return count
         }",
        "test.cov",
    )
    .unwrap();
    assert!(values_equal(&runner.invoke("bump", vec![]).unwrap(), &Value::from(1)));
    assert!(values_equal(&runner.invoke("bump", vec![]).unwrap(), &Value::from(2)));
    assert!(values_equal(&runner.global("count").unwrap(), &Value::from(2)));
}

#[test]
fn top_level_bindings_initialize_in_order() {
    let runner = Runner::new(
        "let base = 40
         let answer = base + 2",
        "test.cov",
    )
    .unwrap();
    assert!(values_equal(&runner.global("answer").unwrap(), &Value::from(42)));
}

#[test]
fn invoking_an_unknown_function_fails() {
    let mut runner = Runner::new("fun main() { }", "test.cov").unwrap();
    let error = runner.invoke("missing", vec![]).expect_err("unknown name");
    assert!(matches!(error, RuntimeError::NotDeclared { .. }));
}

#[test]
fn snapshots_round_trip_through_dump_and_load() {
    let runner = Runner::new(
        "fun triple(_ n: Int): Int { return n * 3 }",
        "snapshot.cov",
    )
    .unwrap();
    let bytes = runner.dump().unwrap();

    let mut restored = Runner::load(&bytes).unwrap();
    assert_eq!(restored.source_name(), "snapshot.cov");
    let result = restored.invoke("triple", vec![Value::from(14)]).unwrap();
    assert!(values_equal(&result, &Value::from(42)));
}

#[test]
fn step_meter_aborts_runaway_execution() {
    let mut runner = Runner::with_meter(
        "fun spin() {
             var i = 0
             while true {
                 i = i + 1
             }
         }",
        "test.cov",
        Box::new(LimitedMeter::new(Some(10_000), None)),
    )
    .unwrap();
    let error = runner.invoke("spin", vec![]).expect_err("must hit the step limit");
    assert!(
        matches!(
            error,
            RuntimeError::Meter {
                error: MeterError::Steps { .. },
                ..
            }
        ),
        "got {error}"
    );
}

#[test]
fn call_depth_meter_bounds_recursion() {
    let mut runner = Runner::with_meter(
        "fun down(_ n: Int): Int {
             if n == 0 { return 0 }
             return down(n - 1)
         }",
        "test.cov",
        Box::new(LimitedMeter::new(None, Some(16))),
    )
    .unwrap();
    // shallow recursion fits the budget
    assert!(runner.invoke("down", vec![Value::from(10)]).is_ok());
    let error = runner.invoke("down", vec![Value::from(100)]).expect_err("too deep");
    assert!(matches!(
        error,
        RuntimeError::Meter {
            error: MeterError::CallDepth { .. },
            ..
        }
    ));
}

#[test]
fn deep_recursion_does_not_overflow_the_host_stack() {
    let mut runner = Runner::new(
        "fun down(_ n: Int): Int {
             if n == 0 { return 0 }
             return down(n - 1)
         }",
        "test.cov",
    )
    .unwrap();
    // far deeper than a host stack would allow with naive recursion
    let result = runner.invoke("down", vec![Value::from(100_000)]).unwrap();
    assert!(values_equal(&result, &Value::from(0)));
}

#[test]
fn imports_link_through_the_resolver() {
    let mut resolver = MapResolver::new();
    resolver.insert(
        ImportLocation::String("math".to_string()),
        parse_program("fun square(_ n: Int): Int { return n * n }").program,
    );
    let mut runner = Runner::with_resolver(
        r#"import "math"
         fun main(): Int {
             return square(6)
         }"#,
        "test.cov",
        Some(&mut resolver),
    )
    .unwrap();
    let result = runner.invoke("main", vec![]).unwrap();
    assert!(values_equal(&result, &Value::from(36)));
}

#[test]
fn import_selectors_filter_declarations() {
    let mut resolver = MapResolver::new();
    resolver.insert(
        ImportLocation::String("lib".to_string()),
        parse_program(
            "fun wanted(): Int { return 1 }
             fun unwanted(): Int { return 2 }",
        )
        .program,
    );
    let result = Runner::with_resolver(
        r#"import wanted from "lib"
         fun main(): Int {
             return unwanted()
         }"#,
        "test.cov",
        Some(&mut resolver),
    );
    // `unwanted` was not selected, so the program must not check
    assert!(matches!(result, Err(covenant::RunnerError::Check(_))));
}

#[test]
fn unknown_import_locations_error() {
    let mut resolver = MapResolver::new();
    let result = Runner::with_resolver(r#"import "nowhere""#, "test.cov", Some(&mut resolver));
    assert!(matches!(result, Err(covenant::RunnerError::Import(_))));
}

#[test]
fn transactions_run_prepare_then_execute() {
    let mut runner = Runner::new(
        "var log = 0
         transaction {
             prepare() {
                 log = log * 10 + 1
             }
             execute {
                 log = log * 10 + 2
             }
         }",
        "test.cov",
    )
    .unwrap();
    runner.run_transaction(0, vec![]).unwrap();
    assert!(values_equal(&runner.global("log").unwrap(), &Value::from(12)));
}

#[test]
fn parse_errors_surface_from_the_runner() {
    let result = Runner::new("fun main( {", "test.cov");
    assert!(matches!(result, Err(covenant::RunnerError::Parse(_))));
}
