use covenant::{ConditionKind, Runner, RuntimeError, Value};
use num_bigint::BigInt;
use pretty_assertions::assert_eq;

fn runner(source: &str) -> Runner {
    match Runner::new(source, "test.cov") {
        Ok(runner) => runner,
        Err(error) => panic!("program should check:\n{error}"),
    }
}

fn expect_condition(error: RuntimeError, expected: ConditionKind) -> String {
    match error {
        RuntimeError::Condition { kind, message, .. } if kind == expected => message,
        other => panic!("expected a {expected}-condition failure, got {other}"),
    }
}

#[test]
fn failing_pre_condition_aborts_before_the_body() {
    let mut runner = runner(
        r#"var entered = 0
         fun withdraw(_ x: Int): Int {
             pre { x > 0: "amount must be positive" }
             entered = entered + 1
             return x
         }"#,
    );
    let error = runner.invoke("withdraw", vec![Value::from(0)]).expect_err("pre must fail");
    let message = expect_condition(error, ConditionKind::Pre);
    assert_eq!(message, "amount must be positive");
    // the body never ran
    assert!(covenant::values_equal(&runner.global("entered").unwrap(), &Value::from(0)));

    let result = runner.invoke("withdraw", vec![Value::from(1)]).unwrap();
    assert!(covenant::values_equal(&result, &Value::from(1)));
}

#[test]
fn before_pins_the_entry_value_in_post_conditions() {
    let mut runner = runner(
        "var x = 0
         fun bump() {
             post { x == before(x) + 1 }
             x = x + 1
         }",
    );
    runner.invoke("bump", vec![]).unwrap();
    runner.invoke("bump", vec![]).unwrap();
    match runner.global("x").unwrap() {
        Value::Int(i) => assert_eq!(i, BigInt::from(2)),
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn post_condition_failure_is_tagged_post() {
    let mut runner = runner(
        "var x = 0
         fun bumpTwice() {
             post { x == before(x) + 1 }
             x = x + 2
         }",
    );
    let error = runner.invoke("bumpTwice", vec![]).expect_err("post must fail");
    expect_condition(error, ConditionKind::Post);
}

#[test]
fn post_condition_observes_result() {
    let mut runner = runner(
        r#"fun half(_ n: Int): Int {
             post { result * 2 == n: "not an even split" }
             return n / 2
         }"#,
    );
    let result = runner.invoke("half", vec![Value::from(10)]).unwrap();
    assert!(covenant::values_equal(&result, &Value::from(5)));

    let error = runner.invoke("half", vec![Value::from(9)]).expect_err("odd input must fail");
    let message = expect_condition(error, ConditionKind::Post);
    assert_eq!(message, "not an even split");
}

#[test]
fn condition_message_may_depend_on_parameters() {
    let mut runner = runner(
        r#"fun greet(_ name: String): String {
             pre { name != "": "name is required, got ".concat(name) }
             return "hello ".concat(name)
         }"#,
    );
    let error = runner.invoke("greet", vec![Value::from("")]).expect_err("must fail");
    let message = expect_condition(error, ConditionKind::Pre);
    assert_eq!(message, "name is required, got ");
}

#[test]
fn interface_conditions_apply_to_implementations() {
    let source = "resource interface Limited {
             pub fun take(_ n: Int): Int {
                 pre { n > 0 }
             }
         }
         resource Pool: Limited {
             pub var total: Int
             init(total: Int) {
                 self.total = total
             }
             pub fun take(_ n: Int): Int {
                 self.total = self.total - n
                 return self.total
             }
             destroy() {}
         }
         fun main(_ n: Int): Int {
             let pool <- create Pool(total: 10)
             let left = pool.take(n)
             destroy pool
             return left
         }";
    let mut runner = runner(source);
    let result = runner.invoke("main", vec![Value::from(3)]).unwrap();
    assert!(covenant::values_equal(&result, &Value::from(7)));

    // a fresh runner for the failing case so partial state cannot leak
    let mut runner = self::runner(source);
    let error = runner.invoke("main", vec![Value::from(0)]).expect_err("inherited pre must fail");
    expect_condition(error, ConditionKind::Pre);
}

#[test]
fn initializer_conditions_run_on_construction() {
    let mut runner = runner(
        r#"struct Account {
             pub var balance: Int
             init(balance: Int) {
                 pre { balance >= 0: "no negative balances" }
                 self.balance = balance
             }
         }
         fun make(_ n: Int): Int {
             let account = Account(balance: n)
             return account.balance
         }"#,
    );
    let result = runner.invoke("make", vec![Value::from(5)]).unwrap();
    assert!(covenant::values_equal(&result, &Value::from(5)));

    let error = runner.invoke("make", vec![Value::from(-1)]).expect_err("must fail");
    expect_condition(error, ConditionKind::Pre);
}

#[test]
fn destructor_conditions_run_on_destroy() {
    let mut runner = runner(
        r#"resource Vault {
             pub var balance: Int
             init(balance: Int) {
                 self.balance = balance
             }
             destroy() {
                 pre { self.balance == 0: "vault must be empty" }
             }
         }
         fun drop(_ n: Int) {
             let vault <- create Vault(balance: n)
             destroy vault
         }"#,
    );
    runner.invoke("drop", vec![Value::from(0)]).unwrap();
    let error = runner.invoke("drop", vec![Value::from(3)]).expect_err("must fail");
    expect_condition(error, ConditionKind::Pre);
}
