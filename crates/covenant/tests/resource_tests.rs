use covenant::{Runner, Value, values_equal};
use num_bigint::BigInt;
use pretty_assertions::assert_eq;

fn runner(source: &str) -> Runner {
    match Runner::new(source, "test.cov") {
        Ok(runner) => runner,
        Err(error) => panic!("program should check:\n{error}"),
    }
}

fn global_int(runner: &Runner, name: &str) -> BigInt {
    match runner.global(name) {
        Some(Value::Int(i)) => i,
        other => panic!("expected an integer global, got {other:?}"),
    }
}

#[test]
fn a_moved_resource_keeps_its_identity() {
    let mut runner = runner(
        "resource Counter {
             pub(set) var count: Int
             init() {
                 self.count = 0
             }
             destroy() {}
         }
         fun main(): Int {
             let a <- create Counter()
             a.count = 5
             let b <- a
             let result = b.count
             destroy b
             return result
         }",
    );
    let result = runner.invoke("main", vec![]).unwrap();
    assert!(values_equal(&result, &Value::from(5)));
}

#[test]
fn destructors_run_exactly_once_per_instance() {
    let mut runner = runner(
        "var destroyed = 0
         resource R {
             destroy() {
                 destroyed = destroyed + 1
             }
         }
         fun main() {
             let a <- create R()
             let b <- a
             destroy b
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    assert_eq!(global_int(&runner, "destroyed"), BigInt::from(1));
}

#[test]
fn resources_conserve_across_moves() {
    // between the creates and the destroys, moves neither duplicate
    // nor drop instances
    let mut runner = runner(
        "var live = 0
         resource R {
             init() {
                 live = live + 1
             }
             destroy() {
                 live = live - 1
             }
         }
         fun shuffle() {
             let a <- create R()
             let b <- create R()
             let pair <- [<-a, <-b]
             destroy pair
         }",
    );
    runner.invoke("shuffle", vec![]).unwrap();
    assert_eq!(global_int(&runner, "live"), BigInt::from(0));
}

#[test]
fn nested_resources_are_destroyed_with_their_holder() {
    let mut runner = runner(
        "var destroyed = 0
         resource Inner {
             destroy() {
                 destroyed = destroyed + 1
             }
         }
         resource Outer {
             pub var inner: @Inner
             init(inner: @Inner) {
                 self.inner <- inner
             }
             destroy() {
                 destroyed = destroyed + 10
             }
         }
         fun main() {
             let outer <- create Outer(inner: <-create Inner())
             destroy outer
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    // the outer destructor runs, then the nested resource goes down too
    assert_eq!(global_int(&runner, "destroyed"), BigInt::from(11));
}

#[test]
fn resources_in_optionals_are_destroyed_transitively() {
    let mut runner = runner(
        "var destroyed = 0
         resource R {
             destroy() {
                 destroyed = destroyed + 1
             }
         }
         fun main() {
             var held: @R? <- nil
             var replacement: @R? <- create R()
             held <-> replacement
             destroy held
             destroy replacement
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    assert_eq!(global_int(&runner, "destroyed"), BigInt::from(1));
}

#[test]
fn destructor_order_follows_container_order() {
    let mut runner = runner(
        "var order = 0
         resource Tagged {
             pub var tag: Int
             init(tag: Int) {
                 self.tag = tag
             }
             destroy() {
                 order = order * 10 + self.tag
             }
         }
         fun main() {
             let rs <- [<-create Tagged(tag: 1), <-create Tagged(tag: 2), <-create Tagged(tag: 3)]
             destroy rs
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    assert_eq!(global_int(&runner, "order"), BigInt::from(123));
}

#[test]
fn initializer_arguments_move_resources_in() {
    let mut runner = runner(
        "resource Token {
             pub var value: Int
             init(value: Int) {
                 self.value = value
             }
             destroy() {}
         }
         resource Wallet {
             pub var token: @Token
             init(token: @Token) {
                 self.token <- token
             }
             destroy() {}
         }
         fun main(): Int {
             let wallet <- create Wallet(token: <-create Token(value: 9))
             let value = wallet.token.value
             destroy wallet
             return value
         }",
    );
    let result = runner.invoke("main", vec![]).unwrap();
    assert!(values_equal(&result, &Value::from(9)));
}
