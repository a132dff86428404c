use covenant::{Runner, Value, values_equal};
use num_bigint::BigInt;
use pretty_assertions::assert_eq;

/// Builds a runner or panics with the full diagnostic output.
fn runner(source: &str) -> Runner {
    match Runner::new(source, "test.cov") {
        Ok(runner) => runner,
        Err(error) => panic!("program should check:\n{error}"),
    }
}

fn invoke_main(source: &str) -> Value {
    runner(source).invoke("main", vec![]).expect("main should run")
}

fn expect_int(value: &Value) -> BigInt {
    match value {
        Value::Int(i) | Value::SizedInt { value: i, .. } => i.clone(),
        other => panic!("expected an integer, got {other}"),
    }
}

#[test]
fn integer_division_truncates_toward_zero() {
    let result = invoke_main("fun main(): Int { let z = 7 / 3; return z }");
    assert_eq!(expect_int(&result), BigInt::from(2));
}

#[test]
fn remainder_follows_dividend() {
    let result = invoke_main("fun main(): Int { let z = 5 % 3; return z }");
    assert_eq!(expect_int(&result), BigInt::from(2));
}

#[test]
fn negative_division_truncates() {
    let result = invoke_main("fun main(): Int { return (0 - 7) / 2 }");
    assert_eq!(expect_int(&result), BigInt::from(-3));
}

#[test]
fn string_length_counts_grapheme_clusters() {
    let result = invoke_main(r#"fun main(): Int { return "caf\u{E9}".length }"#);
    assert_eq!(expect_int(&result), BigInt::from(4));

    // combining accent: "e" + U+0301 is one user-perceived character
    let result = invoke_main(r#"fun main(): Int { return "cafe\u{301}".length }"#);
    assert_eq!(expect_int(&result), BigInt::from(4));
}

#[test]
fn string_index_yields_grapheme_cluster() {
    let result = invoke_main(r#"fun main(): Character { return "cafe\u{301}"[3] }"#);
    match result {
        Value::Character(c) => assert_eq!(c.as_ref(), "e\u{301}"),
        other => panic!("expected a character, got {other}"),
    }
}

#[test]
fn string_slice() {
    let result = invoke_main(r#"fun main(): String { return "abcdef".slice(from: 1, upTo: 2) }"#);
    assert!(values_equal(&result, &Value::from("b")));

    let result = invoke_main(r#"fun main(): String { return "abcdef".slice(from: 0, upTo: 0) }"#);
    assert!(values_equal(&result, &Value::from("")));
}

#[test]
fn slice_with_invalid_bounds_fails() {
    let mut runner = runner(r#"fun main(): String { return "abc".slice(from: 2, upTo: 9) }"#);
    let error = runner.invoke("main", vec![]).expect_err("slice must fail");
    assert!(matches!(error, covenant::RuntimeError::InvalidIndex { .. }), "got {error}");
}

#[test]
fn fib_14_is_377() {
    let mut runner = runner(
        "fun fib(_ n: Int): Int {
             if n < 2 { return n }
             return fib(n - 1) + fib(n - 2)
         }",
    );
    let result = runner.invoke("fib", vec![Value::from(14)]).unwrap();
    assert_eq!(expect_int(&result), BigInt::from(377));
}

#[test]
fn nested_optional_compared_to_nil() {
    let result = invoke_main("fun main(): Bool { let x: Int?? = 2; return x == nil }");
    assert!(values_equal(&result, &Value::from(false)));

    let result = invoke_main("fun main(): Bool { let x: Int?? = nil; return x == nil }");
    assert!(values_equal(&result, &Value::from(true)));
}

#[test]
fn optionals_of_different_depths_compare_by_innermost_value() {
    let result = invoke_main(
        "fun main(): Bool {
             let shallow: Int? = 2
             let deep: Int?? = 2
             return shallow == deep
         }",
    );
    assert!(values_equal(&result, &Value::from(true)));
}

#[test]
fn structures_copy_on_assignment() {
    let result = invoke_main(
        "struct Cat {
             pub(set) var fed: Bool
             init() {
                 self.fed = false
             }
         }
         fun main(): [Bool] {
             let cat = Cat()
             let kitty = cat
             kitty.fed = true
             return [cat.fed, kitty.fed]
         }",
    );
    assert!(values_equal(
        &result,
        &Value::array(vec![Value::from(false), Value::from(true)])
    ));
}

#[test]
fn destroying_a_resource_array_runs_each_destructor() {
    let mut runner = runner(
        "var counter = 0
         resource R {
             destroy() {
                 counter = counter + 1
             }
         }
         fun main() {
             let rs <- [<-create R(), <-create R()]
             destroy rs
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    let counter = runner.global("counter").expect("counter is a global");
    assert_eq!(expect_int(&counter), BigInt::from(2));
}

#[test]
fn logical_operators_short_circuit() {
    let mut runner = runner(
        "var calls = 0
         fun tick(): Bool {
             calls = calls + 1
             return true
         }
         fun main() {
             let a = false && tick()
             let b = true || tick()
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    let calls = runner.global("calls").unwrap();
    assert_eq!(expect_int(&calls), BigInt::from(0));
}

#[test]
fn nil_coalescing_only_evaluates_right_when_nil() {
    let mut runner = runner(
        "var calls = 0
         fun fallback(): Int {
             calls = calls + 1
             return 9
         }
         fun main(): Int {
             let present: Int? = 1
             let absent: Int? = nil
             return (present ?? fallback()) * 10 + (absent ?? fallback())
         }",
    );
    let result = runner.invoke("main", vec![]).unwrap();
    assert_eq!(expect_int(&result), BigInt::from(19));
    assert_eq!(expect_int(&runner.global("calls").unwrap()), BigInt::from(1));
}

#[test]
fn conditional_binding_forces_the_optional() {
    let result = invoke_main(
        "fun main(): Int {
             let maybe: Int? = 3
             if let value = maybe {
                 return value
             }
             return 0
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(3));

    let result = invoke_main(
        "fun main(): Int {
             let maybe: Int? = nil
             if let value = maybe {
                 return value
             }
             return 0
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(0));
}

#[test]
fn while_loop_with_break_and_continue() {
    let result = invoke_main(
        "fun main(): Int {
             var sum = 0
             var i = 0
             while true {
                 i = i + 1
                 if i > 10 {
                     break
                 }
                 if i % 2 == 0 {
                     continue
                 }
                 sum = sum + i
             }
             return sum
         }",
    );
    // 1 + 3 + 5 + 7 + 9
    assert_eq!(expect_int(&result), BigInt::from(25));
}

#[test]
fn array_members() {
    let result = invoke_main(
        "fun main(): Int {
             var xs = [1, 2, 3]
             xs.append(4)
             xs.insert(at: 0, 0)
             let removed = xs.remove(at: 2)
             let first = xs.removeFirst()
             let last = xs.removeLast()
             let has = xs.contains(1) ? 1 : 0
             return removed * 1000 + first * 100 + last * 10 + has
         }",
    );
    // xs: [0 1 2 3 4] -> remove(at: 2) = 2 -> [0 1 3 4]
    // removeFirst = 0 -> [1 3 4]; removeLast = 4 -> [1 3]; contains(1)
    assert_eq!(expect_int(&result), BigInt::from(2041));
}

#[test]
fn array_concat_operator() {
    let result = invoke_main("fun main(): [Int] { return [1, 2] & [3] }");
    assert!(values_equal(
        &result,
        &Value::array(vec![Value::from(1), Value::from(2), Value::from(3)])
    ));
}

#[test]
fn string_concat_operator() {
    let result = invoke_main(r#"fun main(): String { return "ab" & "cd" }"#);
    assert!(values_equal(&result, &Value::from("abcd")));
}

#[test]
fn dictionary_members_and_index() {
    let result = invoke_main(
        r#"fun main(): Int {
             var d = {"c": 3, "b": 2}
             let old = d.insert(key: "c", 9) ?? 0
             let gone = d.remove(key: "b") ?? 0
             let read = d["c"] ?? 0
             let absent = d["zzz"] ?? 7
             return old * 1000 + gone * 100 + read * 10 + d.length + absent - 7
         }"#,
    );
    // old = 3, gone = 2, read = 9, length = 1, absent -> fallback 7
    assert_eq!(expect_int(&result), BigInt::from(3291));
}

#[test]
fn bound_methods_retain_receiver_identity() {
    let result = invoke_main(
        "fun main(): Int {
             let xs = [1, 2]
             let add = xs.append
             add(3)
             return xs.length
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(3));
}

#[test]
fn closures_capture_their_defining_scope() {
    let result = invoke_main(
        "fun makeCounter(): ((): Int) {
             var count = 0
             return fun (): Int {
                 count = count + 1
                 return count
             }
         }
         fun main(): Int {
             let counter = makeCounter()
             counter()
             counter()
             return counter()
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(3));
}

#[test]
fn swap_exchanges_variables() {
    let result = invoke_main(
        "fun main(): Int {
             var a = 1
             var b = 2
             a <-> b
             return a * 10 + b
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(21));
}

#[test]
fn fixed_width_arithmetic_overflows() {
    let mut runner = runner(
        "fun main(): Int8 {
             let x: Int8 = 100
             let y: Int8 = 28
             return x + y
         }",
    );
    let error = runner.invoke("main", vec![]).expect_err("must overflow");
    assert!(matches!(error, covenant::RuntimeError::Overflow { .. }), "got {error}");
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let mut runner = runner("fun main(): Int { let zero = 0; return 1 / zero }");
    let error = runner.invoke("main", vec![]).expect_err("must fail");
    assert!(matches!(error, covenant::RuntimeError::DivisionByZero { .. }), "got {error}");
}

#[test]
fn existential_boxing_into_any() {
    let result = invoke_main("fun main(): Bool { let x: Any? = 5; return x == nil }");
    assert!(values_equal(&result, &Value::from(false)));

    let result = invoke_main("fun main(): Bool { let x: Any? = nil; return x == nil }");
    assert!(values_equal(&result, &Value::from(true)));
}

#[test]
fn existentials_cross_function_boundaries() {
    // binding an argument into an `Any?` parameter boxes it, so the
    // failable cast inside the callee sees the value's own type
    let result = invoke_main(
        "fun unwrap(_ x: Any?): Int {
             return x as? Int ?? -1
         }
         fun main(): Int {
             return unwrap(5)
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(5));

    let result = invoke_main(
        "fun unwrap(_ x: Any?): Int {
             return x as? Int ?? -1
         }
         fun main(): Int {
             return unwrap(true)
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(-1));
}

#[test]
fn returned_values_box_into_any() {
    let result = invoke_main(
        "fun pick(): Any? {
             return 7
         }
         fun main(): Int {
             return pick() as? Int ?? -1
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(7));
}

#[test]
fn failable_cast_on_boxed_value() {
    let result = invoke_main(
        "fun main(): Int {
             let x: Any? = 5
             return x as? Int ?? 0
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(5));

    let result = invoke_main(
        "fun main(): Int {
             let x: Any? = true
             return x as? Int ?? 0
         }",
    );
    assert_eq!(expect_int(&result), BigInt::from(0));
}

#[test]
fn panic_aborts_with_message() {
    let mut runner = runner(r#"fun main() { panic("boom") }"#);
    let error = runner.invoke("main", vec![]).expect_err("panic must abort");
    match error {
        covenant::RuntimeError::Panic { message, .. } => assert_eq!(message, "boom"),
        other => panic!("expected panic, got {other}"),
    }
}

#[test]
fn copy_isolation_through_copy_chains() {
    let result = invoke_main(
        "struct Box {
             pub(set) var value: Int
             init() {
                 self.value = 1
             }
         }
         fun main(): Int {
             let a = Box()
             let b = a
             let c = b
             c.value = 99
             return a.value * 100 + b.value * 10 + c.value
         }",
    );
    // only c sees the mutation: 1 * 100 + 1 * 10 + 99
    assert_eq!(expect_int(&result), BigInt::from(209));
}
