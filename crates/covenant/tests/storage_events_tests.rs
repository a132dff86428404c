use covenant::{Runner, RuntimeError, Value, values_equal};
use pretty_assertions::assert_eq;

fn runner(source: &str) -> Runner {
    match Runner::new(source, "test.cov") {
        Ok(runner) => runner,
        Err(error) => panic!("program should check:\n{error}"),
    }
}

const VAULT: &str = "resource Vault {
    pub(set) var balance: Int
    init(balance: Int) {
        self.balance = balance
    }
    destroy() {}
}";

#[test]
fn storage_slots_are_type_keyed_and_optional() {
    let mut runner = runner(&format!(
        "{VAULT}
         fun save() {{
             storage[Vault] <- create Vault(balance: 100)
         }}
         fun stored(): Bool {{
             return storage[Vault] != nil
         }}"
    ));
    assert!(values_equal(&runner.invoke("stored", vec![]).unwrap(), &Value::from(false)));
    runner.invoke("save", vec![]).unwrap();
    assert!(values_equal(&runner.invoke("stored", vec![]).unwrap(), &Value::from(true)));
}

#[test]
fn references_dereference_through_storage() {
    let mut runner = runner(&format!(
        "{VAULT}
         fun save() {{
             storage[Vault] <- create Vault(balance: 42)
         }}
         fun read(): Int {{
             let vaultRef = &storage[Vault] as &Vault
             return vaultRef.balance
         }}"
    ));
    runner.invoke("save", vec![]).unwrap();
    let result = runner.invoke("read", vec![]).unwrap();
    assert!(values_equal(&result, &Value::from(42)));
}

#[test]
fn dereferencing_an_empty_slot_fails() {
    let mut runner = runner(&format!(
        "{VAULT}
         fun read(): Int {{
             let vaultRef = &storage[Vault] as &Vault
             return vaultRef.balance
         }}"
    ));
    let error = runner.invoke("read", vec![]).expect_err("empty slot must fail");
    assert!(matches!(error, RuntimeError::Dereference { .. }), "got {error}");
}

#[test]
fn writes_through_references_are_visible_in_storage() {
    let mut runner = runner(&format!(
        "{VAULT}
         fun save() {{
             storage[Vault] <- create Vault(balance: 1)
         }}
         fun bump() {{
             let vaultRef = &storage[Vault] as &Vault
             vaultRef.balance = vaultRef.balance + 1
         }}
         fun read(): Int {{
             let vaultRef = &storage[Vault] as &Vault
             return vaultRef.balance
         }}"
    ));
    runner.invoke("save", vec![]).unwrap();
    runner.invoke("bump", vec![]).unwrap();
    runner.invoke("bump", vec![]).unwrap();
    assert!(values_equal(&runner.invoke("read", vec![]).unwrap(), &Value::from(3)));
}

#[test]
fn swap_moves_resources_in_and_out_of_storage() {
    let mut runner = runner(&format!(
        "{VAULT}
         fun save() {{
             storage[Vault] <- create Vault(balance: 7)
         }}
         fun withdraw(): Int {{
             var slot: @Vault? <- nil
             slot <-> storage[Vault]
             let balance = slot?.balance ?? 0
             destroy slot
             return balance
         }}
         fun stored(): Bool {{
             return storage[Vault] != nil
         }}"
    ));
    runner.invoke("save", vec![]).unwrap();
    let result = runner.invoke("withdraw", vec![]).unwrap();
    assert!(values_equal(&result, &Value::from(7)));
    // the swap left nil behind
    assert!(values_equal(&runner.invoke("stored", vec![]).unwrap(), &Value::from(false)));
}

#[test]
fn emitted_events_carry_ordered_labeled_fields() {
    let mut runner = runner(
        "event Transfer(from: Int, to: Int, amount: Int)
         fun main() {
             emit Transfer(from: 1, to: 2, amount: 300)
             emit Transfer(from: 2, to: 1, amount: 5)
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    let events = runner.take_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name, "Transfer");
    let fields: Vec<&str> = events[0].fields.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(fields, ["from", "to", "amount"]);
    assert!(values_equal(&events[0].fields[2].1, &Value::from(300)));
    assert!(values_equal(&events[1].fields[2].1, &Value::from(5)));

    // drained: a second read sees nothing new
    assert!(runner.take_events().is_empty());
}

#[test]
fn events_are_delivered_synchronously_in_program_order() {
    let mut runner = runner(
        "event Step(n: Int)
         fun main() {
             var i = 0
             while i < 3 {
                 emit Step(n: i)
                 i = i + 1
             }
         }",
    );
    runner.invoke("main", vec![]).unwrap();
    let events = runner.take_events();
    let ns: Vec<i64> = events
        .iter()
        .map(|event| match &event.fields[0].1 {
            Value::Int(i) => i64::try_from(i).unwrap(),
            other => panic!("unexpected {other}"),
        })
        .collect();
    assert_eq!(ns, vec![0, 1, 2]);
}

#[test]
fn partial_effects_survive_a_failed_invocation() {
    let mut runner = runner(
        r#"event Step(n: Int)
         var count = 0
         fun main() {
             emit Step(n: 1)
             count = count + 1
             panic("late failure")
         }"#,
    );
    let error = runner.invoke("main", vec![]).expect_err("panic must abort");
    assert!(matches!(error, RuntimeError::Panic { .. }));
    // effects before the failure are not rolled back
    assert_eq!(runner.take_events().len(), 1);
    assert!(values_equal(&runner.global("count").unwrap(), &Value::from(1)));
}
