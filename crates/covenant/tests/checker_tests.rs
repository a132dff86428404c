use covenant::{DiagnosticKind, Diagnostics, Runner, RunnerError, StandardLibrary, parse_program};
use pretty_assertions::assert_eq;

/// Checks a program expected to be rejected and returns its diagnostics.
fn check_diagnostics(source: &str) -> Diagnostics {
    match Runner::new(source, "test.cov") {
        Ok(_) => panic!("program should be rejected"),
        Err(RunnerError::Check(diagnostics)) => diagnostics,
        Err(other) => panic!("expected checker diagnostics, got {other}"),
    }
}

fn has_kind(diagnostics: &Diagnostics, predicate: impl Fn(&DiagnosticKind) -> bool) -> bool {
    diagnostics.iter().any(|diagnostic| predicate(&diagnostic.kind))
}

#[test]
fn undeclared_identifier() {
    let diagnostics = check_diagnostics("fun main(): Int { return missing }");
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::NotDeclared { name } if name == "missing")
    }));
}

#[test]
fn type_mismatch_on_declaration() {
    let diagnostics = check_diagnostics(r#"fun main() { let x: Int = "nope" }"#);
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::TypeMismatch { .. })));
}

#[test]
fn names_resolve_at_their_source_position_only() {
    // the global is declared after the function body that reads it;
    // there is no hoisting
    let diagnostics = check_diagnostics(
        "fun main(): Int { return later }
         let later = 5",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::NotDeclared { name } if name == "later")
    }));
}

#[test]
fn forward_references_between_functions_are_fine() {
    let runner = Runner::new(
        "fun even(_ n: Int): Bool {
             if n == 0 { return true }
             return odd(n - 1)
         }
         fun odd(_ n: Int): Bool {
             if n == 0 { return false }
             return even(n - 1)
         }",
        "test.cov",
    );
    assert!(runner.is_ok());
}

#[test]
fn unreachable_statement_is_a_warning_not_an_error() {
    let runner = Runner::new(
        "fun main(): Int {
             return 1
             return 2
         }",
        "test.cov",
    )
    .expect("unreachable code must not reject the program");
    assert!(
        runner
            .warnings()
            .iter()
            .any(|d| matches!(d.kind, DiagnosticKind::UnreachableStatement))
    );
}

#[test]
fn checker_output_is_deterministic() {
    let source = "fun main() { let x: Int = missing + true; y }";
    let first = check_diagnostics(source);
    let second = check_diagnostics(source);
    assert_eq!(first, second);
}

#[test]
fn resource_loss_at_scope_end() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main() {
             let r <- create R()
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::ResourceLoss { name } if name == "r")
    }));
}

#[test]
fn resource_use_after_move() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main() {
             let r <- create R()
             let s <- r
             let t <- r
             destroy s
             destroy t
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::ResourceUseAfterInvalidation { name } if name == "r")
    }));
}

#[test]
fn resources_require_the_move_operator() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main() {
             let r = create R()
             destroy r
         }",
    );
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::MissingMoveOperation)));
}

#[test]
fn value_types_reject_the_move_operator() {
    let diagnostics = check_diagnostics("fun main() { let x <- 1 }");
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::InvalidMoveOperation)));
}

#[test]
fn resources_must_be_created_inside_create() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main() {
             let r <- R()
             destroy r
         }",
    );
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::MissingCreate)));
}

#[test]
fn moved_in_one_branch_cannot_be_used_after() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main(_ flag: Bool) {
             let r <- create R()
             if flag {
                 destroy r
             }
             destroy r
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::ResourceUseAfterInvalidation { .. })
    }));
}

#[test]
fn index_reads_of_resource_containers_are_rejected() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main() {
             let rs <- [<-create R()]
             let r <- rs[0]
             destroy r
             destroy rs
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::InvalidResourceIndexRead)
    }));
}

#[test]
fn destroy_of_a_value_type_is_rejected() {
    let diagnostics = check_diagnostics("fun main() { destroy 1 }");
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::InvalidDestroy { .. })));
}

#[test]
fn unhandled_resource_expression() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun make(): @R {
             return <-create R()
         }
         fun main() {
             make()
         }",
    );
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::UnhandledResource)));
}

#[test]
fn resource_annotation_mismatch() {
    let diagnostics = check_diagnostics(
        "resource R {}
         fun main() {
             let r: R <- create R()
             destroy r
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::ResourceAnnotationMismatch { .. })
    }));
}

#[test]
fn private_members_are_inaccessible_outside() {
    let diagnostics = check_diagnostics(
        "struct Wallet {
             priv var secret: Int
             init() {
                 self.secret = 1
             }
         }
         fun main(): Int {
             let wallet = Wallet()
             return wallet.secret
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::AccessViolation { name } if name == "secret")
    }));
}

#[test]
fn public_read_does_not_allow_external_write() {
    let diagnostics = check_diagnostics(
        "struct Wallet {
             pub var balance: Int
             init() {
                 self.balance = 0
             }
         }
         fun main() {
             let wallet = Wallet()
             wallet.balance = 10
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::AccessViolation { name } if name == "balance")
    }));
}

#[test]
fn assignment_to_constant_is_rejected() {
    let diagnostics = check_diagnostics("fun main() { let x = 1; x = 2 }");
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::AssignmentToConstant { name } if name == "x")
    }));
}

#[test]
fn interface_conformance_requires_matching_members() {
    let diagnostics = check_diagnostics(
        r#"struct interface Named {
             pub fun name(): String
         }
         struct Person: Named {
             pub fun label(): String {
                 return "p"
             }
         }"#,
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::InterfaceNonConformance { .. })
    }));
}

#[test]
fn conforming_composite_is_accepted() {
    let runner = Runner::new(
        r#"struct interface Named {
             pub fun name(): String
         }
         struct Person: Named {
             pub fun name(): String {
                 return "p"
             }
         }"#,
        "test.cov",
    );
    assert!(runner.is_ok());
}

#[test]
fn before_is_only_legal_in_post_conditions() {
    let diagnostics = check_diagnostics(
        "var x = 0
         fun main() {
             pre { before(x) == 0 }
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::InvalidConditionBefore)
    }));
}

#[test]
fn conditional_binding_requires_an_optional() {
    let diagnostics = check_diagnostics(
        "fun main() {
             if let x = 1 { }
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::InvalidOptionalBinding { .. })
    }));
}

#[test]
fn invalid_static_cast_is_rejected() {
    let diagnostics = check_diagnostics(r#"fun main() { let x = "s" as Int }"#);
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::InvalidCast { .. })));
}

#[test]
fn integer_literal_out_of_range() {
    let diagnostics = check_diagnostics("fun main() { let x: Int8 = 300 }");
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::IntegerLiteralOutOfRange { .. })
    }));
}

#[test]
fn argument_labels_are_part_of_the_signature() {
    let diagnostics = check_diagnostics(
        "fun pay(to recipient: Int, amount: Int) { }
         fun main() {
             pay(from: 1, amount: 2)
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::ArgumentLabelMismatch { .. })
    }));
}

#[test]
fn field_initialization_is_required() {
    let diagnostics = check_diagnostics(
        "struct Point {
             pub var x: Int
             pub var y: Int
             init() {
                 self.x = 0
             }
         }",
    );
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::FieldNotInitialized { field, .. } if field == "y")
    }));
}

#[test]
fn empty_standard_library_has_no_panic() {
    let output = parse_program(r#"fun main() { panic("boom") }"#);
    assert!(output.error.is_none());
    let result = covenant::check(output.program, &StandardLibrary::empty());
    let diagnostics = result.expect_err("panic must be unknown without the standard library");
    assert!(has_kind(&diagnostics, |kind| {
        matches!(kind, DiagnosticKind::NotDeclared { name } if name == "panic")
    }));
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let diagnostics = check_diagnostics("fun main() { break }");
    assert!(has_kind(&diagnostics, |kind| matches!(kind, DiagnosticKind::ControlOutsideLoop)));
}
