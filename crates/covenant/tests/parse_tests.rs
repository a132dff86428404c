use covenant::{
    DiagnosticKind, IntegerLiteralKind, InvalidNumberLiteralKind, parse_expression, parse_program,
};
use pretty_assertions::assert_eq;

fn parse_diagnostics(source: &str) -> Vec<DiagnosticKind> {
    let output = parse_program(source);
    output
        .error
        .map(|error| error.diagnostics.into_iter().map(|d| d.kind).collect())
        .unwrap_or_default()
}

#[test]
fn valid_program_parses_cleanly() {
    let output = parse_program(
        "struct Token {
             pub var amount: Int
             init(amount: Int) {
                 self.amount = amount
             }
         }
         fun main(): Int {
             let token = Token(amount: 3)
             return token.amount
         }",
    );
    assert!(output.error.is_none());
    assert!(output.input_is_complete);
    assert_eq!(output.program.declarations.len(), 2);
}

#[test]
fn invalid_integer_literals_are_structured_errors() {
    let kinds = parse_diagnostics("let x = 0x_1");
    assert_eq!(
        kinds,
        vec![DiagnosticKind::InvalidIntegerLiteral {
            literal: "0x_1".to_string(),
            literal_kind: IntegerLiteralKind::Hex,
            invalid_kind: InvalidNumberLiteralKind::LeadingUnderscore,
        }]
    );

    let kinds = parse_diagnostics("let x = 0o7_");
    assert_eq!(
        kinds,
        vec![DiagnosticKind::InvalidIntegerLiteral {
            literal: "0o7_".to_string(),
            literal_kind: IntegerLiteralKind::Octal,
            invalid_kind: InvalidNumberLiteralKind::TrailingUnderscore,
        }]
    );

    let kinds = parse_diagnostics("let x = 0z9");
    assert_eq!(
        kinds,
        vec![DiagnosticKind::InvalidIntegerLiteral {
            literal: "0z9".to_string(),
            literal_kind: IntegerLiteralKind::Unknown,
            invalid_kind: InvalidNumberLiteralKind::UnknownPrefix,
        }]
    );
}

#[test]
fn juxtaposed_unary_operators_are_a_distinct_error() {
    let kinds = parse_diagnostics("let x = --1");
    assert!(kinds.contains(&DiagnosticKind::JuxtaposedUnaryOperators));

    let kinds = parse_diagnostics("let b = !!true");
    assert!(kinds.contains(&DiagnosticKind::JuxtaposedUnaryOperators));
}

#[test]
fn truncated_input_is_reported_as_incomplete() {
    let output = parse_program("fun main() {");
    assert!(!output.input_is_complete);
    assert!(output.error.is_some());

    let output = parse_program("let s = \"abc");
    assert!(!output.input_is_complete);

    // a complete but wrong program is NOT incomplete
    let output = parse_program("fun main() } {");
    assert!(output.input_is_complete);
    assert!(output.error.is_some());
}

#[test]
fn double_semicolons_are_rejected() {
    let kinds = parse_diagnostics("let a = 1;; let b = 2");
    assert!(kinds.iter().any(|kind| {
        matches!(kind, DiagnosticKind::Syntax { message } if message.contains("extraneous"))
    }));

    // single separators are fine
    assert!(parse_program("let a = 1; let b = 2").error.is_none());
}

#[test]
fn optional_reference_types_are_a_parser_error() {
    let kinds = parse_diagnostics("fun f(_ x: &Int?) { }");
    assert!(kinds.iter().any(|kind| {
        matches!(kind, DiagnosticKind::Syntax { message } if message.contains("optional reference"))
    }));
}

#[test]
fn parse_expression_for_repl_inputs() {
    assert!(parse_expression("1 + 2 * 3").is_ok());
    assert!(parse_expression("xs[0]?.name ?? \"anon\"").is_ok());
    assert!(parse_expression("1 +").is_err());
    assert!(parse_expression("1 2").is_err());
}

#[test]
fn nil_coalescing_binds_looser_than_the_conditional() {
    use covenant::ast::{BinaryOperator, ExpressionKind};

    let expression = parse_expression("a ?? b ? c : d").unwrap();
    let ExpressionKind::Binary { operator, right, .. } = &expression.kind else {
        panic!("expected a binary expression, got {:?}", expression.kind);
    };
    assert_eq!(*operator, BinaryOperator::NilCoalesce);
    assert!(matches!(right.kind, ExpressionKind::Conditional { .. }));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    use covenant::ast::{BinaryOperator, ExpressionKind};

    let expression = parse_expression("1 + 2 * 3").unwrap();
    let ExpressionKind::Binary { operator, right, .. } = &expression.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*operator, BinaryOperator::Add);
    assert!(matches!(
        right.kind,
        ExpressionKind::Binary {
            operator: BinaryOperator::Multiply,
            ..
        }
    ));
}

#[test]
fn transfer_operators_are_distinguished() {
    use covenant::ast::{DeclarationKind, Transfer};

    let output = parse_program("let a = 1");
    let DeclarationKind::Variable(declaration) = &output.program.declarations[0].kind else {
        panic!("expected a variable declaration");
    };
    assert_eq!(declaration.transfer, Transfer::Copy);

    let output = parse_program("let a <- b");
    let DeclarationKind::Variable(declaration) = &output.program.declarations[0].kind else {
        panic!("expected a variable declaration");
    };
    assert_eq!(declaration.transfer, Transfer::Move);
}

#[test]
fn import_declarations_accept_strings_and_addresses() {
    use covenant::ast::{DeclarationKind, ImportLocation};

    let output = parse_program(r#"import "lib""#);
    assert!(output.error.is_none());
    let DeclarationKind::Import(import) = &output.program.declarations[0].kind else {
        panic!("expected an import");
    };
    assert_eq!(import.location, ImportLocation::String("lib".to_string()));
    assert!(import.identifiers.is_empty());

    let output = parse_program("import helper, other from 0x0102");
    assert!(output.error.is_none());
    let DeclarationKind::Import(import) = &output.program.declarations[0].kind else {
        panic!("expected an import");
    };
    assert_eq!(import.location, ImportLocation::Address(vec![1, 2]));
    assert_eq!(import.identifiers.as_slice(), ["helper".to_string(), "other".to_string()]);
}

#[test]
fn spans_cover_monotonically_increasing_offsets() {
    let output = parse_program("let a = 1\nlet b = 2\nfun main() { }");
    assert!(output.error.is_none());
    let mut last_start = 0;
    for declaration in &output.program.declarations {
        assert!(declaration.span.start.offset >= last_start);
        assert!(declaration.span.end.offset >= declaration.span.start.offset);
        last_start = declaration.span.start.offset;
    }
}

#[test]
fn event_declarations_parse_into_composites() {
    use covenant::ast::{CompositeKind, DeclarationKind};

    let output = parse_program("event Transfer(from: Int, to: Int)");
    assert!(output.error.is_none());
    let DeclarationKind::Composite(composite) = &output.program.declarations[0].kind else {
        panic!("expected a composite");
    };
    assert_eq!(composite.kind, CompositeKind::Event);
    assert_eq!(composite.members.special_functions.len(), 1);
    assert_eq!(composite.members.special_functions[0].parameters.len(), 2);
}
