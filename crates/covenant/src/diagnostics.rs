//! Structured diagnostics accumulated by the lexer, parser, and checker.
//!
//! Diagnostics are the non-fatal error family: stages collect as many as
//! they can before giving up, and the embedder receives them as a batch.
//! Runtime errors are a separate family, see `interpreter::errors`.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::position::Span;

/// The radix family an integer literal was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum IntegerLiteralKind {
    Decimal,
    Hex,
    Octal,
    Binary,
    /// A prefix that looks like a radix marker but is not one of `0x`/`0o`/`0b`.
    Unknown,
}

/// What exactly is wrong with a rejected number literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum InvalidNumberLiteralKind {
    #[strum(serialize = "leading underscore")]
    LeadingUnderscore,
    #[strum(serialize = "trailing underscore")]
    TrailingUnderscore,
    #[strum(serialize = "unknown prefix")]
    UnknownPrefix,
}

/// A single diagnostic with its source range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub span: Span,
}

impl Diagnostic {
    pub const fn new(kind: DiagnosticKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.kind)
    }
}

/// Every diagnostic the front end can produce.
///
/// Type names inside payloads are pre-rendered strings: diagnostics outlive
/// the checker's type tables and must stay cheaply serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    // --- lexer / parser ---
    Syntax { message: String },
    InvalidIntegerLiteral {
        literal: String,
        literal_kind: IntegerLiteralKind,
        invalid_kind: InvalidNumberLiteralKind,
    },
    JuxtaposedUnaryOperators,

    // --- checker: names and access ---
    NotDeclared { name: String },
    Redeclaration { name: String },
    AccessViolation { name: String },
    AssignmentToConstant { name: String },

    // --- checker: types ---
    TypeMismatch { expected: String, actual: String },
    NotCallable { ty: String },
    ArgumentCountMismatch { expected: usize, actual: usize },
    ArgumentLabelMismatch { expected: String, actual: String },
    InvalidCast { from: String, to: String },
    IntegerLiteralOutOfRange { ty: String },
    InvalidOptionalBinding { ty: String },
    RestrictionNotInterface { name: String },
    InvalidEmit { ty: String },
    InvalidDestroy { ty: String },
    InvalidConditionBefore,

    // --- checker: composites ---
    InterfaceNonConformance {
        composite: String,
        interface: String,
        missing: String,
    },
    MissingInitializer { composite: String },
    FieldNotInitialized { composite: String, field: String },

    // --- checker: resources ---
    ResourceLoss { name: String },
    ResourceUseAfterInvalidation { name: String },
    MissingMoveOperation,
    InvalidMoveOperation,
    MissingCreate,
    InvalidResourceCopy,
    InvalidResourceIndexRead,
    UnhandledResource,
    ResourceAnnotationMismatch { ty: String, annotated: bool },

    // --- checker: control flow ---
    UnreachableStatement,
    ReturnOutsideFunction,
    ControlOutsideLoop,
}

impl DiagnosticKind {
    /// Whether this diagnostic rejects the program or merely warns.
    /// Unreachable statements are reported but do not fail the check.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::UnreachableStatement)
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { message } => write!(f, "{message}"),
            Self::InvalidIntegerLiteral {
                literal,
                literal_kind,
                invalid_kind,
            } => {
                write!(f, "invalid {literal_kind} integer literal `{literal}`: {invalid_kind}")
            }
            Self::JuxtaposedUnaryOperators => {
                write!(f, "unary operators must not be juxtaposed")
            }
            Self::NotDeclared { name } => write!(f, "cannot find `{name}` in this scope"),
            Self::Redeclaration { name } => write!(f, "`{name}` is already declared in this scope"),
            Self::AccessViolation { name } => write!(f, "access to `{name}` is not permitted here"),
            Self::AssignmentToConstant { name } => {
                write!(f, "cannot assign to constant `{name}`")
            }
            Self::TypeMismatch { expected, actual } => {
                write!(f, "mismatched types: expected `{expected}`, found `{actual}`")
            }
            Self::NotCallable { ty } => write!(f, "value of type `{ty}` is not callable"),
            Self::ArgumentCountMismatch { expected, actual } => {
                write!(f, "expected {expected} argument(s), found {actual}")
            }
            Self::ArgumentLabelMismatch { expected, actual } => {
                write!(f, "incorrect argument label: expected `{expected}`, found `{actual}`")
            }
            Self::InvalidCast { from, to } => {
                write!(f, "cannot cast value of type `{from}` to `{to}`")
            }
            Self::IntegerLiteralOutOfRange { ty } => {
                write!(f, "integer literal is out of range for `{ty}`")
            }
            Self::InvalidOptionalBinding { ty } => {
                write!(f, "conditional binding requires an optional, found `{ty}`")
            }
            Self::RestrictionNotInterface { name } => {
                write!(f, "restriction `{name}` is not an interface")
            }
            Self::InvalidEmit { ty } => write!(f, "`emit` requires an event, found `{ty}`"),
            Self::InvalidDestroy { ty } => {
                write!(f, "`destroy` requires a resource, found `{ty}`")
            }
            Self::InvalidConditionBefore => {
                write!(f, "`before` is only permitted inside post-conditions")
            }
            Self::InterfaceNonConformance {
                composite,
                interface,
                missing,
            } => {
                write!(f, "`{composite}` does not conform to `{interface}`: missing {missing}")
            }
            Self::MissingInitializer { composite } => {
                write!(f, "composite `{composite}` is missing an initializer")
            }
            Self::FieldNotInitialized { composite, field } => {
                write!(f, "initializer of `{composite}` does not assign field `{field}`")
            }
            Self::ResourceLoss { name } => {
                write!(f, "resource `{name}` goes out of scope without being moved or destroyed")
            }
            Self::ResourceUseAfterInvalidation { name } => {
                write!(f, "resource `{name}` is used after it was moved or destroyed")
            }
            Self::MissingMoveOperation => {
                write!(f, "resource values must be transferred with the move operator `<-`")
            }
            Self::InvalidMoveOperation => {
                write!(f, "the move operator `<-` is only valid for resource values")
            }
            Self::MissingCreate => {
                write!(f, "resources can only be instantiated inside a `create` expression")
            }
            Self::UnhandledResource => {
                write!(f, "resource value is neither moved, destroyed, nor bound")
            }
            Self::ResourceAnnotationMismatch { ty, annotated } => {
                if *annotated {
                    write!(f, "`@` is only valid on resource types, `{ty}` is not a resource")
                } else {
                    write!(f, "resource type `{ty}` must be annotated with `@`")
                }
            }
            Self::InvalidResourceCopy => {
                write!(f, "resource values cannot be copied")
            }
            Self::InvalidResourceIndexRead => {
                write!(f, "resources inside containers cannot be read by index; use a swap")
            }
            Self::UnreachableStatement => write!(f, "unreachable statement"),
            Self::ReturnOutsideFunction => write!(f, "`return` outside of a function"),
            Self::ControlOutsideLoop => {
                write!(f, "`break` and `continue` are only permitted inside loops")
            }
        }
    }
}

/// Aggregate of all parser-stage diagnostics for one source.
///
/// The parser recovers past localized errors where it can, so one parse
/// can surface several entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.diagnostics {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ParserError {}

/// Ordered collection of diagnostics built up by the checker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: DiagnosticKind, span: Span) {
        self.entries.push(Diagnostic::new(kind, span));
    }

    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when any entry is more than a warning.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.kind.is_error())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.entries {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
            first = false;
        }
        Ok(())
    }
}
