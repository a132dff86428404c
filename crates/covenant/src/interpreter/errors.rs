//! Runtime errors: the short-circuiting error family.
//!
//! Unlike diagnostics these are never accumulated; the first one aborts
//! the invocation. Prior side effects (mutations, emitted events,
//! storage writes) remain as they occurred; rollback is the embedder's
//! concern.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::{meter::MeterError, position::Span};

/// Whether a failed condition was a pre- or post-condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConditionKind {
    Pre,
    Post,
}

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RuntimeError>;

/// Every error the interpreter (or a host function) can surface.
/// All variants carry the source span of the failing construct.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// A name was not found at runtime. The checker prevents this for
    /// checked programs; it remains reachable through host-driven
    /// invocation of an unknown global.
    NotDeclared { name: String, span: Span },
    /// A non-function value was invoked.
    NotInvokable { span: Span },
    /// A pre- or post-condition evaluated to false. The message was
    /// already evaluated in the condition's own environment.
    Condition {
        kind: ConditionKind,
        message: String,
        span: Span,
    },
    /// A reference was dereferenced while its storage slot was empty.
    Dereference { span: Span },
    /// Array or string access outside the valid range.
    InvalidIndex { message: String, span: Span },
    /// Fixed-width integer arithmetic left the type's range.
    Overflow { ty: String, span: Span },
    /// Integer division or remainder by zero.
    DivisionByZero { span: Span },
    /// Raised by the `panic` host function.
    Panic { message: String, span: Span },
    /// An execution limit was exceeded.
    Meter { error: MeterError, span: Span },
    /// An impossible state: the checker should have rejected the
    /// program. Reaching this is a bug in the pipeline, not the program.
    Invariant { message: String, span: Span },
}

impl RuntimeError {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::NotDeclared { span, .. }
            | Self::NotInvokable { span }
            | Self::Condition { span, .. }
            | Self::Dereference { span }
            | Self::InvalidIndex { span, .. }
            | Self::Overflow { span, .. }
            | Self::DivisionByZero { span }
            | Self::Panic { span, .. }
            | Self::Meter { span, .. }
            | Self::Invariant { span, .. } => *span,
        }
    }

    pub(crate) fn invariant(message: impl Into<String>, span: Span) -> Self {
        Self::Invariant {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDeclared { name, span } => write!(f, "{span}: `{name}` is not declared"),
            Self::NotInvokable { span } => write!(f, "{span}: value is not invokable"),
            Self::Condition { kind, message, span } => {
                if message.is_empty() {
                    write!(f, "{span}: {kind}-condition failed")
                } else {
                    write!(f, "{span}: {kind}-condition failed: {message}")
                }
            }
            Self::Dereference { span } => write!(f, "{span}: dereference of an empty storage slot"),
            Self::InvalidIndex { message, span } => write!(f, "{span}: {message}"),
            Self::Overflow { ty, span } => write!(f, "{span}: arithmetic overflow on `{ty}`"),
            Self::DivisionByZero { span } => write!(f, "{span}: division by zero"),
            Self::Panic { message, span } => write!(f, "{span}: panic: {message}"),
            Self::Meter { error, span } => write!(f, "{span}: {error}"),
            Self::Invariant { message, span } => write!(f, "{span}: internal invariant violated: {message}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
