//! The trampoline: a step enumeration driven by a fixed-arity loop.
//!
//! Every evaluation reduces to a [`Trampoline`]: either a finished
//! [`Control`], a suspended thunk, or a `FlatMap` chaining a subroutine
//! into a continuation. The driver loop in the interpreter re-associates
//! nested `FlatMap`s instead of recursing, so deep language-level
//! recursion never grows the host stack.

use crate::{
    interpreter::{Interpreter, errors::RunResult, value::Value},
    position::Span,
};

/// The outcome of a statement or expression step.
///
/// Expressions always produce `Value`; the other variants are the
/// control-flow signals statements propagate until a loop or function
/// boundary catches them.
#[derive(Debug)]
pub(crate) enum Control {
    Value(Value),
    Return(Value, Span),
    Break,
    Continue,
}

pub(crate) type Thunk = Box<dyn FnOnce(&mut Interpreter) -> RunResult<Trampoline>>;
pub(crate) type Continuation = Box<dyn FnOnce(&mut Interpreter, Value) -> RunResult<Trampoline>>;
pub(crate) type ControlContinuation = Box<dyn FnOnce(&mut Interpreter, Control) -> RunResult<Trampoline>>;

pub(crate) enum Trampoline {
    Done(Control),
    More(Thunk),
    FlatMap {
        subroutine: Box<Trampoline>,
        then: ControlContinuation,
    },
}

impl Trampoline {
    pub(crate) fn value(value: Value) -> Self {
        Self::Done(Control::Value(value))
    }

    /// Chains a continuation that only runs on plain values; `Return`,
    /// `Break`, and `Continue` short-circuit past it.
    pub(crate) fn flat_map(self, then: Continuation) -> Self {
        Self::FlatMap {
            subroutine: Box::new(self),
            then: Box::new(move |interpreter, control| match control {
                Control::Value(value) => then(interpreter, value),
                other => Ok(Self::Done(other)),
            }),
        }
    }

    /// Chains a continuation that observes every control outcome. Used
    /// at scope, loop, and function boundaries, which must run cleanup
    /// (or catch the signal) regardless of how the subroutine ended.
    pub(crate) fn then_control(self, then: ControlContinuation) -> Self {
        Self::FlatMap {
            subroutine: Box::new(self),
            then,
        }
    }
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done(control) => f.debug_tuple("Done").field(control).finish(),
            Self::More(_) => f.write_str("More(..)"),
            Self::FlatMap { .. } => f.write_str("FlatMap(..)"),
        }
    }
}
