#![doc = include_str!("../../../README.md")]

pub mod ast;
pub mod checker;
pub mod diagnostics;
pub mod import;
pub mod interpreter;
mod lexer;
pub mod meter;
pub mod parse;
pub mod position;
pub mod run;
pub mod stdlib;
mod token;

pub use crate::{
    checker::{check, check_with_warnings, elaboration::CheckedProgram, ty::Type},
    diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, IntegerLiteralKind, InvalidNumberLiteralKind, ParserError},
    import::{ImportError, ImportResolver, MapResolver, link},
    interpreter::{
        Interpreter,
        errors::{ConditionKind, RunResult, RuntimeError},
        value::{EventValue, StorageBackend, StorageHandle, Value, values_equal},
    },
    meter::{LimitedMeter, Meter, MeterError, NoLimitMeter},
    parse::{ParseOutput, parse_expression, parse_program},
    position::{Position, Span},
    run::{MapStorage, Runner, RunnerError},
    stdlib::{StandardLibrary, StdlibEntry},
};
