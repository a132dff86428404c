//! The standard library: an explicit, per-checker/per-interpreter value
//! set.
//!
//! Nothing here is a process-wide singleton. Passing
//! [`StandardLibrary::empty`] yields a language without `panic` or
//! `storage`, which is supported.

use std::rc::Rc;

use crate::{
    checker::ty::{FunctionType, ParameterType, Type},
    interpreter::{
        errors::{RunResult, RuntimeError},
        value::{HostFunction, StorageHandle, Value},
    },
    position::Span,
};

/// One predeclared global: a name, its checked type, and the value
/// installed into the interpreter's global environment.
#[derive(Debug)]
pub struct StdlibEntry {
    pub name: String,
    pub ty: Type,
    pub value: Value,
}

/// The registry handed to the checker and the interpreter.
#[derive(Debug, Default)]
pub struct StandardLibrary {
    entries: Vec<StdlibEntry>,
}

impl StandardLibrary {
    /// No predeclared values at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The baseline library: `panic(message: String): Never`.
    #[must_use]
    pub fn standard() -> Self {
        let mut library = Self::empty();
        library.declare_host_function(
            "panic",
            vec![ParameterType {
                label: None,
                name: "message".to_string(),
                ty: Type::String,
            }],
            Type::Never,
            Box::new(|arguments: Vec<Value>, span: Span| -> RunResult<Value> {
                let message = match arguments.first() {
                    Some(Value::String(message)) => message.as_ref().clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Err(RuntimeError::Panic { message, span })
            }),
        );
        library
    }

    /// The baseline library plus a predeclared `storage` value backed by
    /// the given handle.
    #[must_use]
    pub fn with_storage(storage: StorageHandle) -> Self {
        let mut library = Self::standard();
        library.declare_value("storage", Type::Storage, Value::Storage(storage));
        library
    }

    /// Installs a plain value declaration.
    pub fn declare_value(&mut self, name: impl Into<String>, ty: Type, value: Value) {
        self.entries.push(StdlibEntry {
            name: name.into(),
            ty,
            value,
        });
    }

    /// Installs a host function: the callable receives the evaluated
    /// argument values and the source span of the call.
    pub fn declare_host_function(
        &mut self,
        name: impl Into<String>,
        parameters: Vec<ParameterType>,
        return_type: Type,
        call: Box<dyn Fn(Vec<Value>, Span) -> RunResult<Value>>,
    ) {
        let name = name.into();
        let ty = Type::Function(Rc::new(FunctionType {
            parameters,
            return_type,
        }));
        let value = Value::Host(Rc::new(HostFunction { name: name.clone(), call }));
        self.entries.push(StdlibEntry { name, ty, value });
    }

    #[must_use]
    pub fn entries(&self) -> &[StdlibEntry] {
        &self.entries
    }
}
