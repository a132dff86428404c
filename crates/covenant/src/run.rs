//! Public interface for running Covenant code.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    ast::Program,
    checker::{check_with_warnings, elaboration::CheckedProgram},
    diagnostics::{Diagnostics, ParserError},
    import::{ImportError, ImportResolver, link},
    interpreter::{
        Interpreter,
        errors::RuntimeError,
        value::{EventValue, StorageBackend, StorageHandle, Value},
    },
    meter::Meter,
    parse::parse_program,
    stdlib::StandardLibrary,
};

/// Everything that can go wrong while building a [`Runner`].
#[derive(Debug)]
pub enum RunnerError {
    Parse(ParserError),
    Import(ImportError),
    Check(Diagnostics),
    /// A top-level declaration failed while initializing.
    Runtime(RuntimeError),
    Snapshot(postcard::Error),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(error) => write!(f, "{error}"),
            Self::Import(error) => write!(f, "{error}"),
            Self::Check(diagnostics) => write!(f, "{diagnostics}"),
            Self::Runtime(error) => write!(f, "{error}"),
            Self::Snapshot(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for RunnerError {}

impl From<ImportError> for RunnerError {
    fn from(error: ImportError) -> Self {
        Self::Import(error)
    }
}

impl From<RuntimeError> for RunnerError {
    fn from(error: RuntimeError) -> Self {
        Self::Runtime(error)
    }
}

/// An in-memory storage backend, sufficient for tests and simple
/// embedders. Slot order is stable for deterministic iteration.
#[derive(Debug, Default)]
pub struct MapStorage {
    slots: IndexMap<String, Value>,
}

impl MapStorage {
    /// A fresh, empty handle.
    #[must_use]
    pub fn handle() -> StorageHandle {
        Rc::new(RefCell::new(Self::default()))
    }
}

impl StorageBackend for MapStorage {
    fn get(&self, key: &str) -> Option<Value> {
        self.slots.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.slots.insert(key.to_string(), value);
            }
            None => {
                self.slots.shift_remove(key);
            }
        }
    }
}

/// The binary snapshot format of a parsed program. Elaboration tables
/// are intentionally not serialized; loading re-checks the tree, which
/// is deterministic for a fixed program and library.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    source_name: String,
    program: Program,
}

/// Primary embedding facade: parse + link + check at construction, then
/// invoke top-level functions and read globals.
///
/// # Example
/// ```
/// use covenant::{Runner, Value};
///
/// let mut runner = Runner::new("fun double(_ n: Int): Int { return n * 2 }", "test.cov").unwrap();
/// let result = runner.invoke("double", vec![Value::from(21)]).unwrap();
/// assert!(covenant::values_equal(&result, &Value::from(42)));
/// ```
pub struct Runner {
    source_name: String,
    checked: Rc<CheckedProgram>,
    interpreter: Interpreter,
    storage: StorageHandle,
    events: Rc<RefCell<Vec<EventValue>>>,
    warnings: Diagnostics,
}

impl Runner {
    /// Parses and checks `code` with the standard library and an empty
    /// in-memory storage.
    pub fn new(code: &str, source_name: &str) -> Result<Self, RunnerError> {
        Self::with_resolver(code, source_name, None)
    }

    /// Like [`Runner::new`], resolving import declarations through the
    /// given resolver.
    pub fn with_resolver(
        code: &str,
        source_name: &str,
        resolver: Option<&mut dyn ImportResolver>,
    ) -> Result<Self, RunnerError> {
        let output = parse_program(code);
        if let Some(error) = output.error {
            return Err(RunnerError::Parse(error));
        }
        let mut program = output.program;
        if let Some(resolver) = resolver {
            program = link(program, resolver)?;
        }
        Self::from_program(program, source_name, None)
    }

    fn from_program(
        program: Program,
        source_name: &str,
        meter: Option<Box<dyn Meter>>,
    ) -> Result<Self, RunnerError> {
        let storage = MapStorage::handle();
        let stdlib = StandardLibrary::with_storage(Rc::clone(&storage));
        let (result, warnings) = check_with_warnings(program, &stdlib);
        let checked = Rc::new(result.map_err(RunnerError::Check)?);
        let mut interpreter = match meter {
            Some(meter) => Interpreter::with_meter(Rc::clone(&checked), &stdlib, meter)?,
            None => Interpreter::new(Rc::clone(&checked), &stdlib)?,
        };
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        interpreter.set_event_sink(Box::new(move |event| sink.borrow_mut().push(event)));
        Ok(Self {
            source_name: source_name.to_string(),
            checked,
            interpreter,
            storage,
            events,
            warnings,
        })
    }

    /// Invokes a top-level function by name.
    pub fn invoke(&mut self, name: &str, arguments: Vec<Value>) -> Result<Value, RuntimeError> {
        self.interpreter.invoke(name, arguments)
    }

    /// Reads the final value of a top-level binding.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.interpreter.global(name)
    }

    /// Runs the `index`-th transaction declaration.
    pub fn run_transaction(&mut self, index: usize, prepare_arguments: Vec<Value>) -> Result<(), RuntimeError> {
        self.interpreter.run_transaction(index, prepare_arguments)
    }

    /// The storage handle shared with the interpreter.
    #[must_use]
    pub fn storage(&self) -> StorageHandle {
        Rc::clone(&self.storage)
    }

    /// Drains the events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<EventValue> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Replaces the default event collector with a custom sink.
    pub fn set_event_sink(&mut self, sink: crate::interpreter::EventSink) {
        self.interpreter.set_event_sink(sink);
    }

    /// Non-fatal diagnostics of the successful check (unreachable
    /// statements).
    #[must_use]
    pub fn warnings(&self) -> &Diagnostics {
        &self.warnings
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Serializes the parsed program to a binary snapshot.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&Snapshot {
            source_name: self.source_name.clone(),
            program: self.checked.program.clone(),
        })
    }

    /// Restores a runner from a [`Runner::dump`] snapshot, re-checking
    /// the program.
    pub fn load(bytes: &[u8]) -> Result<Self, RunnerError> {
        let snapshot: Snapshot = postcard::from_bytes(bytes).map_err(RunnerError::Snapshot)?;
        Self::from_program(snapshot.program, &snapshot.source_name, None)
    }

    /// Like [`Runner::new`] with an execution meter installed.
    pub fn with_meter(code: &str, source_name: &str, meter: Box<dyn Meter>) -> Result<Self, RunnerError> {
        let output = parse_program(code);
        if let Some(error) = output.error {
            return Err(RunnerError::Parse(error));
        }
        Self::from_program(output.program, source_name, Some(meter))
    }
}
