//! Runtime values.
//!
//! Small values are stored inline; containers and composites sit behind
//! `Rc<RefCell<...>>` so that bound methods and references retain
//! receiver identity. Value-type copy semantics are implemented by
//! [`Value::deep_copy`] at every transfer site, never on plain reads.

use std::{cell::RefCell, fmt, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::{
    ast::{CompositeDeclaration, CompositeKind, FunctionBlock, Parameter},
    checker::ty::Type,
    interpreter::errors::{RunResult, RuntimeError},
    position::{NodeId, Span},
};

/// Number of decimal places of the fixed-point representation.
pub const FIXED_POINT_SCALE: u32 = 8;

/// A host-provided, type-keyed, optional-valued slot store.
///
/// Keys are the canonical renderings of the slot's key type; the host
/// guarantees single-writer access for the duration of an invocation.
pub trait StorageBackend: fmt::Debug {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Option<Value>);
}

pub type StorageHandle = Rc<RefCell<dyn StorageBackend>>;

/// A reference into keyed storage: the handle plus the slot key.
/// References do not own their target; dereferencing an empty slot is a
/// `DereferenceError`.
#[derive(Debug, Clone)]
pub struct ReferenceValue {
    pub storage: StorageHandle,
    pub key: String,
    pub authorized: bool,
}

/// An event instance delivered to the host sink by `emit`.
#[derive(Debug, Clone)]
pub struct EventValue {
    pub name: String,
    /// Ordered named fields; labels are part of the payload.
    pub fields: Vec<(String, Value)>,
}

/// A composite instance: tag, ordered field map, and for resources the
/// destroyed bit.
#[derive(Debug)]
pub struct CompositeValue {
    pub kind: CompositeKind,
    pub name: String,
    pub fields: IndexMap<String, Value>,
    pub destroyed: bool,
}

/// A function closed over its defining environment, optionally bound to
/// a receiver (`self`).
pub struct FunctionValue {
    pub name: String,
    pub parameters: Rc<Vec<Parameter>>,
    pub body: Rc<FunctionBlock>,
    pub declaration_id: NodeId,
    pub closure: Activation,
    pub receiver: Option<Value>,
}

impl fmt::Debug for FunctionValue {
    // the closure chain can be cyclic through this very value
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue").field("name", &self.name).finish_non_exhaustive()
    }
}

/// An opaque callable handed in by the standard library or embedder.
pub struct HostFunction {
    pub name: String,
    pub call: Box<dyn Fn(Vec<Value>, Span) -> RunResult<Value>>,
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A fixed-point number stored as an integer scaled by
/// `10^FIXED_POINT_SCALE`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixedPoint(pub BigInt);

impl FixedPoint {
    /// Builds a fixed-point value from literal parts
    /// `(integer, fractional, scale)`.
    #[must_use]
    pub fn from_parts(integer: &BigInt, fractional: &BigInt, scale: u32) -> Self {
        let base = BigInt::from(10u8).pow(FIXED_POINT_SCALE);
        let fraction_scale = BigInt::from(10u8).pow(scale.min(FIXED_POINT_SCALE));
        let fraction = fractional * &base / fraction_scale;
        let scaled = integer * base;
        if integer.is_negative() {
            Self(scaled - fraction)
        } else {
            Self(scaled + fraction)
        }
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = BigInt::from(10u8).pow(FIXED_POINT_SCALE);
        let whole = &self.0 / &base;
        let fraction = (&self.0 % &base).abs();
        let sign = if self.0.is_negative() && whole.is_zero() { "-" } else { "" };
        write!(f, "{sign}{whole}.{fraction:0>width$}", width = FIXED_POINT_SCALE as usize)
    }
}

/// A hashable projection of the primitive values usable as dictionary
/// keys. Fixed-width integers normalize to their numeric value so that
/// structural equality on keys is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Bool(bool),
    Int(BigInt),
    String(String),
    Character(String),
}

impl DictKey {
    pub(crate) fn from_value(value: &Value, span: Span) -> RunResult<Self> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(i.clone())),
            Value::SizedInt { value, .. } => Ok(Self::Int(value.clone())),
            Value::String(s) => Ok(Self::String(s.as_ref().clone())),
            Value::Character(c) => Ok(Self::Character(c.as_ref().clone())),
            other => Err(RuntimeError::invariant(
                format!("value of type {} is not a dictionary key", other.kind_name()),
                span,
            )),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(i.clone()),
            Self::String(s) => Value::String(Rc::new(s.clone())),
            Self::Character(c) => Value::Character(Rc::new(c.clone())),
        }
    }
}

/// Primary runtime value type.
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    /// The absent optional.
    Nil,
    /// The present optional.
    Some(Box<Value>),
    Bool(bool),
    /// Arbitrary-precision integer.
    Int(BigInt),
    /// Fixed-width integer tagged with its declared type. The tag was
    /// assigned at elaboration; arithmetic range-checks against it.
    SizedInt { value: BigInt, ty: Type },
    Fixed(FixedPoint),
    String(Rc<String>),
    /// A single grapheme cluster.
    Character(Rc<String>),
    Array(Rc<RefCell<Vec<Value>>>),
    /// Ordered map with structural key equality.
    Dictionary(Rc<RefCell<IndexMap<DictKey, Value>>>),
    Composite(Rc<RefCell<CompositeValue>>),
    /// The existential: a declared type plus the contained value.
    AnyBox { ty: Box<Type>, value: Box<Value> },
    Reference(ReferenceValue),
    Storage(StorageHandle),
    Function(Rc<FunctionValue>),
    Host(Rc<HostFunction>),
    /// A built-in member function bound to its receiver.
    BuiltinMethod { receiver: Box<Value>, name: Rc<str> },
    /// A composite type name in value position (a constructor).
    Constructor(Rc<CompositeDeclaration>),
    /// Sentinel left behind when a resource moves out of a slot.
    /// Reading one is an internal invariant error: the checker should
    /// have rejected the program.
    Invalid,
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(Rc::new(s.into()))
    }

    #[must_use]
    pub fn array(values: Vec<Self>) -> Self {
        Self::Array(Rc::new(RefCell::new(values)))
    }

    /// A short name for error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "Void",
            Self::Nil | Self::Some(_) => "Optional",
            Self::Bool(_) => "Bool",
            Self::Int(_) | Self::SizedInt { .. } => "Int",
            Self::Fixed(_) => "Fix64",
            Self::String(_) => "String",
            Self::Character(_) => "Character",
            Self::Array(_) => "Array",
            Self::Dictionary(_) => "Dictionary",
            Self::Composite(_) => "Composite",
            Self::AnyBox { .. } => "Any",
            Self::Reference(_) => "Reference",
            Self::Storage(_) => "Storage",
            Self::Function(_) | Self::Host(_) | Self::BuiltinMethod { .. } | Self::Constructor(_) => "Function",
            Self::Invalid => "Invalid",
        }
    }

    pub(crate) fn as_bool(&self, span: Span) -> RunResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(RuntimeError::invariant(
                format!("expected Bool, found {}", other.kind_name()),
                span,
            )),
        }
    }

    pub(crate) fn as_int(&self, span: Span) -> RunResult<&BigInt> {
        match self {
            Self::Int(value) | Self::SizedInt { value, .. } => Ok(value),
            other => Err(RuntimeError::invariant(
                format!("expected an integer, found {}", other.kind_name()),
                span,
            )),
        }
    }

    /// Rejects reads of moved-out slots and destroyed resources.
    pub(crate) fn check_live(&self, span: Span) -> RunResult<()> {
        match self {
            Self::Invalid => Err(RuntimeError::invariant("read of a moved resource", span)),
            Self::Composite(composite) if composite.borrow().destroyed => {
                Err(RuntimeError::invariant("read of a destroyed resource", span))
            }
            _ => Ok(()),
        }
    }

    /// True for values that move rather than copy.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        match self {
            Self::Composite(composite) => composite.borrow().kind == CompositeKind::Resource,
            Self::Some(inner) => inner.is_resource(),
            Self::Array(values) => values.borrow().iter().any(Self::is_resource),
            Self::Dictionary(entries) => entries.borrow().values().any(Self::is_resource),
            _ => false,
        }
    }

    /// The deep copy applied at every transfer of a value type.
    /// Resources are never copied: they pass through by identity and
    /// the transfer site invalidates the source instead.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        match self {
            Self::Some(inner) => Self::Some(Box::new(inner.deep_copy())),
            Self::Array(values) => {
                let copied = values.borrow().iter().map(Self::deep_copy).collect();
                Self::Array(Rc::new(RefCell::new(copied)))
            }
            Self::Dictionary(entries) => {
                let copied = entries
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.deep_copy()))
                    .collect();
                Self::Dictionary(Rc::new(RefCell::new(copied)))
            }
            Self::Composite(composite) => {
                let borrowed = composite.borrow();
                if borrowed.kind == CompositeKind::Resource {
                    drop(borrowed);
                    return self.clone();
                }
                let fields = borrowed
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.deep_copy()))
                    .collect();
                Self::Composite(Rc::new(RefCell::new(CompositeValue {
                    kind: borrowed.kind,
                    name: borrowed.name.clone(),
                    fields,
                    destroyed: borrowed.destroyed,
                })))
            }
            Self::AnyBox { ty, value } => Self::AnyBox {
                ty: ty.clone(),
                value: Box::new(value.deep_copy()),
            },
            other => other.clone(),
        }
    }
}

/// Strips every `Some` layer. `Nil` stays `Nil`, which is exactly the
/// mixed-depth optional equality the language specifies.
fn unwrap_optionals(value: &Value) -> &Value {
    let mut value = value;
    while let Value::Some(inner) = value {
        value = inner;
    }
    value
}

/// Structural equality across all equatable values, with optional
/// depths normalized away on both sides.
#[must_use]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    let left = unwrap_optionals(left);
    let right = unwrap_optionals(right);
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::Nil, _) | (_, Value::Nil) => false,
        (Value::Void, Value::Void) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a) | Value::SizedInt { value: a, .. }, Value::Int(b) | Value::SizedInt { value: b, .. }) => a == b,
        (Value::Fixed(a), Value::Fixed(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Character(a), Value::Character(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Dictionary(a), Value::Dictionary(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            a.len() == b.len()
                && a.iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
        }
        (Value::AnyBox { value: a, .. }, Value::AnyBox { value: b, .. }) => values_equal(a, b),
        (Value::AnyBox { value: a, .. }, b) => values_equal(a, b),
        (a, Value::AnyBox { value: b, .. }) => values_equal(a, b),
        _ => false,
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(BigInt::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "()"),
            Self::Nil => write!(f, "nil"),
            Self::Some(inner) => write!(f, "{inner}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::SizedInt { value, .. } => write!(f, "{value}"),
            Self::Fixed(fixed) => write!(f, "{fixed}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Character(c) => write!(f, "{c:?}"),
            Self::Array(values) => {
                write!(f, "[")?;
                for (i, value) in values.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Self::Dictionary(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {value}", key.to_value())?;
                }
                write!(f, "}}")
            }
            Self::Composite(composite) => {
                let composite = composite.borrow();
                write!(f, "{}(", composite.name)?;
                for (i, (name, value)) in composite.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, ")")
            }
            Self::AnyBox { value, .. } => write!(f, "{value}"),
            Self::Reference(reference) => write!(f, "&<{}>", reference.key),
            Self::Storage(_) => write!(f, "Storage"),
            Self::Function(function) => write!(f, "fun {}", function.name),
            Self::Host(function) => write!(f, "fun {}", function.name),
            Self::BuiltinMethod { name, .. } => write!(f, "fun {name}"),
            Self::Constructor(declaration) => write!(f, "{}", declaration.name),
            Self::Invalid => write!(f, "<moved>"),
        }
    }
}

/// One frame of the lexical environment chain. Bound functions keep the
/// chain alive, which is how closures capture their defining scope.
#[derive(Debug)]
struct Frame {
    bindings: AHashMap<String, Value>,
    parent: Option<Activation>,
}

/// A shared handle to an environment frame.
#[derive(Debug, Clone)]
pub struct Activation(Rc<RefCell<Frame>>);

impl Activation {
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Frame {
            bindings: AHashMap::new(),
            parent: None,
        })))
    }

    /// A fresh child frame whose lookups fall back to `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self(Rc::new(RefCell::new(Frame {
            bindings: AHashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.borrow().parent.clone()
    }

    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Nearest binding, innermost frame first.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        if let Some(value) = frame.bindings.get(name) {
            return Some(value.clone());
        }
        frame.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Writes through to the frame holding `name`. Returns false when
    /// no frame holds it.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut frame = self.0.borrow_mut();
        if let Some(slot) = frame.bindings.get_mut(name) {
            *slot = value;
            return true;
        }
        match &frame.parent {
            Some(parent) => parent.set(name, value),
            None => false,
        }
    }

    /// Moves a value out, leaving the invalid sentinel behind.
    #[must_use]
    pub fn take(&self, name: &str) -> Option<Value> {
        let mut frame = self.0.borrow_mut();
        if let Some(slot) = frame.bindings.get_mut(name) {
            return Some(std::mem::replace(slot, Value::Invalid));
        }
        match &frame.parent {
            Some(parent) => parent.take(name),
            None => None,
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Self::new()
    }
}
