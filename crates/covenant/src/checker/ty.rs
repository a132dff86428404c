//! Semantic types produced and consumed by the checker.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::One;

use crate::{
    ast::{Access, CompositeKind},
    position::Span,
};

/// A fully resolved type.
///
/// Composite and interface types compare nominally (by name); everything
/// else compares structurally. `Never` is the bottom type: it is a subtype
/// of every type, which is what lets `panic(...)` appear in any expression
/// context.
#[derive(Debug, Clone)]
pub enum Type {
    Any,
    Never,
    Void,
    Bool,
    Character,
    String,
    /// Arbitrary-precision integer.
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// 64-bit fixed-point number.
    Fix64,
    Optional(Box<Type>),
    VariableArray(Box<Type>),
    ConstantArray {
        element: Box<Type>,
        size: u64,
    },
    Dictionary {
        key: Box<Type>,
        value: Box<Type>,
    },
    Function(Rc<FunctionType>),
    Reference {
        authorized: bool,
        referenced: Box<Type>,
    },
    /// `T{I, J}` or `{I, J}`. Restrictions are kept sorted so that the
    /// set compares order-insensitively.
    Restricted {
        base: Option<Box<Type>>,
        restrictions: Vec<String>,
    },
    Composite(Rc<CompositeType>),
    Interface(Rc<InterfaceType>),
    /// The distinguished type of the predeclared `storage` value.
    Storage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub parameters: Vec<ParameterType>,
    pub return_type: Type,
}

#[derive(Debug, Clone)]
pub struct ParameterType {
    /// The label callers must write; `None` means unlabeled.
    pub label: Option<String>,
    pub name: String,
    pub ty: Type,
}

impl PartialEq for ParameterType {
    // labels are part of a function's external signature, names are not
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.ty == other.ty
    }
}

/// One field or function member of a composite or interface.
#[derive(Debug, Clone)]
pub struct Member {
    pub ty: Type,
    pub access: Access,
    pub is_constant: bool,
    pub span: Span,
}

/// Members of a composite, filled in the second resolution phase.
#[derive(Debug, Clone, Default)]
pub struct CompositeMembers {
    pub conformances: Vec<Rc<InterfaceType>>,
    pub fields: IndexMap<String, Member>,
    pub functions: IndexMap<String, Member>,
    pub initializer_parameters: Vec<ParameterType>,
}

/// A declared structure, resource, event, or contract type.
///
/// Created as an empty shell when declarations are registered (allowing
/// forward references), then filled when signatures are elaborated.
#[derive(Debug)]
pub struct CompositeType {
    pub kind: CompositeKind,
    pub name: String,
    pub members: RefCell<CompositeMembers>,
}

/// A declared interface type. Same two-phase construction as composites.
#[derive(Debug)]
pub struct InterfaceType {
    pub kind: CompositeKind,
    pub name: String,
    pub members: RefCell<CompositeMembers>,
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Composite(a), Self::Composite(b)) => a.name == b.name,
            (Self::Interface(a), Self::Interface(b)) => a.name == b.name,
            (Self::Optional(a), Self::Optional(b)) => a == b,
            (Self::VariableArray(a), Self::VariableArray(b)) => a == b,
            (
                Self::ConstantArray { element: a, size: n },
                Self::ConstantArray { element: b, size: m },
            ) => n == m && a == b,
            (
                Self::Dictionary { key: ka, value: va },
                Self::Dictionary { key: kb, value: vb },
            ) => ka == kb && va == vb,
            (Self::Function(a), Self::Function(b)) => a == b,
            (
                Self::Reference {
                    authorized: aa,
                    referenced: ra,
                },
                Self::Reference {
                    authorized: ab,
                    referenced: rb,
                },
            ) => aa == ab && ra == rb,
            (
                Self::Restricted {
                    base: ba,
                    restrictions: ia,
                },
                Self::Restricted {
                    base: bb,
                    restrictions: ib,
                },
            ) => ba == bb && ia == ib,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Type {
    /// True for resource composites and containers holding them; these
    /// values participate in the linearity analysis.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        match self {
            Self::Composite(composite) => composite.kind == CompositeKind::Resource,
            Self::Interface(interface) => interface.kind == CompositeKind::Resource,
            Self::Optional(inner) | Self::VariableArray(inner) | Self::ConstantArray { element: inner, .. } => {
                inner.is_resource()
            }
            Self::Dictionary { value, .. } => value.is_resource(),
            Self::Restricted { base, restrictions: _ } => base.as_ref().is_some_and(|b| b.is_resource()),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
                | Self::Fix64
        )
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.is_numeric() && !matches!(self, Self::Fix64)
    }

    /// Types usable as dictionary keys and storage slot names: hashable
    /// primitives.
    #[must_use]
    pub fn is_hashable(&self) -> bool {
        self.is_integer() || matches!(self, Self::Bool | Self::String | Self::Character)
    }

    /// Unwraps one level of optional, if any.
    #[must_use]
    pub fn unwrap_optional(&self) -> Option<&Self> {
        match self {
            Self::Optional(inner) => Some(inner),
            _ => None,
        }
    }

    /// Strips all optional layers.
    #[must_use]
    pub fn optional_core(&self) -> &Self {
        let mut ty = self;
        while let Self::Optional(inner) = ty {
            ty = inner;
        }
        ty
    }

    /// The inclusive value range of a fixed-width integer type.
    #[must_use]
    pub fn integer_range(&self) -> Option<(BigInt, BigInt)> {
        let bits: u32 = match self {
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 => 16,
            Self::Int32 | Self::UInt32 => 32,
            Self::Int64 | Self::UInt64 => 64,
            _ => return None,
        };
        let signed = matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64);
        if signed {
            let max = (BigInt::one() << (bits - 1)) - 1;
            let min = -(BigInt::one() << (bits - 1));
            Some((min, max))
        } else {
            let max = (BigInt::one() << bits) - 1;
            Some((BigInt::from(0), max))
        }
    }

    /// The subtype relation used by casts, argument passing, and
    /// assignment compatibility.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Never, _) => true,
            (_, Self::Any) => true,
            // optionals are covariant
            (Self::Optional(a), Self::Optional(b)) => a.is_subtype_of(b),
            // T <: T?
            (sub, Self::Optional(inner)) => sub.is_subtype_of(inner),
            (Self::VariableArray(a), Self::VariableArray(b)) => a.is_subtype_of(b),
            (Self::ConstantArray { element: a, size: n }, Self::ConstantArray { element: b, size: m }) => {
                n == m && a.is_subtype_of(b)
            }
            (Self::Dictionary { key: ka, value: va }, Self::Dictionary { key: kb, value: vb }) => {
                ka.is_subtype_of(kb) && va.is_subtype_of(vb)
            }
            // a composite is a subtype of every interface it conforms to
            (Self::Composite(composite), Self::Interface(interface)) => composite
                .members
                .borrow()
                .conformances
                .iter()
                .any(|conformance| conformance.name == interface.name),
            // a restricted type is a subtype of its base and of each restriction
            (Self::Restricted { base, restrictions }, other) => {
                if let Some(base) = base
                    && base.is_subtype_of(other)
                {
                    return true;
                }
                if let Self::Interface(interface) = other {
                    return restrictions.iter().any(|name| *name == interface.name);
                }
                false
            }
            // a composite is a subtype of a restriction over it
            (Self::Composite(composite), Self::Restricted { base, restrictions }) => {
                let base_ok = base
                    .as_ref()
                    .is_none_or(|base| Self::Composite(Rc::clone(composite)).is_subtype_of(base));
                let members = composite.members.borrow();
                base_ok
                    && restrictions
                        .iter()
                        .all(|name| members.conformances.iter().any(|c| c.name == *name))
            }
            (Self::Reference { authorized: sub_auth, referenced: a }, Self::Reference { authorized: super_auth, referenced: b }) => {
                // an authorized reference may be used where a plain one is expected
                (*sub_auth || !*super_auth) && a.is_subtype_of(b)
            }
            _ => false,
        }
    }

    /// Whether `==`/`!=` between these operand types is well-typed.
    #[must_use]
    pub fn is_equatable_with(&self, other: &Self) -> bool {
        let left = self.optional_core();
        let right = other.optional_core();
        if matches!(left, Self::Never) || matches!(right, Self::Never) {
            return true;
        }
        left == right && (left.is_hashable() || matches!(left, Self::Void | Self::Any | Self::Fix64))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Never => write!(f, "Never"),
            Self::Void => write!(f, "Void"),
            Self::Bool => write!(f, "Bool"),
            Self::Character => write!(f, "Character"),
            Self::String => write!(f, "String"),
            Self::Int => write!(f, "Int"),
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::UInt8 => write!(f, "UInt8"),
            Self::UInt16 => write!(f, "UInt16"),
            Self::UInt32 => write!(f, "UInt32"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Fix64 => write!(f, "Fix64"),
            Self::Optional(inner) => write!(f, "{inner}?"),
            Self::VariableArray(element) => write!(f, "[{element}]"),
            Self::ConstantArray { element, size } => write!(f, "[{element}; {size}]"),
            Self::Dictionary { key, value } => write!(f, "{{{key}: {value}}}"),
            Self::Function(function) => {
                write!(f, "((")?;
                for (i, parameter) in function.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", parameter.ty)?;
                }
                write!(f, "): {})", function.return_type)
            }
            Self::Reference { authorized, referenced } => {
                if *authorized {
                    write!(f, "auth &{referenced}")
                } else {
                    write!(f, "&{referenced}")
                }
            }
            Self::Restricted { base, restrictions } => {
                if let Some(base) = base {
                    write!(f, "{base}")?;
                }
                write!(f, "{{")?;
                for (i, name) in restrictions.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}")?;
                }
                write!(f, "}}")
            }
            Self::Composite(composite) => write!(f, "{}", composite.name),
            Self::Interface(interface) => write!(f, "{}", interface.name),
            Self::Storage => write!(f, "Storage"),
        }
    }
}
