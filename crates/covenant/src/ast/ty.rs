//! Type expressions and annotations as written in source.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::position::{NodeId, Span};

/// A type expression plus the resource marker (`@T` in source).
///
/// Every parameter, field, return, and variable-declaration type carries
/// one of these; the checker rejects `@` on non-resource types and its
/// absence on resource types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAnnotation {
    pub is_resource: bool,
    pub ty: TypeExpression,
    pub span: Span,
}

/// A type as written in source, before the checker resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeExpression {
    pub id: NodeId,
    pub span: Span,
    pub kind: TypeExpressionKind,
}

/// A bare type name with its source span, used for conformances and
/// restriction entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NominalType {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpressionKind {
    /// A declared or built-in type referred to by name.
    Named(String),
    /// `T?`
    Optional(Box<TypeExpression>),
    /// `[T]`
    VariableSized(Box<TypeExpression>),
    /// `[T; N]`
    ConstantSized { element: Box<TypeExpression>, size: u64 },
    /// `{K: V}`
    Dictionary {
        key: Box<TypeExpression>,
        value: Box<TypeExpression>,
    },
    /// `((A, B): R)`
    Function {
        parameters: Vec<TypeAnnotation>,
        return_type: Box<TypeAnnotation>,
    },
    /// `&T` or `auth &T`
    Reference {
        authorized: bool,
        referenced: Box<TypeExpression>,
    },
    /// `T{I, J}` or `{I, J}`. The restriction set is order-insensitive;
    /// order is kept here only for diagnostics.
    Restricted {
        base: Option<Box<TypeExpression>>,
        restrictions: SmallVec<[NominalType; 2]>,
    },
}
