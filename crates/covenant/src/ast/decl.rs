//! Declaration nodes: variables, functions, composites, interfaces,
//! transactions, and imports.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::{
    ast::{
        expr::Expression,
        stmt::{Block, VariableDeclaration},
        ty::{NominalType, TypeAnnotation},
    },
    position::{NodeId, Span},
};

/// Access modifier attached to declarations and composite members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum Access {
    #[default]
    #[strum(serialize = "(unspecified)")]
    NotSpecified,
    /// `priv`: visible only within the declaring composite.
    #[strum(serialize = "priv")]
    Private,
    /// `pub`: externally readable, writable only by the declaring code.
    #[strum(serialize = "pub")]
    Public,
    /// `pub(set)`: externally readable and writable.
    #[strum(serialize = "pub(set)")]
    PublicSettable,
}

/// One parameter of a function, initializer, or event.
///
/// `label` is the external argument label; `None` means callers use the
/// parameter name, the label `_` means the argument is unlabeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub label: Option<String>,
    pub name: String,
    pub type_annotation: TypeAnnotation,
    pub span: Span,
}

impl Parameter {
    /// The label callers must write, or `None` when `_` suppresses it.
    #[must_use]
    pub fn effective_label(&self) -> Option<&str> {
        match self.label.as_deref() {
            Some("_") => None,
            Some(label) => Some(label),
            None => Some(&self.name),
        }
    }
}

/// A single pre- or post-condition: a test expression and an optional
/// message expression separated by `:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub test: Rc<Expression>,
    pub message: Option<Rc<Expression>>,
    pub span: Span,
}

/// A function body together with its conditions.
///
/// Interface members use this with an empty block to contribute
/// conditions without providing an implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionBlock {
    pub pre_conditions: Vec<Condition>,
    pub post_conditions: Vec<Condition>,
    pub block: Rc<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub access: Access,
    pub name: String,
    pub name_span: Span,
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<TypeAnnotation>,
    /// Absent only inside interfaces.
    pub body: Option<FunctionBlock>,
}

/// An anonymous `fun (...) { ... }` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExpression {
    pub id: NodeId,
    pub span: Span,
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<TypeAnnotation>,
    pub body: FunctionBlock,
}

/// The four composite kinds. They differ in what they admit: structures
/// are copied on transfer, resources are linear, events are instantiated
/// only by `emit`, contracts expose members to the containing account
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum CompositeKind {
    Structure,
    Resource,
    Event,
    Contract,
}

/// The special functions a composite or transaction may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum SpecialFunctionKind {
    Init,
    Destroy,
    Prepare,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialFunctionDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub kind: SpecialFunctionKind,
    pub parameters: Vec<Parameter>,
    /// Absent only inside interfaces.
    pub body: Option<FunctionBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub access: Access,
    pub is_constant: bool,
    pub name: String,
    pub name_span: Span,
    pub type_annotation: TypeAnnotation,
}

/// The members record of a composite or interface declaration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Members {
    pub fields: Vec<FieldDeclaration>,
    pub special_functions: Vec<SpecialFunctionDeclaration>,
    pub functions: Vec<Rc<FunctionDeclaration>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub access: Access,
    pub kind: CompositeKind,
    pub name: String,
    pub name_span: Span,
    pub conformances: Vec<NominalType>,
    pub members: Members,
}

/// An interface declaration. Function bodies are optional; bodies that
/// are present contribute their pre/post conditions to implementers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub access: Access,
    pub kind: CompositeKind,
    pub name: String,
    pub name_span: Span,
    pub members: Members,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub fields: Vec<FieldDeclaration>,
    pub prepare: Option<SpecialFunctionDeclaration>,
    pub execute: Option<SpecialFunctionDeclaration>,
}

/// Where an import comes from: a string location or a big-endian
/// address literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportLocation {
    String(String),
    Address(Vec<u8>),
}

impl std::fmt::Display for ImportLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Address(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDeclaration {
    pub id: NodeId,
    pub span: Span,
    /// Selected identifiers, empty meaning "import everything".
    pub identifiers: SmallVec<[String; 2]>,
    pub location: ImportLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub span: Span,
    pub kind: DeclarationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeclarationKind {
    Variable(Rc<VariableDeclaration>),
    Function(Rc<FunctionDeclaration>),
    Composite(Rc<CompositeDeclaration>),
    Interface(Rc<InterfaceDeclaration>),
    Transaction(Rc<TransactionDeclaration>),
    Import(ImportDeclaration),
}

/// An ordered sequence of top-level declarations: one parsed source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

impl Program {
    /// All import declarations in source order.
    pub fn imports(&self) -> impl Iterator<Item = &ImportDeclaration> {
        self.declarations.iter().filter_map(|d| match &d.kind {
            DeclarationKind::Import(import) => Some(import),
            _ => None,
        })
    }
}
