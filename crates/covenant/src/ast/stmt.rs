//! Statement and block nodes.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{
    ast::{decl::Access, expr::Expression, ty::TypeAnnotation},
    position::{NodeId, Span},
};

/// The syntactic marker distinguishing copy from move at a binding or
/// assignment site. Distinguished at parse time because it participates
/// in the checker's resource analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transfer {
    /// `=`
    Copy,
    /// `<-`
    Move,
}

/// A braced sequence of statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub span: Span,
    pub statements: Vec<Rc<Statement>>,
}

/// A `let` or `var` declaration, also usable as the test of an `if`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub id: NodeId,
    pub span: Span,
    /// Only meaningful for top-level and composite-member declarations;
    /// local declarations always carry [`Access::NotSpecified`].
    pub access: Access,
    pub is_constant: bool,
    pub name: String,
    pub name_span: Span,
    pub type_annotation: Option<TypeAnnotation>,
    pub transfer: Transfer,
    pub value: Rc<Expression>,
}

/// The test of an `if`: a plain expression, or a variable declaration
/// that conditionally binds the unwrapped value of an optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IfTest {
    Expression(Rc<Expression>),
    Declaration(Rc<VariableDeclaration>),
}

/// What follows the `else` keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElseBranch {
    Block(Rc<Block>),
    /// An `else if ...` chain; the statement is always an `If`.
    If(Rc<Statement>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    Block(Rc<Block>),
    Expression(Rc<Expression>),
    Return {
        value: Option<Rc<Expression>>,
    },
    Break,
    Continue,
    If {
        test: IfTest,
        then: Rc<Block>,
        otherwise: Option<ElseBranch>,
    },
    While {
        test: Rc<Expression>,
        block: Rc<Block>,
    },
    VariableDeclaration(Rc<VariableDeclaration>),
    Assignment {
        target: Rc<Expression>,
        transfer: Transfer,
        value: Rc<Expression>,
    },
    /// `left <-> right`
    Swap {
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
    /// `emit E(...)`; the expression is always an invocation.
    Emit(Rc<Expression>),
}
