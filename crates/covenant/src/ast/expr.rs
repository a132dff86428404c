//! Expression nodes.
//!
//! Nested expressions are `Rc`-shared rather than boxed: the interpreter's
//! trampoline captures sub-expressions in `'static` continuations, and an
//! `Rc` clone is the cheapest owned handle that allows that without copying
//! subtrees.

use std::rc::Rc;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    ast::ty::TypeAnnotation,
    diagnostics::IntegerLiteralKind,
    position::{NodeId, Span},
};

/// An expression with its identity and source range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExpressionKind,
}

/// One argument of an invocation, optionally labeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub label: Option<String>,
    pub value: Rc<Expression>,
    pub span: Span,
}

/// One `key: value` entry of a dictionary literal, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub key: Rc<Expression>,
    pub value: Rc<Expression>,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Negate,
    Not,
    /// `<-e`: moves a resource out of its current holder.
    Move,
}

/// Infix operators. `And`/`Or` short-circuit, `NilCoalesce` evaluates its
/// right side only when the left is nil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Concat,
    NilCoalesce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionKind {
    BoolLiteral(bool),
    /// An integer literal keeps its radix so address literals and
    /// diagnostics can reproduce the source form.
    IntegerLiteral {
        value: BigInt,
        literal_kind: IntegerLiteralKind,
    },
    FixedPointLiteral {
        integer: BigInt,
        fractional: BigInt,
        scale: u32,
    },
    StringLiteral(String),
    NilLiteral,
    Identifier(String),
    Array(Vec<Rc<Expression>>),
    Dictionary(Vec<DictionaryEntry>),
    Index {
        target: Rc<Expression>,
        index: Rc<Expression>,
    },
    /// `e.name` or, with `optional` set, `e?.name`.
    Member {
        target: Rc<Expression>,
        optional: bool,
        name: String,
        name_span: Span,
    },
    Invocation {
        invoked: Rc<Expression>,
        arguments: SmallVec<[Argument; 4]>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Rc<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
    /// `test ? then : otherwise`
    Conditional {
        test: Rc<Expression>,
        then: Rc<Expression>,
        otherwise: Rc<Expression>,
    },
    /// `e as T` (static up-cast) or `e as? T` (failable down-cast).
    Cast {
        operand: Rc<Expression>,
        failable: bool,
        ty: TypeAnnotation,
    },
    /// `&e as T`: a reference into keyed storage.
    Reference {
        operand: Rc<Expression>,
        ty: TypeAnnotation,
    },
    /// `create T(...)`, the unique introduction of a resource.
    Create(Rc<Expression>),
    /// `destroy e`, the unique elimination of a resource outside moves.
    Destroy(Rc<Expression>),
    /// An anonymous function.
    Function(Rc<super::decl::FunctionExpression>),
}

impl Expression {
    /// True when the node can be the target of an assignment or swap side.
    #[must_use]
    pub fn is_assignment_target(&self) -> bool {
        matches!(
            self.kind,
            ExpressionKind::Identifier(_) | ExpressionKind::Index { .. } | ExpressionKind::Member { .. }
        )
    }
}
