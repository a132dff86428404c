//! The untyped program tree produced by the parser.

pub mod decl;
pub mod expr;
pub mod stmt;
pub mod ty;

pub use decl::{
    Access, CompositeDeclaration, CompositeKind, Condition, Declaration, DeclarationKind, FieldDeclaration,
    FunctionBlock, FunctionDeclaration, FunctionExpression, ImportDeclaration, ImportLocation, InterfaceDeclaration,
    Members, Parameter, Program, SpecialFunctionDeclaration, SpecialFunctionKind, TransactionDeclaration,
};
pub use expr::{Argument, BinaryOperator, DictionaryEntry, Expression, ExpressionKind, UnaryOperator};
pub use stmt::{Block, ElseBranch, IfTest, Statement, StatementKind, Transfer, VariableDeclaration};
pub use ty::{NominalType, TypeAnnotation, TypeExpression, TypeExpressionKind};
