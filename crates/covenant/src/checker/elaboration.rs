//! The elaboration side tables: what the checker hands to the
//! interpreter, keyed by [`NodeId`].
//!
//! The program tree itself is never mutated. Everything the interpreter
//! must know beyond the syntax (literal conversion targets, cast targets,
//! storage key types, rewritten `before` bindings, stitched interface
//! conditions) lives here.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    ast::{Condition, Expression, Program},
    checker::ty::{CompositeType, Type},
    position::NodeId,
};

/// One entry-time binding synthesized from a `before(e)` call in a post
/// condition. The interpreter evaluates `expression` once at function
/// entry and stores it under `name` in the post environment.
#[derive(Debug, Clone)]
pub struct BeforeBinding {
    pub name: String,
    pub expression: Rc<Expression>,
}

/// Conditions a composite member inherits from the interfaces its
/// composite conforms to. Interface pre-conditions run before the
/// member's own, per the declared lifecycle.
#[derive(Debug, Clone, Default)]
pub struct StitchedConditions {
    pub pre: Vec<Condition>,
    pub post: Vec<Condition>,
}

/// All side tables produced by a successful check.
#[derive(Debug, Default)]
pub struct Elaboration {
    /// Inferred type of every expression node.
    pub expression_types: AHashMap<NodeId, Type>,
    /// Integer literal nodes that elaborate to a fixed-width type. The
    /// conversion happens once, here; the interpreter performs no
    /// further coercion.
    pub integer_conversions: AHashMap<NodeId, Type>,
    /// Target type of each cast expression.
    pub cast_targets: AHashMap<NodeId, Type>,
    /// Key type of each `storage[T]` index expression.
    pub storage_keys: AHashMap<NodeId, Type>,
    /// Key type captured by each reference expression.
    pub reference_keys: AHashMap<NodeId, Type>,
    /// Per function-declaration: the synthesized `before` bindings.
    pub before_bindings: AHashMap<NodeId, Vec<BeforeBinding>>,
    /// Per `before(...)` invocation: the synthesized binding name.
    pub before_substitutions: AHashMap<NodeId, String>,
    /// Per composite member declaration: inherited interface conditions.
    pub interface_conditions: AHashMap<NodeId, StitchedConditions>,
    /// Per composite declaration: its resolved nominal type.
    pub composite_types: AHashMap<NodeId, Rc<CompositeType>>,
    /// Declared (or inferred) type of each variable declaration; the
    /// interpreter consults it for existential (`Any?`) boxing.
    pub variable_types: AHashMap<NodeId, Type>,
    /// Target type of each assignment statement, same purpose.
    pub assignment_types: AHashMap<NodeId, Type>,
    /// Resolved parameter types per function-like declaration, in
    /// declaration order. Binding an argument into an existential
    /// parameter boxes it like any other `Any?` assignment.
    pub parameter_types: AHashMap<NodeId, Vec<Type>>,
    /// Resolved return type per function-like declaration, for the
    /// same boxing at the return slot.
    pub return_types: AHashMap<NodeId, Type>,
}

/// A program together with its elaboration: the "elaborated tree" the
/// interpreter executes.
#[derive(Debug)]
pub struct CheckedProgram {
    pub program: Program,
    pub elaboration: Elaboration,
}
