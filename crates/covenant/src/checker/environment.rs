//! Lexical scopes and per-binding resource states used during checking.

use ahash::AHashMap;

use crate::{checker::ty::Type, position::Span};

/// The linearity state of one resource binding.
///
/// `Owned` holds a live resource, `Moved` was definitely consumed,
/// `MaybeMoved` is the merge of branches that disagree. Using a
/// `MaybeMoved` binding is an error, and so is letting one go out of
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Owned,
    MaybeMoved,
    Moved,
}

impl ResourceState {
    /// Join for control-flow merges.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other { self } else { Self::MaybeMoved }
    }
}

/// One declared variable or constant.
#[derive(Debug, Clone)]
pub struct Variable {
    pub ty: Type,
    pub is_constant: bool,
    pub span: Span,
    /// Index into the resource state vector; `None` for value types.
    pub resource_index: Option<usize>,
}

/// A stack of scopes plus the resource state vector shared across them.
///
/// Resource states live outside the scope maps so that branch snapshots
/// are a single `Vec` clone.
#[derive(Debug, Default)]
pub struct Environment {
    scopes: Vec<AHashMap<String, Variable>>,
    resource_states: Vec<ResourceState>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![AHashMap::new()],
            resource_states: Vec::new(),
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(AHashMap::new());
    }

    /// Pops the innermost scope and returns its bindings so the caller
    /// can run end-of-scope checks (resource loss).
    pub fn leave_scope(&mut self) -> AHashMap<String, Variable> {
        self.scopes.pop().unwrap_or_default()
    }

    /// Declares a variable in the innermost scope. Returns the previous
    /// binding if the name was already declared *in this scope*;
    /// shadowing an outer scope is fine.
    pub fn declare(&mut self, name: String, variable: Variable) -> Option<Variable> {
        self.scopes
            .last_mut()
            .expect("environment always has a scope")
            .insert(name, variable)
    }

    /// Allocates a tracked resource slot in the `Owned` state.
    pub fn track_resource(&mut self) -> usize {
        self.resource_states.push(ResourceState::Owned);
        self.resource_states.len() - 1
    }

    /// Nearest lexical binding, innermost scope first.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    #[must_use]
    pub fn state(&self, index: usize) -> ResourceState {
        self.resource_states[index]
    }

    pub fn set_state(&mut self, index: usize, state: ResourceState) {
        self.resource_states[index] = state;
    }

    /// Snapshot of all resource states, for branch analysis.
    #[must_use]
    pub fn snapshot_states(&self) -> Vec<ResourceState> {
        self.resource_states.clone()
    }

    pub fn restore_states(&mut self, states: Vec<ResourceState>) {
        // states allocated inside the branch stay as they are
        for (index, state) in states.into_iter().enumerate() {
            self.resource_states[index] = state;
        }
    }

    /// Merges two branch outcomes position-wise.
    pub fn merge_states(&mut self, left: &[ResourceState], right: &[ResourceState]) {
        for index in 0..left.len().min(right.len()) {
            self.resource_states[index] = left[index].merge(right[index]);
        }
    }
}
