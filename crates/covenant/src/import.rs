//! Import resolution and linking.
//!
//! The resolver is host-provided; linking happens before checking and
//! inlines the referenced declarations (optionally filtered by the
//! import's identifier selector) in place of each import declaration.
//! Each distinct location is resolved exactly once.

use std::fmt;

use ahash::AHashMap;

use crate::ast::{Declaration, DeclarationKind, ImportLocation, Program};

/// Obtains the program tree for an import location.
pub trait ImportResolver {
    fn resolve(&mut self, location: &ImportLocation) -> Result<Program, ImportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportError {
    pub location: ImportLocation,
    pub message: String,
}

impl ImportError {
    pub fn new(location: ImportLocation, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot import {}: {}", self.location, self.message)
    }
}

impl std::error::Error for ImportError {}

/// A resolver over a fixed map of locations; convenient for tests and
/// embedders with a static program set.
#[derive(Debug, Default)]
pub struct MapResolver {
    programs: AHashMap<ImportLocation, Program>,
}

impl MapResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: ImportLocation, program: Program) {
        self.programs.insert(location, program);
    }
}

impl ImportResolver for MapResolver {
    fn resolve(&mut self, location: &ImportLocation) -> Result<Program, ImportError> {
        self.programs
            .get(location)
            .cloned()
            .ok_or_else(|| ImportError::new(location.clone(), "unknown location"))
    }
}

/// Replaces every import declaration with the referenced declarations.
///
/// Transitive imports are linked too; a cycle is an error.
pub fn link(program: Program, resolver: &mut dyn ImportResolver) -> Result<Program, ImportError> {
    let mut linker = Linker {
        resolver,
        cache: AHashMap::new(),
        in_progress: Vec::new(),
    };
    linker.link(program)
}

struct Linker<'a> {
    resolver: &'a mut dyn ImportResolver,
    cache: AHashMap<ImportLocation, Vec<Declaration>>,
    in_progress: Vec<ImportLocation>,
}

impl Linker<'_> {
    fn link(&mut self, program: Program) -> Result<Program, ImportError> {
        let mut declarations = Vec::with_capacity(program.declarations.len());
        for declaration in program.declarations {
            match declaration.kind {
                DeclarationKind::Import(import) => {
                    let imported = self.resolve(&import.location)?;
                    for imported_declaration in imported {
                        let keep = import.identifiers.is_empty()
                            || declaration_name(&imported_declaration)
                                .is_some_and(|name| import.identifiers.iter().any(|selected| selected == name));
                        if keep {
                            declarations.push(imported_declaration);
                        }
                    }
                }
                kind => declarations.push(Declaration {
                    span: declaration.span,
                    kind,
                }),
            }
        }
        Ok(Program { declarations })
    }

    /// Resolves a location once and caches its linked declarations.
    fn resolve(&mut self, location: &ImportLocation) -> Result<Vec<Declaration>, ImportError> {
        if let Some(cached) = self.cache.get(location) {
            return Ok(cached.clone());
        }
        if self.in_progress.contains(location) {
            return Err(ImportError::new(location.clone(), "import cycle"));
        }
        self.in_progress.push(location.clone());
        let resolved = self.resolver.resolve(location)?;
        let linked = self.link(resolved)?;
        self.in_progress.pop();
        self.cache.insert(location.clone(), linked.declarations.clone());
        Ok(linked.declarations)
    }
}

fn declaration_name(declaration: &Declaration) -> Option<&str> {
    match &declaration.kind {
        DeclarationKind::Variable(variable) => Some(&variable.name),
        DeclarationKind::Function(function) => Some(&function.name),
        DeclarationKind::Composite(composite) => Some(&composite.name),
        DeclarationKind::Interface(interface) => Some(&interface.name),
        DeclarationKind::Transaction(_) | DeclarationKind::Import(_) => None,
    }
}
