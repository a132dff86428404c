//! Semantic checker: program tree to elaborated tree plus diagnostics.
//!
//! Checking is a single pass over each body after a two-phase nominal
//! resolution (names are registered first, signatures second), which is
//! what allows forward references between declarations. Diagnostics are
//! accumulated; the checker never stops at the first error.

pub mod elaboration;
pub mod environment;
pub mod ty;

use std::rc::Rc;

use ahash::AHashMap;
use num_bigint::BigInt;

use crate::{
    ast::{
        Access, Argument, BinaryOperator, Block, CompositeDeclaration, CompositeKind, Condition,
        DeclarationKind, Expression, ExpressionKind, FunctionBlock, FunctionDeclaration, IfTest,
        InterfaceDeclaration, Parameter, Program, SpecialFunctionKind, Statement, StatementKind,
        TransactionDeclaration, Transfer, TypeAnnotation, TypeExpression, TypeExpressionKind, UnaryOperator,
        VariableDeclaration, stmt::ElseBranch,
    },
    checker::{
        elaboration::{BeforeBinding, CheckedProgram, Elaboration, StitchedConditions},
        environment::{Environment, ResourceState, Variable},
        ty::{CompositeType, FunctionType, InterfaceType, Member, ParameterType, Type},
    },
    diagnostics::{DiagnosticKind, Diagnostics},
    position::{NodeId, Span},
    stdlib::StandardLibrary,
};

/// Checks a program against a set of predeclared values.
///
/// On success the result carries the program and its elaboration side
/// tables; on failure all accumulated diagnostics are returned. Warnings
/// (unreachable statements) do not fail the check but are still present
/// in the elaborated result's diagnostics.
pub fn check(program: Program, stdlib: &StandardLibrary) -> Result<CheckedProgram, Diagnostics> {
    let mut checker = Checker::new(stdlib);
    checker.register_nominal_types(&program);
    checker.elaborate_signatures(&program);
    checker.register_global_functions(&program);
    checker.check_interfaces(&program);
    checker.check_conformances(&program);
    checker.check_bodies(&program);
    if checker.diagnostics.has_errors() {
        Err(checker.diagnostics)
    } else {
        Ok(CheckedProgram {
            program,
            elaboration: checker.elaboration,
        })
    }
}

/// Like [`check`], but also returns the non-error diagnostics of a
/// successful check (unreachable-statement warnings).
pub fn check_with_warnings(
    program: Program,
    stdlib: &StandardLibrary,
) -> (Result<CheckedProgram, Diagnostics>, Diagnostics) {
    let mut checker = Checker::new(stdlib);
    checker.register_nominal_types(&program);
    checker.elaborate_signatures(&program);
    checker.register_global_functions(&program);
    checker.check_interfaces(&program);
    checker.check_conformances(&program);
    checker.check_bodies(&program);
    let warnings = checker.diagnostics.clone();
    if checker.diagnostics.has_errors() {
        (Err(checker.diagnostics), warnings)
    } else {
        (
            Ok(CheckedProgram {
                program,
                elaboration: checker.elaboration,
            }),
            warnings,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionContext {
    None,
    Pre,
    Post,
}

struct FunctionContext {
    declaration_id: NodeId,
    return_type: Type,
}

struct Checker {
    diagnostics: Diagnostics,
    elaboration: Elaboration,
    env: Environment,
    types: AHashMap<String, Type>,
    interface_declarations: AHashMap<String, Rc<InterfaceDeclaration>>,
    function_stack: Vec<FunctionContext>,
    condition_context: ConditionContext,
    current_composite: Option<Rc<CompositeType>>,
    in_create: bool,
    in_initializer: bool,
    loop_depth: usize,
    before_counter: usize,
}

impl Checker {
    fn new(stdlib: &StandardLibrary) -> Self {
        let mut types = AHashMap::new();
        for (name, ty) in [
            ("Any", Type::Any),
            ("Never", Type::Never),
            ("Void", Type::Void),
            ("Bool", Type::Bool),
            ("Character", Type::Character),
            ("String", Type::String),
            ("Int", Type::Int),
            ("Int8", Type::Int8),
            ("Int16", Type::Int16),
            ("Int32", Type::Int32),
            ("Int64", Type::Int64),
            ("UInt8", Type::UInt8),
            ("UInt16", Type::UInt16),
            ("UInt32", Type::UInt32),
            ("UInt64", Type::UInt64),
            ("Fix64", Type::Fix64),
            ("Storage", Type::Storage),
        ] {
            types.insert(name.to_string(), ty);
        }

        let mut env = Environment::new();
        for entry in stdlib.entries() {
            env.declare(
                entry.name.clone(),
                Variable {
                    ty: entry.ty.clone(),
                    is_constant: true,
                    span: Span::default(),
                    resource_index: None,
                },
            );
        }

        Self {
            diagnostics: Diagnostics::new(),
            elaboration: Elaboration::default(),
            env,
            types,
            interface_declarations: AHashMap::new(),
            function_stack: Vec::new(),
            condition_context: ConditionContext::None,
            current_composite: None,
            in_create: false,
            in_initializer: false,
            loop_depth: 0,
            before_counter: 0,
        }
    }

    fn report(&mut self, kind: DiagnosticKind, span: Span) {
        self.diagnostics.report(kind, span);
    }

    // --- phase 1: nominal registration ---

    fn register_nominal_types(&mut self, program: &Program) {
        for declaration in &program.declarations {
            match &declaration.kind {
                DeclarationKind::Composite(composite) => {
                    let ty = Rc::new(CompositeType {
                        kind: composite.kind,
                        name: composite.name.clone(),
                        members: std::cell::RefCell::new(Default::default()),
                    });
                    if self
                        .types
                        .insert(composite.name.clone(), Type::Composite(Rc::clone(&ty)))
                        .is_some()
                    {
                        self.report(
                            DiagnosticKind::Redeclaration {
                                name: composite.name.clone(),
                            },
                            composite.name_span,
                        );
                    }
                    self.elaboration.composite_types.insert(composite.id, ty);
                }
                DeclarationKind::Interface(interface) => {
                    let ty = Rc::new(InterfaceType {
                        kind: interface.kind,
                        name: interface.name.clone(),
                        members: std::cell::RefCell::new(Default::default()),
                    });
                    if self
                        .types
                        .insert(interface.name.clone(), Type::Interface(ty))
                        .is_some()
                    {
                        self.report(
                            DiagnosticKind::Redeclaration {
                                name: interface.name.clone(),
                            },
                            interface.name_span,
                        );
                    }
                    self.interface_declarations
                        .insert(interface.name.clone(), Rc::clone(interface));
                }
                _ => {}
            }
        }
    }

    // --- phase 2: signature elaboration ---

    fn elaborate_signatures(&mut self, program: &Program) {
        for declaration in &program.declarations {
            match &declaration.kind {
                DeclarationKind::Composite(composite) => {
                    let members = self.elaborate_member_signatures(
                        &composite.members.fields,
                        &composite.members.functions,
                        composite
                            .members
                            .special_functions
                            .iter()
                            .find(|f| f.kind == SpecialFunctionKind::Init)
                            .map(|f| f.parameters.as_slice()),
                        &composite.conformances.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                        composite.kind,
                        composite.span,
                    );
                    if let Some(Type::Composite(ty)) = self.types.get(&composite.name) {
                        *ty.members.borrow_mut() = members;
                    }
                }
                DeclarationKind::Interface(interface) => {
                    let members = self.elaborate_member_signatures(
                        &interface.members.fields,
                        &interface.members.functions,
                        interface
                            .members
                            .special_functions
                            .iter()
                            .find(|f| f.kind == SpecialFunctionKind::Init)
                            .map(|f| f.parameters.as_slice()),
                        &[],
                        interface.kind,
                        interface.span,
                    );
                    if let Some(Type::Interface(ty)) = self.types.get(&interface.name) {
                        *ty.members.borrow_mut() = members;
                    }
                }
                _ => {}
            }
        }
    }

    fn elaborate_member_signatures(
        &mut self,
        fields: &[crate::ast::FieldDeclaration],
        functions: &[Rc<FunctionDeclaration>],
        initializer_parameters: Option<&[Parameter]>,
        conformances: &[String],
        kind: CompositeKind,
        span: Span,
    ) -> ty::CompositeMembers {
        let mut members = ty::CompositeMembers::default();
        for name in conformances {
            match self.types.get(name).cloned() {
                Some(Type::Interface(interface)) if interface.kind == kind => {
                    members.conformances.push(interface);
                }
                Some(_) => {
                    self.report(DiagnosticKind::RestrictionNotInterface { name: name.clone() }, span);
                }
                None => {
                    self.report(DiagnosticKind::NotDeclared { name: name.clone() }, span);
                }
            }
        }
        for field in fields {
            let field_ty = self.resolve_annotation(&field.type_annotation);
            members.fields.insert(
                field.name.clone(),
                Member {
                    ty: field_ty,
                    access: field.access,
                    is_constant: field.is_constant,
                    span: field.span,
                },
            );
        }
        for function in functions {
            let function_ty = self.function_type(&function.parameters, function.return_annotation.as_ref());
            members.functions.insert(
                function.name.clone(),
                Member {
                    ty: Type::Function(Rc::new(function_ty)),
                    access: function.access,
                    is_constant: true,
                    span: function.span,
                },
            );
        }
        if let Some(parameters) = initializer_parameters {
            members.initializer_parameters = self.parameter_types(parameters);
        }
        members
    }

    fn parameter_types(&mut self, parameters: &[Parameter]) -> Vec<ParameterType> {
        parameters
            .iter()
            .map(|parameter| ParameterType {
                label: parameter.effective_label().map(str::to_string),
                name: parameter.name.clone(),
                ty: self.resolve_annotation(&parameter.type_annotation),
            })
            .collect()
    }

    fn function_type(&mut self, parameters: &[Parameter], return_annotation: Option<&TypeAnnotation>) -> FunctionType {
        FunctionType {
            parameters: self.parameter_types(parameters),
            return_type: return_annotation.map_or(Type::Void, |annotation| self.resolve_annotation(annotation)),
        }
    }

    fn register_global_functions(&mut self, program: &Program) {
        for declaration in &program.declarations {
            if let DeclarationKind::Function(function) = &declaration.kind {
                let function_ty = self.function_type(&function.parameters, function.return_annotation.as_ref());
                if self
                    .env
                    .declare(
                        function.name.clone(),
                        Variable {
                            ty: Type::Function(Rc::new(function_ty)),
                            is_constant: true,
                            span: function.name_span,
                            resource_index: None,
                        },
                    )
                    .is_some()
                {
                    self.report(
                        DiagnosticKind::Redeclaration {
                            name: function.name.clone(),
                        },
                        function.name_span,
                    );
                }
            }
        }
    }

    // --- type resolution ---

    fn resolve_annotation(&mut self, annotation: &TypeAnnotation) -> Type {
        let ty = self.resolve_type(&annotation.ty);
        if annotation.is_resource != ty.is_resource() && !matches!(ty, Type::Any | Type::Never) {
            self.report(
                DiagnosticKind::ResourceAnnotationMismatch {
                    ty: ty.to_string(),
                    annotated: annotation.is_resource,
                },
                annotation.span,
            );
        }
        ty
    }

    fn resolve_type(&mut self, type_expression: &TypeExpression) -> Type {
        match &type_expression.kind {
            TypeExpressionKind::Named(name) => match self.types.get(name) {
                Some(ty) => ty.clone(),
                None => {
                    self.report(DiagnosticKind::NotDeclared { name: name.clone() }, type_expression.span);
                    Type::Any
                }
            },
            TypeExpressionKind::Optional(inner) => Type::Optional(Box::new(self.resolve_type(inner))),
            TypeExpressionKind::VariableSized(element) => {
                Type::VariableArray(Box::new(self.resolve_type(element)))
            }
            TypeExpressionKind::ConstantSized { element, size } => Type::ConstantArray {
                element: Box::new(self.resolve_type(element)),
                size: *size,
            },
            TypeExpressionKind::Dictionary { key, value } => {
                let key_ty = self.resolve_type(key);
                if !key_ty.is_hashable() {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "a hashable primitive key type".to_string(),
                            actual: key_ty.to_string(),
                        },
                        key.span,
                    );
                }
                Type::Dictionary {
                    key: Box::new(key_ty),
                    value: Box::new(self.resolve_type(value)),
                }
            }
            TypeExpressionKind::Function {
                parameters,
                return_type,
            } => {
                let parameters = parameters
                    .iter()
                    .map(|annotation| ParameterType {
                        label: None,
                        name: String::new(),
                        ty: self.resolve_annotation(annotation),
                    })
                    .collect();
                let return_type = self.resolve_annotation(return_type);
                Type::Function(Rc::new(FunctionType {
                    parameters,
                    return_type,
                }))
            }
            TypeExpressionKind::Reference {
                authorized,
                referenced,
            } => Type::Reference {
                authorized: *authorized,
                referenced: Box::new(self.resolve_type(referenced)),
            },
            TypeExpressionKind::Restricted { base, restrictions } => {
                let base = base.as_ref().map(|base| Box::new(self.resolve_type(base)));
                let mut names = Vec::new();
                for restriction in restrictions {
                    match self.types.get(&restriction.name) {
                        Some(Type::Interface(_)) => names.push(restriction.name.clone()),
                        Some(_) => self.report(
                            DiagnosticKind::RestrictionNotInterface {
                                name: restriction.name.clone(),
                            },
                            restriction.span,
                        ),
                        None => self.report(
                            DiagnosticKind::NotDeclared {
                                name: restriction.name.clone(),
                            },
                            restriction.span,
                        ),
                    }
                }
                // order-insensitive set
                names.sort();
                names.dedup();
                Type::Restricted { base, restrictions: names }
            }
        }
    }

    // --- phase 3: interfaces, conformances, bodies ---

    fn check_interfaces(&mut self, program: &Program) {
        for declaration in &program.declarations {
            let DeclarationKind::Interface(interface) = &declaration.kind else {
                continue;
            };
            let self_type = match self.types.get(&interface.name) {
                Some(ty @ Type::Interface(_)) => ty.clone(),
                _ => continue,
            };
            for function in &interface.members.functions {
                let Some(body) = &function.body else { continue };
                let return_type = function
                    .return_annotation
                    .as_ref()
                    .map_or(Type::Void, |annotation| self.resolve_annotation(annotation));
                self.env.enter_scope();
                self.declare_self(self_type.clone());
                self.check_function_like(function.id, &function.parameters, return_type, body);
                self.leave_scope_checked();
            }
            for special in &interface.members.special_functions {
                let Some(body) = &special.body else { continue };
                self.env.enter_scope();
                self.declare_self(self_type.clone());
                self.check_function_like(special.id, &special.parameters, Type::Void, body);
                self.leave_scope_checked();
            }
        }
    }

    fn check_conformances(&mut self, program: &Program) {
        for declaration in &program.declarations {
            let DeclarationKind::Composite(composite) = &declaration.kind else {
                continue;
            };
            let Some(Type::Composite(composite_ty)) = self.types.get(&composite.name).cloned() else {
                continue;
            };
            let conformances = composite_ty.members.borrow().conformances.clone();
            for interface in conformances {
                self.check_conformance(composite, &composite_ty, &interface);
            }
        }
    }

    fn check_conformance(
        &mut self,
        composite: &CompositeDeclaration,
        composite_ty: &Rc<CompositeType>,
        interface: &Rc<InterfaceType>,
    ) {
        let interface_members = interface.members.borrow();
        let members = composite_ty.members.borrow();
        for (name, required) in &interface_members.fields {
            match members.fields.get(name) {
                Some(field) if field.ty == required.ty => {}
                Some(_) | None => {
                    self.report(
                        DiagnosticKind::InterfaceNonConformance {
                            composite: composite.name.clone(),
                            interface: interface.name.clone(),
                            missing: format!("field `{name}`"),
                        },
                        composite.name_span,
                    );
                }
            }
        }
        for (name, required) in &interface_members.functions {
            match members.functions.get(name) {
                Some(function) if function.ty == required.ty => {}
                Some(_) | None => {
                    self.report(
                        DiagnosticKind::InterfaceNonConformance {
                            composite: composite.name.clone(),
                            interface: interface.name.clone(),
                            missing: format!("function `{name}`"),
                        },
                        composite.name_span,
                    );
                }
            }
        }
        drop(members);
        drop(interface_members);

        // stitch interface conditions onto the implementing members
        let Some(interface_declaration) = self.interface_declarations.get(&interface.name).cloned() else {
            return;
        };
        for interface_function in &interface_declaration.members.functions {
            let Some(interface_body) = &interface_function.body else {
                continue;
            };
            if interface_body.pre_conditions.is_empty() && interface_body.post_conditions.is_empty() {
                continue;
            }
            let Some(implementation) = composite
                .members
                .functions
                .iter()
                .find(|f| f.name == interface_function.name)
            else {
                continue;
            };
            self.stitch_conditions(implementation.id, interface_function.id, interface_body);
        }
        for interface_special in &interface_declaration.members.special_functions {
            let Some(interface_body) = &interface_special.body else {
                continue;
            };
            if interface_body.pre_conditions.is_empty() && interface_body.post_conditions.is_empty() {
                continue;
            }
            let Some(implementation) = composite
                .members
                .special_functions
                .iter()
                .find(|f| f.kind == interface_special.kind)
            else {
                continue;
            };
            self.stitch_conditions(implementation.id, interface_special.id, interface_body);
        }
    }

    fn stitch_conditions(&mut self, implementation_id: NodeId, interface_member_id: NodeId, body: &FunctionBlock) {
        let stitched = self
            .elaboration
            .interface_conditions
            .entry(implementation_id)
            .or_insert_with(StitchedConditions::default);
        stitched.pre.extend(body.pre_conditions.iter().cloned());
        stitched.post.extend(body.post_conditions.iter().cloned());
        // inherited post conditions may capture `before(...)`; their
        // entry-time bindings move with them
        if let Some(bindings) = self.elaboration.before_bindings.get(&interface_member_id).cloned() {
            self.elaboration
                .before_bindings
                .entry(implementation_id)
                .or_default()
                .extend(bindings);
        }
    }

    fn check_bodies(&mut self, program: &Program) {
        for declaration in &program.declarations {
            match &declaration.kind {
                DeclarationKind::Variable(variable) => {
                    self.check_variable_declaration(variable);
                }
                DeclarationKind::Function(function) => {
                    if let Some(body) = &function.body {
                        let return_type = function
                            .return_annotation
                            .as_ref()
                            .map_or(Type::Void, |annotation| self.resolve_annotation(annotation));
                        self.env.enter_scope();
                        self.check_function_like(function.id, &function.parameters, return_type, body);
                        self.leave_scope_checked();
                    }
                }
                DeclarationKind::Composite(composite) => self.check_composite(composite),
                DeclarationKind::Interface(_) => {}
                DeclarationKind::Transaction(transaction) => self.check_transaction(transaction),
                DeclarationKind::Import(_) => {
                    // imports are resolved and inlined by the linking pass
                }
            }
        }
    }

    fn check_composite(&mut self, composite: &Rc<CompositeDeclaration>) {
        let Some(Type::Composite(composite_ty)) = self.types.get(&composite.name).cloned() else {
            return;
        };
        let self_type = Type::Composite(Rc::clone(&composite_ty));
        let previous = self.current_composite.replace(Rc::clone(&composite_ty));

        if composite.kind == CompositeKind::Resource
            && !composite
                .members
                .special_functions
                .iter()
                .any(|f| f.kind == SpecialFunctionKind::Init)
            && !composite.members.fields.is_empty()
        {
            self.report(
                DiagnosticKind::MissingInitializer {
                    composite: composite.name.clone(),
                },
                composite.name_span,
            );
        }

        for special in &composite.members.special_functions {
            match special.kind {
                SpecialFunctionKind::Init => {
                    if composite.kind == CompositeKind::Event {
                        continue; // implicit, nothing to check
                    }
                    let Some(body) = &special.body else { continue };
                    self.env.enter_scope();
                    self.declare_self(self_type.clone());
                    self.in_initializer = true;
                    self.check_function_like(special.id, &special.parameters, Type::Void, body);
                    self.in_initializer = false;
                    self.leave_scope_checked();
                    self.check_field_initialization(composite, body);
                }
                SpecialFunctionKind::Destroy => {
                    if composite.kind != CompositeKind::Resource {
                        self.report(
                            DiagnosticKind::Syntax {
                                message: format!("`destroy` is not valid in a {}", composite.kind),
                            },
                            special.span,
                        );
                    }
                    let Some(body) = &special.body else { continue };
                    self.env.enter_scope();
                    self.declare_self(self_type.clone());
                    self.check_function_like(special.id, &[], Type::Void, body);
                    self.leave_scope_checked();
                }
                SpecialFunctionKind::Prepare | SpecialFunctionKind::Execute => {
                    self.report(
                        DiagnosticKind::Syntax {
                            message: format!("`{}` is only valid in a transaction", special.kind),
                        },
                        special.span,
                    );
                }
            }
        }

        for function in &composite.members.functions {
            let Some(body) = &function.body else {
                self.report(
                    DiagnosticKind::Syntax {
                        message: format!("function `{}` requires a body", function.name),
                    },
                    function.span,
                );
                continue;
            };
            let return_type = function
                .return_annotation
                .as_ref()
                .map_or(Type::Void, |annotation| self.resolve_annotation(annotation));
            self.env.enter_scope();
            self.declare_self(self_type.clone());
            self.check_function_like(function.id, &function.parameters, return_type, body);
            self.leave_scope_checked();
        }

        self.current_composite = previous;
    }

    /// Every field must be assigned by the initializer; the walk is over
    /// top-level `self.x = ...` statements.
    fn check_field_initialization(&mut self, composite: &CompositeDeclaration, body: &FunctionBlock) {
        let mut assigned: Vec<&str> = Vec::new();
        for statement in &body.block.statements {
            if let StatementKind::Assignment { target, .. } = &statement.kind
                && let ExpressionKind::Member { target: object, name, .. } = &target.kind
                && matches!(&object.kind, ExpressionKind::Identifier(id) if id == "self")
            {
                assigned.push(name);
            }
        }
        for field in &composite.members.fields {
            if !assigned.contains(&field.name.as_str()) {
                self.report(
                    DiagnosticKind::FieldNotInitialized {
                        composite: composite.name.clone(),
                        field: field.name.clone(),
                    },
                    field.span,
                );
            }
        }
    }

    fn check_transaction(&mut self, transaction: &TransactionDeclaration) {
        self.env.enter_scope();
        for field in &transaction.fields {
            let ty = self.resolve_annotation(&field.type_annotation);
            let resource_index = ty.is_resource().then(|| self.env.track_resource());
            self.env.declare(
                field.name.clone(),
                Variable {
                    ty,
                    is_constant: false,
                    span: field.span,
                    resource_index,
                },
            );
        }
        if let Some(prepare) = &transaction.prepare
            && let Some(body) = &prepare.body
        {
            self.check_function_like(prepare.id, &prepare.parameters, Type::Void, body);
        }
        if let Some(execute) = &transaction.execute
            && let Some(body) = &execute.body
        {
            self.check_function_like(execute.id, &[], Type::Void, body);
        }
        self.leave_scope_checked();
    }

    fn declare_self(&mut self, ty: Type) {
        self.env.declare(
            "self".to_string(),
            Variable {
                ty,
                is_constant: true,
                span: Span::default(),
                resource_index: None,
            },
        );
    }

    // --- function-like bodies ---

    fn check_function_like(&mut self, declaration_id: NodeId, parameters: &[Parameter], return_type: Type, body: &FunctionBlock) {
        self.env.enter_scope();
        let mut parameter_types = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let ty = self.resolve_annotation(&parameter.type_annotation);
            parameter_types.push(ty.clone());
            let resource_index = ty.is_resource().then(|| self.env.track_resource());
            self.env.declare(
                parameter.name.clone(),
                Variable {
                    ty,
                    is_constant: true,
                    span: parameter.span,
                    resource_index,
                },
            );
        }
        self.elaboration.parameter_types.insert(declaration_id, parameter_types);
        self.elaboration.return_types.insert(declaration_id, return_type.clone());
        self.function_stack.push(FunctionContext {
            declaration_id,
            return_type: return_type.clone(),
        });

        self.condition_context = ConditionContext::Pre;
        self.check_conditions(&body.pre_conditions);
        self.condition_context = ConditionContext::None;

        self.check_statements(&body.block.statements);

        self.condition_context = ConditionContext::Post;
        self.env.enter_scope();
        if return_type != Type::Void {
            self.env.declare(
                "result".to_string(),
                Variable {
                    ty: return_type,
                    is_constant: true,
                    span: body.span,
                    resource_index: None,
                },
            );
        }
        self.check_conditions(&body.post_conditions);
        self.env.leave_scope();
        self.condition_context = ConditionContext::None;

        self.function_stack.pop();
        self.leave_scope_checked();
    }

    fn check_conditions(&mut self, conditions: &[Condition]) {
        for condition in conditions {
            let test_ty = self.check_expression(&condition.test, Some(&Type::Bool));
            if !test_ty.is_subtype_of(&Type::Bool) {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: "Bool".to_string(),
                        actual: test_ty.to_string(),
                    },
                    condition.test.span,
                );
            }
            if let Some(message) = &condition.message {
                let message_ty = self.check_expression(message, Some(&Type::String));
                if !message_ty.is_subtype_of(&Type::String) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "String".to_string(),
                            actual: message_ty.to_string(),
                        },
                        message.span,
                    );
                }
            }
        }
    }

    fn leave_scope_checked(&mut self) {
        let frame = self.env.leave_scope();
        let mut lost: Vec<(String, Span)> = Vec::new();
        for (name, variable) in &frame {
            if let Some(index) = variable.resource_index
                && matches!(self.env.state(index), ResourceState::Owned | ResourceState::MaybeMoved)
            {
                lost.push((name.clone(), variable.span));
            }
        }
        lost.sort_by_key(|(_, span)| span.start);
        for (name, span) in lost {
            self.report(DiagnosticKind::ResourceLoss { name }, span);
        }
    }

    // --- statements ---

    /// Checks a statement sequence, reporting the first statement after a
    /// definite exit as unreachable. Returns whether the sequence
    /// definitely exits.
    fn check_statements(&mut self, statements: &[Rc<Statement>]) -> bool {
        let mut exited = false;
        let mut reported = false;
        for statement in statements {
            if exited && !reported {
                self.report(DiagnosticKind::UnreachableStatement, statement.span);
                reported = true;
            }
            exited |= self.check_statement(statement);
        }
        exited
    }

    fn check_block(&mut self, block: &Block) -> bool {
        self.env.enter_scope();
        let exits = self.check_statements(&block.statements);
        self.leave_scope_checked();
        exits
    }

    fn check_statement(&mut self, statement: &Statement) -> bool {
        match &statement.kind {
            StatementKind::Block(block) => self.check_block(block),
            StatementKind::Expression(expression) => {
                let ty = self.check_expression(expression, None);
                if ty.is_resource() && !matches!(expression.kind, ExpressionKind::Destroy(_)) {
                    self.report(DiagnosticKind::UnhandledResource, expression.span);
                }
                false
            }
            StatementKind::Return { value } => {
                let return_type = self
                    .function_stack
                    .last()
                    .map(|context| context.return_type.clone());
                match return_type {
                    None => {
                        self.report(DiagnosticKind::ReturnOutsideFunction, statement.span);
                    }
                    Some(return_type) => match value {
                        None => {
                            if return_type != Type::Void {
                                self.report(
                                    DiagnosticKind::TypeMismatch {
                                        expected: return_type.to_string(),
                                        actual: "Void".to_string(),
                                    },
                                    statement.span,
                                );
                            }
                        }
                        Some(value) => {
                            let value_ty = self.check_expression(value, Some(&return_type));
                            if !value_ty.is_subtype_of(&return_type) {
                                self.report(
                                    DiagnosticKind::TypeMismatch {
                                        expected: return_type.to_string(),
                                        actual: value_ty.to_string(),
                                    },
                                    value.span,
                                );
                            }
                            // returning a resource moves it out
                            if value_ty.is_resource() {
                                self.invalidate_source(value);
                            }
                        }
                    },
                }
                true
            }
            StatementKind::Break | StatementKind::Continue => {
                if self.loop_depth == 0 {
                    self.report(DiagnosticKind::ControlOutsideLoop, statement.span);
                }
                true
            }
            StatementKind::If { test, then, otherwise } => self.check_if(test, then, otherwise.as_ref()),
            StatementKind::While { test, block } => {
                let test_ty = self.check_expression(test, Some(&Type::Bool));
                if !test_ty.is_subtype_of(&Type::Bool) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "Bool".to_string(),
                            actual: test_ty.to_string(),
                        },
                        test.span,
                    );
                }
                let before = self.env.snapshot_states();
                self.loop_depth += 1;
                self.check_block(block);
                self.loop_depth -= 1;
                let after = self.env.snapshot_states();
                self.env.merge_states(&before, &after);
                false
            }
            StatementKind::VariableDeclaration(declaration) => {
                self.check_variable_declaration(declaration);
                false
            }
            StatementKind::Assignment {
                target,
                transfer,
                value,
            } => {
                self.check_assignment(statement.id, target, *transfer, value);
                false
            }
            StatementKind::Swap { left, right } => {
                let left_ty = self.check_assignment_target(left, true);
                let right_ty = self.check_assignment_target(right, true);
                if !(left_ty.is_subtype_of(&right_ty) || right_ty.is_subtype_of(&left_ty)) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: left_ty.to_string(),
                            actual: right_ty.to_string(),
                        },
                        right.span,
                    );
                }
                false
            }
            StatementKind::Emit(expression) => {
                self.check_emit(expression);
                false
            }
        }
    }

    fn check_if(&mut self, test: &IfTest, then: &Block, otherwise: Option<&ElseBranch>) -> bool {
        let mut binding: Option<(String, Type, Span, bool)> = None;
        match test {
            IfTest::Expression(expression) => {
                let ty = self.check_expression(expression, Some(&Type::Bool));
                if !ty.is_subtype_of(&Type::Bool) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "Bool".to_string(),
                            actual: ty.to_string(),
                        },
                        expression.span,
                    );
                }
            }
            IfTest::Declaration(declaration) => {
                let value_ty = self.check_expression(&declaration.value, None);
                match value_ty.unwrap_optional() {
                    Some(inner) => {
                        binding = Some((
                            declaration.name.clone(),
                            inner.clone(),
                            declaration.name_span,
                            declaration.is_constant,
                        ));
                    }
                    None => {
                        self.report(
                            DiagnosticKind::InvalidOptionalBinding {
                                ty: value_ty.to_string(),
                            },
                            declaration.value.span,
                        );
                    }
                }
                if let Some((_, ty, ..)) = &binding
                    && ty.is_resource()
                    && declaration.transfer == Transfer::Move
                {
                    self.invalidate_source(&declaration.value);
                }
            }
        }

        let before = self.env.snapshot_states();
        self.env.enter_scope();
        if let Some((name, ty, span, is_constant)) = binding {
            let resource_index = ty.is_resource().then(|| self.env.track_resource());
            self.env.declare(
                name,
                Variable {
                    ty,
                    is_constant,
                    span,
                    resource_index,
                },
            );
        }
        let then_exits = self.check_statements(&then.statements);
        self.leave_scope_checked();
        let then_states = self.env.snapshot_states();

        self.env.restore_states(before);
        let else_exits = match otherwise {
            None => false,
            Some(ElseBranch::Block(block)) => self.check_block(block),
            Some(ElseBranch::If(statement)) => self.check_statement(statement),
        };
        let else_states = self.env.snapshot_states();

        // a branch that definitely exits does not constrain the merge
        match (then_exits, else_exits) {
            (true, false) => {} // else states are already current
            (false, true) => self.env.restore_states(then_states),
            _ => self.env.merge_states(&then_states, &else_states),
        }
        then_exits && else_exits && otherwise.is_some()
    }

    fn check_variable_declaration(&mut self, declaration: &VariableDeclaration) {
        let declared = declaration
            .type_annotation
            .as_ref()
            .map(|annotation| self.resolve_annotation(annotation));
        let value_ty = self.check_expression(&declaration.value, declared.as_ref());
        let ty = match declared {
            Some(declared) => {
                if !value_ty.is_subtype_of(&declared) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: declared.to_string(),
                            actual: value_ty.to_string(),
                        },
                        declaration.value.span,
                    );
                }
                declared
            }
            None => value_ty,
        };

        self.check_transfer(&ty, declaration.transfer, declaration.span);
        if declaration.transfer == Transfer::Move {
            self.invalidate_source(&declaration.value);
        }
        self.elaboration.variable_types.insert(declaration.id, ty.clone());

        let resource_index = ty.is_resource().then(|| self.env.track_resource());
        if self
            .env
            .declare(
                declaration.name.clone(),
                Variable {
                    ty,
                    is_constant: declaration.is_constant,
                    span: declaration.name_span,
                    resource_index,
                },
            )
            .is_some()
        {
            self.report(
                DiagnosticKind::Redeclaration {
                    name: declaration.name.clone(),
                },
                declaration.name_span,
            );
        }
    }

    fn check_transfer(&mut self, ty: &Type, transfer: Transfer, span: Span) {
        match (ty.is_resource(), transfer) {
            (true, Transfer::Copy) => self.report(DiagnosticKind::MissingMoveOperation, span),
            (false, Transfer::Move) => self.report(DiagnosticKind::InvalidMoveOperation, span),
            _ => {}
        }
    }

    fn check_assignment(&mut self, statement_id: NodeId, target: &Expression, transfer: Transfer, value: &Expression) {
        let target_ty = self.check_assignment_target(target, false);
        self.elaboration.assignment_types.insert(statement_id, target_ty.clone());
        let value_ty = self.check_expression(value, Some(&target_ty));
        if !value_ty.is_subtype_of(&target_ty) {
            self.report(
                DiagnosticKind::TypeMismatch {
                    expected: target_ty.to_string(),
                    actual: value_ty.to_string(),
                },
                value.span,
            );
        }
        self.check_transfer(&value_ty, transfer, value.span);
        if transfer == Transfer::Move {
            self.invalidate_source(value);
        }
    }

    /// Checks an assignment or swap target and returns the type a value
    /// must have to be stored there. `for_swap` suppresses the
    /// overwrite-loses-resource check, since a swap loses nothing.
    fn check_assignment_target(&mut self, target: &Expression, for_swap: bool) -> Type {
        match &target.kind {
            ExpressionKind::Identifier(name) => {
                let Some(variable) = self.env.lookup(name).cloned() else {
                    self.report(DiagnosticKind::NotDeclared { name: name.clone() }, target.span);
                    return Type::Any;
                };
                if variable.is_constant {
                    self.report(DiagnosticKind::AssignmentToConstant { name: name.clone() }, target.span);
                }
                if let Some(index) = variable.resource_index {
                    if !for_swap && self.env.state(index) == ResourceState::Owned {
                        self.report(DiagnosticKind::ResourceLoss { name: name.clone() }, target.span);
                    }
                    self.env.set_state(index, ResourceState::Owned);
                }
                variable.ty
            }
            ExpressionKind::Member { target: object, name, name_span, .. } => {
                let object_ty = self.check_expression(object, None);
                let object_ty = self.deref_reference(object_ty);
                let core = object_ty.optional_core().clone();
                let (member_ty, access, is_constant) = match &core {
                    Type::Composite(composite) => {
                        let members = composite.members.borrow();
                        match members.fields.get(name) {
                            Some(member) => (member.ty.clone(), member.access, member.is_constant),
                            None => {
                                self.report(DiagnosticKind::NotDeclared { name: name.clone() }, *name_span);
                                return Type::Any;
                            }
                        }
                    }
                    _ => {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: "a composite value".to_string(),
                                actual: core.to_string(),
                            },
                            object.span,
                        );
                        return Type::Any;
                    }
                };
                let inside = self
                    .current_composite
                    .as_ref()
                    .is_some_and(|current| matches!(&core, Type::Composite(c) if c.name == current.name));
                if inside {
                    let self_target = matches!(&object.kind, ExpressionKind::Identifier(id) if id == "self");
                    if is_constant && !(self.in_initializer && self_target) {
                        self.report(DiagnosticKind::AssignmentToConstant { name: name.clone() }, *name_span);
                    }
                } else {
                    if access != Access::PublicSettable {
                        self.report(DiagnosticKind::AccessViolation { name: name.clone() }, *name_span);
                    }
                    if is_constant {
                        self.report(DiagnosticKind::AssignmentToConstant { name: name.clone() }, *name_span);
                    }
                }
                member_ty
            }
            ExpressionKind::Index { target: object, index } => {
                let object_ty = self.check_expression(object, None);
                let object_ty = self.deref_reference(object_ty);
                match object_ty {
                    Type::Storage => {
                        let key = self.check_storage_key(target.id, index);
                        Type::Optional(Box::new(key))
                    }
                    Type::VariableArray(element) | Type::ConstantArray { element, .. } => {
                        let index_ty = self.check_expression(index, Some(&Type::Int));
                        if !index_ty.is_integer() {
                            self.report(
                                DiagnosticKind::TypeMismatch {
                                    expected: "an integer".to_string(),
                                    actual: index_ty.to_string(),
                                },
                                index.span,
                            );
                        }
                        if element.is_resource() && !for_swap {
                            self.report(DiagnosticKind::InvalidResourceIndexRead, target.span);
                        }
                        *element
                    }
                    Type::Dictionary { key, value } => {
                        let index_ty = self.check_expression(index, Some(&key));
                        if !index_ty.is_subtype_of(&key) {
                            self.report(
                                DiagnosticKind::TypeMismatch {
                                    expected: key.to_string(),
                                    actual: index_ty.to_string(),
                                },
                                index.span,
                            );
                        }
                        if value.is_resource() && !for_swap {
                            self.report(DiagnosticKind::InvalidResourceIndexRead, target.span);
                        }
                        Type::Optional(value)
                    }
                    other => {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: "an indexable value".to_string(),
                                actual: other.to_string(),
                            },
                            object.span,
                        );
                        Type::Any
                    }
                }
            }
            _ => {
                // the parser already rejected this target shape
                Type::Any
            }
        }
    }

    fn check_emit(&mut self, expression: &Expression) {
        let ExpressionKind::Invocation { invoked, arguments } = &expression.kind else {
            return; // the parser already reported this
        };
        let ExpressionKind::Identifier(name) = &invoked.kind else {
            self.report(
                DiagnosticKind::InvalidEmit {
                    ty: "a non-event expression".to_string(),
                },
                invoked.span,
            );
            return;
        };
        match self.types.get(name).cloned() {
            Some(Type::Composite(composite)) if composite.kind == CompositeKind::Event => {
                let parameters = composite.members.borrow().initializer_parameters.clone();
                self.check_arguments(arguments, &parameters, expression.span);
                self.elaboration
                    .expression_types
                    .insert(expression.id, Type::Composite(composite));
            }
            Some(ty) => {
                self.report(DiagnosticKind::InvalidEmit { ty: ty.to_string() }, invoked.span);
            }
            None => {
                self.report(DiagnosticKind::NotDeclared { name: name.clone() }, invoked.span);
            }
        }
    }

    // --- expressions ---

    fn check_expression(&mut self, expression: &Expression, expected: Option<&Type>) -> Type {
        let ty = self.check_expression_inner(expression, expected);
        self.elaboration.expression_types.insert(expression.id, ty.clone());
        ty
    }

    fn check_expression_inner(&mut self, expression: &Expression, expected: Option<&Type>) -> Type {
        match &expression.kind {
            ExpressionKind::BoolLiteral(_) => Type::Bool,
            ExpressionKind::IntegerLiteral { value, .. } => {
                self.check_integer_literal(expression.id, value, expected, expression.span)
            }
            ExpressionKind::FixedPointLiteral { .. } => Type::Fix64,
            ExpressionKind::StringLiteral(_) => {
                if matches!(expected.map(Type::optional_core), Some(Type::Character)) {
                    Type::Character
                } else {
                    Type::String
                }
            }
            ExpressionKind::NilLiteral => match expected {
                Some(ty @ Type::Optional(_)) => ty.clone(),
                _ => Type::Optional(Box::new(Type::Never)),
            },
            ExpressionKind::Identifier(name) => self.check_identifier(name, expression.span),
            ExpressionKind::Array(elements) => self.check_array_literal(elements, expected),
            ExpressionKind::Dictionary(entries) => self.check_dictionary_literal(entries, expected),
            ExpressionKind::Index { target, index } => self.check_index_read(expression.id, target, index),
            ExpressionKind::Member {
                target,
                optional,
                name,
                name_span,
            } => self.check_member_read(target, *optional, name, *name_span),
            ExpressionKind::Invocation { invoked, arguments } => {
                self.check_invocation(expression, invoked, arguments)
            }
            ExpressionKind::Unary { operator, operand } => {
                self.check_unary(*operator, operand, expected, expression.span)
            }
            ExpressionKind::Binary { operator, left, right } => {
                self.check_binary(*operator, left, right, expected, expression.span)
            }
            ExpressionKind::Conditional { test, then, otherwise } => {
                let test_ty = self.check_expression(test, Some(&Type::Bool));
                if !test_ty.is_subtype_of(&Type::Bool) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "Bool".to_string(),
                            actual: test_ty.to_string(),
                        },
                        test.span,
                    );
                }
                let then_ty = self.check_expression(then, expected);
                let otherwise_ty = self.check_expression(otherwise, Some(&then_ty));
                self.join_types(then_ty, otherwise_ty, otherwise.span)
            }
            ExpressionKind::Cast { operand, failable, ty } => {
                let operand_ty = self.check_expression(operand, None);
                let target = self.resolve_annotation(ty);
                self.elaboration.cast_targets.insert(expression.id, target.clone());
                if *failable {
                    Type::Optional(Box::new(target))
                } else {
                    if !operand_ty.is_subtype_of(&target) {
                        self.report(
                            DiagnosticKind::InvalidCast {
                                from: operand_ty.to_string(),
                                to: target.to_string(),
                            },
                            expression.span,
                        );
                    }
                    target
                }
            }
            ExpressionKind::Reference { operand, ty } => {
                // references point into keyed storage
                let ExpressionKind::Index { target, index } = &operand.kind else {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "a storage index expression".to_string(),
                            actual: "a non-storage expression".to_string(),
                        },
                        operand.span,
                    );
                    return self.resolve_annotation(ty);
                };
                let target_ty = self.check_expression(target, None);
                if target_ty != Type::Storage {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "Storage".to_string(),
                            actual: target_ty.to_string(),
                        },
                        target.span,
                    );
                }
                let key = self.check_storage_key(operand.id, index);
                self.elaboration.reference_keys.insert(expression.id, key.clone());
                let reference_ty = self.resolve_annotation(ty);
                match &reference_ty {
                    Type::Reference { referenced, .. } => {
                        if !key.is_subtype_of(referenced) {
                            self.report(
                                DiagnosticKind::TypeMismatch {
                                    expected: referenced.to_string(),
                                    actual: key.to_string(),
                                },
                                ty.span,
                            );
                        }
                    }
                    other => {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: "a reference type".to_string(),
                                actual: other.to_string(),
                            },
                            ty.span,
                        );
                    }
                }
                reference_ty
            }
            ExpressionKind::Create(operand) => {
                let was_in_create = std::mem::replace(&mut self.in_create, true);
                let ty = self.check_expression(operand, None);
                self.in_create = was_in_create;
                if !ty.is_resource() {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "a resource type".to_string(),
                            actual: ty.to_string(),
                        },
                        operand.span,
                    );
                }
                ty
            }
            ExpressionKind::Destroy(operand) => {
                let ty = self.check_expression(operand, None);
                if !ty.is_resource() {
                    self.report(DiagnosticKind::InvalidDestroy { ty: ty.to_string() }, operand.span);
                }
                self.invalidate_source(operand);
                Type::Void
            }
            ExpressionKind::Function(function) => {
                let function_ty = Rc::new(self.function_type(&function.parameters, function.return_annotation.as_ref()));
                self.env.enter_scope();
                self.check_function_like(
                    function.id,
                    &function.parameters,
                    function_ty.return_type.clone(),
                    &function.body,
                );
                self.leave_scope_checked();
                Type::Function(function_ty)
            }
        }
    }

    fn check_integer_literal(&mut self, id: NodeId, value: &BigInt, expected: Option<&Type>, span: Span) -> Type {
        let target = expected.map(Type::optional_core).filter(|ty| ty.is_integer());
        match target {
            Some(ty) => {
                if let Some((min, max)) = ty.integer_range()
                    && (*value < min || *value > max)
                {
                    self.report(DiagnosticKind::IntegerLiteralOutOfRange { ty: ty.to_string() }, span);
                }
                // the conversion is encoded once, here; the interpreter
                // performs no further coercion
                self.elaboration.integer_conversions.insert(id, ty.clone());
                ty.clone()
            }
            None => Type::Int,
        }
    }

    fn check_identifier(&mut self, name: &str, span: Span) -> Type {
        if let Some(variable) = self.env.lookup(name) {
            let ty = variable.ty.clone();
            if let Some(index) = variable.resource_index
                && self.env.state(index) != ResourceState::Owned
            {
                self.report(
                    DiagnosticKind::ResourceUseAfterInvalidation { name: name.to_string() },
                    span,
                );
            }
            return ty;
        }
        self.report(DiagnosticKind::NotDeclared { name: name.to_string() }, span);
        Type::Any
    }

    fn check_array_literal(&mut self, elements: &[Rc<Expression>], expected: Option<&Type>) -> Type {
        let expected_element = match expected.map(Type::optional_core) {
            Some(Type::VariableArray(element) | Type::ConstantArray { element, .. }) => Some(element.as_ref().clone()),
            _ => None,
        };
        let mut element_ty = expected_element.clone();
        for element in elements {
            let ty = self.check_expression(element, element_ty.as_ref());
            match &element_ty {
                None => element_ty = Some(ty),
                Some(current) => {
                    if !ty.is_subtype_of(current) {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: current.to_string(),
                                actual: ty.to_string(),
                            },
                            element.span,
                        );
                    }
                }
            }
            if element_ty.as_ref().is_some_and(Type::is_resource)
                && !matches!(element.kind, ExpressionKind::Unary { operator: UnaryOperator::Move, .. })
            {
                self.report(DiagnosticKind::MissingMoveOperation, element.span);
            }
        }
        Type::VariableArray(Box::new(element_ty.unwrap_or(Type::Never)))
    }

    fn check_dictionary_literal(&mut self, entries: &[crate::ast::DictionaryEntry], expected: Option<&Type>) -> Type {
        let (mut key_ty, mut value_ty) = match expected.map(Type::optional_core) {
            Some(Type::Dictionary { key, value }) => (Some(key.as_ref().clone()), Some(value.as_ref().clone())),
            _ => (None, None),
        };
        for entry in entries {
            let kt = self.check_expression(&entry.key, key_ty.as_ref());
            if !kt.is_hashable() {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: "a hashable primitive key".to_string(),
                        actual: kt.to_string(),
                    },
                    entry.key.span,
                );
            }
            match &key_ty {
                None => key_ty = Some(kt),
                Some(current) => {
                    if !kt.is_subtype_of(current) {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: current.to_string(),
                                actual: kt.to_string(),
                            },
                            entry.key.span,
                        );
                    }
                }
            }
            let vt = self.check_expression(&entry.value, value_ty.as_ref());
            match &value_ty {
                None => value_ty = Some(vt),
                Some(current) => {
                    if !vt.is_subtype_of(current) {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: current.to_string(),
                                actual: vt.to_string(),
                            },
                            entry.value.span,
                        );
                    }
                }
            }
            if value_ty.as_ref().is_some_and(Type::is_resource)
                && !matches!(entry.value.kind, ExpressionKind::Unary { operator: UnaryOperator::Move, .. })
            {
                self.report(DiagnosticKind::MissingMoveOperation, entry.value.span);
            }
        }
        Type::Dictionary {
            key: Box::new(key_ty.unwrap_or(Type::Never)),
            value: Box::new(value_ty.unwrap_or(Type::Never)),
        }
    }

    fn check_storage_key(&mut self, index_expression_id: NodeId, index: &Expression) -> Type {
        let key = match &index.kind {
            ExpressionKind::Identifier(name) => match self.types.get(name).cloned() {
                Some(ty) => ty,
                None => {
                    self.report(DiagnosticKind::NotDeclared { name: name.clone() }, index.span);
                    Type::Any
                }
            },
            _ => {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: "a type name as storage key".to_string(),
                        actual: "an expression".to_string(),
                    },
                    index.span,
                );
                Type::Any
            }
        };
        self.elaboration.storage_keys.insert(index_expression_id, key.clone());
        key
    }

    fn deref_reference(&self, ty: Type) -> Type {
        match ty {
            Type::Reference { referenced, .. } => *referenced,
            other => other,
        }
    }

    fn check_index_read(&mut self, expression_id: NodeId, target: &Expression, index: &Expression) -> Type {
        let target_ty = self.check_expression(target, None);
        let target_ty = self.deref_reference(target_ty);
        match target_ty {
            Type::Storage => {
                let key = self.check_storage_key(expression_id, index);
                Type::Optional(Box::new(key))
            }
            Type::String => {
                let index_ty = self.check_expression(index, Some(&Type::Int));
                if !index_ty.is_integer() {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "an integer".to_string(),
                            actual: index_ty.to_string(),
                        },
                        index.span,
                    );
                }
                Type::Character
            }
            Type::VariableArray(element) | Type::ConstantArray { element, .. } => {
                let index_ty = self.check_expression(index, Some(&Type::Int));
                if !index_ty.is_integer() {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "an integer".to_string(),
                            actual: index_ty.to_string(),
                        },
                        index.span,
                    );
                }
                if element.is_resource() {
                    self.report(DiagnosticKind::InvalidResourceIndexRead, target.span.to(index.span));
                }
                *element
            }
            Type::Dictionary { key, value } => {
                let index_ty = self.check_expression(index, Some(&key));
                if !index_ty.is_subtype_of(&key) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: key.to_string(),
                            actual: index_ty.to_string(),
                        },
                        index.span,
                    );
                }
                if value.is_resource() {
                    self.report(DiagnosticKind::InvalidResourceIndexRead, target.span.to(index.span));
                }
                Type::Optional(value)
            }
            other => {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: "an indexable value".to_string(),
                        actual: other.to_string(),
                    },
                    target.span,
                );
                Type::Any
            }
        }
    }

    fn check_member_read(&mut self, target: &Expression, optional: bool, name: &str, name_span: Span) -> Type {
        let target_ty = self.check_expression(target, None);
        let target_ty = self.deref_reference(target_ty);

        if optional {
            let Some(inner) = target_ty.unwrap_optional() else {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: "an optional value".to_string(),
                        actual: target_ty.to_string(),
                    },
                    target.span,
                );
                return Type::Any;
            };
            let member = self.member_type(inner.clone(), name, name_span, target.span);
            return Type::Optional(Box::new(member));
        }
        self.member_type(target_ty, name, name_span, target.span)
    }

    fn member_type(&mut self, target_ty: Type, name: &str, name_span: Span, target_span: Span) -> Type {
        if let Some(ty) = self.builtin_member_type(&target_ty, name) {
            return ty;
        }
        let lookup = |members: &ty::CompositeMembers| -> Option<(Type, Access)> {
            members
                .fields
                .get(name)
                .or_else(|| members.functions.get(name))
                .map(|member| (member.ty.clone(), member.access))
        };
        let found = match &target_ty {
            Type::Composite(composite) => {
                let inside = self
                    .current_composite
                    .as_ref()
                    .is_some_and(|current| current.name == composite.name);
                match lookup(&composite.members.borrow()) {
                    Some((ty, access)) => {
                        if access == Access::Private && !inside {
                            self.report(DiagnosticKind::AccessViolation { name: name.to_string() }, name_span);
                        }
                        Some(ty)
                    }
                    None => None,
                }
            }
            Type::Interface(interface) => lookup(&interface.members.borrow()).map(|(ty, _)| ty),
            Type::Restricted { base, restrictions } => {
                // a restriction narrows the usable surface to the
                // restriction interfaces' members
                let mut result = None;
                for restriction in restrictions {
                    if let Some(Type::Interface(interface)) = self.types.get(restriction)
                        && let Some((ty, _)) = lookup(&interface.members.borrow())
                    {
                        result = Some(ty);
                        break;
                    }
                }
                if result.is_none()
                    && let Some(base) = base
                    && let Type::Composite(_) = base.as_ref()
                {
                    // base members stay hidden behind the restriction
                    self.report(DiagnosticKind::AccessViolation { name: name.to_string() }, name_span);
                    return Type::Any;
                }
                result
            }
            _ => None,
        };
        match found {
            Some(ty) => ty,
            None => {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: format!("a value with member `{name}`"),
                        actual: target_ty.to_string(),
                    },
                    target_span,
                );
                Type::Any
            }
        }
    }

    fn builtin_member_type(&self, target: &Type, name: &str) -> Option<Type> {
        let function = |parameters: Vec<ParameterType>, return_type: Type| {
            Some(Type::Function(Rc::new(FunctionType {
                parameters,
                return_type,
            })))
        };
        let parameter = |label: Option<&str>, ty: Type| ParameterType {
            label: label.map(str::to_string),
            name: String::new(),
            ty,
        };
        match target {
            Type::String => match name {
                "length" => Some(Type::Int),
                "concat" => function(vec![parameter(None, Type::String)], Type::String),
                "slice" => function(
                    vec![parameter(Some("from"), Type::Int), parameter(Some("upTo"), Type::Int)],
                    Type::String,
                ),
                _ => None,
            },
            Type::VariableArray(element) | Type::ConstantArray { element, .. } => {
                let element = element.as_ref().clone();
                match name {
                    "length" => Some(Type::Int),
                    "append" => function(vec![parameter(None, element)], Type::Void),
                    "concat" => function(
                        vec![parameter(None, Type::VariableArray(Box::new(element.clone())))],
                        Type::VariableArray(Box::new(element)),
                    ),
                    "insert" => function(
                        vec![parameter(Some("at"), Type::Int), parameter(None, element)],
                        Type::Void,
                    ),
                    "remove" => function(vec![parameter(Some("at"), Type::Int)], element),
                    "removeFirst" => function(vec![], element),
                    "removeLast" => function(vec![], element),
                    "contains" => function(vec![parameter(None, element)], Type::Bool),
                    _ => None,
                }
            }
            Type::Dictionary { key, value } => {
                let key = key.as_ref().clone();
                let value = value.as_ref().clone();
                match name {
                    "length" => Some(Type::Int),
                    "remove" => function(
                        vec![parameter(Some("key"), key)],
                        Type::Optional(Box::new(value)),
                    ),
                    "insert" => function(
                        vec![parameter(Some("key"), key), parameter(None, value.clone())],
                        Type::Optional(Box::new(value)),
                    ),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn check_invocation(
        &mut self,
        expression: &Expression,
        invoked: &Rc<Expression>,
        arguments: &[Argument],
    ) -> Type {
        // `before(...)` inside post conditions is rewritten to an
        // entry-time binding
        if let ExpressionKind::Identifier(name) = &invoked.kind
            && name == "before"
            && self.env.lookup("before").is_none()
        {
            return self.check_before(expression, arguments);
        }

        // a bare type name in call position is a constructor invocation
        if let ExpressionKind::Identifier(name) = &invoked.kind
            && self.env.lookup(name).is_none()
            && let Some(Type::Composite(composite)) = self.types.get(name).cloned()
        {
            match composite.kind {
                CompositeKind::Resource if !self.in_create => {
                    self.report(DiagnosticKind::MissingCreate, expression.span);
                }
                // `emit` validates event invocations on its own path
                // (check_emit); an event constructor reached here is
                // outside an emit statement
                CompositeKind::Event => {
                    self.report(
                        DiagnosticKind::InvalidEmit {
                            ty: composite.name.clone(),
                        },
                        expression.span,
                    );
                }
                _ => {}
            }
            let parameters = composite.members.borrow().initializer_parameters.clone();
            // `create` licenses exactly one constructor; arguments need
            // their own
            let was_in_create = std::mem::replace(&mut self.in_create, false);
            self.check_arguments(arguments, &parameters, expression.span);
            self.in_create = was_in_create;
            return Type::Composite(composite);
        }

        let invoked_ty = self.check_expression(invoked, None);
        match invoked_ty {
            Type::Function(function) => {
                self.check_arguments(arguments, &function.parameters, expression.span);
                function.return_type.clone()
            }
            Type::Never => Type::Never,
            Type::Any => Type::Any,
            other => {
                self.report(DiagnosticKind::NotCallable { ty: other.to_string() }, invoked.span);
                Type::Any
            }
        }
    }

    fn check_before(&mut self, expression: &Expression, arguments: &[Argument]) -> Type {
        if self.condition_context != ConditionContext::Post {
            self.report(DiagnosticKind::InvalidConditionBefore, expression.span);
        }
        if arguments.len() != 1 {
            self.report(
                DiagnosticKind::ArgumentCountMismatch {
                    expected: 1,
                    actual: arguments.len(),
                },
                expression.span,
            );
            return Type::Any;
        }
        let argument = &arguments[0];
        let ty = self.check_expression(&argument.value, None);
        if let Some(context) = self.function_stack.last() {
            let declaration_id = context.declaration_id;
            let name = format!("$before{}", self.before_counter);
            self.before_counter += 1;
            self.elaboration
                .before_bindings
                .entry(declaration_id)
                .or_default()
                .push(BeforeBinding {
                    name: name.clone(),
                    expression: Rc::clone(&argument.value),
                });
            self.elaboration.before_substitutions.insert(expression.id, name);
        }
        ty
    }

    fn check_arguments(&mut self, arguments: &[Argument], parameters: &[ParameterType], span: Span) {
        if arguments.len() != parameters.len() {
            self.report(
                DiagnosticKind::ArgumentCountMismatch {
                    expected: parameters.len(),
                    actual: arguments.len(),
                },
                span,
            );
        }
        for (argument, parameter) in arguments.iter().zip(parameters) {
            match (&parameter.label, &argument.label) {
                (Some(expected), Some(actual)) if expected != actual => {
                    self.report(
                        DiagnosticKind::ArgumentLabelMismatch {
                            expected: expected.clone(),
                            actual: actual.clone(),
                        },
                        argument.span,
                    );
                }
                (Some(expected), None) => {
                    self.report(
                        DiagnosticKind::ArgumentLabelMismatch {
                            expected: expected.clone(),
                            actual: "(none)".to_string(),
                        },
                        argument.span,
                    );
                }
                (None, Some(actual)) => {
                    self.report(
                        DiagnosticKind::ArgumentLabelMismatch {
                            expected: "(none)".to_string(),
                            actual: actual.clone(),
                        },
                        argument.span,
                    );
                }
                _ => {}
            }
            let ty = self.check_expression(&argument.value, Some(&parameter.ty));
            if !ty.is_subtype_of(&parameter.ty) {
                self.report(
                    DiagnosticKind::TypeMismatch {
                        expected: parameter.ty.to_string(),
                        actual: ty.to_string(),
                    },
                    argument.value.span,
                );
            }
            if ty.is_resource()
                && !matches!(
                    argument.value.kind,
                    ExpressionKind::Unary {
                        operator: UnaryOperator::Move,
                        ..
                    }
                )
            {
                self.report(DiagnosticKind::MissingMoveOperation, argument.value.span);
            }
        }
    }

    fn check_unary(&mut self, operator: UnaryOperator, operand: &Expression, expected: Option<&Type>, span: Span) -> Type {
        match operator {
            UnaryOperator::Negate => {
                let hint = expected.filter(|ty| ty.is_numeric());
                let ty = self.check_expression(operand, hint);
                if !ty.is_numeric() || matches!(ty, Type::UInt8 | Type::UInt16 | Type::UInt32 | Type::UInt64) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "a signed number".to_string(),
                            actual: ty.to_string(),
                        },
                        operand.span,
                    );
                }
                ty
            }
            UnaryOperator::Not => {
                let ty = self.check_expression(operand, Some(&Type::Bool));
                if !ty.is_subtype_of(&Type::Bool) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "Bool".to_string(),
                            actual: ty.to_string(),
                        },
                        operand.span,
                    );
                }
                Type::Bool
            }
            UnaryOperator::Move => {
                let ty = self.check_expression(operand, None);
                if !ty.is_resource() {
                    self.report(DiagnosticKind::InvalidMoveOperation, span);
                }
                self.invalidate_source(operand);
                ty
            }
        }
    }

    fn check_binary(
        &mut self,
        operator: BinaryOperator,
        left: &Rc<Expression>,
        right: &Rc<Expression>,
        expected: Option<&Type>,
        span: Span,
    ) -> Type {
        use BinaryOperator::{
            Add, And, Concat, Divide, Equal, Greater, GreaterEqual, Less, LessEqual, Multiply, NilCoalesce, NotEqual,
            Or, Remainder, Subtract,
        };
        match operator {
            Add | Subtract | Multiply | Divide | Remainder => {
                let (left_ty, right_ty) = self.check_numeric_operands(left, right, expected);
                if left_ty != right_ty || !left_ty.is_numeric() {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: left_ty.to_string(),
                            actual: right_ty.to_string(),
                        },
                        span,
                    );
                }
                left_ty
            }
            Less | LessEqual | Greater | GreaterEqual => {
                let (left_ty, right_ty) = self.check_numeric_operands(left, right, None);
                if left_ty != right_ty || !left_ty.is_numeric() {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: left_ty.to_string(),
                            actual: right_ty.to_string(),
                        },
                        span,
                    );
                }
                Type::Bool
            }
            Equal | NotEqual => {
                let left_ty = self.check_expression(left, None);
                let right_ty = self.check_expression(right, Some(&left_ty));
                if !left_ty.is_equatable_with(&right_ty) {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: left_ty.to_string(),
                            actual: right_ty.to_string(),
                        },
                        span,
                    );
                }
                Type::Bool
            }
            And | Or => {
                for operand in [left, right] {
                    let ty = self.check_expression(operand, Some(&Type::Bool));
                    if !ty.is_subtype_of(&Type::Bool) {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: "Bool".to_string(),
                                actual: ty.to_string(),
                            },
                            operand.span,
                        );
                    }
                }
                Type::Bool
            }
            Concat => {
                let left_ty = self.check_expression(left, None);
                let right_ty = self.check_expression(right, Some(&left_ty));
                match (&left_ty, &right_ty) {
                    (Type::String, Type::String) => Type::String,
                    (Type::VariableArray(a), Type::VariableArray(b)) if a == b && !a.is_resource() => {
                        left_ty.clone()
                    }
                    _ => {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: "two strings or two arrays of the same type".to_string(),
                                actual: format!("{left_ty} & {right_ty}"),
                            },
                            span,
                        );
                        left_ty
                    }
                }
            }
            NilCoalesce => {
                let left_ty = self.check_expression(left, None);
                let Some(inner) = left_ty.unwrap_optional().cloned() else {
                    self.report(
                        DiagnosticKind::TypeMismatch {
                            expected: "an optional value".to_string(),
                            actual: left_ty.to_string(),
                        },
                        left.span,
                    );
                    return self.check_expression(right, None);
                };
                let right_ty = self.check_expression(right, Some(inner.optional_core()));
                if matches!(right_ty, Type::Optional(_)) {
                    // right side still optional: only one layer unwraps
                    if !right_ty.is_subtype_of(&inner) && !inner.is_subtype_of(&right_ty) {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: inner.to_string(),
                                actual: right_ty.to_string(),
                            },
                            right.span,
                        );
                    }
                    inner
                } else {
                    // unambiguously non-optional right side flattens
                    // nested optionals away
                    let core = inner.optional_core().clone();
                    let result = if matches!(core, Type::Never) { right_ty.clone() } else { core };
                    if !right_ty.is_subtype_of(&result) {
                        self.report(
                            DiagnosticKind::TypeMismatch {
                                expected: result.to_string(),
                                actual: right_ty.to_string(),
                            },
                            right.span,
                        );
                    }
                    result
                }
            }
        }
    }

    /// Checks the operands of an arithmetic or comparison operator,
    /// letting polymorphic integer literals adapt to the other side.
    fn check_numeric_operands(
        &mut self,
        left: &Rc<Expression>,
        right: &Rc<Expression>,
        expected: Option<&Type>,
    ) -> (Type, Type) {
        let hint = expected.filter(|ty| ty.is_numeric()).cloned();
        let left_is_literal = matches!(left.kind, ExpressionKind::IntegerLiteral { .. });
        let right_is_literal = matches!(right.kind, ExpressionKind::IntegerLiteral { .. });
        if hint.is_none() && left_is_literal && !right_is_literal {
            let right_ty = self.check_expression(right, None);
            let left_ty = self.check_expression(left, Some(&right_ty));
            (left_ty, right_ty)
        } else {
            let left_ty = self.check_expression(left, hint.as_ref());
            let right_ty = self.check_expression(right, Some(&left_ty));
            (left_ty, right_ty)
        }
    }

    fn join_types(&mut self, left: Type, right: Type, span: Span) -> Type {
        if left == right {
            return left;
        }
        if left.is_subtype_of(&right) {
            return right;
        }
        if right.is_subtype_of(&left) {
            return left;
        }
        // `x ? v : nil` and friends join into an optional
        if matches!(&right, Type::Optional(inner) if matches!(inner.as_ref(), Type::Never)) {
            return Type::Optional(Box::new(left));
        }
        if matches!(&left, Type::Optional(inner) if matches!(inner.as_ref(), Type::Never)) {
            return Type::Optional(Box::new(right));
        }
        self.report(
            DiagnosticKind::TypeMismatch {
                expected: left.to_string(),
                actual: right.to_string(),
            },
            span,
        );
        left
    }

    /// Marks the source binding of a move as consumed. Only identifier
    /// sources carry a binding; moves out of containers and storage are
    /// handled by their own rules.
    fn invalidate_source(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Identifier(name) => {
                if let Some(variable) = self.env.lookup(name)
                    && let Some(index) = variable.resource_index
                {
                    self.env.set_state(index, ResourceState::Moved);
                }
            }
            ExpressionKind::Unary {
                operator: UnaryOperator::Move,
                operand,
            } => self.invalidate_source(operand),
            _ => {}
        }
    }
}
