//! Tree-walking executor for checked programs.
//!
//! Evaluation is continuation-passing over the [`trampoline`] step
//! enumeration, driven by a fixed-arity loop. From the outside the
//! evaluation order is strict and left-to-right; the trampoline only
//! exists so that deep language-level recursion does not grow the host
//! stack.

pub mod builtins;
pub mod errors;
pub(crate) mod trampoline;
pub mod value;

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::Zero;

use crate::{
    ast::{
        Argument, BinaryOperator, Block, CompositeDeclaration, Condition, DeclarationKind, Expression,
        ExpressionKind, IfTest, Parameter, SpecialFunctionKind, Statement, StatementKind, Transfer, TypeAnnotation,
        TypeExpressionKind, UnaryOperator, VariableDeclaration, stmt::ElseBranch,
    },
    checker::{
        elaboration::{BeforeBinding, CheckedProgram},
        ty::{CompositeType, Type},
    },
    interpreter::{
        errors::{ConditionKind, RunResult, RuntimeError},
        trampoline::{Control, Trampoline},
        value::{
            Activation, CompositeValue, DictKey, EventValue, FixedPoint, FunctionValue, ReferenceValue,
            StorageHandle, Value, values_equal,
        },
    },
    meter::{Meter, NoLimitMeter},
    position::Span,
};

/// Callback receiving every emitted event, synchronously from `emit`.
pub type EventSink = Box<dyn FnMut(EventValue)>;

/// Executes an elaborated program.
///
/// Construction installs the standard library and runs the top-level
/// variable declarations. Afterwards the embedder invokes top-level
/// functions by name and reads global bindings.
pub struct Interpreter {
    checked: Rc<CheckedProgram>,
    globals: Activation,
    activation: Activation,
    meter: Box<dyn Meter>,
    event_sink: Option<EventSink>,
    composites: AHashMap<String, Rc<CompositeDeclaration>>,
    composite_types: AHashMap<String, Rc<CompositeType>>,
    call_depth: usize,
    current_span: Span,
}

impl Interpreter {
    /// Creates an interpreter and executes the program's top-level
    /// declarations.
    pub fn new(checked: Rc<CheckedProgram>, stdlib: &crate::stdlib::StandardLibrary) -> RunResult<Self> {
        Self::with_meter(checked, stdlib, Box::new(NoLimitMeter))
    }

    pub fn with_meter(
        checked: Rc<CheckedProgram>,
        stdlib: &crate::stdlib::StandardLibrary,
        meter: Box<dyn Meter>,
    ) -> RunResult<Self> {
        let globals = Activation::new();
        for entry in stdlib.entries() {
            globals.declare(entry.name.clone(), entry.value.clone());
        }

        let mut composites = AHashMap::new();
        let mut composite_types = AHashMap::new();
        for declaration in &checked.program.declarations {
            if let DeclarationKind::Composite(composite) = &declaration.kind {
                composites.insert(composite.name.clone(), Rc::clone(composite));
                if let Some(ty) = checked.elaboration.composite_types.get(&composite.id) {
                    composite_types.insert(composite.name.clone(), Rc::clone(ty));
                }
            }
        }

        let mut interpreter = Self {
            checked,
            activation: globals.clone(),
            globals,
            meter,
            event_sink: None,
            composites,
            composite_types,
            call_depth: 0,
            current_span: Span::default(),
        };
        interpreter.install_globals()?;
        Ok(interpreter)
    }

    /// Registers the sink `emit` delivers event values to.
    pub fn set_event_sink(&mut self, sink: EventSink) {
        self.event_sink = Some(sink);
    }

    fn install_globals(&mut self) -> RunResult<()> {
        let checked = Rc::clone(&self.checked);
        // functions first, so variable initializers can call them
        for declaration in &checked.program.declarations {
            if let DeclarationKind::Function(function) = &declaration.kind
                && let Some(body) = &function.body
            {
                let value = Value::Function(Rc::new(FunctionValue {
                    name: function.name.clone(),
                    parameters: Rc::new(function.parameters.clone()),
                    body: Rc::new(body.clone()),
                    declaration_id: function.id,
                    closure: self.globals.clone(),
                    receiver: None,
                }));
                self.globals.declare(function.name.clone(), value);
            }
        }
        for declaration in &checked.program.declarations {
            if let DeclarationKind::Variable(variable) = &declaration.kind {
                let step = self.execute_variable_declaration(Rc::clone(variable))?;
                self.run(step)?;
            }
        }
        Ok(())
    }

    /// Invokes a top-level function by name with external argument
    /// values.
    pub fn invoke(&mut self, name: &str, arguments: Vec<Value>) -> RunResult<Value> {
        let span = Span::default();
        // a failed prior invocation may have left frames behind; every
        // invocation starts from the global environment
        self.activation = self.globals.clone();
        self.call_depth = 0;
        let Some(callee) = self.globals.get(name) else {
            return Err(RuntimeError::NotDeclared {
                name: name.to_string(),
                span,
            });
        };
        let step = self.call_value(callee, arguments, span)?;
        self.run(step)
    }

    /// Reads the final value of a top-level binding.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    /// Runs the `index`-th transaction declaration: prepare (with the
    /// given arguments), then execute. Transaction fields persist
    /// between the two phases.
    pub fn run_transaction(&mut self, index: usize, prepare_arguments: Vec<Value>) -> RunResult<()> {
        let checked = Rc::clone(&self.checked);
        let transaction = checked
            .program
            .declarations
            .iter()
            .filter_map(|declaration| match &declaration.kind {
                DeclarationKind::Transaction(transaction) => Some(transaction),
                _ => None,
            })
            .nth(index)
            .ok_or_else(|| RuntimeError::NotDeclared {
                name: format!("transaction #{index}"),
                span: Span::default(),
            })?;

        let saved = self.activation.clone();
        let scope = self.globals.child();
        for field in &transaction.fields {
            scope.declare(field.name.clone(), Value::Nil);
        }
        self.activation = scope.clone();

        let mut phases = Vec::new();
        if let Some(prepare) = &transaction.prepare
            && let Some(body) = &prepare.body
        {
            phases.push((prepare.id, prepare.parameters.clone(), body.clone(), prepare_arguments));
        }
        if let Some(execute) = &transaction.execute
            && let Some(body) = &execute.body
        {
            phases.push((execute.id, Vec::new(), body.clone(), Vec::new()));
        }
        for (id, parameters, body, arguments) in phases {
            let function = Rc::new(FunctionValue {
                name: "transaction".to_string(),
                parameters: Rc::new(parameters),
                body: Rc::new(body),
                declaration_id: id,
                closure: scope.clone(),
                receiver: None,
            });
            let step = self.invoke_function(&function, arguments, Span::default())?;
            self.run(step)?;
        }
        self.activation = saved;
        Ok(())
    }

    // --- the trampoline driver ---

    fn run(&mut self, mut step: Trampoline) -> RunResult<Value> {
        loop {
            if let Err(error) = self.meter.on_step() {
                return Err(RuntimeError::Meter {
                    error,
                    span: self.current_span,
                });
            }
            match step {
                Trampoline::Done(Control::Value(value) | Control::Return(value, _)) => return Ok(value),
                Trampoline::Done(_) => {
                    return Err(RuntimeError::invariant(
                        "loop control escaped to the top level",
                        self.current_span,
                    ));
                }
                Trampoline::More(thunk) => step = thunk(self)?,
                Trampoline::FlatMap { subroutine, then } => match *subroutine {
                    Trampoline::Done(control) => step = then(self, control)?,
                    Trampoline::More(thunk) => {
                        step = Trampoline::FlatMap {
                            subroutine: Box::new(thunk(self)?),
                            then,
                        };
                    }
                    Trampoline::FlatMap {
                        subroutine: inner,
                        then: inner_then,
                    } => {
                        // re-associate (a >>= f) >>= g into a >>= (f >=> g)
                        // so the chain stays right-leaning and the loop
                        // never recurses
                        step = Trampoline::FlatMap {
                            subroutine: inner,
                            then: Box::new(move |interpreter, control| {
                                Ok(Trampoline::FlatMap {
                                    subroutine: Box::new(inner_then(interpreter, control)?),
                                    then,
                                })
                            }),
                        };
                    }
                },
            }
        }
    }

    // --- statements ---

    fn execute_statements(&mut self, block: Rc<Block>, index: usize) -> RunResult<Trampoline> {
        if index >= block.statements.len() {
            return Ok(Trampoline::value(Value::Void));
        }
        let statement = Rc::clone(&block.statements[index]);
        Ok(self
            .execute_statement(&statement)?
            .then_control(Box::new(move |interpreter, control| match control {
                Control::Value(_) => interpreter.execute_statements(block, index + 1),
                other => Ok(Trampoline::Done(other)),
            })))
    }

    fn execute_block(&mut self, block: &Rc<Block>) -> RunResult<Trampoline> {
        let saved = self.activation.clone();
        self.activation = saved.child();
        Ok(self
            .execute_statements(Rc::clone(block), 0)?
            .then_control(Box::new(move |interpreter, control| {
                interpreter.activation = saved;
                Ok(Trampoline::Done(control))
            })))
    }

    fn execute_statement(&mut self, statement: &Rc<Statement>) -> RunResult<Trampoline> {
        self.current_span = statement.span;
        match &statement.kind {
            StatementKind::Block(block) => self.execute_block(block),
            StatementKind::Expression(expression) => Ok(self
                .evaluate(expression)?
                .flat_map(Box::new(|_, _| Ok(Trampoline::value(Value::Void))))),
            StatementKind::Return { value } => {
                let span = statement.span;
                match value {
                    None => Ok(Trampoline::Done(Control::Return(Value::Void, span))),
                    // a `return <-r` moves through the expression itself;
                    // a bare identifier return must not hollow out its slot
                    Some(value) => Ok(self.evaluate(value)?.flat_map(Box::new(move |_, value| {
                        Ok(Trampoline::Done(Control::Return(value, span)))
                    }))),
                }
            }
            StatementKind::Break => Ok(Trampoline::Done(Control::Break)),
            StatementKind::Continue => Ok(Trampoline::Done(Control::Continue)),
            StatementKind::If { test, then, otherwise } => self.execute_if(test, then, otherwise.clone()),
            StatementKind::While { test, block } => self.execute_while(Rc::clone(test), Rc::clone(block)),
            StatementKind::VariableDeclaration(declaration) => {
                self.execute_variable_declaration(Rc::clone(declaration))
            }
            StatementKind::Assignment {
                target,
                transfer,
                value,
            } => {
                let statement_id = statement.id;
                let target = Rc::clone(target);
                Ok(self
                    .evaluate_transfer_source(value, *transfer)?
                    .flat_map(Box::new(move |interpreter, value| {
                        interpreter.assign_into(&target, value, statement_id)
                    })))
            }
            StatementKind::Swap { left, right } => self.execute_swap(Rc::clone(left), Rc::clone(right)),
            StatementKind::Emit(expression) => self.execute_emit(expression),
        }
    }

    fn execute_variable_declaration(&mut self, declaration: Rc<VariableDeclaration>) -> RunResult<Trampoline> {
        Ok(self
            .evaluate_transfer_source(&declaration.value, declaration.transfer)?
            .flat_map(Box::new(move |interpreter, value| {
                let declared = interpreter.checked.elaboration.variable_types.get(&declaration.id).cloned();
                let value = match &declared {
                    Some(declared) => interpreter.box_existential(value, declared),
                    None => value,
                };
                let value = if value.is_resource() { value } else { value.deep_copy() };
                interpreter.activation.declare(declaration.name.clone(), value);
                Ok(Trampoline::value(Value::Void))
            })))
    }

    fn execute_if(
        &mut self,
        test: &IfTest,
        then: &Rc<Block>,
        otherwise: Option<ElseBranch>,
    ) -> RunResult<Trampoline> {
        match test {
            IfTest::Expression(expression) => {
                let then = Rc::clone(then);
                let span = expression.span;
                Ok(self.evaluate(expression)?.flat_map(Box::new(move |interpreter, value| {
                    if value.as_bool(span)? {
                        interpreter.execute_block(&then)
                    } else {
                        interpreter.execute_else(otherwise)
                    }
                })))
            }
            IfTest::Declaration(declaration) => {
                let then = Rc::clone(then);
                let declaration = Rc::clone(declaration);
                Ok(self
                    .evaluate_transfer_source(&declaration.value, declaration.transfer)?
                    .flat_map(Box::new(move |interpreter, value| {
                        // the optional is forced within the then branch;
                        // a bare value counts as present
                        let present = match value {
                            Value::Nil => None,
                            Value::Some(inner) => Some(*inner),
                            other => Some(other),
                        };
                        match present {
                            Some(inner) => {
                                let saved = interpreter.activation.clone();
                                interpreter.activation = saved.child();
                                let inner = if inner.is_resource() { inner } else { inner.deep_copy() };
                                interpreter.activation.declare(declaration.name.clone(), inner);
                                Ok(interpreter.execute_block(&then)?.then_control(Box::new(
                                    move |interpreter, control| {
                                        interpreter.activation = saved;
                                        Ok(Trampoline::Done(control))
                                    },
                                )))
                            }
                            None => interpreter.execute_else(otherwise),
                        }
                    })))
            }
        }
    }

    fn execute_else(&mut self, otherwise: Option<ElseBranch>) -> RunResult<Trampoline> {
        match otherwise {
            None => Ok(Trampoline::value(Value::Void)),
            Some(ElseBranch::Block(block)) => self.execute_block(&block),
            Some(ElseBranch::If(statement)) => self.execute_statement(&statement),
        }
    }

    fn execute_while(&mut self, test: Rc<Expression>, block: Rc<Block>) -> RunResult<Trampoline> {
        let span = test.span;
        Ok(self.evaluate(&test)?.flat_map(Box::new(move |interpreter, value| {
            if !value.as_bool(span)? {
                return Ok(Trampoline::value(Value::Void));
            }
            Ok(interpreter
                .execute_block(&block)?
                .then_control(Box::new(move |_, control| match control {
                    Control::Break => Ok(Trampoline::value(Value::Void)),
                    Control::Return(value, span) => Ok(Trampoline::Done(Control::Return(value, span))),
                    // a completed body or `continue` loops again via a
                    // suspended step, never via host recursion
                    Control::Value(_) | Control::Continue => Ok(Trampoline::More(Box::new(move |interpreter| {
                        interpreter.execute_while(test, block)
                    }))),
                })))
        })))
    }

    fn execute_swap(&mut self, left: Rc<Expression>, right: Rc<Expression>) -> RunResult<Trampoline> {
        let span = left.span.to(right.span);
        self.resolve_location(
            &left,
            Box::new(move |interpreter, left_location| {
                interpreter.resolve_location(
                    &right,
                    Box::new(move |interpreter, right_location| {
                        let left_value = left_location.take(interpreter, span)?;
                        let right_value = right_location.take(interpreter, span)?;
                        left_location.write(interpreter, right_value, span)?;
                        right_location.write(interpreter, left_value, span)?;
                        Ok(Trampoline::value(Value::Void))
                    }),
                )
            }),
        )
    }

    fn execute_emit(&mut self, expression: &Rc<Expression>) -> RunResult<Trampoline> {
        let ExpressionKind::Invocation { invoked, arguments } = &expression.kind else {
            return Err(RuntimeError::invariant("emit of a non-invocation", expression.span));
        };
        let ExpressionKind::Identifier(name) = &invoked.kind else {
            return Err(RuntimeError::invariant("emit of a non-event", invoked.span));
        };
        let Some(event) = self.composites.get(name).cloned() else {
            return Err(RuntimeError::NotDeclared {
                name: name.clone(),
                span: invoked.span,
            });
        };
        let parameters: Vec<Parameter> = event
            .members
            .special_functions
            .iter()
            .find(|f| f.kind == SpecialFunctionKind::Init)
            .map(|f| f.parameters.clone())
            .unwrap_or_default();
        let name = event.name.clone();
        let expressions: Vec<Rc<Expression>> = arguments.iter().map(|argument| Rc::clone(&argument.value)).collect();
        self.evaluate_list(
            expressions,
            0,
            Vec::new(),
            Box::new(move |interpreter, values| {
                let fields = parameters
                    .iter()
                    .map(|parameter| parameter.name.clone())
                    .zip(values)
                    .collect();
                let event = EventValue { name, fields };
                if let Some(sink) = &mut interpreter.event_sink {
                    sink(event);
                }
                Ok(Trampoline::value(Value::Void))
            }),
        )
    }

    // --- expressions ---

    fn evaluate(&mut self, expression: &Rc<Expression>) -> RunResult<Trampoline> {
        let span = expression.span;
        match &expression.kind {
            ExpressionKind::BoolLiteral(value) => Ok(Trampoline::value(Value::Bool(*value))),
            ExpressionKind::NilLiteral => Ok(Trampoline::value(Value::Nil)),
            ExpressionKind::IntegerLiteral { value, .. } => {
                // the conversion to a fixed-width type was decided at
                // elaboration; nothing is coerced here
                let value = match self.checked.elaboration.integer_conversions.get(&expression.id) {
                    Some(ty) if *ty != Type::Int => Value::SizedInt {
                        value: value.clone(),
                        ty: ty.clone(),
                    },
                    _ => Value::Int(value.clone()),
                };
                Ok(Trampoline::value(value))
            }
            ExpressionKind::FixedPointLiteral {
                integer,
                fractional,
                scale,
            } => Ok(Trampoline::value(Value::Fixed(FixedPoint::from_parts(
                integer, fractional, *scale,
            )))),
            ExpressionKind::StringLiteral(value) => {
                let is_character = matches!(
                    self.checked.elaboration.expression_types.get(&expression.id),
                    Some(Type::Character)
                );
                Ok(Trampoline::value(if is_character {
                    Value::Character(Rc::new(value.clone()))
                } else {
                    Value::string(value.clone())
                }))
            }
            ExpressionKind::Identifier(name) => {
                if let Some(value) = self.activation.get(name) {
                    value.check_live(span)?;
                    return Ok(Trampoline::value(value));
                }
                if let Some(composite) = self.composites.get(name) {
                    return Ok(Trampoline::value(Value::Constructor(Rc::clone(composite))));
                }
                Err(RuntimeError::NotDeclared {
                    name: name.clone(),
                    span,
                })
            }
            ExpressionKind::Array(elements) => {
                let expressions: Vec<Rc<Expression>> = elements.iter().map(Rc::clone).collect();
                self.evaluate_list(
                    expressions,
                    0,
                    Vec::new(),
                    Box::new(|_, values| {
                        let values = values
                            .into_iter()
                            .map(|value| if value.is_resource() { value } else { value.deep_copy() })
                            .collect();
                        Ok(Trampoline::value(Value::array(values)))
                    }),
                )
            }
            ExpressionKind::Dictionary(entries) => {
                let mut expressions = Vec::with_capacity(entries.len() * 2);
                for entry in entries {
                    expressions.push(Rc::clone(&entry.key));
                    expressions.push(Rc::clone(&entry.value));
                }
                self.evaluate_list(
                    expressions,
                    0,
                    Vec::new(),
                    Box::new(move |_, values| {
                        let mut map = IndexMap::new();
                        let mut values = values.into_iter();
                        while let (Some(key), Some(value)) = (values.next(), values.next()) {
                            let key = DictKey::from_value(&key, span)?;
                            let value = if value.is_resource() { value } else { value.deep_copy() };
                            map.insert(key, value);
                        }
                        Ok(Trampoline::value(Value::Dictionary(Rc::new(RefCell::new(map)))))
                    }),
                )
            }
            ExpressionKind::Index { target, index } => {
                let expression_id = expression.id;
                let index = Rc::clone(index);
                Ok(self.evaluate(target)?.flat_map(Box::new(move |interpreter, target| {
                    interpreter.index_into(target, &index, expression_id, span)
                })))
            }
            ExpressionKind::Member {
                target,
                optional,
                name,
                name_span,
            } => {
                let optional = *optional;
                let name = name.clone();
                let name_span = *name_span;
                Ok(self.evaluate(target)?.flat_map(Box::new(move |interpreter, target| {
                    let value = interpreter.member_of(target, &name, optional, name_span)?;
                    Ok(Trampoline::value(value))
                })))
            }
            ExpressionKind::Invocation { invoked, arguments } => {
                // `before(...)` was rewritten to an entry-time binding
                if let Some(binding) = self.checked.elaboration.before_substitutions.get(&expression.id) {
                    let value = self.activation.get(binding).ok_or_else(|| {
                        RuntimeError::invariant("missing before-binding", span)
                    })?;
                    return Ok(Trampoline::value(value));
                }
                self.evaluate_invocation(invoked, arguments, span)
            }
            ExpressionKind::Unary { operator, operand } => match operator {
                UnaryOperator::Move => self.evaluate_for_move(operand),
                UnaryOperator::Negate => Ok(self.evaluate(operand)?.flat_map(Box::new(move |_, value| {
                    Ok(Trampoline::value(negate(value, span)?))
                }))),
                UnaryOperator::Not => {
                    let operand_span = operand.span;
                    Ok(self.evaluate(operand)?.flat_map(Box::new(move |_, value| {
                        Ok(Trampoline::value(Value::Bool(!value.as_bool(operand_span)?)))
                    })))
                }
            },
            ExpressionKind::Binary { operator, left, right } => {
                self.evaluate_binary(*operator, left, right, span)
            }
            ExpressionKind::Conditional { test, then, otherwise } => {
                let test_span = test.span;
                let then = Rc::clone(then);
                let otherwise = Rc::clone(otherwise);
                Ok(self.evaluate(test)?.flat_map(Box::new(move |interpreter, value| {
                    if value.as_bool(test_span)? {
                        interpreter.evaluate(&then)
                    } else {
                        interpreter.evaluate(&otherwise)
                    }
                })))
            }
            ExpressionKind::Cast { operand, failable, ty: _ } => {
                let target = self
                    .checked
                    .elaboration
                    .cast_targets
                    .get(&expression.id)
                    .cloned()
                    .unwrap_or(Type::Any);
                let failable = *failable;
                let operand_id = operand.id;
                Ok(self.evaluate(operand)?.flat_map(Box::new(move |interpreter, value| {
                    let value = if failable {
                        interpreter.failable_cast(value, &target, operand_id)
                    } else {
                        // static casts are erased, except that casting
                        // into an existential boxes the value
                        interpreter.box_existential(value, &target)
                    };
                    Ok(Trampoline::value(value))
                })))
            }
            ExpressionKind::Reference { operand, ty } => self.evaluate_reference(expression, operand, ty),
            ExpressionKind::Create(operand) => self.evaluate(operand),
            ExpressionKind::Destroy(operand) => {
                Ok(self
                    .evaluate_for_move(operand)?
                    .flat_map(Box::new(move |interpreter, value| interpreter.destroy_value(value, span)))
                    .flat_map(Box::new(|_, _| Ok(Trampoline::value(Value::Void)))))
            }
            ExpressionKind::Function(function) => {
                let value = Value::Function(Rc::new(FunctionValue {
                    name: "(anonymous)".to_string(),
                    parameters: Rc::new(function.parameters.clone()),
                    body: Rc::new(function.body.clone()),
                    declaration_id: function.id,
                    closure: self.activation.clone(),
                    receiver: None,
                }));
                Ok(Trampoline::value(value))
            }
        }
    }

    /// Evaluates the elements of a list strictly left-to-right,
    /// accumulating values, then hands them to `finish`.
    fn evaluate_list(
        &mut self,
        expressions: Vec<Rc<Expression>>,
        index: usize,
        mut collected: Vec<Value>,
        finish: Box<dyn FnOnce(&mut Self, Vec<Value>) -> RunResult<Trampoline>>,
    ) -> RunResult<Trampoline> {
        if index >= expressions.len() {
            return finish(self, collected);
        }
        let expression = Rc::clone(&expressions[index]);
        Ok(self.evaluate(&expression)?.flat_map(Box::new(move |interpreter, value| {
            collected.push(value);
            interpreter.evaluate_list(expressions, index + 1, collected, finish)
        })))
    }

    /// Evaluates the source of a transfer. Moves take identifiers out of
    /// their slot (leaving the invalid sentinel) and take storage slots
    /// out of storage; everything else evaluates normally.
    fn evaluate_transfer_source(&mut self, expression: &Rc<Expression>, transfer: Transfer) -> RunResult<Trampoline> {
        match transfer {
            Transfer::Copy => self.evaluate(expression),
            Transfer::Move => self.evaluate_for_move(expression),
        }
    }

    fn evaluate_for_move(&mut self, expression: &Rc<Expression>) -> RunResult<Trampoline> {
        let span = expression.span;
        match &expression.kind {
            ExpressionKind::Identifier(name) => {
                let value = self.activation.take(name).ok_or_else(|| RuntimeError::NotDeclared {
                    name: name.clone(),
                    span,
                })?;
                value.check_live(span)?;
                Ok(Trampoline::value(value))
            }
            ExpressionKind::Unary {
                operator: UnaryOperator::Move,
                operand,
            } => self.evaluate_for_move(operand),
            ExpressionKind::Index { target, index } => {
                let expression_id = expression.id;
                let index = Rc::clone(index);
                Ok(self.evaluate(target)?.flat_map(Box::new(move |interpreter, target| {
                    match target {
                        // moving out of storage empties the slot
                        Value::Storage(storage) => {
                            let key = interpreter.storage_key(expression_id, span)?;
                            let taken = storage.borrow_mut().get(&key);
                            storage.borrow_mut().set(&key, None);
                            Ok(Trampoline::value(match taken {
                                Some(value) => Value::Some(Box::new(value)),
                                None => Value::Nil,
                            }))
                        }
                        other => interpreter.index_into(other, &index, expression_id, span),
                    }
                })))
            }
            _ => self.evaluate(expression),
        }
    }

    fn storage_key(&self, expression_id: crate::position::NodeId, span: Span) -> RunResult<String> {
        self.checked
            .elaboration
            .storage_keys
            .get(&expression_id)
            .map(Type::to_string)
            .ok_or_else(|| RuntimeError::invariant("storage index without an elaborated key type", span))
    }

    fn index_into(
        &mut self,
        target: Value,
        index: &Rc<Expression>,
        expression_id: crate::position::NodeId,
        span: Span,
    ) -> RunResult<Trampoline> {
        match target {
            Value::Storage(storage) => {
                let key = self.storage_key(expression_id, span)?;
                let value = storage.borrow().get(&key);
                Ok(Trampoline::value(match value {
                    Some(value) => Value::Some(Box::new(value)),
                    None => Value::Nil,
                }))
            }
            Value::Reference(reference) => {
                let value = deref(&reference, span)?;
                self.index_into(value, index, expression_id, span)
            }
            Value::Array(values) => {
                Ok(self.evaluate(index)?.flat_map(Box::new(move |_, index_value| {
                    let index_int = index_value.as_int(span)?;
                    let values = values.borrow();
                    let element = index_int
                        .try_into()
                        .ok()
                        .and_then(|i: usize| values.get(i))
                        .ok_or_else(|| RuntimeError::InvalidIndex {
                            message: format!("array index {index_int} out of range for length {}", values.len()),
                            span,
                        })?;
                    element.check_live(span)?;
                    Ok(Trampoline::value(element.clone()))
                })))
            }
            Value::Dictionary(entries) => {
                Ok(self.evaluate(index)?.flat_map(Box::new(move |_, index_value| {
                    let key = DictKey::from_value(&index_value, span)?;
                    let value = entries.borrow().get(&key).cloned();
                    Ok(Trampoline::value(match value {
                        Some(value) => Value::Some(Box::new(value)),
                        None => Value::Nil,
                    }))
                })))
            }
            Value::String(s) => {
                Ok(self.evaluate(index)?.flat_map(Box::new(move |_, index_value| {
                    let grapheme = builtins::grapheme_at(&s, index_value.as_int(span)?, span)?;
                    Ok(Trampoline::value(Value::Character(Rc::new(grapheme))))
                })))
            }
            other => Err(RuntimeError::invariant(
                format!("{} is not indexable", other.kind_name()),
                span,
            )),
        }
    }

    fn member_of(&mut self, target: Value, name: &str, optional: bool, span: Span) -> RunResult<Value> {
        if optional {
            return match target {
                Value::Nil => Ok(Value::Nil),
                Value::Some(inner) => {
                    let value = self.member_of(*inner, name, false, span)?;
                    Ok(Value::Some(Box::new(value)))
                }
                // statically optional, dynamically bare: present
                other => {
                    let value = self.member_of(other, name, false, span)?;
                    Ok(Value::Some(Box::new(value)))
                }
            };
        }
        if let Value::Reference(reference) = &target {
            let value = deref(reference, span)?;
            return self.member_of(value, name, false, span);
        }
        if let Some(value) = builtins::member(&target, name) {
            return Ok(value);
        }
        if let Value::Composite(composite) = &target {
            if composite.borrow().destroyed {
                return Err(RuntimeError::invariant("member access on a destroyed resource", span));
            }
            if let Some(value) = composite.borrow().fields.get(name) {
                value.check_live(span)?;
                return Ok(value.clone());
            }
            let declaration_name = composite.borrow().name.clone();
            if let Some(declaration) = self.composites.get(&declaration_name)
                && let Some(function) = declaration.members.functions.iter().find(|f| f.name == name)
                && let Some(body) = &function.body
            {
                return Ok(Value::Function(Rc::new(FunctionValue {
                    name: function.name.clone(),
                    parameters: Rc::new(function.parameters.clone()),
                    body: Rc::new(body.clone()),
                    declaration_id: function.id,
                    closure: self.globals.clone(),
                    receiver: Some(target.clone()),
                })));
            }
        }
        Err(RuntimeError::invariant(
            format!("{} has no member `{name}`", target.kind_name()),
            span,
        ))
    }

    fn evaluate_invocation(
        &mut self,
        invoked: &Rc<Expression>,
        arguments: &[Argument],
        span: Span,
    ) -> RunResult<Trampoline> {
        let argument_expressions: Vec<Rc<Expression>> =
            arguments.iter().map(|argument| Rc::clone(&argument.value)).collect();
        Ok(self.evaluate(invoked)?.flat_map(Box::new(move |interpreter, callee| {
            interpreter.evaluate_list(
                argument_expressions,
                0,
                Vec::new(),
                Box::new(move |interpreter, values| interpreter.call_value(callee, values, span)),
            )
        })))
    }

    fn call_value(&mut self, callee: Value, arguments: Vec<Value>, span: Span) -> RunResult<Trampoline> {
        match callee {
            Value::Function(function) => self.invoke_function(&function, arguments, span),
            Value::Host(host) => {
                let value = (host.call)(arguments, span)?;
                Ok(Trampoline::value(value))
            }
            Value::BuiltinMethod { receiver, name } => {
                let value = builtins::call(&receiver, &name, arguments, span)?;
                Ok(Trampoline::value(value))
            }
            Value::Constructor(declaration) => self.instantiate(&declaration, arguments, span),
            _ => Err(RuntimeError::NotInvokable { span }),
        }
    }

    /// Invokes a function value: binds parameters, evaluates the
    /// `before` bindings, runs inherited then own pre-conditions, the
    /// body, and the post-conditions, in that order.
    fn invoke_function(
        &mut self,
        function: &Rc<FunctionValue>,
        arguments: Vec<Value>,
        span: Span,
    ) -> RunResult<Trampoline> {
        self.call_depth += 1;
        if let Err(error) = self.meter.on_call(self.call_depth) {
            self.call_depth -= 1;
            return Err(RuntimeError::Meter { error, span });
        }

        let caller = self.activation.clone();
        let activation = function.closure.child();
        if let Some(receiver) = &function.receiver {
            activation.declare("self", receiver.clone());
        }
        let parameter_types = self
            .checked
            .elaboration
            .parameter_types
            .get(&function.declaration_id)
            .cloned()
            .unwrap_or_default();
        for (position, (parameter, argument)) in function.parameters.iter().zip(arguments).enumerate() {
            let argument = if argument.is_resource() { argument } else { argument.deep_copy() };
            // binding into an existential parameter is an `Any?`
            // assignment like any other
            let argument = match parameter_types.get(position) {
                Some(declared) => self.box_existential(argument, declared),
                None => argument,
            };
            activation.declare(parameter.name.clone(), argument);
        }
        self.activation = activation;

        let elaboration = &self.checked.elaboration;
        let before_bindings = elaboration
            .before_bindings
            .get(&function.declaration_id)
            .cloned()
            .unwrap_or_default();
        let inherited = elaboration.interface_conditions.get(&function.declaration_id).cloned();
        let (mut pre_conditions, inherited_post) = match inherited {
            Some(stitched) => (stitched.pre, stitched.post),
            None => (Vec::new(), Vec::new()),
        };
        pre_conditions.extend(function.body.pre_conditions.iter().cloned());
        let mut post_conditions = function.body.post_conditions.clone();
        post_conditions.extend(inherited_post);
        let return_type = elaboration.return_types.get(&function.declaration_id).cloned();

        let body = Rc::clone(&function.body);
        let step = self
            .evaluate_before_bindings(before_bindings, 0)?
            .flat_map(Box::new(move |interpreter, _| {
                interpreter.evaluate_conditions(pre_conditions, 0, ConditionKind::Pre)
            }))
            .flat_map(Box::new(move |interpreter, _| {
                interpreter.execute_statements(Rc::clone(&body.block), 0)
            }))
            .then_control(Box::new(move |interpreter, control| {
                let result = match control {
                    Control::Return(value, _) => value,
                    Control::Value(_) => Value::Void,
                    Control::Break | Control::Continue => {
                        return Err(RuntimeError::invariant("loop control escaped a function body", span));
                    }
                };
                // the post-conditions observe `result` after the return
                // expression was evaluated, before the caller sees it
                if !matches!(result, Value::Void) {
                    interpreter.activation.declare("result", result.clone());
                }
                Ok(interpreter
                    .evaluate_conditions(post_conditions, 0, ConditionKind::Post)?
                    .flat_map(Box::new(move |interpreter, _| {
                        interpreter.activation = caller;
                        interpreter.call_depth -= 1;
                        let result = if result.is_resource() { result } else { result.deep_copy() };
                        // an existential return slot boxes like any
                        // other `Any?` assignment
                        let result = match &return_type {
                            Some(declared) => interpreter.box_existential(result, declared),
                            None => result,
                        };
                        Ok(Trampoline::value(result))
                    })))
            }));
        Ok(step)
    }

    fn evaluate_before_bindings(&mut self, bindings: Vec<BeforeBinding>, index: usize) -> RunResult<Trampoline> {
        if index >= bindings.len() {
            return Ok(Trampoline::value(Value::Void));
        }
        let binding = bindings[index].clone();
        Ok(self
            .evaluate(&binding.expression)?
            .flat_map(Box::new(move |interpreter, value| {
                // pinned once, at entry, in the pre-body environment
                interpreter.activation.declare(binding.name.clone(), value.deep_copy());
                interpreter.evaluate_before_bindings(bindings, index + 1)
            })))
    }

    fn evaluate_conditions(
        &mut self,
        conditions: Vec<Condition>,
        index: usize,
        kind: ConditionKind,
    ) -> RunResult<Trampoline> {
        if index >= conditions.len() {
            return Ok(Trampoline::value(Value::Void));
        }
        let condition = conditions[index].clone();
        let span = condition.span;
        Ok(self
            .evaluate(&condition.test)?
            .flat_map(Box::new(move |interpreter, value| {
                if value.as_bool(span)? {
                    return interpreter.evaluate_conditions(conditions, index + 1, kind);
                }
                match &condition.message {
                    None => Err(RuntimeError::Condition {
                        kind,
                        message: String::new(),
                        span,
                    }),
                    Some(message) => Ok(interpreter.evaluate(message)?.flat_map(Box::new(
                        move |_, message| {
                            Err(RuntimeError::Condition {
                                kind,
                                message: plain_string(&message),
                                span,
                            })
                        },
                    ))),
                }
            })))
    }

    fn instantiate(
        &mut self,
        declaration: &Rc<CompositeDeclaration>,
        arguments: Vec<Value>,
        span: Span,
    ) -> RunResult<Trampoline> {
        let composite = Value::Composite(Rc::new(RefCell::new(CompositeValue {
            kind: declaration.kind,
            name: declaration.name.clone(),
            fields: IndexMap::new(),
            destroyed: false,
        })));
        let initializer = declaration
            .members
            .special_functions
            .iter()
            .find(|f| f.kind == SpecialFunctionKind::Init);
        let Some(initializer) = initializer else {
            return Ok(Trampoline::value(composite));
        };
        let Some(body) = &initializer.body else {
            return Ok(Trampoline::value(composite));
        };
        let function = Rc::new(FunctionValue {
            name: format!("{}.init", declaration.name),
            parameters: Rc::new(initializer.parameters.clone()),
            body: Rc::new(body.clone()),
            declaration_id: initializer.id,
            closure: self.globals.clone(),
            receiver: Some(composite.clone()),
        });
        Ok(self
            .invoke_function(&function, arguments, span)?
            .flat_map(Box::new(move |_, _| Ok(Trampoline::value(composite)))))
    }

    /// Runs destructors and marks resources destroyed, transitively
    /// through arrays, dictionaries, and optionals.
    fn destroy_value(&mut self, value: Value, span: Span) -> RunResult<Trampoline> {
        match value {
            Value::Nil => Ok(Trampoline::value(Value::Void)),
            Value::Some(inner) => self.destroy_value(*inner, span),
            Value::Array(values) => {
                let drained: Vec<Value> = values.borrow_mut().drain(..).collect();
                self.destroy_list(drained, 0, span)
            }
            Value::Dictionary(entries) => {
                let drained: Vec<Value> = entries.borrow_mut().drain(..).map(|(_, value)| value).collect();
                self.destroy_list(drained, 0, span)
            }
            Value::Composite(composite) => {
                if composite.borrow().destroyed {
                    return Err(RuntimeError::invariant("destroy of an already destroyed resource", span));
                }
                let name = composite.borrow().name.clone();
                let declaration = self.composites.get(&name).cloned();
                let destructor = declaration.as_ref().and_then(|declaration| {
                    declaration
                        .members
                        .special_functions
                        .iter()
                        .find(|f| f.kind == SpecialFunctionKind::Destroy)
                        .cloned()
                });
                let finish = move |interpreter: &mut Self, composite: Rc<RefCell<CompositeValue>>| {
                    composite.borrow_mut().destroyed = true;
                    // nested resources go down with their holder
                    let nested: Vec<Value> = composite
                        .borrow()
                        .fields
                        .values()
                        .filter(|value| value.is_resource())
                        .cloned()
                        .collect();
                    interpreter.destroy_list(nested, 0, span)
                };
                match destructor.and_then(|destructor| destructor.body.clone().map(|body| (destructor.id, body))) {
                    None => finish(self, composite),
                    Some((declaration_id, body)) => {
                        let function = Rc::new(FunctionValue {
                            name: format!("{name}.destroy"),
                            parameters: Rc::new(Vec::new()),
                            body: Rc::new(body),
                            declaration_id,
                            closure: self.globals.clone(),
                            receiver: Some(Value::Composite(Rc::clone(&composite))),
                        });
                        Ok(self
                            .invoke_function(&function, Vec::new(), span)?
                            .flat_map(Box::new(move |interpreter, _| finish(interpreter, composite))))
                    }
                }
            }
            _ => Ok(Trampoline::value(Value::Void)),
        }
    }

    fn destroy_list(&mut self, values: Vec<Value>, index: usize, span: Span) -> RunResult<Trampoline> {
        if index >= values.len() {
            return Ok(Trampoline::value(Value::Void));
        }
        let value = values[index].clone();
        Ok(self
            .destroy_value(value, span)?
            .flat_map(Box::new(move |interpreter, _| interpreter.destroy_list(values, index + 1, span))))
    }

    fn evaluate_reference(
        &mut self,
        expression: &Rc<Expression>,
        operand: &Rc<Expression>,
        ty: &TypeAnnotation,
    ) -> RunResult<Trampoline> {
        let span = expression.span;
        let key = self
            .checked
            .elaboration
            .reference_keys
            .get(&expression.id)
            .map(Type::to_string)
            .ok_or_else(|| RuntimeError::invariant("reference without an elaborated key type", span))?;
        let authorized = matches!(&ty.ty.kind, TypeExpressionKind::Reference { authorized: true, .. });
        let ExpressionKind::Index { target, .. } = &operand.kind else {
            return Err(RuntimeError::invariant("reference into a non-storage expression", span));
        };
        Ok(self.evaluate(target)?.flat_map(Box::new(move |_, target| match target {
            Value::Storage(storage) => Ok(Trampoline::value(Value::Reference(ReferenceValue {
                storage,
                key,
                authorized,
            }))),
            other => Err(RuntimeError::invariant(
                format!("reference into {}", other.kind_name()),
                span,
            )),
        })))
    }

    fn evaluate_binary(
        &mut self,
        operator: BinaryOperator,
        left: &Rc<Expression>,
        right: &Rc<Expression>,
        span: Span,
    ) -> RunResult<Trampoline> {
        let right = Rc::clone(right);
        match operator {
            BinaryOperator::And | BinaryOperator::Or => {
                let left_span = left.span;
                Ok(self.evaluate(left)?.flat_map(Box::new(move |interpreter, value| {
                    let left_value = value.as_bool(left_span)?;
                    // short-circuit: the right side only runs when the
                    // left does not determine the result
                    let determined = match operator {
                        BinaryOperator::And => !left_value,
                        _ => left_value,
                    };
                    if determined {
                        return Ok(Trampoline::value(Value::Bool(left_value)));
                    }
                    let right_span = right.span;
                    Ok(interpreter.evaluate(&right)?.flat_map(Box::new(move |_, value| {
                        Ok(Trampoline::value(Value::Bool(value.as_bool(right_span)?)))
                    })))
                })))
            }
            BinaryOperator::NilCoalesce => {
                Ok(self.evaluate(left)?.flat_map(Box::new(move |interpreter, value| match value {
                    Value::Nil => interpreter.evaluate(&right),
                    Value::Some(inner) => Ok(Trampoline::value(*inner)),
                    // statically optional values may hold their bare
                    // representation; presence is presence
                    other => Ok(Trampoline::value(other)),
                })))
            }
            _ => Ok(self.evaluate(left)?.flat_map(Box::new(move |interpreter, left_value| {
                Ok(interpreter.evaluate(&right)?.flat_map(Box::new(move |_, right_value| {
                    Ok(Trampoline::value(apply_binary(operator, left_value, right_value, span)?))
                })))
            }))),
        }
    }

    fn failable_cast(&self, value: Value, target: &Type, operand_id: crate::position::NodeId) -> Value {
        // a boxed existential succeeds iff its declared type is a
        // subtype of the target
        if let Value::AnyBox { ty, value } = &value {
            return if ty.is_subtype_of(target) {
                Value::Some(value.clone())
            } else {
                Value::Nil
            };
        }
        if let Value::Some(inner) = &value
            && let Value::AnyBox { ty, value: boxed } = inner.as_ref()
        {
            return if ty.is_subtype_of(target) {
                Value::Some(boxed.clone())
            } else {
                Value::Nil
            };
        }
        let static_ty = self.checked.elaboration.expression_types.get(&operand_id);
        match static_ty {
            Some(static_ty) if static_ty.is_subtype_of(target) => Value::Some(Box::new(value)),
            _ => {
                // fall back to the runtime type tag
                if self.dynamic_type(&value).is_subtype_of(target) {
                    Value::Some(Box::new(value))
                } else {
                    Value::Nil
                }
            }
        }
    }

    /// Wraps a value into the existential when the destination type is
    /// `Any`-cored: `T` into `Any?` becomes `some(any(T, value))`. This
    /// runs at every such sink — bindings, assignments, casts, parameter
    /// slots, and return slots.
    fn box_existential(&self, value: Value, declared: &Type) -> Value {
        if !matches!(declared.optional_core(), Type::Any) {
            return value;
        }
        let wrapped = self.wrap_existential(value);
        if matches!(declared, Type::Optional(_)) && matches!(wrapped, Value::AnyBox { .. }) {
            Value::Some(Box::new(wrapped))
        } else {
            wrapped
        }
    }

    fn wrap_existential(&self, value: Value) -> Value {
        match value {
            Value::Nil => Value::Nil,
            Value::Some(inner) => Value::Some(Box::new(self.wrap_existential(*inner))),
            boxed @ Value::AnyBox { .. } => boxed,
            value => {
                let ty = self.dynamic_type(&value);
                Value::AnyBox {
                    ty: Box::new(ty),
                    value: Box::new(value),
                }
            }
        }
    }

    /// The runtime type tag of a value: the type recorded in the
    /// existential box, and the fallback a failable cast checks against.
    fn dynamic_type(&self, value: &Value) -> Type {
        match value {
            Value::Void => Type::Void,
            Value::Nil => Type::Optional(Box::new(Type::Never)),
            Value::Some(inner) => Type::Optional(Box::new(self.dynamic_type(inner))),
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::SizedInt { ty, .. } => ty.clone(),
            Value::Fixed(_) => Type::Fix64,
            Value::String(_) => Type::String,
            Value::Character(_) => Type::Character,
            Value::Array(values) => {
                let element = values
                    .borrow()
                    .first()
                    .map_or(Type::Never, |value| self.dynamic_type(value));
                Type::VariableArray(Box::new(element))
            }
            Value::Dictionary(entries) => {
                let entries = entries.borrow();
                let (key, value) = entries.iter().next().map_or((Type::Never, Type::Never), |(key, value)| {
                    (self.dynamic_type(&key.to_value()), self.dynamic_type(value))
                });
                Type::Dictionary {
                    key: Box::new(key),
                    value: Box::new(value),
                }
            }
            Value::Composite(composite) => self
                .composite_types
                .get(&composite.borrow().name)
                .map_or(Type::Any, |ty| Type::Composite(Rc::clone(ty))),
            Value::AnyBox { ty, .. } => ty.as_ref().clone(),
            Value::Storage(_) => Type::Storage,
            _ => Type::Any,
        }
    }

    // --- assignment targets ---

    fn assign_into(
        &mut self,
        target: &Rc<Expression>,
        value: Value,
        statement_id: crate::position::NodeId,
    ) -> RunResult<Trampoline> {
        let span = target.span;
        let declared = self.checked.elaboration.assignment_types.get(&statement_id).cloned();
        let value = match &declared {
            Some(declared) => self.box_existential(value, declared),
            None => value,
        };
        let value = if value.is_resource() { value } else { value.deep_copy() };
        self.resolve_location(
            target,
            Box::new(move |interpreter, location| {
                location.write(interpreter, value, span)?;
                Ok(Trampoline::value(Value::Void))
            }),
        )
    }

    /// Resolves an assignable expression into a storage location,
    /// evaluating its object and index sub-expressions left-to-right.
    fn resolve_location(
        &mut self,
        target: &Rc<Expression>,
        finish: Box<dyn FnOnce(&mut Self, Location) -> RunResult<Trampoline>>,
    ) -> RunResult<Trampoline> {
        let span = target.span;
        match &target.kind {
            ExpressionKind::Identifier(name) => {
                let location = Location::Variable(name.clone());
                finish(self, location)
            }
            ExpressionKind::Member { target: object, name, .. } => {
                let name = name.clone();
                Ok(self.evaluate(object)?.flat_map(Box::new(move |interpreter, object| {
                    let object = match object {
                        Value::Reference(reference) => deref(&reference, span)?,
                        other => other,
                    };
                    match object {
                        Value::Composite(composite) => finish(interpreter, Location::Member(composite, name)),
                        other => Err(RuntimeError::invariant(
                            format!("member assignment into {}", other.kind_name()),
                            span,
                        )),
                    }
                })))
            }
            ExpressionKind::Index { target: object, index } => {
                let expression_id = target.id;
                let index = Rc::clone(index);
                Ok(self.evaluate(object)?.flat_map(Box::new(move |interpreter, object| {
                    let object = match object {
                        Value::Reference(reference) => deref(&reference, span)?,
                        other => other,
                    };
                    match object {
                        Value::Storage(storage) => {
                            let key = interpreter.storage_key(expression_id, span)?;
                            finish(interpreter, Location::Storage(storage, key))
                        }
                        Value::Array(values) => {
                            Ok(interpreter.evaluate(&index)?.flat_map(Box::new(move |interpreter, index_value| {
                                let index_int = index_value.as_int(span)?;
                                let length = values.borrow().len();
                                let position: usize = index_int.try_into().ok().filter(|i| *i < length).ok_or_else(|| {
                                    RuntimeError::InvalidIndex {
                                        message: format!("array index {index_int} out of range for length {length}"),
                                        span,
                                    }
                                })?;
                                finish(interpreter, Location::Array(values, position))
                            })))
                        }
                        Value::Dictionary(entries) => {
                            Ok(interpreter.evaluate(&index)?.flat_map(Box::new(move |interpreter, index_value| {
                                let key = DictKey::from_value(&index_value, span)?;
                                finish(interpreter, Location::Dictionary(entries, key))
                            })))
                        }
                        other => Err(RuntimeError::invariant(
                            format!("index assignment into {}", other.kind_name()),
                            span,
                        )),
                    }
                })))
            }
            _ => Err(RuntimeError::invariant("invalid assignment target", span)),
        }
    }
}

/// A resolved assignable storage location.
enum Location {
    Variable(String),
    Member(Rc<RefCell<CompositeValue>>, String),
    Array(Rc<RefCell<Vec<Value>>>, usize),
    Dictionary(Rc<RefCell<IndexMap<DictKey, Value>>>, DictKey),
    Storage(StorageHandle, String),
}

impl Location {
    fn write(&self, interpreter: &mut Interpreter, value: Value, span: Span) -> RunResult<()> {
        match self {
            Self::Variable(name) => {
                if !interpreter.activation.set(name, value) {
                    return Err(RuntimeError::NotDeclared {
                        name: name.clone(),
                        span,
                    });
                }
                Ok(())
            }
            Self::Member(composite, name) => {
                composite.borrow_mut().fields.insert(name.clone(), value);
                Ok(())
            }
            Self::Array(values, index) => {
                values.borrow_mut()[*index] = value;
                Ok(())
            }
            Self::Dictionary(entries, key) => {
                // assigning nil removes the key, keeping insertion order
                match value {
                    Value::Nil => {
                        entries.borrow_mut().shift_remove(key);
                    }
                    Value::Some(inner) => {
                        entries.borrow_mut().insert(key.clone(), *inner);
                    }
                    value => {
                        entries.borrow_mut().insert(key.clone(), value);
                    }
                }
                Ok(())
            }
            Self::Storage(storage, key) => {
                let stored = match value {
                    Value::Nil => None,
                    Value::Some(inner) => Some(*inner),
                    value => Some(value),
                };
                storage.borrow_mut().set(key, stored);
                Ok(())
            }
        }
    }

    /// Reads the current value, leaving a hole behind: swaps exchange
    /// both sides, so the read is always paired with a write.
    fn take(&self, interpreter: &mut Interpreter, span: Span) -> RunResult<Value> {
        match self {
            Self::Variable(name) => interpreter
                .activation
                .take(name)
                .ok_or_else(|| RuntimeError::NotDeclared {
                    name: name.clone(),
                    span,
                }),
            Self::Member(composite, name) => composite
                .borrow_mut()
                .fields
                .insert(name.clone(), Value::Invalid)
                .ok_or_else(|| RuntimeError::invariant(format!("no field `{name}`"), span)),
            Self::Array(values, index) => {
                let mut values = values.borrow_mut();
                let slot = values
                    .get_mut(*index)
                    .ok_or_else(|| RuntimeError::InvalidIndex {
                        message: format!("array index {index} out of range"),
                        span,
                    })?;
                Ok(std::mem::replace(slot, Value::Invalid))
            }
            Self::Dictionary(entries, key) => {
                let taken = entries.borrow_mut().shift_remove(key);
                Ok(match taken {
                    Some(value) => Value::Some(Box::new(value)),
                    None => Value::Nil,
                })
            }
            Self::Storage(storage, key) => {
                let taken = storage.borrow().get(key);
                storage.borrow_mut().set(key, None);
                Ok(match taken {
                    Some(value) => Value::Some(Box::new(value)),
                    None => Value::Nil,
                })
            }
        }
    }
}

fn deref(reference: &ReferenceValue, span: Span) -> RunResult<Value> {
    reference
        .storage
        .borrow()
        .get(&reference.key)
        .ok_or(RuntimeError::Dereference { span })
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.as_ref().clone(),
        other => other.to_string(),
    }
}

fn negate(value: Value, span: Span) -> RunResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(-i)),
        Value::SizedInt { value, ty } => {
            let negated = -value;
            check_range(&negated, &ty, span)?;
            Ok(Value::SizedInt { value: negated, ty })
        }
        Value::Fixed(fixed) => Ok(Value::Fixed(FixedPoint(-fixed.0))),
        other => Err(RuntimeError::invariant(
            format!("cannot negate {}", other.kind_name()),
            span,
        )),
    }
}

fn check_range(value: &BigInt, ty: &Type, span: Span) -> RunResult<()> {
    if let Some((min, max)) = ty.integer_range()
        && (*value < min || *value > max)
    {
        return Err(RuntimeError::Overflow {
            ty: ty.to_string(),
            span,
        });
    }
    Ok(())
}

fn apply_binary(operator: BinaryOperator, left: Value, right: Value, span: Span) -> RunResult<Value> {
    use BinaryOperator::{
        Add, Concat, Divide, Equal, Greater, GreaterEqual, Less, LessEqual, Multiply, NotEqual, Remainder, Subtract,
    };
    match operator {
        Equal => return Ok(Value::Bool(values_equal(&left, &right))),
        NotEqual => return Ok(Value::Bool(!values_equal(&left, &right))),
        Concat => return concat(left, right, span),
        _ => {}
    }

    if let (Value::Fixed(a), Value::Fixed(b)) = (&left, &right) {
        let scale = BigInt::from(10u8).pow(value::FIXED_POINT_SCALE);
        return Ok(match operator {
            Add => Value::Fixed(FixedPoint(&a.0 + &b.0)),
            Subtract => Value::Fixed(FixedPoint(&a.0 - &b.0)),
            Multiply => Value::Fixed(FixedPoint(&a.0 * &b.0 / scale)),
            Divide => {
                if b.0.is_zero() {
                    return Err(RuntimeError::DivisionByZero { span });
                }
                Value::Fixed(FixedPoint(&a.0 * scale / &b.0))
            }
            Remainder => {
                if b.0.is_zero() {
                    return Err(RuntimeError::DivisionByZero { span });
                }
                Value::Fixed(FixedPoint(&a.0 % &b.0))
            }
            Less => Value::Bool(a < b),
            LessEqual => Value::Bool(a <= b),
            Greater => Value::Bool(a > b),
            GreaterEqual => Value::Bool(a >= b),
            _ => unreachable!("handled above"),
        });
    }

    let ty = match (&left, &right) {
        (Value::SizedInt { ty, .. }, _) | (_, Value::SizedInt { ty, .. }) => Some(ty.clone()),
        _ => None,
    };
    let a = left.as_int(span)?;
    let b = right.as_int(span)?;
    let result = match operator {
        Less => return Ok(Value::Bool(a < b)),
        LessEqual => return Ok(Value::Bool(a <= b)),
        Greater => return Ok(Value::Bool(a > b)),
        GreaterEqual => return Ok(Value::Bool(a >= b)),
        Add => a + b,
        Subtract => a - b,
        Multiply => a * b,
        // integer division truncates toward zero; the remainder keeps
        // the sign of the dividend
        Divide => {
            if b.is_zero() {
                return Err(RuntimeError::DivisionByZero { span });
            }
            a / b
        }
        Remainder => {
            if b.is_zero() {
                return Err(RuntimeError::DivisionByZero { span });
            }
            a % b
        }
        _ => unreachable!("handled above"),
    };
    match ty {
        Some(ty) => {
            check_range(&result, &ty, span)?;
            Ok(Value::SizedInt { value: result, ty })
        }
        None => Ok(Value::Int(result)),
    }
}

fn concat(left: Value, right: Value, span: Span) -> RunResult<Value> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut combined: Vec<Value> = a.borrow().iter().map(Value::deep_copy).collect();
            combined.extend(b.borrow().iter().map(Value::deep_copy));
            Ok(Value::array(combined))
        }
        (left, right) => Err(RuntimeError::invariant(
            format!("cannot concatenate {} and {}", left.kind_name(), right.kind_name()),
            span,
        )),
    }
}
