//! Recursive-descent parser: token stream to program tree.
//!
//! The parser recovers past localized errors where possible and reports
//! everything it found as one [`ParserError`]. It also reports whether the
//! input was complete, which lets REPL drivers distinguish "syntax error"
//! from "keep typing".

use std::rc::Rc;

use num_traits::ToPrimitive;
use smallvec::SmallVec;

use crate::{
    ast::{
        Access, Argument, BinaryOperator, Block, CompositeDeclaration, CompositeKind, Condition, Declaration,
        DeclarationKind, DictionaryEntry, ElseBranch, Expression, ExpressionKind, FieldDeclaration, FunctionBlock,
        FunctionDeclaration, FunctionExpression, IfTest, ImportDeclaration, ImportLocation, InterfaceDeclaration,
        Members, NominalType, Parameter, Program, SpecialFunctionDeclaration, SpecialFunctionKind, Statement,
        StatementKind, TransactionDeclaration, Transfer, TypeAnnotation, TypeExpression, TypeExpressionKind,
        UnaryOperator, VariableDeclaration,
    },
    diagnostics::{Diagnostic, DiagnosticKind, ParserError},
    lexer,
    position::{NodeId, Span},
    token::{Keyword, Token, TokenKind},
};

/// Result of parsing one source.
#[derive(Debug)]
pub struct ParseOutput {
    /// The parsed program; possibly partial when `error` is set.
    pub program: Program,
    /// False when more input would complete an otherwise truncated
    /// declaration (unclosed brace, unterminated string, trailing
    /// operator). REPL drivers prompt for a continuation line instead of
    /// reporting the error.
    pub input_is_complete: bool,
    pub error: Option<ParserError>,
}

/// Parses a whole program.
#[must_use]
pub fn parse_program(source: &str) -> ParseOutput {
    let lexed = lexer::lex(source);
    let mut parser = Parser::new(lexed.tokens, lexed.diagnostics, lexed.unterminated);
    let program = parser.parse_program();
    parser.finish(program)
}

/// Parses a single expression, for embedded REPL inputs.
pub fn parse_expression(source: &str) -> Result<Rc<Expression>, ParserError> {
    let lexed = lexer::lex(source);
    let mut parser = Parser::new(lexed.tokens, lexed.diagnostics, lexed.unterminated);
    let expression = parser.parse_expression();
    if !matches!(parser.current_kind(), TokenKind::Eof) {
        parser.error_here(format!("expected end of input, found {}", parser.current_kind().describe()));
    }
    if parser.diagnostics.is_empty() {
        Ok(expression)
    } else {
        Err(ParserError {
            diagnostics: parser.diagnostics,
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    diagnostics: Vec<Diagnostic>,
    next_id: u32,
    incomplete: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, diagnostics: Vec<Diagnostic>, unterminated: bool) -> Self {
        Self {
            tokens,
            index: 0,
            diagnostics,
            next_id: 0,
            incomplete: unterminated,
        }
    }

    fn finish(self, program: Program) -> ParseOutput {
        let error = if self.diagnostics.is_empty() {
            None
        } else {
            Some(ParserError {
                diagnostics: self.diagnostics,
            })
        };
        ParseOutput {
            program,
            input_is_complete: !self.incomplete,
            error,
        }
    }

    // --- token plumbing ---

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.tokens[self.index].kind
    }

    fn current_span(&self) -> Span {
        self.tokens[self.index].span
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.index.saturating_sub(1)].span
    }

    fn advance(&mut self) {
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.current_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        *self.current_kind() == TokenKind::Keyword(keyword)
    }

    fn error_here(&mut self, message: String) {
        if matches!(self.current_kind(), TokenKind::Eof) {
            self.incomplete = true;
        }
        let span = self.current_span();
        self.diagnostics.push(Diagnostic::new(DiagnosticKind::Syntax { message }, span));
    }

    fn report(&mut self, kind: DiagnosticKind, span: Span) {
        self.diagnostics.push(Diagnostic::new(kind, span));
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> Span {
        if self.current_kind() == kind {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_here(format!(
                "expected {} in {context}, found {}",
                kind.describe(),
                self.current_kind().describe()
            ));
            self.current_span()
        }
    }

    fn expect_identifier(&mut self, context: &str) -> (String, Span) {
        let span = self.current_span();
        if let TokenKind::Identifier(name) = self.current_kind() {
            let name = name.clone();
            self.advance();
            (name, span)
        } else {
            self.error_here(format!(
                "expected identifier in {context}, found {}",
                self.current_kind().describe()
            ));
            ("<error>".to_string(), span)
        }
    }

    /// Text usable as an argument label or parameter label: identifiers,
    /// but also keywords like `from`, which make natural labels.
    fn label_text(kind: &TokenKind) -> Option<String> {
        match kind {
            TokenKind::Identifier(name) => Some(name.clone()),
            TokenKind::Keyword(kw) => Some(kw.to_string()),
            _ => None,
        }
    }

    /// Consumes statement/declaration separators, flagging `;;`.
    fn skip_separators(&mut self) {
        let mut consecutive = 0usize;
        while matches!(self.current_kind(), TokenKind::Semicolon) {
            consecutive += 1;
            if consecutive == 2 {
                self.error_here("extraneous `;` with no statement in between".to_string());
            }
            self.advance();
        }
    }

    fn synchronize_declaration(&mut self) {
        loop {
            match self.current_kind() {
                TokenKind::Eof => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Keyword(
                    Keyword::Let
                    | Keyword::Var
                    | Keyword::Fun
                    | Keyword::Struct
                    | Keyword::Resource
                    | Keyword::Event
                    | Keyword::Contract
                    | Keyword::Transaction
                    | Keyword::Import
                    | Keyword::Pub
                    | Keyword::Priv,
                ) => return,
                _ => self.advance(),
            }
        }
    }

    fn synchronize_statement(&mut self) {
        loop {
            match self.current_kind() {
                TokenKind::Eof | TokenKind::RightBrace => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Keyword(
                    Keyword::Let
                    | Keyword::Var
                    | Keyword::If
                    | Keyword::While
                    | Keyword::Return
                    | Keyword::Break
                    | Keyword::Continue
                    | Keyword::Emit,
                ) => return,
                _ => self.advance(),
            }
        }
    }

    // --- declarations ---

    fn parse_program(&mut self) -> Program {
        let mut declarations = Vec::new();
        loop {
            self.skip_separators();
            if matches!(self.current_kind(), TokenKind::Eof) {
                break;
            }
            let before = self.index;
            match self.parse_declaration() {
                Some(declaration) => declarations.push(declaration),
                None => {
                    self.synchronize_declaration();
                    // guarantee progress even when synchronization stops
                    // on the token that failed to parse
                    if self.index == before {
                        self.advance();
                    }
                }
            }
        }
        Program { declarations }
    }

    fn parse_access(&mut self) -> Access {
        if self.eat_keyword(Keyword::Priv) {
            return Access::Private;
        }
        if self.eat_keyword(Keyword::Pub) {
            if self.eat(&TokenKind::LeftParen) {
                let (name, span) = self.expect_identifier("access modifier");
                if name != "set" {
                    self.report(
                        DiagnosticKind::Syntax {
                            message: format!("expected `set` in access modifier, found `{name}`"),
                        },
                        span,
                    );
                }
                self.expect(&TokenKind::RightParen, "access modifier");
                return Access::PublicSettable;
            }
            return Access::Public;
        }
        Access::NotSpecified
    }

    fn parse_declaration(&mut self) -> Option<Declaration> {
        let start = self.current_span();
        let access = self.parse_access();
        let kind = match self.current_kind() {
            TokenKind::Keyword(Keyword::Let | Keyword::Var) => {
                let declaration = self.parse_variable_declaration(access)?;
                DeclarationKind::Variable(Rc::new(declaration))
            }
            TokenKind::Keyword(Keyword::Fun) => {
                let function = self.parse_function_declaration(access, true)?;
                DeclarationKind::Function(Rc::new(function))
            }
            TokenKind::Keyword(Keyword::Struct) => self.parse_composite_or_interface(access, CompositeKind::Structure)?,
            TokenKind::Keyword(Keyword::Resource) => self.parse_composite_or_interface(access, CompositeKind::Resource)?,
            TokenKind::Keyword(Keyword::Contract) => self.parse_composite_or_interface(access, CompositeKind::Contract)?,
            TokenKind::Keyword(Keyword::Event) => DeclarationKind::Composite(Rc::new(self.parse_event(access)?)),
            TokenKind::Keyword(Keyword::Transaction) => {
                DeclarationKind::Transaction(Rc::new(self.parse_transaction()?))
            }
            TokenKind::Keyword(Keyword::Import) => DeclarationKind::Import(self.parse_import()?),
            other => {
                let other = other.describe();
                self.error_here(format!("expected declaration, found {other}"));
                return None;
            }
        };
        Some(Declaration {
            span: start.to(self.previous_span()),
            kind,
        })
    }

    fn parse_variable_declaration(&mut self, access: Access) -> Option<VariableDeclaration> {
        let start = self.current_span();
        let is_constant = if self.eat_keyword(Keyword::Let) {
            true
        } else {
            self.expect(&TokenKind::Keyword(Keyword::Var), "variable declaration");
            false
        };
        let (name, name_span) = self.expect_identifier("variable declaration");
        let type_annotation = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_annotation())
        } else {
            None
        };
        let transfer = if self.eat(&TokenKind::Equal) {
            Transfer::Copy
        } else if self.eat(&TokenKind::Move) {
            Transfer::Move
        } else {
            self.error_here(format!(
                "expected `=` or `<-` in variable declaration, found {}",
                self.current_kind().describe()
            ));
            return None;
        };
        let value = self.parse_expression();
        Some(VariableDeclaration {
            id: self.node_id(),
            span: start.to(value.span),
            access,
            is_constant,
            name,
            name_span,
            type_annotation,
            transfer,
            value,
        })
    }

    fn parse_function_declaration(&mut self, access: Access, require_body: bool) -> Option<FunctionDeclaration> {
        let start = self.expect(&TokenKind::Keyword(Keyword::Fun), "function declaration");
        let (name, name_span) = self.expect_identifier("function declaration");
        let parameters = self.parse_parameter_list();
        let return_annotation = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_annotation())
        } else {
            None
        };
        let body = if matches!(self.current_kind(), TokenKind::LeftBrace) {
            Some(self.parse_function_block())
        } else {
            if require_body {
                self.error_here("expected function body".to_string());
            }
            None
        };
        Some(FunctionDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            access,
            name,
            name_span,
            parameters,
            return_annotation,
            body,
        })
    }

    fn parse_parameter_list(&mut self) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        self.expect(&TokenKind::LeftParen, "parameter list");
        while !matches!(self.current_kind(), TokenKind::RightParen | TokenKind::Eof) {
            let start = self.current_span();
            let Some(first) = Self::label_text(self.current_kind()) else {
                self.error_here(format!(
                    "expected parameter name, found {}",
                    self.current_kind().describe()
                ));
                break;
            };
            self.advance();
            // two identifiers in a row: the first is the argument label
            let (label, name) = match Self::label_text(self.current_kind()) {
                Some(name) => {
                    self.advance();
                    (Some(first), name)
                }
                None => (None, first),
            };
            self.expect(&TokenKind::Colon, "parameter list");
            let type_annotation = self.parse_type_annotation();
            parameters.push(Parameter {
                label,
                name,
                span: start.to(self.previous_span()),
                type_annotation,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "parameter list");
        parameters
    }

    fn parse_function_block(&mut self) -> FunctionBlock {
        let start = self.expect(&TokenKind::LeftBrace, "function body");
        let mut pre_conditions = Vec::new();
        let mut post_conditions = Vec::new();
        loop {
            if self.at_keyword(Keyword::Pre) {
                self.advance();
                pre_conditions = self.parse_conditions();
            } else if self.at_keyword(Keyword::Post) {
                self.advance();
                post_conditions = self.parse_conditions();
            } else {
                break;
            }
        }
        let statements = self.parse_statements_until_brace();
        let end = self.expect(&TokenKind::RightBrace, "function body");
        let span = start.to(end);
        FunctionBlock {
            pre_conditions,
            post_conditions,
            block: Rc::new(Block { span, statements }),
            span,
        }
    }

    fn parse_conditions(&mut self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        self.expect(&TokenKind::LeftBrace, "conditions");
        loop {
            self.skip_separators();
            if matches!(self.current_kind(), TokenKind::RightBrace | TokenKind::Eof) {
                break;
            }
            let test = self.parse_expression();
            let message = if self.eat(&TokenKind::Colon) {
                Some(self.parse_expression())
            } else {
                None
            };
            let span = test.span.to(self.previous_span());
            conditions.push(Condition { test, message, span });
        }
        self.expect(&TokenKind::RightBrace, "conditions");
        conditions
    }

    fn parse_composite_or_interface(&mut self, access: Access, kind: CompositeKind) -> Option<DeclarationKind> {
        let start = self.current_span();
        self.advance(); // the kind keyword
        if self.eat_keyword(Keyword::Interface) {
            let (name, name_span) = self.expect_identifier("interface declaration");
            let members = self.parse_members(true);
            return Some(DeclarationKind::Interface(Rc::new(InterfaceDeclaration {
                id: self.node_id(),
                span: start.to(self.previous_span()),
                access,
                kind,
                name,
                name_span,
                members,
            })));
        }
        let (name, name_span) = self.expect_identifier("composite declaration");
        let mut conformances = Vec::new();
        if self.eat(&TokenKind::Colon) {
            loop {
                let (name, span) = self.expect_identifier("conformance list");
                conformances.push(NominalType { name, span });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let members = self.parse_members(false);
        Some(DeclarationKind::Composite(Rc::new(CompositeDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            access,
            kind,
            name,
            name_span,
            conformances,
            members,
        })))
    }

    fn parse_members(&mut self, interface: bool) -> Members {
        let mut members = Members::default();
        self.expect(&TokenKind::LeftBrace, "composite body");
        loop {
            self.skip_separators();
            if matches!(self.current_kind(), TokenKind::RightBrace | TokenKind::Eof) {
                break;
            }
            let before = self.index;
            let access = self.parse_access();
            match self.current_kind() {
                TokenKind::Keyword(Keyword::Let | Keyword::Var) => {
                    if let Some(field) = self.parse_field(access) {
                        members.fields.push(field);
                    }
                }
                TokenKind::Keyword(Keyword::Init) => {
                    let start = self.current_span();
                    self.advance();
                    let parameters = self.parse_parameter_list();
                    let body = self.parse_optional_special_body(interface);
                    members.special_functions.push(SpecialFunctionDeclaration {
                        id: self.node_id(),
                        span: start.to(self.previous_span()),
                        kind: SpecialFunctionKind::Init,
                        parameters,
                        body,
                    });
                }
                TokenKind::Keyword(Keyword::Destroy) => {
                    let start = self.current_span();
                    self.advance();
                    self.expect(&TokenKind::LeftParen, "destructor");
                    self.expect(&TokenKind::RightParen, "destructor");
                    let body = self.parse_optional_special_body(interface);
                    members.special_functions.push(SpecialFunctionDeclaration {
                        id: self.node_id(),
                        span: start.to(self.previous_span()),
                        kind: SpecialFunctionKind::Destroy,
                        parameters: Vec::new(),
                        body,
                    });
                }
                TokenKind::Keyword(Keyword::Fun) => {
                    if let Some(function) = self.parse_function_declaration(access, !interface) {
                        members.functions.push(Rc::new(function));
                    }
                }
                other => {
                    let other = other.describe();
                    self.error_here(format!("expected member declaration, found {other}"));
                    self.synchronize_statement();
                    if self.index == before {
                        self.advance();
                    }
                }
            }
        }
        self.expect(&TokenKind::RightBrace, "composite body");
        members
    }

    fn parse_optional_special_body(&mut self, interface: bool) -> Option<FunctionBlock> {
        if matches!(self.current_kind(), TokenKind::LeftBrace) {
            Some(self.parse_function_block())
        } else {
            if !interface {
                self.error_here("expected body".to_string());
            }
            None
        }
    }

    fn parse_field(&mut self, access: Access) -> Option<FieldDeclaration> {
        let start = self.current_span();
        let is_constant = self.eat_keyword(Keyword::Let);
        if !is_constant {
            self.expect(&TokenKind::Keyword(Keyword::Var), "field declaration");
        }
        let (name, name_span) = self.expect_identifier("field declaration");
        self.expect(&TokenKind::Colon, "field declaration");
        let type_annotation = self.parse_type_annotation();
        Some(FieldDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            access,
            is_constant,
            name,
            name_span,
            type_annotation,
        })
    }

    fn parse_event(&mut self, access: Access) -> Option<CompositeDeclaration> {
        let start = self.expect(&TokenKind::Keyword(Keyword::Event), "event declaration");
        let (name, name_span) = self.expect_identifier("event declaration");
        let parameters = self.parse_parameter_list();
        let initializer = SpecialFunctionDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            kind: SpecialFunctionKind::Init,
            parameters,
            body: None,
        };
        Some(CompositeDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            access,
            kind: CompositeKind::Event,
            name,
            name_span,
            conformances: Vec::new(),
            members: Members {
                fields: Vec::new(),
                special_functions: vec![initializer],
                functions: Vec::new(),
            },
        })
    }

    fn parse_transaction(&mut self) -> Option<TransactionDeclaration> {
        let start = self.expect(&TokenKind::Keyword(Keyword::Transaction), "transaction declaration");
        self.expect(&TokenKind::LeftBrace, "transaction declaration");
        let mut fields = Vec::new();
        let mut prepare = None;
        let mut execute = None;
        loop {
            self.skip_separators();
            match self.current_kind() {
                TokenKind::RightBrace | TokenKind::Eof => break,
                TokenKind::Keyword(Keyword::Let | Keyword::Var) => {
                    if let Some(field) = self.parse_field(Access::NotSpecified) {
                        fields.push(field);
                    }
                }
                TokenKind::Keyword(Keyword::Prepare) => {
                    let start = self.current_span();
                    self.advance();
                    let parameters = self.parse_parameter_list();
                    let body = Some(self.parse_function_block());
                    prepare = Some(SpecialFunctionDeclaration {
                        id: self.node_id(),
                        span: start.to(self.previous_span()),
                        kind: SpecialFunctionKind::Prepare,
                        parameters,
                        body,
                    });
                }
                TokenKind::Keyword(Keyword::Execute) => {
                    let start = self.current_span();
                    self.advance();
                    let body = Some(self.parse_function_block());
                    execute = Some(SpecialFunctionDeclaration {
                        id: self.node_id(),
                        span: start.to(self.previous_span()),
                        kind: SpecialFunctionKind::Execute,
                        parameters: Vec::new(),
                        body,
                    });
                }
                other => {
                    let other = other.describe();
                    self.error_here(format!("expected transaction member, found {other}"));
                    self.synchronize_statement();
                }
            }
        }
        self.expect(&TokenKind::RightBrace, "transaction declaration");
        Some(TransactionDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            fields,
            prepare,
            execute,
        })
    }

    fn parse_import(&mut self) -> Option<ImportDeclaration> {
        let start = self.expect(&TokenKind::Keyword(Keyword::Import), "import declaration");
        let mut identifiers = SmallVec::new();
        // a leading identifier list means `import a, b from <location>`
        if matches!(self.current_kind(), TokenKind::Identifier(_)) {
            loop {
                let (name, _) = self.expect_identifier("import declaration");
                identifiers.push(name);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Keyword(Keyword::From), "import declaration");
        }
        let location = match self.current_kind().clone() {
            TokenKind::String(s) => {
                self.advance();
                ImportLocation::String(s)
            }
            TokenKind::Integer { value, .. } => {
                self.advance();
                let (_, bytes) = value.to_bytes_be();
                ImportLocation::Address(bytes)
            }
            other => {
                self.error_here(format!(
                    "expected import location (string or address), found {}",
                    other.describe()
                ));
                return None;
            }
        };
        Some(ImportDeclaration {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            identifiers,
            location,
        })
    }

    // --- statements ---

    fn parse_block(&mut self) -> Rc<Block> {
        let start = self.expect(&TokenKind::LeftBrace, "block");
        let statements = self.parse_statements_until_brace();
        let end = self.expect(&TokenKind::RightBrace, "block");
        Rc::new(Block {
            span: start.to(end),
            statements,
        })
    }

    fn parse_statements_until_brace(&mut self) -> Vec<Rc<Statement>> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if matches!(self.current_kind(), TokenKind::RightBrace | TokenKind::Eof) {
                break;
            }
            let before = self.index;
            match self.parse_statement() {
                Some(statement) => statements.push(Rc::new(statement)),
                None => {
                    self.synchronize_statement();
                    if self.index == before {
                        self.advance();
                    }
                }
            }
        }
        statements
    }

    fn parse_statement(&mut self) -> Option<Statement> {
        let start = self.current_span();
        let kind = match self.current_kind() {
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = match self.current_kind() {
                    TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof => None,
                    _ => Some(self.parse_expression()),
                };
                StatementKind::Return { value }
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StatementKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StatementKind::Continue
            }
            TokenKind::Keyword(Keyword::If) => return self.parse_if_statement(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                let test = self.parse_expression();
                let block = self.parse_block();
                StatementKind::While { test, block }
            }
            TokenKind::Keyword(Keyword::Let | Keyword::Var) => {
                let declaration = self.parse_variable_declaration(Access::NotSpecified)?;
                StatementKind::VariableDeclaration(Rc::new(declaration))
            }
            TokenKind::Keyword(Keyword::Emit) => {
                self.advance();
                let invocation = self.parse_expression();
                if !matches!(invocation.kind, ExpressionKind::Invocation { .. }) {
                    self.report(
                        DiagnosticKind::Syntax {
                            message: "`emit` requires an event invocation".to_string(),
                        },
                        invocation.span,
                    );
                }
                StatementKind::Emit(invocation)
            }
            TokenKind::LeftBrace => StatementKind::Block(self.parse_block()),
            _ => {
                let expression = self.parse_expression();
                match self.current_kind() {
                    TokenKind::Equal | TokenKind::Move => {
                        let transfer = if self.eat(&TokenKind::Equal) {
                            Transfer::Copy
                        } else {
                            self.advance();
                            Transfer::Move
                        };
                        if !expression.is_assignment_target() {
                            self.report(
                                DiagnosticKind::Syntax {
                                    message: "invalid assignment target".to_string(),
                                },
                                expression.span,
                            );
                        }
                        let value = self.parse_expression();
                        StatementKind::Assignment {
                            target: expression,
                            transfer,
                            value,
                        }
                    }
                    TokenKind::Swap => {
                        self.advance();
                        let right = self.parse_expression();
                        for side in [&expression, &right] {
                            if !side.is_assignment_target() {
                                self.report(
                                    DiagnosticKind::Syntax {
                                        message: "both sides of a swap must be assignable".to_string(),
                                    },
                                    side.span,
                                );
                            }
                        }
                        StatementKind::Swap {
                            left: expression,
                            right,
                        }
                    }
                    _ => StatementKind::Expression(expression),
                }
            }
        };
        Some(Statement {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            kind,
        })
    }

    fn parse_if_statement(&mut self) -> Option<Statement> {
        let start = self.expect(&TokenKind::Keyword(Keyword::If), "if statement");
        let test = if matches!(self.current_kind(), TokenKind::Keyword(Keyword::Let | Keyword::Var)) {
            let declaration = self.parse_variable_declaration(Access::NotSpecified)?;
            IfTest::Declaration(Rc::new(declaration))
        } else {
            IfTest::Expression(self.parse_expression())
        };
        let then = self.parse_block();
        let otherwise = if self.eat_keyword(Keyword::Else) {
            if self.at_keyword(Keyword::If) {
                Some(ElseBranch::If(Rc::new(self.parse_if_statement()?)))
            } else {
                Some(ElseBranch::Block(self.parse_block()))
            }
        } else {
            None
        };
        Some(Statement {
            id: self.node_id(),
            span: start.to(self.previous_span()),
            kind: StatementKind::If { test, then, otherwise },
        })
    }

    // --- expressions ---

    fn make_expression(&mut self, span: Span, kind: ExpressionKind) -> Rc<Expression> {
        Rc::new(Expression {
            id: self.node_id(),
            span,
            kind,
        })
    }

    fn parse_expression(&mut self) -> Rc<Expression> {
        self.parse_nil_coalescing()
    }

    fn parse_nil_coalescing(&mut self) -> Rc<Expression> {
        let left = self.parse_conditional();
        if self.eat(&TokenKind::QuestionQuestion) {
            // right-associative
            let right = self.parse_nil_coalescing();
            let span = left.span.to(right.span);
            return self.make_expression(
                span,
                ExpressionKind::Binary {
                    operator: BinaryOperator::NilCoalesce,
                    left,
                    right,
                },
            );
        }
        left
    }

    fn parse_conditional(&mut self) -> Rc<Expression> {
        let test = self.parse_logical_or();
        if self.eat(&TokenKind::Question) {
            let then = self.parse_expression();
            self.expect(&TokenKind::Colon, "conditional expression");
            let otherwise = self.parse_conditional();
            let span = test.span.to(otherwise.span);
            return self.make_expression(
                span,
                ExpressionKind::Conditional { test, then, otherwise },
            );
        }
        test
    }

    fn parse_binary_level(
        &mut self,
        operators: &[(TokenKind, BinaryOperator)],
        next: fn(&mut Self) -> Rc<Expression>,
    ) -> Rc<Expression> {
        let mut left = next(self);
        'outer: loop {
            for (token, operator) in operators {
                if self.eat(token) {
                    let right = next(self);
                    let span = left.span.to(right.span);
                    left = self.make_expression(
                        span,
                        ExpressionKind::Binary {
                            operator: *operator,
                            left,
                            right,
                        },
                    );
                    continue 'outer;
                }
            }
            return left;
        }
    }

    fn parse_logical_or(&mut self) -> Rc<Expression> {
        self.parse_binary_level(&[(TokenKind::PipePipe, BinaryOperator::Or)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> Rc<Expression> {
        self.parse_binary_level(&[(TokenKind::AmpAmp, BinaryOperator::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Rc<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::EqualEqual, BinaryOperator::Equal),
                (TokenKind::BangEqual, BinaryOperator::NotEqual),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Rc<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::Less, BinaryOperator::Less),
                (TokenKind::LessEqual, BinaryOperator::LessEqual),
                (TokenKind::Greater, BinaryOperator::Greater),
                (TokenKind::GreaterEqual, BinaryOperator::GreaterEqual),
            ],
            Self::parse_concat,
        )
    }

    fn parse_concat(&mut self) -> Rc<Expression> {
        self.parse_binary_level(&[(TokenKind::Amp, BinaryOperator::Concat)], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Rc<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::Plus, BinaryOperator::Add),
                (TokenKind::Minus, BinaryOperator::Subtract),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Rc<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, BinaryOperator::Multiply),
                (TokenKind::Slash, BinaryOperator::Divide),
                (TokenKind::Percent, BinaryOperator::Remainder),
            ],
            Self::parse_cast,
        )
    }

    fn parse_cast(&mut self) -> Rc<Expression> {
        let operand = self.parse_unary();
        // casts are non-associative: at most one per operand
        let failable = if self.eat_keyword(Keyword::As) {
            false
        } else if self.eat(&TokenKind::AsQuestion) {
            true
        } else {
            return operand;
        };
        let ty = self.parse_type_annotation();
        let span = operand.span.to(ty.span);
        self.make_expression(span, ExpressionKind::Cast { operand, failable, ty })
    }

    fn parse_unary(&mut self) -> Rc<Expression> {
        let start = self.current_span();
        let operator = match self.current_kind() {
            TokenKind::Minus => Some(UnaryOperator::Negate),
            TokenKind::Bang => Some(UnaryOperator::Not),
            TokenKind::Move => Some(UnaryOperator::Move),
            TokenKind::Amp => {
                // `&e as T`: a reference expression
                self.advance();
                let operand = self.parse_unary();
                self.expect(&TokenKind::Keyword(Keyword::As), "reference expression");
                let ty = self.parse_type_annotation();
                let span = start.to(ty.span);
                return self.make_expression(span, ExpressionKind::Reference { operand, ty });
            }
            _ => None,
        };
        let Some(operator) = operator else {
            return self.parse_postfix();
        };
        let op_token = self.current_kind().clone();
        self.advance();
        if *self.current_kind() == op_token && !matches!(operator, UnaryOperator::Move) {
            let span = start.to(self.current_span());
            self.report(DiagnosticKind::JuxtaposedUnaryOperators, span);
        }
        let operand = self.parse_unary();
        let span = start.to(operand.span);
        self.make_expression(span, ExpressionKind::Unary { operator, operand })
    }

    fn parse_postfix(&mut self) -> Rc<Expression> {
        let mut expression = self.parse_primary();
        loop {
            match self.current_kind() {
                TokenKind::Dot | TokenKind::QuestionDot => {
                    let optional = matches!(self.current_kind(), TokenKind::QuestionDot);
                    self.advance();
                    let (name, name_span) = self.expect_identifier("member access");
                    let span = expression.span.to(name_span);
                    expression = self.make_expression(
                        span,
                        ExpressionKind::Member {
                            target: expression,
                            optional,
                            name,
                            name_span,
                        },
                    );
                }
                TokenKind::LeftParen => {
                    self.advance();
                    let arguments = self.parse_arguments();
                    let end = self.expect(&TokenKind::RightParen, "invocation");
                    let span = expression.span.to(end);
                    expression = self.make_expression(
                        span,
                        ExpressionKind::Invocation {
                            invoked: expression,
                            arguments,
                        },
                    );
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression();
                    let end = self.expect(&TokenKind::RightBracket, "index expression");
                    let span = expression.span.to(end);
                    expression = self.make_expression(
                        span,
                        ExpressionKind::Index {
                            target: expression,
                            index,
                        },
                    );
                }
                _ => return expression,
            }
        }
    }

    fn parse_arguments(&mut self) -> SmallVec<[Argument; 4]> {
        let mut arguments = SmallVec::new();
        while !matches!(self.current_kind(), TokenKind::RightParen | TokenKind::Eof) {
            let start = self.current_span();
            // `label:` lookahead; keywords like `from` are valid labels
            let label = match (Self::label_text(self.current_kind()), self.tokens.get(self.index + 1)) {
                (
                    Some(label),
                    Some(Token {
                        kind: TokenKind::Colon,
                        ..
                    }),
                ) => {
                    self.advance();
                    self.advance();
                    Some(label)
                }
                _ => None,
            };
            let value = self.parse_expression();
            arguments.push(Argument {
                label,
                span: start.to(value.span),
                value,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        arguments
    }

    fn parse_primary(&mut self) -> Rc<Expression> {
        let start = self.current_span();
        match self.current_kind().clone() {
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                self.make_expression(start, ExpressionKind::BoolLiteral(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                self.make_expression(start, ExpressionKind::BoolLiteral(false))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.advance();
                self.make_expression(start, ExpressionKind::NilLiteral)
            }
            TokenKind::Integer { value, literal_kind } => {
                self.advance();
                self.make_expression(start, ExpressionKind::IntegerLiteral { value, literal_kind })
            }
            TokenKind::FixedPoint {
                integer,
                fractional,
                scale,
            } => {
                self.advance();
                self.make_expression(
                    start,
                    ExpressionKind::FixedPointLiteral {
                        integer,
                        fractional,
                        scale,
                    },
                )
            }
            TokenKind::String(value) => {
                self.advance();
                self.make_expression(start, ExpressionKind::StringLiteral(value))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                self.make_expression(start, ExpressionKind::Identifier(name))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression();
                self.expect(&TokenKind::RightParen, "parenthesized expression");
                inner
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !matches!(self.current_kind(), TokenKind::RightBracket | TokenKind::Eof) {
                    elements.push(self.parse_expression());
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.expect(&TokenKind::RightBracket, "array literal");
                self.make_expression(start.to(end), ExpressionKind::Array(elements))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !matches!(self.current_kind(), TokenKind::RightBrace | TokenKind::Eof) {
                    let key = self.parse_expression();
                    self.expect(&TokenKind::Colon, "dictionary literal");
                    let value = self.parse_expression();
                    entries.push(DictionaryEntry { key, value });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.expect(&TokenKind::RightBrace, "dictionary literal");
                self.make_expression(start.to(end), ExpressionKind::Dictionary(entries))
            }
            TokenKind::Keyword(Keyword::Create) => {
                self.advance();
                let operand = self.parse_postfix();
                if !matches!(operand.kind, ExpressionKind::Invocation { .. }) {
                    self.report(
                        DiagnosticKind::Syntax {
                            message: "`create` requires a constructor invocation".to_string(),
                        },
                        operand.span,
                    );
                }
                let span = start.to(operand.span);
                self.make_expression(span, ExpressionKind::Create(operand))
            }
            TokenKind::Keyword(Keyword::Destroy) => {
                self.advance();
                let operand = self.parse_unary();
                let span = start.to(operand.span);
                self.make_expression(span, ExpressionKind::Destroy(operand))
            }
            TokenKind::Keyword(Keyword::Fun) => {
                self.advance();
                let parameters = self.parse_parameter_list();
                let return_annotation = if self.eat(&TokenKind::Colon) {
                    Some(self.parse_type_annotation())
                } else {
                    None
                };
                let body = self.parse_function_block();
                let span = start.to(self.previous_span());
                let function = FunctionExpression {
                    id: self.node_id(),
                    span,
                    parameters,
                    return_annotation,
                    body,
                };
                self.make_expression(span, ExpressionKind::Function(Rc::new(function)))
            }
            other => {
                self.error_here(format!("expected expression, found {}", other.describe()));
                if !matches!(other, TokenKind::Eof) {
                    self.advance();
                }
                self.make_expression(start, ExpressionKind::NilLiteral)
            }
        }
    }

    // --- types ---

    fn parse_type_annotation(&mut self) -> TypeAnnotation {
        let start = self.current_span();
        let is_resource = self.eat(&TokenKind::At);
        let ty = self.parse_type();
        TypeAnnotation {
            is_resource,
            span: start.to(ty.span),
            ty,
        }
    }

    fn parse_type(&mut self) -> TypeExpression {
        let base = self.parse_type_base();
        self.parse_type_optionals(base)
    }

    fn parse_type_optionals(&mut self, mut ty: TypeExpression) -> TypeExpression {
        loop {
            let wraps = if self.eat(&TokenKind::Question) {
                1
            } else if self.eat(&TokenKind::QuestionQuestion) {
                2
            } else {
                return ty;
            };
            for _ in 0..wraps {
                if matches!(ty.kind, TypeExpressionKind::Reference { .. }) {
                    let span = ty.span.to(self.previous_span());
                    self.report(
                        DiagnosticKind::Syntax {
                            message: "optional reference types are not permitted".to_string(),
                        },
                        span,
                    );
                }
                let span = ty.span.to(self.previous_span());
                ty = TypeExpression {
                    id: self.node_id(),
                    span,
                    kind: TypeExpressionKind::Optional(Box::new(ty)),
                };
            }
        }
    }

    fn parse_type_base(&mut self) -> TypeExpression {
        let start = self.current_span();
        match self.current_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                let named = TypeExpression {
                    id: self.node_id(),
                    span: start,
                    kind: TypeExpressionKind::Named(name),
                };
                if matches!(self.current_kind(), TokenKind::LeftBrace) {
                    return self.parse_restrictions(Some(Box::new(named)), start);
                }
                named
            }
            TokenKind::Keyword(Keyword::Auth) => {
                self.advance();
                self.expect(&TokenKind::Amp, "reference type");
                let referenced = self.parse_type_base();
                TypeExpression {
                    id: self.node_id(),
                    span: start.to(referenced.span),
                    kind: TypeExpressionKind::Reference {
                        authorized: true,
                        referenced: Box::new(referenced),
                    },
                }
            }
            TokenKind::Amp => {
                self.advance();
                let referenced = self.parse_type_base();
                TypeExpression {
                    id: self.node_id(),
                    span: start.to(referenced.span),
                    kind: TypeExpressionKind::Reference {
                        authorized: false,
                        referenced: Box::new(referenced),
                    },
                }
            }
            TokenKind::LeftBracket => {
                self.advance();
                let element = self.parse_type();
                let kind = if self.eat(&TokenKind::Semicolon) {
                    let size = match self.current_kind().clone() {
                        TokenKind::Integer { value, .. } => {
                            self.advance();
                            value.to_u64().unwrap_or_else(|| {
                                self.error_here("array size is too large".to_string());
                                0
                            })
                        }
                        other => {
                            self.error_here(format!("expected array size, found {}", other.describe()));
                            0
                        }
                    };
                    TypeExpressionKind::ConstantSized {
                        element: Box::new(element),
                        size,
                    }
                } else {
                    TypeExpressionKind::VariableSized(Box::new(element))
                };
                let end = self.expect(&TokenKind::RightBracket, "array type");
                TypeExpression {
                    id: self.node_id(),
                    span: start.to(end),
                    kind,
                }
            }
            TokenKind::LeftBrace => {
                self.advance();
                // `{K: V}` is a dictionary; `{I, J}` a base-less restriction
                if let TokenKind::Identifier(first) = self.current_kind().clone()
                    && !matches!(
                        self.tokens.get(self.index + 1).map(|t| &t.kind),
                        Some(TokenKind::Colon)
                    )
                {
                    let first_span = self.current_span();
                    self.advance();
                    return self.parse_restriction_tail(
                        None,
                        smallvec::smallvec![NominalType {
                            name: first,
                            span: first_span
                        }],
                        start,
                    );
                }
                let key = self.parse_type();
                self.expect(&TokenKind::Colon, "dictionary type");
                let value = self.parse_type();
                let end = self.expect(&TokenKind::RightBrace, "dictionary type");
                TypeExpression {
                    id: self.node_id(),
                    span: start.to(end),
                    kind: TypeExpressionKind::Dictionary {
                        key: Box::new(key),
                        value: Box::new(value),
                    },
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                self.expect(&TokenKind::LeftParen, "function type");
                let mut parameters = Vec::new();
                while !matches!(self.current_kind(), TokenKind::RightParen | TokenKind::Eof) {
                    parameters.push(self.parse_type_annotation());
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RightParen, "function type");
                self.expect(&TokenKind::Colon, "function type");
                let return_type = self.parse_type_annotation();
                let end = self.expect(&TokenKind::RightParen, "function type");
                TypeExpression {
                    id: self.node_id(),
                    span: start.to(end),
                    kind: TypeExpressionKind::Function {
                        parameters,
                        return_type: Box::new(return_type),
                    },
                }
            }
            other => {
                self.error_here(format!("expected type, found {}", other.describe()));
                if !matches!(other, TokenKind::Eof) {
                    self.advance();
                }
                TypeExpression {
                    id: self.node_id(),
                    span: start,
                    kind: TypeExpressionKind::Named("<error>".to_string()),
                }
            }
        }
    }

    fn parse_restrictions(&mut self, base: Option<Box<TypeExpression>>, start: Span) -> TypeExpression {
        self.expect(&TokenKind::LeftBrace, "restricted type");
        self.parse_restriction_tail(base, SmallVec::new(), start)
    }

    /// Continues a restriction list after `{` (and possibly the first
    /// entry) has been consumed.
    fn parse_restriction_tail(
        &mut self,
        base: Option<Box<TypeExpression>>,
        mut restrictions: SmallVec<[NominalType; 2]>,
        start: Span,
    ) -> TypeExpression {
        loop {
            if matches!(self.current_kind(), TokenKind::RightBrace | TokenKind::Eof) {
                break;
            }
            if !restrictions.is_empty() && !self.eat(&TokenKind::Comma) {
                break;
            }
            if restrictions.is_empty() && matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
            }
            let (name, span) = self.expect_identifier("restricted type");
            restrictions.push(NominalType { name, span });
        }
        let end = self.expect(&TokenKind::RightBrace, "restricted type");
        if restrictions.is_empty() {
            self.report(
                DiagnosticKind::Syntax {
                    message: "restricted types require at least one restriction".to_string(),
                },
                start.to(end),
            );
        }
        TypeExpression {
            id: self.node_id(),
            span: start.to(end),
            kind: TypeExpressionKind::Restricted { base, restrictions },
        }
    }
}
