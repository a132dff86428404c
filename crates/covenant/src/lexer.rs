//! Hand-written lexer: source text to a token stream with positions.

use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::Zero;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind, IntegerLiteralKind, InvalidNumberLiteralKind},
    position::{Position, Span},
    token::{Keyword, Token, TokenKind},
};

/// Everything the lexer produced for one source.
///
/// Lexing never fails outright: unrecognized input becomes diagnostics and
/// the stream continues, so the parser can still recover and report more.
#[derive(Debug)]
pub(crate) struct LexOutput {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
    /// True when the end of input was reached inside a string literal or
    /// block comment. REPL drivers use this to request more input.
    pub unterminated: bool,
}

pub(crate) fn lex(source: &str) -> LexOutput {
    let mut lexer = Lexer::new(source);
    lexer.run();
    LexOutput {
        tokens: lexer.tokens,
        diagnostics: lexer.diagnostics,
        unterminated: lexer.unterminated,
    }
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    index: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
    unterminated: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            index: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            diagnostics: Vec::new(),
            unterminated: false,
        }
    }

    fn position(&self) -> Position {
        let offset = self
            .chars
            .get(self.index)
            .map_or(self.source.len(), |(offset, _)| *offset);
        Position::new(offset, self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).map(|(_, c)| *c)
    }

    fn peek_second(&self) -> Option<char> {
        self.chars.get(self.index + 1).map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = *self.chars.get(self.index)?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn emit(&mut self, kind: TokenKind, start: Position) {
        let span = Span::new(start, self.position());
        self.tokens.push(Token { kind, span });
    }

    fn report(&mut self, kind: DiagnosticKind, start: Position) {
        let span = Span::new(start, self.position());
        self.diagnostics.push(Diagnostic::new(kind, span));
    }

    fn syntax_error(&mut self, message: impl Into<String>, start: Position) {
        self.report(
            DiagnosticKind::Syntax {
                message: message.into(),
            },
            start,
        );
    }

    fn run(&mut self) {
        loop {
            self.skip_trivia();
            let start = self.position();
            let Some(c) = self.advance() else {
                self.emit(TokenKind::Eof, start);
                return;
            };
            match c {
                c if c.is_alphabetic() || c == '_' => self.scan_identifier(start),
                c if c.is_ascii_digit() => self.scan_number(c, start),
                '"' => self.scan_string(start),
                '+' => self.emit(TokenKind::Plus, start),
                '-' => self.emit(TokenKind::Minus, start),
                '*' => self.emit(TokenKind::Star, start),
                '/' => self.emit(TokenKind::Slash, start),
                '%' => self.emit(TokenKind::Percent, start),
                '@' => self.emit(TokenKind::At, start),
                ':' => self.emit(TokenKind::Colon, start),
                ';' => self.emit(TokenKind::Semicolon, start),
                ',' => self.emit(TokenKind::Comma, start),
                '.' => self.emit(TokenKind::Dot, start),
                '(' => self.emit(TokenKind::LeftParen, start),
                ')' => self.emit(TokenKind::RightParen, start),
                '{' => self.emit(TokenKind::LeftBrace, start),
                '}' => self.emit(TokenKind::RightBrace, start),
                '[' => self.emit(TokenKind::LeftBracket, start),
                ']' => self.emit(TokenKind::RightBracket, start),
                '<' => {
                    if self.advance_if('-') {
                        if self.advance_if('>') {
                            self.emit(TokenKind::Swap, start);
                        } else {
                            self.emit(TokenKind::Move, start);
                        }
                    } else if self.advance_if('=') {
                        self.emit(TokenKind::LessEqual, start);
                    } else {
                        self.emit(TokenKind::Less, start);
                    }
                }
                '>' => {
                    if self.advance_if('=') {
                        self.emit(TokenKind::GreaterEqual, start);
                    } else {
                        self.emit(TokenKind::Greater, start);
                    }
                }
                '=' => {
                    if self.advance_if('=') {
                        self.emit(TokenKind::EqualEqual, start);
                    } else {
                        self.emit(TokenKind::Equal, start);
                    }
                }
                '!' => {
                    if self.advance_if('=') {
                        self.emit(TokenKind::BangEqual, start);
                    } else {
                        self.emit(TokenKind::Bang, start);
                    }
                }
                '&' => {
                    if self.advance_if('&') {
                        self.emit(TokenKind::AmpAmp, start);
                    } else {
                        self.emit(TokenKind::Amp, start);
                    }
                }
                '|' => {
                    if self.advance_if('|') {
                        self.emit(TokenKind::PipePipe, start);
                    } else {
                        self.syntax_error("unexpected character `|`", start);
                    }
                }
                '?' => {
                    if self.advance_if('?') {
                        self.emit(TokenKind::QuestionQuestion, start);
                    } else if self.advance_if('.') {
                        self.emit(TokenKind::QuestionDot, start);
                    } else {
                        self.emit(TokenKind::Question, start);
                    }
                }
                other => {
                    self.syntax_error(format!("unexpected character `{other}`"), start);
                }
            }
        }
    }

    /// Skips whitespace, line comments, and (nested) block comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let start = self.position();
                    self.advance();
                    self.advance();
                    let mut depth = 1usize;
                    loop {
                        match self.peek() {
                            Some('/') if self.peek_second() == Some('*') => {
                                self.advance();
                                self.advance();
                                depth += 1;
                            }
                            Some('*') if self.peek_second() == Some('/') => {
                                self.advance();
                                self.advance();
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                self.unterminated = true;
                                self.syntax_error("unterminated block comment", start);
                                break;
                            }
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_identifier(&mut self, start: Position) {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start.offset..self.position().offset];
        match Keyword::from_str(text) {
            // `as` immediately followed by `?` is the failable cast operator.
            Ok(Keyword::As) if self.peek() == Some('?') => {
                self.advance();
                self.emit(TokenKind::AsQuestion, start);
            }
            Ok(keyword) => self.emit(TokenKind::Keyword(keyword), start),
            Err(_) => self.emit(TokenKind::Identifier(text.to_string()), start),
        }
    }

    fn scan_number(&mut self, first: char, start: Position) {
        if first == '0'
            && let Some(prefix) = self.peek()
            && prefix.is_alphabetic()
        {
            self.advance();
            let digits_start = self.position().offset;
            self.scan_digit_run();
            let digits = &self.source[digits_start..self.position().offset];
            let literal = &self.source[start.offset..self.position().offset];
            let (literal_kind, radix) = match prefix {
                'x' => (IntegerLiteralKind::Hex, 16),
                'o' => (IntegerLiteralKind::Octal, 8),
                'b' => (IntegerLiteralKind::Binary, 2),
                _ => {
                    let literal = literal.to_string();
                    self.report(
                        DiagnosticKind::InvalidIntegerLiteral {
                            literal,
                            literal_kind: IntegerLiteralKind::Unknown,
                            invalid_kind: InvalidNumberLiteralKind::UnknownPrefix,
                        },
                        start,
                    );
                    self.emit(
                        TokenKind::Integer {
                            value: BigInt::zero(),
                            literal_kind: IntegerLiteralKind::Unknown,
                        },
                        start,
                    );
                    return;
                }
            };
            let literal = literal.to_string();
            let value = self.digits_to_int(digits, radix, literal_kind, &literal, start);
            self.emit(TokenKind::Integer { value, literal_kind }, start);
            return;
        }

        // Decimal, possibly the integer part of a fixed-point literal.
        self.scan_digit_run();
        let integer_text = self.source[start.offset..self.position().offset].to_string();

        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            let fractional_start = self.position().offset;
            self.scan_digit_run();
            let fractional_text = self.source[fractional_start..self.position().offset].to_string();
            let literal = self.source[start.offset..self.position().offset].to_string();

            let integer = self.digits_to_int(&integer_text, 10, IntegerLiteralKind::Decimal, &literal, start);
            let fractional = self.digits_to_int(&fractional_text, 10, IntegerLiteralKind::Decimal, &literal, start);
            let scale = fractional_text.chars().filter(char::is_ascii_digit).count() as u32;
            self.emit(
                TokenKind::FixedPoint {
                    integer,
                    fractional,
                    scale,
                },
                start,
            );
        } else {
            let value = self.digits_to_int(&integer_text, 10, IntegerLiteralKind::Decimal, &integer_text, start);
            self.emit(
                TokenKind::Integer {
                    value,
                    literal_kind: IntegerLiteralKind::Decimal,
                },
                start,
            );
        }
    }

    fn scan_digit_run(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Validates underscore placement and digit characters, then parses the
    /// run in the given radix. Reports and recovers to zero on failure.
    fn digits_to_int(
        &mut self,
        digits: &str,
        radix: u32,
        literal_kind: IntegerLiteralKind,
        literal: &str,
        start: Position,
    ) -> BigInt {
        if digits.starts_with('_') {
            self.report(
                DiagnosticKind::InvalidIntegerLiteral {
                    literal: literal.to_string(),
                    literal_kind,
                    invalid_kind: InvalidNumberLiteralKind::LeadingUnderscore,
                },
                start,
            );
            return BigInt::zero();
        }
        if digits.ends_with('_') {
            self.report(
                DiagnosticKind::InvalidIntegerLiteral {
                    literal: literal.to_string(),
                    literal_kind,
                    invalid_kind: InvalidNumberLiteralKind::TrailingUnderscore,
                },
                start,
            );
            return BigInt::zero();
        }
        let stripped: String = digits.chars().filter(|c| *c != '_').collect();
        if stripped.is_empty() {
            self.syntax_error(format!("missing digits in integer literal `{literal}`"), start);
            return BigInt::zero();
        }
        match BigInt::parse_bytes(stripped.as_bytes(), radix) {
            Some(value) => value,
            None => {
                self.syntax_error(format!("invalid digit in {literal_kind} integer literal `{literal}`"), start);
                BigInt::zero()
            }
        }
    }

    fn scan_string(&mut self, start: Position) {
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    self.unterminated = true;
                    self.syntax_error("unterminated string literal", start);
                    break;
                }
                Some('\n') => {
                    self.syntax_error("unterminated string literal", start);
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    self.scan_escape(&mut value, start);
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        self.emit(TokenKind::String(value), start);
    }

    fn scan_escape(&mut self, value: &mut String, start: Position) {
        match self.advance() {
            Some('0') => value.push('\0'),
            Some('n') => value.push('\n'),
            Some('r') => value.push('\r'),
            Some('t') => value.push('\t'),
            Some('"') => value.push('"'),
            Some('\'') => value.push('\''),
            Some('\\') => value.push('\\'),
            Some('u') => {
                if !self.advance_if('{') {
                    self.syntax_error("expected `{` after `\\u`", start);
                    return;
                }
                let hex_start = self.position().offset;
                while let Some(c) = self.peek() {
                    if c.is_ascii_hexdigit() {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let hex = &self.source[hex_start..self.position().offset];
                if !self.advance_if('}') {
                    self.syntax_error("unterminated unicode escape", start);
                    return;
                }
                match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => value.push(c),
                    None => self.syntax_error(format!("invalid unicode code point `\\u{{{hex}}}`"), start),
                }
            }
            Some(other) => {
                self.syntax_error(format!("invalid escape sequence `\\{other}`"), start);
            }
            None => {
                self.unterminated = true;
                self.syntax_error("unterminated string literal", start);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let out = lex(source);
        assert!(out.diagnostics.is_empty(), "unexpected diagnostics: {:?}", out.diagnostics);
        out.tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("let xs resource"),
            vec![
                TokenKind::Keyword(Keyword::Let),
                TokenKind::Identifier("xs".to_string()),
                TokenKind::Keyword(Keyword::Resource),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn transfer_operators() {
        assert_eq!(
            kinds("= <- <-> <= <"),
            vec![
                TokenKind::Equal,
                TokenKind::Move,
                TokenKind::Swap,
                TokenKind::LessEqual,
                TokenKind::Less,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn failable_cast_is_one_token() {
        let k = kinds("x as? Int");
        assert!(k.contains(&TokenKind::AsQuestion));
        // with a space in between, `as` stays a plain keyword
        let k = kinds("x as ? Int");
        assert!(k.contains(&TokenKind::Keyword(Keyword::As)));
        assert!(k.contains(&TokenKind::Question));
    }

    #[test]
    fn integer_radices() {
        let out = lex("10 0x1F 0o17 0b1010 1_000_000");
        assert!(out.diagnostics.is_empty());
        let values: Vec<BigInt> = out
            .tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Integer { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                BigInt::from(10),
                BigInt::from(31),
                BigInt::from(15),
                BigInt::from(10),
                BigInt::from(1_000_000),
            ]
        );
    }

    #[test]
    fn invalid_underscores_are_structured_errors() {
        let out = lex("0x_1");
        assert_eq!(
            out.diagnostics[0].kind,
            DiagnosticKind::InvalidIntegerLiteral {
                literal: "0x_1".to_string(),
                literal_kind: IntegerLiteralKind::Hex,
                invalid_kind: InvalidNumberLiteralKind::LeadingUnderscore,
            }
        );

        let out = lex("0b10_");
        assert_eq!(
            out.diagnostics[0].kind,
            DiagnosticKind::InvalidIntegerLiteral {
                literal: "0b10_".to_string(),
                literal_kind: IntegerLiteralKind::Binary,
                invalid_kind: InvalidNumberLiteralKind::TrailingUnderscore,
            }
        );

        let out = lex("0z123");
        assert_eq!(
            out.diagnostics[0].kind,
            DiagnosticKind::InvalidIntegerLiteral {
                literal: "0z123".to_string(),
                literal_kind: IntegerLiteralKind::Unknown,
                invalid_kind: InvalidNumberLiteralKind::UnknownPrefix,
            }
        );
    }

    #[test]
    fn fixed_point_literal_keeps_scale() {
        let out = lex("3.141_5");
        match &out.tokens[0].kind {
            TokenKind::FixedPoint {
                integer,
                fractional,
                scale,
            } => {
                assert_eq!(integer, &BigInt::from(3));
                assert_eq!(fractional, &BigInt::from(1415));
                assert_eq!(*scale, 4);
            }
            other => panic!("expected fixed-point literal, got {other:?}"),
        }
    }

    #[test]
    fn string_escapes() {
        let out = lex(r#""caf\u{E9}\n""#);
        assert_eq!(out.tokens[0].kind, TokenKind::String("café\n".to_string()));
    }

    #[test]
    fn unterminated_string_sets_flag() {
        let out = lex("\"abc");
        assert!(out.unterminated);
        assert!(!out.diagnostics.is_empty());
    }

    #[test]
    fn positions_track_lines() {
        let out = lex("let\nx");
        assert_eq!(out.tokens[0].span.start.line, 1);
        assert_eq!(out.tokens[1].span.start.line, 2);
        assert_eq!(out.tokens[1].span.start.column, 1);
    }
}
