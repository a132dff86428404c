//! Token stream produced by the lexer.

use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{diagnostics::IntegerLiteralKind, position::Span};

/// Reserved words of the language.
///
/// `as?` and `pub(set)` are not listed: the first is lexed as its own
/// token ([`TokenKind::AsQuestion`]), the second is composed by the
/// parser from `pub` `(` `set` `)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    Let,
    Var,
    Fun,
    If,
    Else,
    While,
    Return,
    Break,
    Continue,
    True,
    False,
    Nil,
    Pre,
    Post,
    Struct,
    Resource,
    Event,
    Contract,
    Interface,
    Init,
    Destroy,
    Create,
    Emit,
    As,
    Auth,
    Transaction,
    Prepare,
    Execute,
    Import,
    From,
    Pub,
    Priv,
}

/// One lexed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// The different kinds of token the lexer recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    Identifier(String),
    Keyword(Keyword),
    /// An integer literal in any of the four radices. The radix is kept
    /// because import address literals and error messages need it.
    Integer {
        value: BigInt,
        literal_kind: IntegerLiteralKind,
    },
    /// A fixed-point literal, stored exactly as written: integer part,
    /// fractional part, and the number of fractional digits.
    FixedPoint {
        integer: BigInt,
        fractional: BigInt,
        scale: u32,
    },
    String(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
    Bang,
    AmpAmp,
    PipePipe,
    /// `&`: binary concatenation, or a reference expression prefix.
    Amp,
    QuestionQuestion,
    Question,
    QuestionDot,
    /// `=`, the copy transfer operator.
    Equal,
    /// `<-`, the move transfer operator.
    Move,
    /// `<->`, the swap operator.
    Swap,
    /// The failable cast `as?`.
    AsQuestion,
    At,
    Colon,
    Semicolon,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Eof,
}

impl TokenKind {
    /// Short human name used in "expected X, found Y" messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Identifier(name) => format!("identifier `{name}`"),
            Self::Keyword(kw) => format!("keyword `{kw}`"),
            Self::Integer { value, .. } => format!("integer `{value}`"),
            Self::FixedPoint { .. } => "fixed-point literal".to_string(),
            Self::String(_) => "string literal".to_string(),
            Self::Eof => "end of input".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::EqualEqual => "==",
            Self::BangEqual => "!=",
            Self::Bang => "!",
            Self::AmpAmp => "&&",
            Self::PipePipe => "||",
            Self::Amp => "&",
            Self::QuestionQuestion => "??",
            Self::Question => "?",
            Self::QuestionDot => "?.",
            Self::Equal => "=",
            Self::Move => "<-",
            Self::Swap => "<->",
            Self::AsQuestion => "as?",
            Self::At => "@",
            Self::Colon => ":",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::LeftParen => "(",
            Self::RightParen => ")",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
            Self::LeftBracket => "[",
            Self::RightBracket => "]",
            _ => unreachable!("symbol() is only called for punctuation"),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}
