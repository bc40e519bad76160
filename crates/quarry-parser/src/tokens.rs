use quarry_source::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Identifier; may contain interior dots (`java.lang.String`) and `$`.
    Ident(String),
    /// Raw number text, sign/fraction/exponent/size suffix included.
    /// Conversion and overflow checking happen in the parser, where the
    /// diagnostic can carry the token's span.
    Number(String),
    /// String literal content, escapes already processed.
    Str(String),
    /// A string literal that hit end of input before its closing quote.
    UnterminatedStr(String),
    /// `--name` flag.
    Flag(String),

    Slash,
    Pipe,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,

    Eq,
    EqEq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Tilde,
    EqTilde,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Question,

    Whitespace,
    Unknown(char),
    Eof,
}

impl TokenKind {
    /// Whether this token can end an operand, which is what decides if a
    /// following `+`/`-` starts a signed number or is a binary operator.
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Ident(_)
                | TokenKind::Number(_)
                | TokenKind::Str(_)
                | TokenKind::RParen
                | TokenKind::RBracket
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Number(text) => write!(f, "number '{}'", text),
            TokenKind::Str(_) | TokenKind::UnterminatedStr(_) => write!(f, "string literal"),
            TokenKind::Flag(name) => write!(f, "flag '--{}'", name),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Pipe => write!(f, "'|'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Semicolon => write!(f, "';'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::NotEq => write!(f, "'!='"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::GtEq => write!(f, "'>='"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::LtEq => write!(f, "'<='"),
            TokenKind::Tilde => write!(f, "'~'"),
            TokenKind::EqTilde => write!(f, "'=~'"),
            TokenKind::AndAnd => write!(f, "'&&'"),
            TokenKind::OrOr => write!(f, "'||'"),
            TokenKind::Bang => write!(f, "'!'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Question => write!(f, "'?'"),
            TokenKind::Whitespace => write!(f, "whitespace"),
            TokenKind::Unknown(ch) => write!(f, "unexpected character '{}'", ch),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Token {
        Token { kind, span }
    }

    /// True when `other` starts exactly where this token ends, with no
    /// intervening bytes. Type patterns are glued from adjacent tokens.
    pub fn adjacent_to(&self, other: &Token) -> bool {
        self.span.end() == other.span.start()
    }
}
