use crate::tokens::{Token, TokenKind};
use quarry_source::Span;

/// Tokenizes a query in a single pass, keeping whitespace tokens.
///
/// Total on arbitrary input: bytes that fit no token become `Unknown`
/// tokens and an unterminated string becomes `UnterminatedStr`; the
/// lexer itself never fails. The stream always ends with `Eof`.
pub fn lex_with_whitespace(source: &str) -> Vec<Token> {
    Lexer::new(source).run()
}

/// Tokenizes a query, dropping whitespace. This is the stream the parser
/// consumes; completion wants `lex_with_whitespace` instead.
pub fn lex(source: &str) -> Vec<Token> {
    lex_with_whitespace(source)
        .into_iter()
        .filter(|token| token.kind != TokenKind::Whitespace)
        .collect()
}

struct Lexer<'s> {
    source: &'s str,
    chars: Vec<(usize, char)>,
    pos: usize,
    /// Kind of the last non-whitespace token, used to decide whether a
    /// `+`/`-` ahead of digits is a sign or a binary operator.
    last_significant: Option<TokenKind>,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Lexer<'s> {
        Lexer {
            source,
            chars: source.char_indices().collect(),
            pos: 0,
            last_significant: None,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, ch)| *ch)
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, ch)| *ch)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(idx, _)| *idx)
            .unwrap_or_else(|| self.source.len())
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        Some(ch)
    }

    fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while self.current().is_some() {
            let token = self.next_token();
            if token.kind != TokenKind::Whitespace {
                self.last_significant = Some(token.kind.clone());
            }
            tokens.push(token);
        }

        let end = self.source.len();
        tokens.push(Token::new(TokenKind::Eof, Span::new(end, end)));
        tokens
    }

    fn next_token(&mut self) -> Token {
        let start = self.offset();
        let ch = match self.current() {
            Some(ch) => ch,
            None => return Token::new(TokenKind::Eof, Span::new(start, start)),
        };

        if ch.is_whitespace() {
            while matches!(self.current(), Some(c) if c.is_whitespace()) {
                self.advance();
            }
            return self.token(TokenKind::Whitespace, start);
        }

        if ch.is_ascii_digit() {
            return self.lex_number(start);
        }

        if (ch == '+' || ch == '-') && self.starts_signed_number() {
            return self.lex_number(start);
        }

        if is_ident_start(ch) {
            return self.lex_ident(start);
        }

        if ch == '"' || ch == '\'' {
            return self.lex_string(start, ch);
        }

        if ch == '-' && self.peek(1) == Some('-') {
            return self.lex_flag(start);
        }

        self.advance();
        let kind = match ch {
            '/' => TokenKind::Slash,
            '|' => {
                if self.current() == Some('|') {
                    self.advance();
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            '=' => match self.current() {
                Some('=') => {
                    self.advance();
                    TokenKind::EqEq
                }
                Some('~') => {
                    self.advance();
                    TokenKind::EqTilde
                }
                _ => TokenKind::Eq,
            },
            '!' => {
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '>' => {
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '<' => {
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '~' => TokenKind::Tilde,
            '&' => {
                if self.current() == Some('&') {
                    self.advance();
                    TokenKind::AndAnd
                } else {
                    TokenKind::Unknown('&')
                }
            }
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '?' => TokenKind::Question,
            other => TokenKind::Unknown(other),
        };

        self.token(kind, start)
    }

    /// A sign introduces a number only when digits follow and the last
    /// token could not have ended an operand; `shallow - 5` subtracts,
    /// `top(-5)` carries a signed literal.
    fn starts_signed_number(&self) -> bool {
        if !matches!(self.peek(1), Some(c) if c.is_ascii_digit()) {
            return false;
        }
        !matches!(&self.last_significant, Some(kind) if kind.ends_operand())
    }

    fn lex_number(&mut self, start: usize) -> Token {
        if matches!(self.current(), Some('+') | Some('-')) {
            self.advance();
        }

        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        // fraction, but only when a digit follows the dot: `1.5` is one
        // number, `top(1, x)` and `1.as` are not
        if self.current() == Some('.') && matches!(self.peek(1), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        // exponent and size suffix both start alphabetic; consume the run
        // and let the parser validate it against the token's span
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() {
                let at_exponent_sign = (c == 'e' || c == 'E')
                    && matches!(self.peek(1), Some('+') | Some('-'))
                    && matches!(self.peek(2), Some(d) if d.is_ascii_digit());
                self.advance();
                if at_exponent_sign {
                    self.advance();
                }
            } else {
                break;
            }
        }

        let end = self.offset();
        let text = self.source[start..end].to_string();
        Token::new(TokenKind::Number(text), Span::new(start, end))
    }

    fn lex_ident(&mut self, start: usize) -> Token {
        self.advance();
        loop {
            match self.current() {
                Some(c) if is_ident_continue(c) => {
                    self.advance();
                }
                // interior dot continues a dotted name only when an
                // identifier character follows: `java.lang.String`
                Some('.') if matches!(self.peek(1), Some(c) if is_ident_start(c)) => {
                    self.advance();
                }
                _ => break,
            }
        }

        let end = self.offset();
        let text = self.source[start..end].to_string();
        Token::new(TokenKind::Ident(text), Span::new(start, end))
    }

    fn lex_string(&mut self, start: usize, quote: char) -> Token {
        self.advance();
        let mut content = String::new();

        loop {
            match self.advance() {
                None => {
                    let end = self.offset();
                    return Token::new(TokenKind::UnterminatedStr(content), Span::new(start, end));
                }
                Some(ch) if ch == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => content.push('\n'),
                    Some('r') => content.push('\r'),
                    Some('t') => content.push('\t'),
                    Some('\\') => content.push('\\'),
                    Some('"') => content.push('"'),
                    Some('\'') => content.push('\''),
                    // unrecognized escapes keep their backslash, which
                    // is what regex literals like "java\.lang\..*" need
                    Some(other) => {
                        content.push('\\');
                        content.push(other);
                    }
                    None => {
                        let end = self.offset();
                        return Token::new(
                            TokenKind::UnterminatedStr(content),
                            Span::new(start, end),
                        );
                    }
                },
                Some(ch) => content.push(ch),
            }
        }

        self.token(TokenKind::Str(content), start)
    }

    fn lex_flag(&mut self, start: usize) -> Token {
        self.advance();
        self.advance();
        let name_start = self.offset();
        while matches!(self.current(), Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            self.advance();
        }
        let end = self.offset();
        let name = self.source[name_start..end].to_string();
        Token::new(TokenKind::Flag(name), Span::new(start, end))
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token::new(kind, Span::new(start, self.offset()))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn dotted_names_lex_as_one_identifier() {
        assert_eq!(
            kinds("objects/java.lang.String"),
            vec![
                TokenKind::Ident("objects".into()),
                TokenKind::Slash,
                TokenKind::Ident("java.lang.String".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn every_token_carries_byte_offsets() {
        let tokens = lex_with_whitespace("objects | top(5)");
        let spans: Vec<(usize, usize)> = tokens
            .iter()
            .map(|t| (t.span.start(), t.span.end()))
            .collect();

        assert_eq!(
            spans,
            vec![
                (0, 7),
                (7, 8),
                (8, 9),
                (9, 10),
                (10, 13),
                (13, 14),
                (14, 15),
                (15, 16),
                (16, 16),
            ]
        );
    }

    #[test]
    fn two_char_operators_lex_before_single() {
        assert_eq!(
            kinds("a >= 1 && b != 2 || c =~ d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::GtEq,
                TokenKind::Number("1".into()),
                TokenKind::AndAnd,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Number("2".into()),
                TokenKind::OrOr,
                TokenKind::Ident("c".into()),
                TokenKind::EqTilde,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn size_suffix_stays_inside_the_number_token() {
        assert_eq!(
            kinds("shallow > 10KB"),
            vec![
                TokenKind::Ident("shallow".into()),
                TokenKind::Gt,
                TokenKind::Number("10KB".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn minus_after_operand_is_subtraction() {
        assert_eq!(
            kinds("shallow -5"),
            vec![
                TokenKind::Ident("shallow".into()),
                TokenKind::Minus,
                TokenKind::Number("5".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("top(-5)"),
            vec![
                TokenKind::Ident("top".into()),
                TokenKind::LParen,
                TokenKind::Number("-5".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_are_processed() {
        assert_eq!(
            kinds(r#""a\tb\"c" 'd\'e'"#),
            vec![
                TokenKind::Str("a\tb\"c".into()),
                TokenKind::Str("d'e".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_does_not_panic() {
        assert_eq!(
            kinds("\"abc"),
            vec![TokenKind::UnterminatedStr("abc".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn flags_lex_with_their_name() {
        assert_eq!(
            kinds("objects --no-stream"),
            vec![
                TokenKind::Ident("objects".into()),
                TokenKind::Flag("no-stream".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn arbitrary_bytes_become_unknown_tokens() {
        assert_eq!(
            kinds("objects # %"),
            vec![
                TokenKind::Ident("objects".into()),
                TokenKind::Unknown('#'),
                TokenKind::Unknown('%'),
                TokenKind::Eof,
            ]
        );
    }
}
