use crate::ast::*;
use crate::lex::lex;
use crate::tokens::{Token, TokenKind};
use lazy_static::lazy_static;
use quarry_errors::QueryError;
use quarry_protocol::Value;
use quarry_source::Span;
use std::collections::HashMap;

lazy_static! {
    /// Known scalar functions and their accepted argument counts.
    static ref FUNCTIONS: HashMap<&'static str, (usize, usize)> = {
        let mut map = HashMap::new();
        map.insert("upper", (1, 1));
        map.insert("lower", (1, 1));
        map.insert("length", (1, 1));
        map.insert("substring", (2, 3));
        map.insert("trim", (1, 1));
        map.insert("replace", (3, 3));
        map.insert("abs", (1, 1));
        map.insert("round", (1, 1));
        map.insert("floor", (1, 1));
        map.insert("ceil", (1, 1));
        map.insert("coalesce", (1, usize::MAX));
        map.insert("if", (3, 3));
        map.insert("contains", (2, 2));
        map.insert("startsWith", (2, 2));
        map.insert("endsWith", (2, 2));
        map
    };
}

const KEYWORDS: &[&str] = &[
    "agg",
    "value",
    "sortBy",
    "by",
    "asc",
    "detector",
    "filter",
    "threshold",
    "minSize",
    "duration",
    "format",
    "key",
    "decoratorKey",
    "fields",
];

/// Parses a query. Errors carry the byte offset of the offending token;
/// malformed input is rejected, never repaired.
pub fn parse_query(source: &str) -> Result<Query, QueryError> {
    let query = Parser::new(source).parse_query()?;
    log::trace!(
        "parsed query: root={} ops={}",
        query.root.name(),
        query.pipeline.len()
    );
    Ok(query)
}

/// Parses a standalone boolean expression, the form `filter=` keyword
/// values and leak-filter definitions take.
pub fn parse_predicate(source: &str) -> Result<BoolExpr, QueryError> {
    let mut parser = Parser::new(source);
    let expr = parser.parse_bool_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Parser<'s> {
        Parser {
            source,
            tokens: lex(source),
            pos: 0,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, QueryError> {
        if self.at(&kind) {
            Ok(self.next())
        } else {
            let found = self.peek();
            Err(QueryError::parse_error(
                format!("expected {}, found {}", kind, found.kind),
                found.span,
            ))
        }
    }

    fn expect_eof(&mut self) -> Result<(), QueryError> {
        if self.at(&TokenKind::Eof) {
            Ok(())
        } else {
            let found = self.peek();
            Err(QueryError::parse_error(
                format!("unexpected {} after end of query", found.kind),
                found.span,
            ))
        }
    }

    fn peek_ident(&self) -> Option<&str> {
        match &self.peek().kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    // ---- query ----------------------------------------------------------

    fn parse_query(&mut self) -> Result<Query, QueryError> {
        // a bare leading checkLeaks(...) runs over all objects
        if self.peek_ident() == Some("checkLeaks") && self.peek_at(1).kind == TokenKind::LParen {
            let op = self.parse_pipe_op()?;
            let mut pipeline = vec![op];
            while self.eat(&TokenKind::Pipe) {
                pipeline.push(self.parse_pipe_op()?);
            }
            let force_streaming = self.parse_flags()?;
            self.expect_eof()?;
            return Ok(Query {
                root: SourceRoot::Objects,
                selector: TypeSelector::all(),
                predicates: Vec::new(),
                pipeline,
                force_streaming,
            });
        }

        let root_token = self.next();
        let root = match &root_token.kind {
            TokenKind::Ident(name) => SourceRoot::from_name(name).ok_or_else(|| {
                QueryError::parse_error(format!("unknown query root '{}'", name), root_token.span)
            })?,
            other => {
                return Err(QueryError::parse_error(
                    format!("expected query root, found {}", other),
                    root_token.span,
                ))
            }
        };

        let selector = if self.eat(&TokenKind::Slash) {
            self.parse_type_spec()?
        } else {
            TypeSelector::all()
        };

        let mut predicates = Vec::new();
        while self.eat(&TokenKind::LBracket) {
            predicates.push(self.parse_bool_expr()?);
            self.expect(TokenKind::RBracket)?;
        }

        let mut pipeline = Vec::new();
        while self.eat(&TokenKind::Pipe) {
            pipeline.push(self.parse_pipe_op()?);
        }

        let force_streaming = self.parse_flags()?;
        self.expect_eof()?;

        Ok(Query {
            root,
            selector,
            predicates,
            pipeline,
            force_streaming,
        })
    }

    fn parse_flags(&mut self) -> Result<Option<bool>, QueryError> {
        let mut force = None;
        while let TokenKind::Flag(name) = &self.peek().kind {
            let name = name.clone();
            let span = self.peek().span;
            self.next();
            match name.as_str() {
                "stream" => force = Some(true),
                "no-stream" => force = Some(false),
                other => {
                    return Err(QueryError::argument_error(
                        format!("unknown flag '--{}'", other),
                        span,
                    ))
                }
            }
        }
        Ok(force)
    }

    // ---- type selector --------------------------------------------------

    fn parse_type_spec(&mut self) -> Result<TypeSelector, QueryError> {
        let include_subtypes = if self.peek_ident() == Some("instanceof") {
            self.next();
            true
        } else {
            false
        };

        let mut patterns = Vec::new();
        if self.at(&TokenKind::LParen) {
            self.next();
            patterns.push(self.parse_type_pattern()?);
            while self.eat(&TokenKind::Pipe) {
                patterns.push(self.parse_type_pattern()?);
            }
            self.expect(TokenKind::RParen)?;
        } else {
            patterns.push(self.parse_type_pattern()?);
        }

        Ok(TypeSelector {
            patterns,
            include_subtypes,
        })
    }

    /// A type pattern is a run of byte-adjacent tokens: dotted names,
    /// glob characters, `[]` array suffixes or a raw JVM descriptor. The
    /// run's source slice is translated to descriptor form.
    fn parse_type_pattern(&mut self) -> Result<TypePattern, QueryError> {
        let first = self.peek().clone();
        let descriptor = match first.kind {
            TokenKind::Ident(_) | TokenKind::Star | TokenKind::Question => false,
            TokenKind::LBracket => true,
            ref other => {
                return Err(QueryError::parse_error(
                    format!("expected type name, found {}", other),
                    first.span,
                ))
            }
        };

        self.next();
        let mut last = first.clone();
        loop {
            let token = self.peek().clone();
            if !last.adjacent_to(&token) {
                break;
            }
            match token.kind {
                TokenKind::Ident(_)
                | TokenKind::Dot
                | TokenKind::Star
                | TokenKind::Question
                | TokenKind::Semicolon => {
                    self.next();
                    last = token;
                }
                // a leading '[' run is a descriptor; elsewhere '[' only
                // joins the pattern as a complete `[]` suffix, otherwise
                // it opens the predicate block
                TokenKind::LBracket => {
                    if descriptor && matches!(last.kind, TokenKind::LBracket) {
                        self.next();
                        last = token;
                    } else if self.peek_at(1).kind == TokenKind::RBracket
                        && token.adjacent_to(self.peek_at(1))
                    {
                        self.next();
                        last = self.next();
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }

        let text = &self.source[first.span.start()..last.span.end()];
        Ok(translate_type_pattern(text))
    }

    // ---- boolean expressions --------------------------------------------

    fn parse_bool_expr(&mut self) -> Result<BoolExpr, QueryError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<BoolExpr, QueryError> {
        let mut left = self.parse_and()?;
        loop {
            if self.peek_ident() == Some("or") {
                self.next();
            } else if !self.eat(&TokenKind::OrOr) {
                break;
            }
            let right = self.parse_and()?;
            left = BoolExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<BoolExpr, QueryError> {
        let mut left = self.parse_not()?;
        loop {
            if self.peek_ident() == Some("and") {
                self.next();
            } else if !self.eat(&TokenKind::AndAnd) {
                break;
            }
            let right = self.parse_not()?;
            left = BoolExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<BoolExpr, QueryError> {
        if self.peek_ident() == Some("not") || self.at(&TokenKind::Bang) {
            self.next();
            let inner = self.parse_not()?;
            return Ok(BoolExpr::Not(Box::new(inner)));
        }
        self.parse_bool_primary()
    }

    fn parse_bool_primary(&mut self) -> Result<BoolExpr, QueryError> {
        // quantified comparison: all(x > 1), none(x > 1), any(x > 1)
        if let Some(word) = self.peek_ident() {
            let quantifier = match word {
                "any" => Some(Quantifier::Any),
                "all" => Some(Quantifier::All),
                "none" => Some(Quantifier::None),
                _ => None,
            };
            if let Some(quantifier) = quantifier {
                if self.peek_at(1).kind == TokenKind::LParen {
                    let span = self.peek().span;
                    self.next();
                    self.next();
                    let inner = self.parse_bool_expr()?;
                    self.expect(TokenKind::RParen)?;
                    return match inner {
                        BoolExpr::Compare {
                            left, op, right, ..
                        } => Ok(BoolExpr::Compare {
                            quantifier,
                            left,
                            op,
                            right,
                        }),
                        _ => Err(QueryError::argument_error(
                            "quantifiers take a single comparison",
                            span,
                        )),
                    };
                }
            }
        }

        // '(' is ambiguous: '(a > 1) and ...' vs '(a + b) > 1'. Try the
        // boolean reading first and fall back to a parenthesized operand.
        if self.at(&TokenKind::LParen) {
            let checkpoint = self.pos;
            self.next();
            if let Ok(inner) = self.parse_bool_expr() {
                if self.eat(&TokenKind::RParen) {
                    return Ok(inner);
                }
            }
            self.pos = checkpoint;
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<BoolExpr, QueryError> {
        let left = self.parse_value_expr()?;

        let op = match self.peek().kind {
            TokenKind::Eq | TokenKind::EqEq => CompareOp::Eq,
            TokenKind::NotEq => CompareOp::NotEq,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::GtEq => CompareOp::GtEq,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::LtEq => CompareOp::LtEq,
            TokenKind::Tilde | TokenKind::EqTilde => CompareOp::Matches,
            ref other => {
                let span = self.peek().span;
                return Err(QueryError::parse_error(
                    format!("expected comparison operator, found {}", other),
                    span,
                ));
            }
        };
        self.next();

        let right = self.parse_value_expr()?;

        Ok(BoolExpr::Compare {
            quantifier: Quantifier::Any,
            left,
            op,
            right,
        })
    }

    // ---- value expressions ----------------------------------------------

    fn parse_value_expr(&mut self) -> Result<ValueExpr, QueryError> {
        self.parse_additive()
    }

    fn parse_additive(&mut self) -> Result<ValueExpr, QueryError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.next();
            let right = self.parse_multiplicative()?;
            left = ValueExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<ValueExpr, QueryError> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                // a slash that survived field-path gluing is division
                TokenKind::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.next();
            let right = self.parse_primary()?;
            left = ValueExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<ValueExpr, QueryError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(ref text) => {
                self.next();
                let value = parse_number_literal(text, token.span)?;
                Ok(ValueExpr::Literal(value))
            }
            TokenKind::Str(ref content) => {
                self.next();
                self.make_string_literal(content, token.span)
            }
            TokenKind::UnterminatedStr(_) => Err(QueryError::parse_error(
                "unterminated string literal",
                token.span,
            )),
            TokenKind::Ident(ref name) => match name.as_str() {
                "true" => {
                    self.next();
                    Ok(ValueExpr::Literal(Value::Boolean(true)))
                }
                "false" => {
                    self.next();
                    Ok(ValueExpr::Literal(Value::Boolean(false)))
                }
                "null" => {
                    self.next();
                    Ok(ValueExpr::Literal(Value::Nothing))
                }
                _ if self.peek_at(1).kind == TokenKind::LParen => self.parse_call(),
                _ => {
                    let first = self.next();
                    Ok(ValueExpr::Field(self.parse_field_path_from(first)))
                }
            },
            TokenKind::LParen => {
                self.next();
                let inner = self.parse_value_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            ref other => Err(QueryError::parse_error(
                format!("expected expression, found {}", other),
                token.span,
            )),
        }
    }

    fn parse_call(&mut self) -> Result<ValueExpr, QueryError> {
        let name_token = self.next();
        let name = match &name_token.kind {
            TokenKind::Ident(name) => name.clone(),
            _ => unreachable!("parse_call entered on a non-identifier"),
        };

        let (min_args, max_args) = match FUNCTIONS.get(name.as_str()) {
            Some(range) => *range,
            None => {
                return Err(QueryError::argument_error(
                    format!("unknown function '{}'", name),
                    name_token.span,
                ))
            }
        };

        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            args.push(self.parse_function_arg(&name, 0)?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_function_arg(&name, args.len())?);
            }
        }
        self.expect(TokenKind::RParen)?;

        if args.len() < min_args || args.len() > max_args {
            return Err(QueryError::argument_error(
                format!("wrong number of arguments to '{}'", name),
                name_token.span,
            ));
        }

        Ok(ValueExpr::Call { name, args })
    }

    /// The condition of `if(cond, then, else)` may be a comparison; it
    /// may also be any value, judged by truthiness. Try the boolean
    /// reading first and fall back to a plain expression.
    fn parse_function_arg(&mut self, function: &str, index: usize) -> Result<ValueExpr, QueryError> {
        if function == "if" && index == 0 {
            let checkpoint = self.pos;
            if let Ok(cond) = self.parse_bool_expr() {
                if self.at(&TokenKind::Comma) || self.at(&TokenKind::RParen) {
                    return Ok(ValueExpr::Cond(Box::new(cond)));
                }
            }
            self.pos = checkpoint;
        }
        self.parse_value_expr()
    }

    fn parse_field_path_from(&mut self, first: Token) -> Vec<String> {
        let mut segments: Vec<String> = match &first.kind {
            TokenKind::Ident(name) => name.split('.').map(|s| s.to_string()).collect(),
            _ => unreachable!("field paths start at an identifier"),
        };

        let mut last = first;
        loop {
            let slash = self.peek().clone();
            if slash.kind != TokenKind::Slash || !last.adjacent_to(&slash) {
                break;
            }
            let ident = self.peek_at(1).clone();
            match &ident.kind {
                TokenKind::Ident(name) if slash.adjacent_to(&ident) => {
                    self.next();
                    self.next();
                    segments.extend(name.split('.').map(|s| s.to_string()));
                    last = ident;
                }
                _ => break,
            }
        }

        segments
    }

    fn make_string_literal(&self, content: &str, span: Span) -> Result<ValueExpr, QueryError> {
        if !content.contains("${") {
            return Ok(ValueExpr::Literal(Value::string(content)));
        }

        let mut parts = Vec::new();
        let mut rest = content;
        while let Some(open) = rest.find("${") {
            if open > 0 {
                parts.push(TemplatePart::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after.find('}').ok_or_else(|| {
                QueryError::parse_error("unterminated '${' in string template", span)
            })?;
            let inner_source = &after[..close];
            let mut inner = Parser::new(inner_source);
            let expr = inner.parse_value_expr().map_err(|_| {
                QueryError::parse_error(
                    format!("invalid expression '{}' in string template", inner_source),
                    span,
                )
            })?;
            inner.expect_eof().map_err(|_| {
                QueryError::parse_error(
                    format!("invalid expression '{}' in string template", inner_source),
                    span,
                )
            })?;
            parts.push(TemplatePart::Expr(expr));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Text(rest.to_string()));
        }

        Ok(ValueExpr::Template(parts))
    }

    // ---- pipeline operators ---------------------------------------------

    fn parse_pipe_op(&mut self) -> Result<PipelineOp, QueryError> {
        let name_token = self.next();
        let (name, name_span) = match &name_token.kind {
            TokenKind::Ident(name) => (name.clone(), name_token.span),
            other => {
                return Err(QueryError::parse_error(
                    format!("expected pipeline operator, found {}", other),
                    name_token.span,
                ))
            }
        };

        match name.as_str() {
            "select" => self.parse_select(name_span),
            "filter" | "where" => {
                self.expect(TokenKind::LParen)?;
                let expr = self.parse_bool_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(PipelineOp::Filter(expr))
            }
            _ => {
                let args = self.parse_op_args(&name, name_span)?;
                build_op(&name, name_span, args)
            }
        }
    }

    fn parse_select(&mut self, span: Span) -> Result<PipelineOp, QueryError> {
        self.expect(TokenKind::LParen)?;
        let mut fields = Vec::new();
        loop {
            let expr = self.parse_value_expr()?;
            let alias = if self.peek_ident() == Some("as") {
                self.next();
                let alias_token = self.next();
                match alias_token.kind {
                    TokenKind::Ident(name) => Some(name),
                    other => {
                        return Err(QueryError::parse_error(
                            format!("expected alias name after 'as', found {}", other),
                            alias_token.span,
                        ))
                    }
                }
            } else {
                None
            };
            fields.push(SelectField { expr, alias });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        if fields.is_empty() {
            return Err(QueryError::argument_error("select needs at least one field", span));
        }
        Ok(PipelineOp::Select(fields))
    }

    /// Generic argument collection: comma-separated slots, each either a
    /// `keyword=value` pair or a positional expression with an optional
    /// trailing `asc`/`desc` word. Keywords mix freely with positionals
    /// and may each appear at most once.
    fn parse_op_args(&mut self, op: &str, op_span: Span) -> Result<OpArgs, QueryError> {
        let mut args = OpArgs::new(op_span);
        if !self.eat(&TokenKind::LParen) {
            return Ok(args);
        }
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }

        loop {
            self.parse_op_arg(op, &mut args)?;
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_op_arg(&mut self, op: &str, args: &mut OpArgs) -> Result<(), QueryError> {
        if let Some(word) = self.peek_ident() {
            if KEYWORDS.contains(&word) && self.peek_at(1).kind == TokenKind::Eq {
                let keyword = word.to_string();
                let span = self.peek().span;
                self.next();
                self.next();
                if args.keywords.iter().any(|(name, _, _)| *name == keyword) {
                    return Err(QueryError::argument_error(
                        format!("duplicate keyword argument '{}' to '{}'", keyword, op),
                        span,
                    ));
                }
                let value = if keyword == "filter" {
                    KwValue::Bool(self.parse_bool_expr()?)
                } else {
                    KwValue::Expr(self.parse_value_expr()?)
                };
                args.keywords.push((keyword, value, span));
                return Ok(());
            }
        }

        let span = self.peek().span;
        let expr = self.parse_value_expr()?;
        let direction = match self.peek_ident() {
            Some("asc") => {
                self.next();
                Some(true)
            }
            Some("desc") => {
                self.next();
                Some(false)
            }
            _ => None,
        };
        args.positional.push(Positional {
            expr,
            direction,
            span,
        });
        Ok(())
    }
}

struct Positional {
    expr: ValueExpr,
    direction: Option<bool>,
    span: Span,
}

enum KwValue {
    Expr(ValueExpr),
    Bool(BoolExpr),
}

struct OpArgs {
    op_span: Span,
    positional: Vec<Positional>,
    keywords: Vec<(String, KwValue, Span)>,
}

impl OpArgs {
    fn new(op_span: Span) -> OpArgs {
        OpArgs {
            op_span,
            positional: Vec::new(),
            keywords: Vec::new(),
        }
    }

    fn keyword(&self, name: &str) -> Option<(&KwValue, Span)> {
        self.keywords
            .iter()
            .find(|(kw, _, _)| kw == name)
            .map(|(_, value, span)| (value, *span))
    }

    fn kw_expr(&self, name: &str) -> Result<Option<&ValueExpr>, QueryError> {
        match self.keyword(name) {
            None => Ok(None),
            Some((KwValue::Expr(expr), _)) => Ok(Some(expr)),
            Some((KwValue::Bool(_), span)) => Err(QueryError::argument_error(
                format!("'{}' takes a value, not a predicate", name),
                span,
            )),
        }
    }

    fn kw_word(&self, name: &str) -> Result<Option<String>, QueryError> {
        match self.kw_expr(name)? {
            None => Ok(None),
            Some(expr) => match expr_as_word(expr) {
                Some(word) => Ok(Some(word)),
                None => {
                    let span = self.keyword(name).map(|(_, s)| s).unwrap_or(self.op_span);
                    Err(QueryError::argument_error(
                        format!("'{}' expects a name", name),
                        span,
                    ))
                }
            },
        }
    }

    fn kw_path(&self, name: &str) -> Result<Option<Vec<String>>, QueryError> {
        match self.kw_expr(name)? {
            None => Ok(None),
            Some(ValueExpr::Field(path)) => Ok(Some(path.clone())),
            Some(_) => {
                let span = self.keyword(name).map(|(_, s)| s).unwrap_or(self.op_span);
                Err(QueryError::argument_error(
                    format!("'{}' expects a field path", name),
                    span,
                ))
            }
        }
    }

    fn kw_bool_value(&self, name: &str) -> Result<Option<bool>, QueryError> {
        match self.kw_expr(name)? {
            None => Ok(None),
            Some(ValueExpr::Literal(Value::Boolean(b))) => Ok(Some(*b)),
            Some(other) => match expr_as_word(other).as_deref() {
                Some("asc") | Some("true") => Ok(Some(true)),
                Some("desc") | Some("false") => Ok(Some(false)),
                _ => {
                    let span = self.keyword(name).map(|(_, s)| s).unwrap_or(self.op_span);
                    Err(QueryError::argument_error(
                        format!("'{}' expects true/false", name),
                        span,
                    ))
                }
            },
        }
    }

    fn kw_number(&self, name: &str) -> Result<Option<f64>, QueryError> {
        match self.kw_expr(name)? {
            None => Ok(None),
            Some(ValueExpr::Literal(value)) => match value.as_f64() {
                Some(f) => Ok(Some(f)),
                None => {
                    let span = self.keyword(name).map(|(_, s)| s).unwrap_or(self.op_span);
                    Err(QueryError::argument_error(
                        format!("'{}' expects a number", name),
                        span,
                    ))
                }
            },
            Some(_) => {
                let span = self.keyword(name).map(|(_, s)| s).unwrap_or(self.op_span);
                Err(QueryError::argument_error(
                    format!("'{}' expects a number", name),
                    span,
                ))
            }
        }
    }

    fn kw_filter(&self) -> Result<Option<&BoolExpr>, QueryError> {
        match self.keyword("filter") {
            None => Ok(None),
            Some((KwValue::Bool(expr), _)) => Ok(Some(expr)),
            Some((KwValue::Expr(_), span)) => Err(QueryError::argument_error(
                "'filter' takes a predicate",
                span,
            )),
        }
    }

    fn reject_keywords(&self, op: &str, allowed: &[&str]) -> Result<(), QueryError> {
        for (name, _, span) in &self.keywords {
            if !allowed.contains(&name.as_str()) {
                return Err(QueryError::argument_error(
                    format!("'{}' does not accept keyword argument '{}'", op, name),
                    *span,
                ));
            }
        }
        Ok(())
    }
}

fn expr_as_word(expr: &ValueExpr) -> Option<String> {
    match expr {
        ValueExpr::Field(path) if path.len() == 1 => Some(path[0].clone()),
        ValueExpr::Literal(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn expr_as_path(expr: &ValueExpr) -> Option<Vec<String>> {
    match expr {
        ValueExpr::Field(path) => Some(path.clone()),
        _ => None,
    }
}

fn positional_count(expr_args: &OpArgs, op: &str, max: usize) -> Result<(), QueryError> {
    if expr_args.positional.len() > max {
        return Err(QueryError::argument_error(
            format!("too many arguments to '{}'", op),
            expr_args.op_span,
        ));
    }
    Ok(())
}

fn require_count(positional: &Positional, op: &str) -> Result<usize, QueryError> {
    match &positional.expr {
        ValueExpr::Literal(Value::Int(n)) if *n > 0 => Ok(*n as usize),
        _ => Err(QueryError::argument_error(
            format!("'{}' expects a positive row count", op),
            positional.span,
        )),
    }
}

fn build_op(name: &str, span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    match name {
        "top" => build_top(span, args),
        "head" | "limit" => build_counted(name, span, args, PipelineOp::Head),
        "tail" => build_counted(name, span, args, PipelineOp::Tail),
        "skip" => build_counted(name, span, args, PipelineOp::Skip),
        "sortBy" => build_sort_by(span, args),
        "distinct" => build_distinct(span, args),
        "count" => {
            args.reject_keywords("count", &[])?;
            positional_count(&args, "count", 0)?;
            Ok(PipelineOp::Count)
        }
        "sum" | "min" | "max" | "avg" => build_aggregate(name, span, args),
        "stats" => build_stats(span, args),
        "groupBy" => build_group_by(span, args),
        "pathToRoot" => {
            args.reject_keywords("pathToRoot", &["decoratorKey"])?;
            positional_count(&args, "pathToRoot", 0)?;
            Ok(PipelineOp::PathToRoot {
                decorator_key: args.kw_word("decoratorKey")?,
            })
        }
        "retentionPaths" => {
            args.reject_keywords("retentionPaths", &[])?;
            positional_count(&args, "retentionPaths", 0)?;
            Ok(PipelineOp::RetentionPaths)
        }
        "retainedBreakdown" => {
            args.reject_keywords("retainedBreakdown", &[])?;
            positional_count(&args, "retainedBreakdown", 1)?;
            let max_depth = match args.positional.first() {
                Some(p) => require_count(p, "retainedBreakdown")?,
                None => 2,
            };
            Ok(PipelineOp::RetainedBreakdown { max_depth })
        }
        "dominators" => {
            args.reject_keywords("dominators", &["decoratorKey"])?;
            positional_count(&args, "dominators", 1)?;
            let mode = match args.positional.first() {
                Some(p) => expr_as_word(&p.expr).ok_or_else(|| {
                    QueryError::argument_error("'dominators' expects a mode name", p.span)
                })?,
                None => "top".to_string(),
            };
            Ok(PipelineOp::Dominators { mode })
        }
        "checkLeaks" => build_check_leaks(span, args),
        _ => {
            if let Some(kind) = TransformKind::from_name(name) {
                return build_transform(kind, span, args);
            }
            Err(QueryError::unknown_operator(name, span))
        }
    }
}

fn build_counted(
    name: &str,
    span: Span,
    args: OpArgs,
    make: fn(usize) -> PipelineOp,
) -> Result<PipelineOp, QueryError> {
    args.reject_keywords(name, &[])?;
    positional_count(&args, name, 1)?;
    let count = match args.positional.first() {
        Some(p) => require_count(p, name)?,
        None => {
            return Err(QueryError::argument_error(
                format!("'{}' expects a row count", name),
                span,
            ))
        }
    };
    Ok(make(count))
}

fn build_top(span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords("top", &["by", "sortBy", "asc"])?;
    positional_count(&args, "top", 3)?;

    let mut positional = args.positional.iter();
    let count = match positional.next() {
        Some(p) => require_count(p, "top")?,
        None => {
            return Err(QueryError::argument_error("'top' expects a row count", span));
        }
    };

    let mut order_by = args.kw_path("by")?.or(args.kw_path("sortBy")?);
    let mut ascending = None;

    for p in positional {
        if let Some(word) = expr_as_word(&p.expr) {
            if word == "asc" || word == "desc" {
                ascending = Some(word == "asc");
                continue;
            }
        }
        match expr_as_path(&p.expr) {
            Some(path) if order_by.is_none() => {
                order_by = Some(path);
                if p.direction.is_some() {
                    ascending = p.direction;
                }
            }
            _ => {
                return Err(QueryError::argument_error(
                    "'top' expects top(n [, orderBy [, asc|desc]])",
                    p.span,
                ))
            }
        }
    }

    if let Some(asc) = args.kw_bool_value("asc")? {
        ascending = Some(asc);
    }

    Ok(PipelineOp::Top {
        count,
        order_by,
        ascending: ascending.unwrap_or(false),
    })
}

fn build_sort_by(span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords("sortBy", &["by", "asc"])?;

    let mut keys = Vec::new();
    if let Some(path) = args.kw_path("by")? {
        let ascending = args.kw_bool_value("asc")?.unwrap_or(true);
        keys.push(SortKey {
            field: path,
            ascending,
        });
    }

    for p in &args.positional {
        let path = expr_as_path(&p.expr).ok_or_else(|| {
            QueryError::argument_error("'sortBy' expects field paths", p.span)
        })?;
        keys.push(SortKey {
            field: path,
            ascending: p.direction.unwrap_or(true),
        });
    }

    if keys.is_empty() {
        return Err(QueryError::argument_error(
            "'sortBy' expects at least one field",
            span,
        ));
    }
    Ok(PipelineOp::SortBy(keys))
}

fn build_distinct(span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords("distinct", &["key"])?;
    positional_count(&args, "distinct", 1)?;

    let field = if let Some(path) = args.kw_path("key")? {
        path
    } else {
        match args.positional.first() {
            Some(p) => expr_as_path(&p.expr).ok_or_else(|| {
                QueryError::argument_error("'distinct' expects a field path", p.span)
            })?,
            None => {
                return Err(QueryError::argument_error(
                    "'distinct' expects a field",
                    span,
                ))
            }
        }
    };
    Ok(PipelineOp::Distinct(field))
}

fn build_aggregate(name: &str, span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords(name, &["value"])?;
    positional_count(&args, name, 1)?;

    let field = if let Some(path) = args.kw_path("value")? {
        path
    } else {
        match args.positional.first() {
            Some(p) => expr_as_path(&p.expr).ok_or_else(|| {
                QueryError::argument_error(format!("'{}' expects a field path", name), p.span)
            })?,
            None => {
                return Err(QueryError::argument_error(
                    format!("'{}' expects a field", name),
                    span,
                ))
            }
        }
    };

    let agg = Aggregation::from_name(name).expect("aggregate op names are pre-screened");
    Ok(PipelineOp::Aggregate { agg, field })
}

fn build_stats(span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords("stats", &[])?;
    positional_count(&args, "stats", 1)?;
    let field = match args.positional.first() {
        Some(p) => expr_as_path(&p.expr).ok_or_else(|| {
            QueryError::argument_error("'stats' expects a field path", p.span)
        })?,
        None => {
            return Err(QueryError::argument_error("'stats' expects a field", span));
        }
    };
    Ok(PipelineOp::Stats(field))
}

fn build_group_by(span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords("groupBy", &["agg", "value", "sortBy", "asc", "by", "key"])?;

    let mut keys: Vec<Vec<String>> = Vec::new();
    for kw in ["by", "key"] {
        if let Some(path) = args.kw_path(kw)? {
            keys.push(path);
        }
    }
    for p in &args.positional {
        let path = expr_as_path(&p.expr).ok_or_else(|| {
            QueryError::argument_error("'groupBy' expects grouping field paths", p.span)
        })?;
        keys.push(path);
    }
    if keys.is_empty() {
        return Err(QueryError::argument_error(
            "'groupBy' expects at least one grouping field",
            span,
        ));
    }

    let agg = match args.kw_word("agg")? {
        None => Aggregation::Count,
        Some(word) => Aggregation::from_name(&word).ok_or_else(|| {
            QueryError::argument_error(
                format!("unknown aggregation '{}'", word),
                args.keyword("agg").map(|(_, s)| s).unwrap_or(span),
            )
        })?,
    };

    let value = args.kw_expr("value")?.cloned();

    let sort = match args.kw_word("sortBy")?.as_deref() {
        None => None,
        Some("key") => Some(GroupSort::Key),
        Some("value") => Some(GroupSort::Value),
        Some(other) => {
            return Err(QueryError::argument_error(
                format!("'sortBy' expects key or value, got '{}'", other),
                args.keyword("sortBy").map(|(_, s)| s).unwrap_or(span),
            ))
        }
    };

    let ascending = match (sort, args.kw_bool_value("asc")?) {
        (None, Some(_)) => {
            return Err(QueryError::argument_error(
                "'asc' requires 'sortBy=key' or 'sortBy=value'",
                span,
            ))
        }
        (None, None) => true,
        (Some(GroupSort::Key), asc) => asc.unwrap_or(true),
        (Some(GroupSort::Value), asc) => asc.unwrap_or(false),
    };

    Ok(PipelineOp::GroupBy {
        keys,
        agg,
        value,
        sort,
        ascending,
    })
}

fn build_transform(kind: TransformKind, span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords(kind.name(), &[])?;
    let expected_extra = if kind == TransformKind::Replace { 2 } else { 0 };
    positional_count(&args, kind.name(), 1 + expected_extra)?;

    let field = match args.positional.first() {
        Some(p) => expr_as_path(&p.expr).ok_or_else(|| {
            QueryError::argument_error(
                format!("'{}' expects a field path", kind.name()),
                p.span,
            )
        })?,
        None => {
            return Err(QueryError::argument_error(
                format!("'{}' expects a field", kind.name()),
                span,
            ))
        }
    };

    let mut extra = Vec::new();
    for p in args.positional.iter().skip(1) {
        match &p.expr {
            ValueExpr::Literal(value) => extra.push(value.clone()),
            _ => {
                return Err(QueryError::argument_error(
                    format!("'{}' expects literal arguments", kind.name()),
                    p.span,
                ))
            }
        }
    }
    if extra.len() != expected_extra {
        return Err(QueryError::argument_error(
            format!("wrong number of arguments to '{}'", kind.name()),
            span,
        ));
    }

    Ok(PipelineOp::Transform {
        kind,
        field,
        args: extra,
    })
}

fn build_check_leaks(span: Span, args: OpArgs) -> Result<PipelineOp, QueryError> {
    args.reject_keywords(
        "checkLeaks",
        &[
            "detector", "filter", "threshold", "minSize", "duration", "format", "fields",
        ],
    )?;
    positional_count(&args, "checkLeaks", 0)?;

    let detector = args.kw_word("detector")?;
    let filter = args.kw_filter()?.cloned();
    match (&detector, &filter) {
        (Some(_), Some(_)) => {
            return Err(QueryError::argument_error(
                "'checkLeaks' takes either 'detector' or 'filter', not both",
                span,
            ))
        }
        (None, None) => {
            return Err(QueryError::argument_error(
                "'checkLeaks' needs a 'detector' or a 'filter'",
                span,
            ))
        }
        _ => {}
    }

    let min_size = match args.kw_number("minSize")? {
        Some(f) => Some(f as i64),
        None => None,
    };
    let duration = match args.kw_number("duration")? {
        Some(f) => Some(f as i64),
        None => None,
    };
    let fields = match args.kw_word("fields")? {
        None => Vec::new(),
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    };

    Ok(PipelineOp::CheckLeaks(CheckLeaksArgs {
        detector,
        filter,
        threshold: args.kw_number("threshold")?,
        min_size,
        duration,
        format: args.kw_word("format")?,
        fields,
    }))
}

// ---- literals -----------------------------------------------------------

/// Converts raw number text to a value, applying the binary size suffix
/// and rejecting anything that overflows an i64.
pub fn parse_number_literal(text: &str, span: Span) -> Result<Value, QueryError> {
    let (numeric, suffix) = split_number_suffix(text);

    let multiplier: i64 = match suffix.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => {
            return Err(QueryError::parse_error(
                format!("invalid number suffix '{}'", other),
                span,
            ))
        }
    };

    if numeric.contains('.') || numeric.contains('e') || numeric.contains('E') {
        let parsed: f64 = numeric.parse().map_err(|_| {
            QueryError::parse_error(format!("invalid number '{}'", text), span)
        })?;
        return Ok(Value::Float(parsed * multiplier as f64));
    }

    let parsed: i64 = numeric.parse().map_err(|err: std::num::ParseIntError| {
        let msg = match err.kind() {
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
                format!("number '{}' does not fit in 64 bits", text)
            }
            _ => format!("invalid number '{}'", text),
        };
        QueryError::parse_error(msg, span)
    })?;
    let scaled = parsed.checked_mul(multiplier).ok_or_else(|| {
        QueryError::parse_error(format!("number '{}' does not fit in 64 bits", text), span)
    })?;
    Ok(Value::Int(scaled))
}

fn split_number_suffix(text: &str) -> (&str, &str) {
    let bytes = text.as_bytes();
    let mut split = bytes.len();
    while split > 0 {
        let ch = bytes[split - 1] as char;
        if ch.is_ascii_alphabetic() {
            // an exponent's 'e' belongs to the numeric part
            if (ch == 'e' || ch == 'E') && split >= 2 && (bytes[split - 2] as char).is_ascii_digit()
            {
                let rest = &text[split..];
                if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
                    break;
                }
            }
            split -= 1;
        } else {
            break;
        }
    }
    (&text[..split], &text[split..])
}

fn translate_type_pattern(text: &str) -> TypePattern {
    let is_glob = text.contains('*') || text.contains('?');
    if text.starts_with('[') {
        return TypePattern {
            name: text.to_string(),
            is_glob,
        };
    }

    let mut base = text;
    let mut dims = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dims += 1;
    }
    if dims == 0 {
        return TypePattern {
            name: text.to_string(),
            is_glob,
        };
    }

    let brackets = "[".repeat(dims);
    let name = match base {
        "boolean" => format!("{}Z", brackets),
        "byte" => format!("{}B", brackets),
        "char" => format!("{}C", brackets),
        "short" => format!("{}S", brackets),
        "int" => format!("{}I", brackets),
        "long" => format!("{}J", brackets),
        "float" => format!("{}F", brackets),
        "double" => format!("{}D", brackets),
        element => format!("{}L{};", brackets, element),
    };
    TypePattern { name, is_glob }
}
