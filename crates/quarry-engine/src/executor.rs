//! Ties everything together: obtains rows from the adapter, picks the
//! execution strategy from the first operator and the reported input
//! size, and runs the pipeline.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::diag::{DiagnosticSink, NullSink, ProgressTicker};
use crate::evaluate::Evaluator;
use crate::pipeline::materialized::{apply_pipeline, PipelineContext};
use crate::pipeline::streaming::{build_head, run_stream, StreamHead};
use crate::source::{HeapSource, LookupKind, RowStream};
use quarry_errors::QueryError;
use quarry_parser::ast::{BoolExpr, PipelineOp, Query, SourceRoot, TypeSelector};
use quarry_protocol::{Row, Value};
use quarry_source::Span;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The rows a query produced. `cancelled` marks a partial result
/// flushed by cooperative cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub cancelled: bool,
}

impl QueryResult {
    /// The row list, or [`QueryError::Cancelled`] when cooperative
    /// cancellation cut the run short. Callers that want the flushed
    /// partial rows instead read `rows` and `cancelled` directly.
    pub fn into_rows(self) -> Result<Vec<Row>, QueryError> {
        if self.cancelled {
            Err(QueryError::Cancelled)
        } else {
            Ok(self.rows)
        }
    }
}

pub struct Executor {
    config: EngineConfig,
    diag: Arc<dyn DiagnosticSink>,
    cancel: CancelToken,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Executor {
        Executor {
            config,
            diag: Arc::new(NullSink),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Executor {
        self.diag = sink;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Executor {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs one query to completion against the given source. The source
    /// is borrowed for exactly the duration of the call, whatever the
    /// outcome; accumulator state never outlives it.
    pub fn execute(
        &self,
        query: &Query,
        source: &mut dyn HeapSource,
    ) -> Result<QueryResult, QueryError> {
        log::debug!("executing {} against {}", query, source.label());
        let evaluator = Evaluator::new();

        validate_typed_fields(query)?;

        let matcher = TypeMatcher::build(&query.selector, query.root, source)?;

        // leading filters merge into the predicate list so they run
        // while the stream drains
        let mut predicates: Vec<&BoolExpr> = query.predicates.iter().collect();
        let mut ops: &[PipelineOp] = &query.pipeline;
        while let Some(PipelineOp::Filter(expr)) = ops.first() {
            predicates.push(expr);
            ops = &ops[1..];
        }

        let total = source.total_count(query.root);
        let oversized = match query.force_streaming {
            Some(forced) => forced,
            None => total.map_or(false, |t| t > self.config.streaming_threshold),
        };

        let injected;
        let (head_op, rest): (Option<&PipelineOp>, &[PipelineOp]) = if oversized {
            match ops.first() {
                Some(op) if op.is_stream_head() => (Some(op), &ops[1..]),
                _ => {
                    self.diag.warning(&format!(
                        "input of {} rows has no stream-capable leading operator; \
                         inserting top({})",
                        total.map_or_else(|| "unknown".to_string(), |t| t.to_string()),
                        self.config.default_top,
                    ));
                    injected = PipelineOp::Top {
                        count: self.config.default_top,
                        order_by: None,
                        ascending: false,
                    };
                    (Some(&injected), ops)
                }
            }
        } else {
            (None, ops)
        };

        let selector_key = selector_field(query.root);
        let accept = |row: &Row| {
            matcher.accepts(row, selector_key)
                && predicates.iter().all(|expr| evaluator.matches(expr, row))
        };

        let mut ticker = ProgressTicker::new(self.config.progress_interval, total, self.diag.as_ref());

        let head = match head_op {
            None => StreamHead::collect(),
            Some(op) => match build_head(op, rest.first(), &self.config) {
                Some(head) => head,
                // unreachable in practice: head_op is screened above
                None => StreamHead::collect(),
            },
        };

        let (rows, cancelled) = {
            let stream = open_stream(query, &matcher, source)?;
            run_stream(stream, &accept, head, &mut ticker, &self.cancel, &evaluator)?
        };
        if cancelled {
            return Ok(QueryResult {
                rows,
                cancelled: true,
            });
        }

        let remaining = if head_op.is_some() { rest } else { ops };
        let ctx = PipelineContext {
            evaluator: &evaluator,
            diag: self.diag.as_ref(),
            cancel: &self.cancel,
            graph: source.graph(),
        };
        let outcome = apply_pipeline(rows, remaining, &ctx)?;
        Ok(QueryResult {
            rows: outcome.rows,
            cancelled: outcome.cancelled,
        })
    }
}

/// Picks the stream for the query's root, preferring point lookups and
/// per-class indices when the backend has them; otherwise a full scan
/// that the matcher filters.
fn open_stream<'s>(
    query: &Query,
    matcher: &TypeMatcher,
    source: &'s mut dyn HeapSource,
) -> Result<RowStream<'s>, QueryError> {
    // Raw-pointer reborrow below works around a known NLL limitation:
    // the borrow checker can't see that the two early-return branches
    // and the final call are mutually exclusive uses of `source`, so a
    // plain `&'s mut` gets "borrowed more than once" even though at
    // most one reborrow is ever live at a time.
    let source: *mut dyn HeapSource = source;

    // metadata on one exact type is a point lookup
    if query.root == SourceRoot::Metadata {
        if let Some(name) = matcher.single_exact_name() {
            if let Some(row) = unsafe { &mut *source }.lookup(LookupKind::Metadata, &name) {
                return Ok(Box::new(std::iter::once(Ok(row))));
            }
        }
    }

    if query.root == SourceRoot::Objects && !query.selector.include_subtypes {
        if let Some(name) = matcher.single_exact_name() {
            if let Some(stream) = unsafe { &mut *source }.objects_of_class(&name) {
                log::trace!("using objects-of-class index for {}", name);
                return Ok(stream);
            }
        }
    }

    unsafe { &mut *source }.stream(query.root)
}

/// Which row field the type selector matches per root.
fn selector_field(root: SourceRoot) -> &'static str {
    match root {
        SourceRoot::Objects => "className",
        SourceRoot::Classes => "name",
        SourceRoot::GcRoots => "type",
        SourceRoot::Events => "type",
        SourceRoot::Metadata => "name",
        SourceRoot::ConstantPool => "type",
        SourceRoot::Chunks => "name",
    }
}

/// Compiled form of the query's type selector. Exact names sit in a
/// hash set (expanded with the subtype closure when `instanceof` asked
/// for it), globs become anchored regexes.
struct TypeMatcher {
    match_all: bool,
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl TypeMatcher {
    fn build(
        selector: &TypeSelector,
        root: SourceRoot,
        source: &mut dyn HeapSource,
    ) -> Result<TypeMatcher, QueryError> {
        if selector.is_all() {
            return Ok(TypeMatcher {
                match_all: true,
                names: HashSet::new(),
                patterns: Vec::new(),
            });
        }

        let mut names = HashSet::new();
        let mut patterns = Vec::new();
        for pattern in &selector.patterns {
            if pattern.is_glob {
                patterns.push(glob_regex(&pattern.name)?);
            } else {
                names.insert(pattern.name.clone());
            }
        }

        let mut matcher = TypeMatcher {
            match_all: false,
            names,
            patterns,
        };

        if selector.include_subtypes && root == SourceRoot::Objects {
            matcher.expand_subtypes(source)?;
        }

        Ok(matcher)
    }

    /// Expands the name set with every class whose superclass chain
    /// reaches a selected type. Needs the classes table; when the
    /// backend has none the matcher silently stays exact.
    fn expand_subtypes(&mut self, source: &mut dyn HeapSource) -> Result<(), QueryError> {
        let mut supers: HashMap<String, String> = HashMap::new();
        let mut all_names: Vec<String> = Vec::new();
        {
            let stream = source.stream(SourceRoot::Classes)?;
            for item in stream {
                let row = item?;
                let Some(name) = row.get("name").and_then(|v| v.as_str().map(str::to_string))
                else {
                    continue;
                };
                if let Some(Value::String(superclass)) = row.get("superClass") {
                    supers.insert(name.clone(), superclass.clone());
                }
                all_names.push(name);
            }
        }

        let seeds: HashSet<&String> = all_names
            .iter()
            .filter(|name| self.matches_name(name))
            .collect();
        let mut expanded: HashSet<String> = seeds.iter().map(|s| (*s).clone()).collect();

        for name in &all_names {
            let mut current = name;
            let mut hops = 0;
            while let Some(superclass) = supers.get(current) {
                if expanded.contains(superclass) || seeds.contains(superclass) {
                    expanded.insert(name.clone());
                    break;
                }
                current = superclass;
                hops += 1;
                if hops > 1024 {
                    // corrupt hierarchy; refuse to loop forever
                    break;
                }
            }
        }

        log::debug!(
            "instanceof selector expanded to {} concrete classes",
            expanded.len()
        );
        self.names.extend(expanded);
        Ok(())
    }

    fn matches_name(&self, name: &str) -> bool {
        self.match_all
            || self.names.contains(name)
            || self.patterns.iter().any(|regex| regex.is_match(name))
    }

    fn accepts(&self, row: &Row, field: &str) -> bool {
        if self.match_all {
            return true;
        }
        match row.get(field).and_then(Value::as_str) {
            Some(name) => self.matches_name(name),
            None => false,
        }
    }

    /// For the point-lookup and index fast paths.
    fn single_exact_name(&self) -> Option<String> {
        if self.match_all || !self.patterns.is_empty() || self.names.len() != 1 {
            return None;
        }
        self.names.iter().next().cloned()
    }
}

/// Translates a `*`/`?` glob into an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex, QueryError> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|err| {
        QueryError::parse_error(
            format!("invalid type pattern '{}': {}", pattern, err),
            Span::unknown(),
        )
    })
}

const CLASS_FIELDS: &[&str] = &[
    "id",
    "name",
    "simpleName",
    "instanceCount",
    "instanceSize",
    "superClass",
    "isArray",
];

const GC_ROOT_FIELDS: &[&str] = &[
    "type",
    "objectId",
    "object",
    "shallow",
    "retained",
    "threadSerial",
    "frameNumber",
];

/// Fully typed roots get their `select` field references checked up
/// front; everything else defers to the null-on-miss runtime rule,
/// since event schemas are backend-defined.
fn validate_typed_fields(query: &Query) -> Result<(), QueryError> {
    let known: &[&str] = match query.root {
        SourceRoot::Classes => CLASS_FIELDS,
        SourceRoot::GcRoots => GC_ROOT_FIELDS,
        _ => return Ok(()),
    };

    for op in &query.pipeline {
        let PipelineOp::Select(fields) = op else {
            continue;
        };
        for field in fields {
            if let quarry_parser::ast::ValueExpr::Field(path) = &field.expr {
                if let Some(first) = path.first() {
                    if !known.contains(&first.as_str()) {
                        return Err(QueryError::unknown_field(first, Span::unknown()));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching_is_anchored() {
        let regex = glob_regex("*String*").unwrap();
        assert!(regex.is_match("java.lang.String"));
        assert!(regex.is_match("java.lang.StringBuilder"));
        assert!(!regex.is_match("java.util.HashMap"));

        let question = glob_regex("java.?til.*").unwrap();
        assert!(question.is_match("java.util.HashMap"));
        assert!(!question.is_match("java.il.HashMap"));
    }

    #[test]
    fn dots_in_globs_are_literal() {
        let regex = glob_regex("java.lang.String").unwrap();
        assert!(!regex.is_match("javaxlangxString"));
    }
}
