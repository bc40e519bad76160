//! quarry — the query core of a heap-dump and flight-recording analysis
//! tool. A small path-style DSL is parsed into an AST and executed as a
//! pipeline over dynamic rows, either fully materialized or streaming
//! with bounded memory when the input is too large to hold.
//!
//! ```text
//! objects/java.lang.String[shallow > 1K] | groupBy(className, agg=sum) | top(10)
//! ```
//!
//! Loaders, shells and renderers live elsewhere; they reach the core
//! through [`HeapSource`] and [`DiagnosticSink`].

pub use quarry_engine::{
    apply_op, apply_pipeline, BreakdownNode, CancelToken, CollectingSink, DiagnosticSink,
    DominatorEntry, EngineConfig, Evaluator, Executor, GraphService, HeapSource, InMemorySource,
    LookupKind, NullSink, PathStep, PipelineContext, PipelineOutcome, Progress, QueryResult,
    RowStream, StderrSink,
};
pub use quarry_errors::QueryError;
pub use quarry_parser::{ast, lex, lex_with_whitespace, parse_predicate, parse_query};
pub use quarry_protocol::{
    compare_values, get_path, is_memory_field, value_eq, Row, RowBuilder, Value,
};
pub use quarry_source::{Span, Spanned};

/// Parses and runs a query against a source with default configuration.
/// Embedders wanting a custom threshold, diagnostics or cancellation
/// build an [`Executor`] themselves.
pub fn run_query(text: &str, source: &mut dyn HeapSource) -> Result<QueryResult, QueryError> {
    let query = parse_query(text)?;
    Executor::new(EngineConfig::default()).execute(&query, source)
}
