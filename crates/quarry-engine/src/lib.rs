//! The execution half of the quarry query core: expression evaluation,
//! the materialized and streaming pipelines, and the adapter seam to
//! heap-dump and recording backends.

mod cancel;
mod config;
mod diag;
mod evaluate;
mod executor;
mod pipeline;
mod source;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use diag::{
    CollectingSink, DiagnosticSink, NullSink, Progress, ProgressTicker, StderrSink,
};
pub use evaluate::Evaluator;
pub use executor::{Executor, QueryResult};
pub use pipeline::materialized::{apply_op, apply_pipeline, PipelineContext, PipelineOutcome};
pub use source::{
    BreakdownNode, DominatorEntry, GraphService, HeapSource, InMemorySource, LookupKind, PathStep,
    RowStream,
};
