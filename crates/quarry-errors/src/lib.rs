use quarry_source::Span;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a query can fail, from tokenizing to execution.
///
/// Parse-time errors abort before execution. Runtime errors on individual
/// rows do not surface here at all; the evaluator folds them to null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum QueryError {
    #[error("parse error: {msg}")]
    Parse { msg: String, span: Span },

    #[error("unknown field '{name}'")]
    UnknownField { name: String, span: Span },

    #[error("unknown pipeline operator '{name}'")]
    UnknownOperator { name: String, span: Span },

    #[error("argument error: {msg}")]
    Argument { msg: String, span: Span },

    #[error("unsupported operation: {msg}")]
    Unsupported { msg: String },

    #[error("data error: {msg}")]
    Data { msg: String },

    #[error("query cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn parse_error(msg: impl Into<String>, span: Span) -> QueryError {
        QueryError::Parse {
            msg: msg.into(),
            span,
        }
    }

    pub fn unknown_field(name: impl Into<String>, span: Span) -> QueryError {
        QueryError::UnknownField {
            name: name.into(),
            span,
        }
    }

    pub fn unknown_operator(name: impl Into<String>, span: Span) -> QueryError {
        QueryError::UnknownOperator {
            name: name.into(),
            span,
        }
    }

    pub fn argument_error(msg: impl Into<String>, span: Span) -> QueryError {
        QueryError::Argument {
            msg: msg.into(),
            span,
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> QueryError {
        QueryError::Unsupported { msg: msg.into() }
    }

    pub fn data_error(msg: impl Into<String>) -> QueryError {
        QueryError::Data { msg: msg.into() }
    }

    /// Short machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Parse { .. } => "ParseError",
            QueryError::UnknownField { .. } => "UnknownField",
            QueryError::UnknownOperator { .. } => "UnknownOperator",
            QueryError::Argument { .. } => "ArgumentError",
            QueryError::Unsupported { .. } => "UnsupportedOperation",
            QueryError::Data { .. } => "DataError",
            QueryError::Cancelled => "Cancelled",
        }
    }

    /// The byte range in the query text this error points at, if any.
    pub fn span(&self) -> Option<Span> {
        match self {
            QueryError::Parse { span, .. }
            | QueryError::UnknownField { span, .. }
            | QueryError::UnknownOperator { span, .. }
            | QueryError::Argument { span, .. } => Some(*span),
            _ => None,
        }
    }
}
