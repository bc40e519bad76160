//! The materialized pipeline: every operator consumes a fully realized
//! row list and produces a new one. The streaming path reuses the
//! finishing functions here so the two never disagree on semantics.

use crate::cancel::CancelToken;
use crate::diag::DiagnosticSink;
use crate::evaluate::{functions, Evaluator};
use crate::pipeline::aggregate::Accumulator;
use crate::pipeline::group::GroupAccumulator;
use crate::pipeline::{graph, rank, value_key};
use crate::source::GraphService;
use quarry_errors::QueryError;
use quarry_parser::ast::{PipelineOp, SelectField, SortKey, TransformKind};
use quarry_protocol::{compare_values, is_memory_field, Row, RowBuilder, Value};
use std::collections::HashSet;

pub struct PipelineContext<'a> {
    pub evaluator: &'a Evaluator,
    pub diag: &'a dyn DiagnosticSink,
    pub cancel: &'a CancelToken,
    pub graph: Option<&'a dyn GraphService>,
}

pub struct PipelineOutcome {
    pub rows: Vec<Row>,
    pub cancelled: bool,
}

pub fn apply_pipeline(
    mut rows: Vec<Row>,
    ops: &[PipelineOp],
    ctx: &PipelineContext,
) -> Result<PipelineOutcome, QueryError> {
    for op in ops {
        if ctx.cancel.is_cancelled() {
            log::debug!("pipeline cancelled, flushing {} rows", rows.len());
            return Ok(PipelineOutcome {
                rows,
                cancelled: true,
            });
        }
        rows = apply_op(rows, op, ctx)?;
    }
    Ok(PipelineOutcome {
        rows,
        cancelled: false,
    })
}

pub fn apply_op(
    rows: Vec<Row>,
    op: &PipelineOp,
    ctx: &PipelineContext,
) -> Result<Vec<Row>, QueryError> {
    match op {
        PipelineOp::Select(fields) => Ok(select(rows, fields, ctx.evaluator)),
        PipelineOp::Filter(expr) => Ok(rows
            .into_iter()
            .filter(|row| ctx.evaluator.matches(expr, row))
            .collect()),
        PipelineOp::Top {
            count,
            order_by,
            ascending,
        } => Ok(top(rows, *count, order_by.as_deref(), *ascending)),
        PipelineOp::Head(n) => {
            let mut rows = rows;
            rows.truncate(*n);
            Ok(rows)
        }
        PipelineOp::Tail(n) => {
            let mut rows = rows;
            let keep = rows.len().saturating_sub(*n);
            Ok(rows.split_off(keep))
        }
        PipelineOp::Skip(n) => {
            let mut rows = rows;
            let at = (*n).min(rows.len());
            Ok(rows.split_off(at))
        }
        PipelineOp::SortBy(keys) => Ok(sort_rows(rows, keys)),
        PipelineOp::Distinct(field) => Ok(distinct(rows, field)),
        PipelineOp::Count => Ok(count_output(rows.len() as u64)),
        PipelineOp::Aggregate { agg, field } => {
            let mut acc = Accumulator::new();
            for row in &rows {
                acc.fold(&row.get_path(field));
            }
            Ok(aggregate_output(&acc, *agg, field))
        }
        PipelineOp::Stats(field) => {
            let mut acc = Accumulator::new();
            for row in &rows {
                acc.fold(&row.get_path(field));
            }
            Ok(stats_output(&acc, field))
        }
        PipelineOp::GroupBy {
            keys,
            agg,
            value,
            sort,
            ascending,
        } => {
            let mut groups = GroupAccumulator::new(keys, *agg, value.as_ref());
            for row in &rows {
                groups.fold(row, ctx.evaluator);
            }
            Ok(groups.finish(*sort, *ascending))
        }
        PipelineOp::Transform { kind, field, args } => Ok(transform(rows, *kind, field, args)),
        PipelineOp::PathToRoot { .. }
        | PipelineOp::RetentionPaths
        | PipelineOp::RetainedBreakdown { .. }
        | PipelineOp::Dominators { .. }
        | PipelineOp::CheckLeaks(_) => graph::apply(rows, op, ctx),
    }
}

fn select(rows: Vec<Row>, fields: &[SelectField], evaluator: &Evaluator) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let mut builder = RowBuilder::with_capacity(fields.len());
            for field in fields {
                builder.insert(select_column(field), evaluator.evaluate(&field.expr, &row));
            }
            builder.into_row()
        })
        .collect()
}

/// Output key for a projected column: the alias when given, the leaf
/// segment for plain paths, and the printed expression otherwise.
fn select_column(field: &SelectField) -> String {
    if let Some(alias) = &field.alias {
        return alias.clone();
    }
    match &field.expr {
        quarry_parser::ast::ValueExpr::Field(path) => {
            path.last().cloned().unwrap_or_else(|| field.expr.to_string())
        }
        expr => expr.to_string(),
    }
}

/// `top` with a key orders by it, nulls last whichever direction, and
/// truncates. Without a key it deliberately keeps the first n rows of
/// the current order; after a `sortBy` that means "first n after the
/// sort" and on raw input "first n emitted".
fn top(mut rows: Vec<Row>, count: usize, order_by: Option<&[String]>, ascending: bool) -> Vec<Row> {
    if let Some(path) = order_by {
        rows.sort_by(|a, b| rank(&a.get_path(path), &b.get_path(path), ascending));
    }
    rows.truncate(count);
    rows
}

fn sort_rows(mut rows: Vec<Row>, keys: &[SortKey]) -> Vec<Row> {
    rows.sort_by(|a, b| {
        for key in keys {
            let ordering = compare_values(&a.get_path(&key.field), &b.get_path(&key.field));
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    rows
}

fn distinct(rows: Vec<Row>, field: &[String]) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(value_key(&row.get_path(field))))
        .collect()
}

pub(crate) fn count_output(count: u64) -> Vec<Row> {
    let mut builder = RowBuilder::new();
    builder.insert_int("count", count as i64);
    vec![builder.into_row()]
}

/// A memory-valued field names the output column after itself so
/// renderers apply byte formatting; anything else gets the operator's
/// name.
pub(crate) fn aggregate_output(
    acc: &Accumulator,
    agg: quarry_parser::ast::Aggregation,
    field: &[String],
) -> Vec<Row> {
    let leaf = field.last().map(String::as_str).unwrap_or("value");
    let column = if is_memory_field(leaf) {
        leaf.to_string()
    } else {
        agg.name().to_string()
    };
    let mut builder = RowBuilder::new();
    builder.insert(column, acc.aggregated(agg));
    vec![builder.into_row()]
}

pub(crate) fn stats_output(acc: &Accumulator, field: &[String]) -> Vec<Row> {
    let leaf = field.last().map(String::as_str).unwrap_or("value");
    let name = |stat: &str| {
        if is_memory_field(leaf) {
            let mut chars = stat.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            };
            format!("{}{}", leaf, capitalized)
        } else {
            stat.to_string()
        }
    };

    let mut builder = RowBuilder::with_capacity(5);
    builder.insert_int(name("count"), acc.numeric_count() as i64);
    builder.insert(name("sum"), acc.sum());
    builder.insert(name("min"), acc.min());
    builder.insert(name("max"), acc.max());
    builder.insert(name("avg"), acc.avg());
    vec![builder.into_row()]
}

/// Applies a string/number transform element-wise over the named field.
/// Single-segment fields are rewritten in place; a nested path lands in
/// a new top-level column named by its leaf.
fn transform(rows: Vec<Row>, kind: TransformKind, field: &[String], args: &[Value]) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let transformed = transform_value(&row.get_path(field), kind, args);
            let leaf = field.last().cloned().unwrap_or_default();

            let mut builder = RowBuilder::with_capacity(row.len());
            let mut replaced = false;
            for (key, value) in row.iter() {
                if field.len() == 1 && key == &field[0] {
                    builder.insert(key.clone(), transformed.clone());
                    replaced = true;
                } else {
                    builder.insert(key.clone(), value.clone());
                }
            }
            if !replaced {
                builder.insert(leaf, transformed);
            }
            builder.into_row()
        })
        .collect()
}

fn transform_value(value: &Value, kind: TransformKind, args: &[Value]) -> Value {
    if let Value::List(items) = value {
        return Value::List(
            items
                .iter()
                .map(|item| transform_value(item, kind, args))
                .collect(),
        );
    }

    let function = match kind {
        TransformKind::Len => "length",
        TransformKind::Uppercase => "upper",
        TransformKind::Lowercase => "lower",
        TransformKind::Trim => "trim",
        TransformKind::Replace => "replace",
        TransformKind::Abs => "abs",
        TransformKind::Round => "round",
        TransformKind::Floor => "floor",
        TransformKind::Ceil => "ceil",
    };

    let mut call_args = vec![value.clone()];
    call_args.extend(args.iter().cloned());
    functions::call(function, &call_args)
}
