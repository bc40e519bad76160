//! Graph-oriented operators. The heavy lifting (dominator tree,
//! reachability) lives behind the adapter's graph service; this module
//! only shapes the returned structures into rows. A missing service or
//! an uncomputed precondition becomes a single `{error: …}` row so the
//! query still completes.

use crate::pipeline::materialized::PipelineContext;
use crate::source::{BreakdownNode, GraphService, PathStep};
use indexmap::IndexMap;
use quarry_errors::QueryError;
use quarry_parser::ast::{CheckLeaksArgs, PipelineOp};
use quarry_protocol::{Row, RowBuilder, Value};

pub fn apply(
    rows: Vec<Row>,
    op: &PipelineOp,
    ctx: &PipelineContext,
) -> Result<Vec<Row>, QueryError> {
    match op {
        PipelineOp::PathToRoot { decorator_key } => {
            with_graph(ctx, "pathToRoot", |graph| {
                path_to_root(rows, decorator_key.as_deref().unwrap_or("path"), graph)
            })
        }
        PipelineOp::RetentionPaths => {
            with_graph(ctx, "retentionPaths", |graph| retention_paths(rows, graph))
        }
        PipelineOp::RetainedBreakdown { max_depth } => {
            with_graph(ctx, "retainedBreakdown", |graph| {
                retained_breakdown(rows, *max_depth, graph)
            })
        }
        PipelineOp::Dominators { mode } => {
            with_graph(ctx, "dominators", |graph| dominators(mode, graph))
        }
        PipelineOp::CheckLeaks(args) => check_leaks(rows, args, ctx),
        other => unreachable!("not a graph operator: {}", other),
    }
}

fn with_graph(
    ctx: &PipelineContext,
    op_name: &str,
    run: impl FnOnce(&dyn GraphService) -> Result<Vec<Row>, QueryError>,
) -> Result<Vec<Row>, QueryError> {
    let Some(graph) = ctx.graph else {
        return Ok(error_rows(format!(
            "{} requires a graph service the backend did not provide",
            op_name
        )));
    };
    match run(graph) {
        Ok(rows) => Ok(rows),
        // an uncomputed precondition completes with one error row
        Err(QueryError::Unsupported { msg }) => Ok(error_rows(msg)),
        Err(other) => Err(other),
    }
}

pub(crate) fn error_rows(message: impl Into<String>) -> Vec<Row> {
    let mut builder = RowBuilder::new();
    builder.insert_string("error", message);
    vec![builder.into_row()]
}

fn object_id(row: &Row) -> Option<i64> {
    row.get("id")
        .or_else(|| row.get("objectId"))
        .and_then(Value::as_int)
}

fn render_path(steps: &[PathStep]) -> String {
    let rendered: Vec<String> = steps
        .iter()
        .map(|step| {
            let mut text = step.class_name.clone();
            if let Some(field) = &step.field {
                text.push('.');
                text.push_str(field);
            }
            if let Some(kind) = &step.root_kind {
                text.push_str(&format!(" ({})", kind));
            }
            text
        })
        .collect();
    rendered.join(" <- ")
}

fn path_to_root(
    rows: Vec<Row>,
    column: &str,
    graph: &dyn GraphService,
) -> Result<Vec<Row>, QueryError> {
    let mut out = Vec::new();
    for row in rows {
        let Some(id) = object_id(&row) else {
            continue;
        };
        let steps = graph.path_to_root(id)?;
        let mut builder = RowBuilder::new();
        builder.insert_int("id", id);
        if let Some(class) = row.get("className") {
            builder.insert("className", class.clone());
        }
        builder.insert_string(column, render_path(&steps));
        out.push(builder.into_row());
    }
    Ok(out)
}

fn retention_paths(rows: Vec<Row>, graph: &dyn GraphService) -> Result<Vec<Row>, QueryError> {
    let mut out = Vec::new();
    for row in rows {
        let Some(id) = object_id(&row) else {
            continue;
        };
        for path in graph.retention_paths(id)? {
            let mut builder = RowBuilder::new();
            builder.insert_int("id", id);
            builder.insert_string("path", render_path(&path));
            out.push(builder.into_row());
        }
    }
    Ok(out)
}

fn retained_breakdown(
    rows: Vec<Row>,
    max_depth: usize,
    graph: &dyn GraphService,
) -> Result<Vec<Row>, QueryError> {
    let mut out = Vec::new();
    for row in rows {
        let Some(id) = object_id(&row) else {
            continue;
        };
        let tree = graph.retained_breakdown(id, max_depth)?;
        flatten_breakdown(id, &tree, 0, max_depth, &mut out);
    }
    Ok(out)
}

fn flatten_breakdown(id: i64, node: &BreakdownNode, depth: usize, max_depth: usize, out: &mut Vec<Row>) {
    let mut builder = RowBuilder::new();
    builder.insert_int("id", id);
    builder.insert_int("depth", depth as i64);
    builder.insert_string("name", node.name.clone());
    builder.insert_int("retained", node.retained);
    builder.insert_int("count", node.count as i64);
    out.push(builder.into_row());

    if depth < max_depth {
        for child in &node.children {
            flatten_breakdown(id, child, depth + 1, max_depth, out);
        }
    }
}

fn dominators(mode: &str, graph: &dyn GraphService) -> Result<Vec<Row>, QueryError> {
    let entries = graph.dominators(mode)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let mut builder = RowBuilder::new();
            builder.insert_int("id", entry.object_id);
            builder.insert_string("className", entry.class_name);
            builder.insert_int("retained", entry.retained);
            builder.insert_int("dominatedCount", entry.dominated_count as i64);
            builder.into_row()
        })
        .collect())
}

/// `checkLeaks(detector=…)` defers to a named backend detector;
/// `checkLeaks(filter=…)` runs the predicate over the incoming objects
/// and reports suspect classes by total retained (shallow when retained
/// is absent), largest first.
fn check_leaks(
    rows: Vec<Row>,
    args: &CheckLeaksArgs,
    ctx: &PipelineContext,
) -> Result<Vec<Row>, QueryError> {
    if let Some(detector) = &args.detector {
        return with_graph(ctx, "checkLeaks", |graph| {
            graph.run_detector(detector, args.threshold, args.min_size)
        });
    }

    let Some(filter) = args.filter.as_ref() else {
        return Ok(error_rows("checkLeaks needs a detector or a filter"));
    };

    struct Candidate {
        count: u64,
        total: i64,
    }
    let mut candidates: IndexMap<String, Candidate> = IndexMap::new();
    let mut grand_total: i64 = 0;
    for row in &rows {
        if !ctx.evaluator.matches(filter, row) {
            continue;
        }
        let class = row
            .get("className")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let size = row
            .get("retained")
            .or_else(|| row.get("shallow"))
            .and_then(Value::as_int)
            .unwrap_or(0);
        grand_total = grand_total.saturating_add(size);
        let entry = candidates
            .entry(class)
            .or_insert(Candidate { count: 0, total: 0 });
        entry.count += 1;
        entry.total = entry.total.saturating_add(size);
    }

    let min_size = args.min_size.unwrap_or(0);
    let mut out: Vec<(String, Candidate)> = candidates
        .into_iter()
        .filter(|(_, candidate)| candidate.total >= min_size)
        .filter(|(_, candidate)| match args.threshold {
            Some(threshold) if grand_total > 0 => {
                candidate.total as f64 >= threshold * grand_total as f64
            }
            _ => true,
        })
        .collect();
    out.sort_by(|(_, a), (_, b)| b.total.cmp(&a.total));

    Ok(out
        .into_iter()
        .map(|(class, candidate)| {
            let mut builder = RowBuilder::new();
            builder.insert_string("className", class);
            builder.insert_int("count", candidate.count as i64);
            builder.insert_int("retained", candidate.total);
            builder.into_row()
        })
        .collect())
}
