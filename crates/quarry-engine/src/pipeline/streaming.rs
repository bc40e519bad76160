//! The streaming path: one aggregating head operator folds a lazy row
//! stream under bounded memory, then the (now small) intermediate runs
//! through the materialized operators. Aggregation semantics are the
//! shared code in `aggregate`/`group`; nothing is reimplemented here.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::diag::ProgressTicker;
use crate::evaluate::Evaluator;
use crate::pipeline::aggregate::Accumulator;
use crate::pipeline::group::GroupAccumulator;
use crate::pipeline::materialized::{aggregate_output, count_output, stats_output};
use crate::pipeline::rank;
use crate::source::RowStream;
use quarry_errors::QueryError;
use quarry_parser::ast::{Aggregation, GroupSort, PipelineOp};
use quarry_protocol::{Row, Value};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Rows between cancellation polls; progress ticks happen on the same
/// cadence, so cancellation is noticed at least once per progress tick.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Rows between prune checks of the capped group buffer.
const PRUNE_CHECK_INTERVAL: u64 = 10_000;

pub struct GroupCap {
    pub buffer: usize,
    pub ascending: bool,
}

/// The state the head operator accumulates while the stream drains.
pub enum StreamHead<'a> {
    /// No aggregating head: materialize everything (the small-input path).
    Collect { rows: Vec<Row> },
    /// `top(n, key)`: a bounded heap holding the best n seen so far.
    TopKeyed {
        count: usize,
        path: &'a [String],
        ascending: bool,
        heap: BinaryHeap<HeapEntry>,
        seq: u64,
    },
    /// `top(n)` without a key: the first n rows emitted, then stop.
    TopUnkeyed { count: usize, rows: Vec<Row> },
    Group {
        acc: GroupAccumulator<'a>,
        cap: Option<GroupCap>,
        sort: Option<GroupSort>,
        ascending: bool,
        since_prune: u64,
    },
    Count { acc: Accumulator },
    Aggregate {
        agg: Aggregation,
        field: &'a [String],
        acc: Accumulator,
    },
    Stats {
        field: &'a [String],
        acc: Accumulator,
    },
}

/// Builds the head for a stream-compatible leading operator. `next` is
/// peeked at to spot the `groupBy | top(n)` shape, which gets the capped
/// buffer of `max(multiplier * n, floor)` groups.
pub fn build_head<'a>(
    first: &'a PipelineOp,
    next: Option<&PipelineOp>,
    config: &EngineConfig,
) -> Option<StreamHead<'a>> {
    match first {
        PipelineOp::Top {
            count,
            order_by: Some(path),
            ascending,
        } => Some(StreamHead::TopKeyed {
            count: *count,
            path,
            ascending: *ascending,
            heap: BinaryHeap::with_capacity(count + 1),
            seq: 0,
        }),
        PipelineOp::Top {
            count,
            order_by: None,
            ..
        } => Some(StreamHead::TopUnkeyed {
            count: *count,
            rows: Vec::with_capacity(*count),
        }),
        PipelineOp::GroupBy {
            keys,
            agg,
            value,
            sort,
            ascending,
        } => {
            let cap = match next {
                Some(PipelineOp::Top {
                    count,
                    ascending: top_ascending,
                    ..
                }) => Some(GroupCap {
                    buffer: config.group_buffer(*count),
                    ascending: *top_ascending,
                }),
                _ => None,
            };
            Some(StreamHead::Group {
                acc: GroupAccumulator::new(keys, *agg, value.as_ref()),
                cap,
                sort: *sort,
                ascending: *ascending,
                since_prune: 0,
            })
        }
        PipelineOp::Count => Some(StreamHead::Count {
            acc: Accumulator::new(),
        }),
        PipelineOp::Aggregate { agg, field } => Some(StreamHead::Aggregate {
            agg: *agg,
            field,
            acc: Accumulator::new(),
        }),
        PipelineOp::Stats(field) => Some(StreamHead::Stats {
            field,
            acc: Accumulator::new(),
        }),
        _ => None,
    }
}

impl<'a> StreamHead<'a> {
    pub fn collect() -> StreamHead<'a> {
        StreamHead::Collect { rows: Vec::new() }
    }

    fn accept(&mut self, row: Row, evaluator: &Evaluator) {
        match self {
            StreamHead::Collect { rows } => rows.push(row),
            StreamHead::TopKeyed {
                count,
                path,
                ascending,
                heap,
                seq,
            } => {
                let key = row.get_path(path);
                let entry = HeapEntry {
                    key,
                    seq: *seq,
                    ascending: *ascending,
                    row,
                };
                *seq += 1;
                if heap.len() < *count {
                    heap.push(entry);
                } else {
                    let displaces = match heap.peek() {
                        Some(worst) => entry.cmp(worst) == Ordering::Less,
                        None => true,
                    };
                    if displaces {
                        heap.pop();
                        heap.push(entry);
                    }
                }
            }
            StreamHead::TopUnkeyed { count, rows } => {
                if rows.len() < *count {
                    rows.push(row);
                }
            }
            StreamHead::Group {
                acc,
                cap,
                since_prune,
                ..
            } => {
                acc.fold(&row, evaluator);
                *since_prune += 1;
                if let Some(cap) = cap {
                    if *since_prune >= PRUNE_CHECK_INTERVAL {
                        *since_prune = 0;
                        acc.prune(cap.buffer, cap.ascending);
                    }
                }
            }
            StreamHead::Count { acc } => acc.fold(&Value::Nothing),
            StreamHead::Aggregate { field, acc, .. } => acc.fold(&row.get_path(field)),
            StreamHead::Stats { field, acc } => acc.fold(&row.get_path(field)),
        }
    }

    /// True once more input cannot change the result, letting the driver
    /// stop pulling early.
    fn saturated(&self) -> bool {
        match self {
            StreamHead::TopUnkeyed { count, rows } => rows.len() >= *count,
            _ => false,
        }
    }

    fn finish(self) -> Vec<Row> {
        match self {
            StreamHead::Collect { rows } => rows,
            StreamHead::TopKeyed { heap, .. } => {
                let mut entries = heap.into_vec();
                entries.sort();
                entries.into_iter().map(|entry| entry.row).collect()
            }
            StreamHead::TopUnkeyed { rows, .. } => rows,
            StreamHead::Group {
                acc,
                cap,
                sort,
                ascending,
                ..
            } => {
                // when capped, the downstream top expects the groups
                // ranked by aggregated value unless the op sorts itself
                match (sort, cap) {
                    (Some(sort), _) => acc.finish(Some(sort), ascending),
                    (None, Some(cap)) => acc.finish(Some(GroupSort::Value), cap.ascending),
                    (None, None) => acc.finish(None, ascending),
                }
            }
            StreamHead::Count { acc } => count_output(acc.rows()),
            StreamHead::Aggregate { agg, field, acc } => aggregate_output(&acc, agg, field),
            StreamHead::Stats { field, acc } => stats_output(&acc, field),
        }
    }
}

/// Heap ordering: `Less` ranks before, so the heap's max is the current
/// worst entry and gets displaced first. The sequence number keeps the
/// order total and earlier rows ahead of later equals.
pub struct HeapEntry {
    key: Value,
    seq: u64,
    ascending: bool,
    row: Row,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        rank(&self.key, &other.key, self.ascending).then(self.seq.cmp(&other.seq))
    }
}

/// Drains the stream through the head, applying the row filter first.
/// Returns the head's output and whether cancellation cut the run
/// short; on cancel the partial accumulation is flushed, not dropped.
pub fn run_stream(
    stream: RowStream<'_>,
    accept: &dyn Fn(&Row) -> bool,
    mut head: StreamHead<'_>,
    ticker: &mut ProgressTicker<'_>,
    cancel: &CancelToken,
    evaluator: &Evaluator,
) -> Result<(Vec<Row>, bool), QueryError> {
    let mut processed: u64 = 0;
    for item in stream {
        let row = item?;
        processed += 1;
        if processed % CANCEL_CHECK_INTERVAL == 0 {
            ticker.tick(processed);
            if cancel.is_cancelled() {
                log::debug!("stream cancelled after {} rows", processed);
                return Ok((head.finish(), true));
            }
        }
        if !accept(&row) {
            continue;
        }
        head.accept(row, evaluator);
        if head.saturated() {
            log::trace!("stream head saturated after {} rows", processed);
            break;
        }
    }
    Ok((head.finish(), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::NullSink;
    use indexmap::indexmap;
    use std::time::Duration;

    fn object(id: i64, shallow: i64) -> Row {
        indexmap! {
            "id".to_string() => Value::int(id),
            "shallow".to_string() => Value::int(shallow),
        }
        .into()
    }

    fn drive(head: StreamHead<'_>, rows: Vec<Row>) -> Vec<Row> {
        let sink = NullSink;
        let mut ticker = ProgressTicker::new(Duration::from_secs(3600), None, &sink);
        let cancel = CancelToken::new();
        let evaluator = Evaluator::new();
        let stream: RowStream<'_> = Box::new(rows.into_iter().map(Ok));
        let (out, cancelled) =
            run_stream(stream, &|_| true, head, &mut ticker, &cancel, &evaluator).unwrap();
        assert!(!cancelled);
        out
    }

    #[test]
    fn bounded_heap_keeps_the_top_n() {
        let path = vec!["shallow".to_string()];
        let head = StreamHead::TopKeyed {
            count: 3,
            path: &path,
            ascending: false,
            heap: BinaryHeap::new(),
            seq: 0,
        };
        let rows = (0..100).map(|i| object(i, (i * 37) % 101)).collect();
        let out = drive(head, rows);

        let shallows: Vec<i64> = out
            .iter()
            .map(|row| row.get("shallow").and_then(Value::as_int).unwrap())
            .collect();
        assert_eq!(shallows, vec![100, 99, 98]);
    }

    #[test]
    fn unkeyed_top_takes_the_first_n_emitted() {
        let head = StreamHead::TopUnkeyed {
            count: 2,
            rows: Vec::new(),
        };
        let rows = vec![object(1, 30), object(2, 10), object(3, 99)];
        let out = drive(head, rows);

        let ids: Vec<i64> = out
            .iter()
            .map(|row| row.get("id").and_then(Value::as_int).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn ties_keep_the_earlier_row() {
        let path = vec!["shallow".to_string()];
        let head = StreamHead::TopKeyed {
            count: 2,
            path: &path,
            ascending: false,
            heap: BinaryHeap::new(),
            seq: 0,
        };
        let rows = vec![object(1, 50), object(2, 50), object(3, 50)];
        let out = drive(head, rows);

        let ids: Vec<i64> = out
            .iter()
            .map(|row| row.get("id").and_then(Value::as_int).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn cancellation_flushes_the_partial_accumulation() {
        let _ = pretty_env_logger::try_init();
        let sink = NullSink;
        let mut ticker = ProgressTicker::new(Duration::from_secs(3600), None, &sink);
        let cancel = CancelToken::new();
        cancel.cancel();
        let evaluator = Evaluator::new();
        let rows: Vec<Row> = (0..5000).map(|i| object(i, i)).collect();
        let stream: RowStream<'_> = Box::new(rows.into_iter().map(Ok));
        let head = StreamHead::Count {
            acc: Accumulator::new(),
        };

        let (out, cancelled) =
            run_stream(stream, &|_| true, head, &mut ticker, &cancel, &evaluator).unwrap();

        assert!(cancelled);
        // the partial count reflects the rows folded before the poll hit
        let count = out[0].get("count").and_then(Value::as_int).unwrap();
        assert!(count > 0 && count < 5000);
    }
}
