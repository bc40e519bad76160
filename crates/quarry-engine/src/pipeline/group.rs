//! Grouping shared by both execution paths. The materialized `groupBy`
//! folds everything and finishes; the streaming path folds the same
//! accumulator and occasionally prunes it when running capped.

use crate::evaluate::Evaluator;
use crate::pipeline::aggregate::Accumulator;
use crate::pipeline::{rank, value_key};
use indexmap::IndexMap;
use itertools::Itertools;
use quarry_parser::ast::{Aggregation, GroupSort, ValueExpr};
use quarry_protocol::{compare_values, Row, RowBuilder, Value};
use std::collections::HashSet;

pub struct GroupEntry {
    key_values: Vec<Value>,
    acc: Accumulator,
}

pub struct GroupAccumulator<'a> {
    keys: &'a [Vec<String>],
    agg: Aggregation,
    value: Option<&'a ValueExpr>,
    /// Lazily resolved when `value=` was omitted for a non-count
    /// aggregation: the first numeric field that isn't a grouping key.
    /// `Some(None)` records that the first row had nothing numeric.
    default_field: Option<Option<String>>,
    groups: IndexMap<String, GroupEntry>,
}

impl<'a> GroupAccumulator<'a> {
    pub fn new(
        keys: &'a [Vec<String>],
        agg: Aggregation,
        value: Option<&'a ValueExpr>,
    ) -> GroupAccumulator<'a> {
        GroupAccumulator {
            keys,
            agg,
            value,
            default_field: None,
            groups: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn fold(&mut self, row: &Row, evaluator: &Evaluator) {
        let key_values: Vec<Value> = self.keys.iter().map(|key| row.get_path(key)).collect();
        let bucket = key_values.iter().map(value_key).join("\u{0}");

        let folded = self.folded_value(row, evaluator);
        let entry = self
            .groups
            .entry(bucket)
            .or_insert_with(|| GroupEntry {
                key_values,
                acc: Accumulator::new(),
            });
        entry.acc.fold(&folded);
    }

    fn folded_value(&mut self, row: &Row, evaluator: &Evaluator) -> Value {
        if let Some(expr) = self.value {
            return evaluator.evaluate(expr, row);
        }
        if self.agg == Aggregation::Count {
            return Value::Nothing;
        }

        if self.default_field.is_none() {
            let key_leaves: HashSet<&str> = self
                .keys
                .iter()
                .filter_map(|key| key.last())
                .map(String::as_str)
                .collect();
            self.default_field = Some(
                row.iter()
                    .find(|(name, value)| value.is_numeric() && !key_leaves.contains(name.as_str()))
                    .map(|(name, _)| name.clone()),
            );
        }

        match &self.default_field {
            Some(Some(name)) => row.get(name).cloned().unwrap_or(Value::Nothing),
            _ => Value::Nothing,
        }
    }

    /// Evicts the lowest-ranked groups by their current aggregate until
    /// only `buffer` remain. Groups that would have climbed back later
    /// are lost; that approximation is the price of bounded memory.
    pub fn prune(&mut self, buffer: usize, ascending: bool) {
        if self.groups.len() <= buffer {
            return;
        }
        let agg = self.agg;
        let mut ranked: Vec<(usize, Value)> = self
            .groups
            .values()
            .map(|entry| entry.acc.aggregated(agg))
            .enumerate()
            .collect();
        ranked.sort_by(|(_, a), (_, b)| rank(a, b, ascending));
        let keep: HashSet<usize> = ranked.into_iter().take(buffer).map(|(idx, _)| idx).collect();

        log::debug!(
            "group buffer over {} entries, evicting {}",
            buffer,
            self.groups.len() - buffer
        );
        let mut idx = 0;
        self.groups.retain(|_, _| {
            let keep_this = keep.contains(&idx);
            idx += 1;
            keep_this
        });
    }

    /// Output column holding the aggregated value. A count is always
    /// `count`; otherwise the value field names the column, as in
    /// `groupBy(class, agg=sum, value=shallow)` producing `shallow`.
    fn value_column(&self) -> String {
        if self.agg == Aggregation::Count {
            return "count".to_string();
        }
        match self.value {
            Some(ValueExpr::Field(path)) => path
                .last()
                .cloned()
                .unwrap_or_else(|| self.agg.name().to_string()),
            Some(_) => self.agg.name().to_string(),
            None => match &self.default_field {
                Some(Some(name)) => name.clone(),
                _ => self.agg.name().to_string(),
            },
        }
    }

    pub fn finish(self, sort: Option<GroupSort>, ascending: bool) -> Vec<Row> {
        let value_column = self.value_column();
        let agg = self.agg;
        let key_names: Vec<String> = self
            .keys
            .iter()
            .map(|key| key.last().cloned().unwrap_or_default())
            .collect();

        let mut finished: Vec<(Vec<Value>, Value)> = self
            .groups
            .into_iter()
            .map(|(_, entry)| {
                let aggregated = entry.acc.aggregated(agg);
                (entry.key_values, aggregated)
            })
            .collect();

        match sort {
            None => {}
            Some(GroupSort::Key) => {
                finished.sort_by(|(a, _), (b, _)| {
                    let mut ordering = std::cmp::Ordering::Equal;
                    for (left, right) in a.iter().zip(b.iter()) {
                        ordering = compare_values(left, right);
                        if ordering != std::cmp::Ordering::Equal {
                            break;
                        }
                    }
                    if ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                });
            }
            Some(GroupSort::Value) => {
                finished.sort_by(|(_, a), (_, b)| rank(a, b, ascending));
            }
        }

        finished
            .into_iter()
            .map(|(key_values, aggregated)| {
                let mut builder = RowBuilder::with_capacity(key_names.len() + 1);
                for (name, value) in key_names.iter().zip(key_values) {
                    builder.insert(name.clone(), value);
                }
                builder.insert(value_column.clone(), aggregated);
                builder.into_row()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    fn object(class: &str, shallow: i64) -> Row {
        indexmap! {
            "class".to_string() => Value::string(class),
            "shallow".to_string() => Value::int(shallow),
        }
        .into()
    }

    fn sum_by_class<'a>(keys: &'a [Vec<String>], value: &'a ValueExpr) -> GroupAccumulator<'a> {
        GroupAccumulator::new(keys, Aggregation::Sum, Some(value))
    }

    #[test]
    fn groups_preserve_first_seen_key_order() {
        let keys = vec![vec!["class".to_string()]];
        let value = ValueExpr::field(&["shallow"]);
        let evaluator = Evaluator::new();
        let mut acc = sum_by_class(&keys, &value);

        for row in [object("B", 1), object("A", 2), object("B", 3)] {
            acc.fold(&row, &evaluator);
        }
        let rows = acc.finish(None, true);

        assert_eq!(rows[0].get("class"), Some(&Value::string("B")));
        assert_eq!(rows[0].get("shallow"), Some(&Value::Int(4)));
        assert_eq!(rows[1].get("class"), Some(&Value::string("A")));
    }

    #[test]
    fn omitted_value_falls_back_to_first_numeric_field() {
        let keys = vec![vec!["class".to_string()]];
        let evaluator = Evaluator::new();
        let mut acc = GroupAccumulator::new(&keys, Aggregation::Sum, None);

        for row in [object("A", 10), object("A", 30)] {
            acc.fold(&row, &evaluator);
        }
        let rows = acc.finish(None, true);

        assert_eq!(rows[0].get("shallow"), Some(&Value::Int(40)));
    }

    #[test]
    fn pruning_keeps_the_best_ranked_groups() {
        let keys = vec![vec!["class".to_string()]];
        let value = ValueExpr::field(&["shallow"]);
        let evaluator = Evaluator::new();
        let mut acc = sum_by_class(&keys, &value);

        for i in 0..10 {
            acc.fold(&object(&format!("C{}", i), i * 100), &evaluator);
        }
        acc.prune(3, false);

        assert_eq!(acc.len(), 3);
        let rows = acc.finish(Some(GroupSort::Value), false);
        assert_eq!(rows[0].get("shallow"), Some(&Value::Int(900)));
        assert_eq!(rows[2].get("shallow"), Some(&Value::Int(700)));
    }
}
