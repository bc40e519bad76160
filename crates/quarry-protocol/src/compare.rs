use crate::value::Value;
use std::cmp::Ordering;

/// Equality as the predicate evaluator sees it: null equals only null,
/// numerics compare after double promotion, everything else compares by
/// its rendering.
pub fn value_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nothing, Value::Nothing) => true,
        (Value::Nothing, _) | (_, Value::Nothing) => false,
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => left.to_string() == right.to_string(),
        },
    }
}

/// Ordering over non-null values: double promotion for numeric pairs,
/// lexicographic comparison of renderings otherwise. NaN compares equal
/// to everything numeric, which keeps sorts total.
pub fn compare_numeric(left: &Value, right: &Value) -> Ordering {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

/// The ascending sort ordering, with the null sentinel placed last.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left.is_nothing(), right.is_nothing()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_numeric(left, right),
    }
}
