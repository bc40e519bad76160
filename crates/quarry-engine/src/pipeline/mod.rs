pub mod aggregate;
pub mod graph;
pub mod group;
pub mod materialized;
pub mod streaming;

use quarry_protocol::{compare_numeric, Value};
use std::cmp::Ordering;

/// Ranking used by `top` and the capped group buffer: nulls sort last in
/// both directions, so a missing field can never crowd out real values.
pub(crate) fn rank(a: &Value, b: &Value, ascending: bool) -> Ordering {
    match (a.is_nothing(), b.is_nothing()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            if ascending {
                compare_numeric(a, b)
            } else {
                compare_numeric(b, a)
            }
        }
    }
}

/// Values are not hashable, so grouping and `distinct` bucket by a
/// type-prefixed rendering; `5` the int and `"5"` the string land apart.
pub(crate) fn value_key(value: &Value) -> String {
    format!("{}\u{1}{}", value.type_name(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_keeps_nulls_last_in_both_directions() {
        let null = Value::Nothing;
        let five = Value::Int(5);

        assert_eq!(rank(&null, &five, true), Ordering::Greater);
        assert_eq!(rank(&null, &five, false), Ordering::Greater);
        assert_eq!(rank(&five, &null, false), Ordering::Less);
    }

    #[test]
    fn value_keys_distinguish_types() {
        assert_ne!(value_key(&Value::Int(5)), value_key(&Value::string("5")));
        assert_ne!(value_key(&Value::Nothing), value_key(&Value::string("")));
    }
}
