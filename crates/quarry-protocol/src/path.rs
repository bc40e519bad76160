use crate::value::Value;

/// Extracts a nested value by walking `segments` through rows and lists.
///
/// Stepping into a list applies the remaining path to every element and
/// collects the results, so `threads.name` over a list of thread rows
/// yields the list of names. Any missing segment yields null rather than
/// an error; per-row lookup failures never abort a query.
pub fn get_path(value: &Value, segments: &[String]) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return value.clone();
    };

    match value {
        Value::Row(row) => match row.get(head) {
            Some(inner) => get_path(inner, rest),
            None => Value::Nothing,
        },
        Value::List(items) => {
            Value::List(items.iter().map(|item| get_path(item, segments)).collect())
        }
        _ => Value::Nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    fn sample() -> Value {
        Value::row(indexmap! {
            "id".into() => Value::int(7),
            "thread".into() => Value::row(indexmap! {
                "name".into() => Value::string("main"),
                "frames".into() => Value::list(vec![
                    Value::row(indexmap! { "method".into() => Value::string("run") }),
                    Value::row(indexmap! { "method".into() => Value::string("call") }),
                ]),
            }),
        })
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn walks_nested_rows() {
        assert_eq!(
            get_path(&sample(), &path(&["thread", "name"])),
            Value::string("main")
        );
    }

    #[test]
    fn maps_remaining_path_over_lists() {
        assert_eq!(
            get_path(&sample(), &path(&["thread", "frames", "method"])),
            Value::list(vec![Value::string("run"), Value::string("call")])
        );
    }

    #[test]
    fn missing_segment_yields_nothing() {
        assert_eq!(get_path(&sample(), &path(&["thread", "stack"])), Value::Nothing);
        assert_eq!(get_path(&sample(), &path(&["id", "low"])), Value::Nothing);
    }
}
