//! The scalar function library. Every function is total: type or arity
//! mismatches yield null, matching the per-row error policy.

use quarry_protocol::Value;

pub fn call(name: &str, args: &[Value]) -> Value {
    match name {
        "upper" => string_fn(args, |s| s.to_uppercase()),
        "lower" => string_fn(args, |s| s.to_lowercase()),
        "trim" => string_fn(args, |s| s.trim().to_string()),
        "length" => length(args.first()),
        "substring" => substring(args),
        "replace" => replace(args),
        "abs" => abs(args.first()),
        "round" => numeric_fn(args, f64::round),
        "floor" => numeric_fn(args, f64::floor),
        "ceil" => numeric_fn(args, f64::ceil),
        "coalesce" => args
            .iter()
            .find(|value| !value.is_nothing())
            .cloned()
            .unwrap_or(Value::Nothing),
        "if" => match args {
            [cond, then, otherwise] => {
                if cond.is_truthy() {
                    then.clone()
                } else {
                    otherwise.clone()
                }
            }
            _ => Value::Nothing,
        },
        "contains" => contains(args),
        "startsWith" => string_pair(args, |s, needle| s.starts_with(needle)),
        "endsWith" => string_pair(args, |s, needle| s.ends_with(needle)),
        _ => Value::Nothing,
    }
}

fn string_fn(args: &[Value], f: impl Fn(&str) -> String) -> Value {
    match args.first() {
        Some(Value::Nothing) | None => Value::Nothing,
        Some(Value::List(_)) | Some(Value::Row(_)) => Value::Nothing,
        Some(scalar) => Value::String(f(&scalar.to_string())),
    }
}

fn string_pair(args: &[Value], f: impl Fn(&str, &str) -> bool) -> Value {
    match args {
        [haystack, needle] if !haystack.is_nothing() && !needle.is_nothing() => {
            Value::Boolean(f(&haystack.to_string(), &needle.to_string()))
        }
        _ => Value::Nothing,
    }
}

fn numeric_fn(args: &[Value], f: impl Fn(f64) -> f64) -> Value {
    match args.first() {
        Some(Value::Int(i)) => Value::Int(*i),
        Some(Value::Float(fl)) => Value::Int(f(*fl) as i64),
        _ => Value::Nothing,
    }
}

fn length(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => Value::Int(s.chars().count() as i64),
        Some(Value::List(items)) => Value::Int(items.len() as i64),
        Some(Value::Row(row)) => Value::Int(row.len() as i64),
        _ => Value::Nothing,
    }
}

fn substring(args: &[Value]) -> Value {
    let text = match args.first() {
        Some(Value::Nothing) | Some(Value::List(_)) | Some(Value::Row(_)) | None => {
            return Value::Nothing
        }
        Some(scalar) => scalar.to_string(),
    };
    let start = match args.get(1).and_then(Value::as_int) {
        Some(start) => start.max(0) as usize,
        None => return Value::Nothing,
    };
    let chars: Vec<char> = text.chars().collect();
    let end = match args.get(2) {
        None => chars.len(),
        Some(value) => match value.as_int() {
            Some(end) => (end.max(0) as usize).min(chars.len()),
            None => return Value::Nothing,
        },
    };
    if start >= end {
        return Value::String(String::new());
    }
    Value::String(chars[start..end].iter().collect())
}

fn replace(args: &[Value]) -> Value {
    match args {
        [text, from, to]
            if !text.is_nothing() && !from.is_nothing() && !to.is_nothing() =>
        {
            Value::String(
                text.to_string()
                    .replace(&from.to_string(), &to.to_string()),
            )
        }
        _ => Value::Nothing,
    }
}

fn abs(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Int(i)) => Value::Int(i.saturating_abs()),
        Some(Value::Float(f)) => Value::Float(f.abs()),
        _ => Value::Nothing,
    }
}

fn contains(args: &[Value]) -> Value {
    match args {
        [Value::List(items), needle] => Value::Boolean(
            items
                .iter()
                .any(|item| quarry_protocol::value_eq(item, needle)),
        ),
        [haystack, needle] if !haystack.is_nothing() && !needle.is_nothing() => {
            Value::Boolean(haystack.to_string().contains(&needle.to_string()))
        }
        _ => Value::Nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_trim() {
        assert_eq!(call("upper", &[Value::string("abc")]), Value::string("ABC"));
        assert_eq!(call("lower", &[Value::string("AbC")]), Value::string("abc"));
        assert_eq!(call("trim", &[Value::string("  x ")]), Value::string("x"));
    }

    #[test]
    fn length_counts_chars_elements_and_fields() {
        assert_eq!(call("length", &[Value::string("héllo")]), Value::Int(5));
        assert_eq!(
            call("length", &[Value::list(vec![Value::Int(1), Value::Int(2)])]),
            Value::Int(2)
        );
        assert_eq!(call("length", &[Value::Int(5)]), Value::Nothing);
    }

    #[test]
    fn substring_clamps_its_range() {
        let text = Value::string("heapdump");
        assert_eq!(
            call("substring", &[text.clone(), Value::Int(0), Value::Int(4)]),
            Value::string("heap")
        );
        assert_eq!(
            call("substring", &[text.clone(), Value::Int(4)]),
            Value::string("dump")
        );
        assert_eq!(
            call("substring", &[text, Value::Int(6), Value::Int(100)]),
            Value::string("mp")
        );
    }

    #[test]
    fn rounding_family_yields_integers() {
        assert_eq!(call("round", &[Value::Float(2.5)]), Value::Int(3));
        assert_eq!(call("floor", &[Value::Float(2.9)]), Value::Int(2));
        assert_eq!(call("ceil", &[Value::Float(2.1)]), Value::Int(3));
        assert_eq!(call("abs", &[Value::Int(-7)]), Value::Int(7));
    }

    #[test]
    fn coalesce_takes_the_first_non_null() {
        assert_eq!(
            call(
                "coalesce",
                &[Value::Nothing, Value::Nothing, Value::Int(3), Value::Int(4)]
            ),
            Value::Int(3)
        );
        assert_eq!(call("coalesce", &[Value::Nothing]), Value::Nothing);
    }

    #[test]
    fn truthiness_drives_if() {
        assert_eq!(
            call("if", &[Value::Int(1), Value::string("y"), Value::string("n")]),
            Value::string("y")
        );
        assert_eq!(
            call("if", &[Value::string(""), Value::string("y"), Value::string("n")]),
            Value::string("n")
        );
        assert_eq!(
            call("if", &[Value::Nothing, Value::string("y"), Value::string("n")]),
            Value::string("n")
        );
    }

    #[test]
    fn containment_family() {
        assert_eq!(
            call(
                "contains",
                &[Value::string("java.lang.String"), Value::string("lang")]
            ),
            Value::Boolean(true)
        );
        assert_eq!(
            call(
                "startsWith",
                &[Value::string("java.lang.String"), Value::string("java.")]
            ),
            Value::Boolean(true)
        );
        assert_eq!(
            call(
                "endsWith",
                &[Value::string("java.lang.String"), Value::string("Map")]
            ),
            Value::Boolean(false)
        );
    }

    #[test]
    fn contains_searches_lists_by_equality() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call("contains", &[list.clone(), Value::Int(2)]), Value::Boolean(true));
        assert_eq!(call("contains", &[list, Value::Int(5)]), Value::Boolean(false));
    }
}
