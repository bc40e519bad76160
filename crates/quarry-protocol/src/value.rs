use crate::row::Row;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic value flowing through a query pipeline.
///
/// Integers are 64-bit signed, floats are IEEE 754 doubles. Anything a
/// backend produces is projected into this set before the core sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nothing,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Row(Row),
}

impl Value {
    pub fn nothing() -> Value {
        Value::Nothing
    }

    pub fn boolean(b: bool) -> Value {
        Value::Boolean(b)
    }

    pub fn int(i: impl Into<i64>) -> Value {
        Value::Int(i.into())
    }

    pub fn float(f: f64) -> Value {
        Value::Float(f)
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn list(values: Vec<Value>) -> Value {
        Value::List(values)
    }

    pub fn row(entries: IndexMap<String, Value>) -> Value {
        Value::Row(Row::from(entries))
    }

    /// A list of rows, the shape most pipeline stages produce.
    pub fn table(rows: Vec<Row>) -> Value {
        Value::List(rows.into_iter().map(Value::Row).collect())
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Truthiness for `if(cond, then, else)`: non-null, non-zero, non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nothing => false,
            Value::Boolean(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Row(r) => !r.is_empty(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Value::Row(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Row(_) => "row",
        }
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Value {
        Value::Row(row)
    }
}

/// The rendering used for string comparison, concatenation and templates.
/// Integers never show a trailing `.0`; null renders as the empty string.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nothing => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Row(row) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in row.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn integers_render_without_trailing_zero() {
        assert_eq!(Value::int(1024).to_string(), "1024");
        assert_eq!(Value::float(2.5).to_string(), "2.5");
    }

    #[test]
    fn nothing_renders_empty() {
        assert_eq!(Value::nothing().to_string(), "");
    }

    #[test]
    fn rows_render_in_insertion_order() {
        let value = Value::row(indexmap! {
            "class".into() => Value::string("java.lang.String"),
            "shallow".into() => Value::int(24),
        });

        assert_eq!(value.to_string(), "{class: java.lang.String, shallow: 24}");
    }

    #[test]
    fn truthiness_is_non_null_non_zero_non_empty() {
        assert!(!Value::nothing().is_truthy());
        assert!(!Value::int(0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::int(-1).is_truthy());
        assert!(Value::string("x").is_truthy());
    }
}
