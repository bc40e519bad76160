use crate::path;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An ordered mapping from field names to values.
///
/// Keys are unique within a row and iteration preserves insertion order.
/// Rows are treated as immutable once emitted downstream; stages that
/// reshape data build new rows through [`RowBuilder`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    entries: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Row {
        Row {
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Walks a dotted path into nested rows, yielding null on any miss.
    pub fn get_path(&self, segments: &[String]) -> Value {
        match segments.split_first() {
            None => Value::Row(self.clone()),
            Some((head, rest)) => match self.get(head) {
                Some(inner) => path::get_path(inner, rest),
                None => Value::Nothing,
            },
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &IndexMap<String, Value> {
        &self.entries
    }
}

impl From<IndexMap<String, Value>> for Row {
    fn from(entries: IndexMap<String, Value>) -> Row {
        Row { entries }
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Row {
        Row {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Builds a row field by field, preserving insertion order.
#[derive(Debug, Default)]
pub struct RowBuilder {
    entries: IndexMap<String, Value>,
}

impl RowBuilder {
    pub fn new() -> RowBuilder {
        RowBuilder {
            entries: IndexMap::new(),
        }
    }

    pub fn with_capacity(n: usize) -> RowBuilder {
        RowBuilder {
            entries: IndexMap::with_capacity(n),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn insert_int(&mut self, key: impl Into<String>, value: i64) {
        self.insert(key, Value::Int(value));
    }

    pub fn insert_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, Value::string(value));
    }

    pub fn into_row(self) -> Row {
        Row {
            entries: self.entries,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Row(self.into_row())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn builder_preserves_insertion_order() {
        let mut builder = RowBuilder::new();
        builder.insert_string("class", "A");
        builder.insert_int("shallow", 40);
        builder.insert_int("count", 2);

        let row = builder.into_row();
        let keys: Vec<&String> = row.keys().collect();

        assert_eq!(keys, vec!["class", "shallow", "count"]);
    }

    #[test]
    fn duplicate_insert_keeps_position_and_replaces_value() {
        let mut row = Row::new();
        row.insert("a", Value::int(1));
        row.insert("b", Value::int(2));
        row.insert("a", Value::int(3));

        assert_eq!(row.get("a"), Some(&Value::int(3)));
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn get_path_reaches_nested_rows() {
        let row: Row = indexmap! {
            "thread".to_string() => Value::row(indexmap! {
                "name".to_string() => Value::string("main"),
            }),
        }
        .into();

        let path = vec!["thread".to_string(), "name".to_string()];
        assert_eq!(row.get_path(&path), Value::string("main"));
    }
}
