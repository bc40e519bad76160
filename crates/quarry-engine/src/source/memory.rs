use crate::source::{GraphService, HeapSource, LookupKind, RowStream};
use quarry_errors::QueryError;
use quarry_parser::ast::SourceRoot;
use quarry_protocol::{Row, Value};
use std::collections::HashMap;

/// The reference adapter: tables of rows held in memory, with every
/// optional capability individually switchable. Tests use it both as
/// the fully-featured source and, with capabilities off, to prove the
/// engine's fallback paths.
#[derive(Default)]
pub struct InMemorySource {
    label: String,
    tables: HashMap<SourceRoot, Vec<Row>>,
    reported_counts: HashMap<SourceRoot, u64>,
    class_index: bool,
    graph: Option<Box<dyn GraphService>>,
}

impl InMemorySource {
    pub fn new(label: impl Into<String>) -> InMemorySource {
        InMemorySource {
            label: label.into(),
            ..InMemorySource::default()
        }
    }

    pub fn with_rows(mut self, root: SourceRoot, rows: Vec<Row>) -> Self {
        self.tables.insert(root, rows);
        self
    }

    /// Overrides what `total_count` reports, so tests can claim millions
    /// of rows while streaming only a handful.
    pub fn with_reported_count(mut self, root: SourceRoot, count: u64) -> Self {
        self.reported_counts.insert(root, count);
        self
    }

    /// Enables the objects-of-class index over the objects table.
    pub fn with_class_index(mut self) -> Self {
        self.class_index = true;
        self
    }

    pub fn with_graph(mut self, graph: Box<dyn GraphService>) -> Self {
        self.graph = Some(graph);
        self
    }

    fn rows(&self, root: SourceRoot) -> Vec<Row> {
        self.tables.get(&root).cloned().unwrap_or_default()
    }
}

impl HeapSource for InMemorySource {
    fn label(&self) -> &str {
        &self.label
    }

    fn stream(&mut self, root: SourceRoot) -> Result<RowStream<'_>, QueryError> {
        let rows = self.rows(root);
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn total_count(&self, root: SourceRoot) -> Option<u64> {
        self.reported_counts
            .get(&root)
            .copied()
            .or_else(|| self.tables.get(&root).map(|rows| rows.len() as u64))
    }

    fn lookup(&self, kind: LookupKind, name: &str) -> Option<Row> {
        let (root, key) = match kind {
            LookupKind::Metadata => (SourceRoot::Metadata, "name"),
            LookupKind::ClassByName => (SourceRoot::Classes, "name"),
        };
        self.tables.get(&root)?.iter().find_map(|row| {
            if row.get(key) == Some(&Value::string(name)) {
                Some(row.clone())
            } else {
                None
            }
        })
    }

    fn objects_of_class(&mut self, class_name: &str) -> Option<RowStream<'_>> {
        if !self.class_index {
            return None;
        }
        let wanted = Value::string(class_name);
        let rows: Vec<Row> = self
            .rows(SourceRoot::Objects)
            .into_iter()
            .filter(|row| row.get("className") == Some(&wanted))
            .collect();
        Some(Box::new(rows.into_iter().map(Ok)))
    }

    fn graph(&self) -> Option<&dyn GraphService> {
        self.graph.as_deref()
    }
}
