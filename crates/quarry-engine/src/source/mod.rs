//! The seam between the query core and whatever loaded the dump or
//! recording. The core only ever sees rows; file formats, indices and
//! graph precomputation stay on the far side of these traits.

mod memory;

pub use memory::InMemorySource;

use quarry_errors::QueryError;
use quarry_parser::ast::SourceRoot;
use quarry_protocol::Row;

/// A lazily produced sequence of rows. The executor drives it
/// synchronously; the adapter may block on I/O inside `next`. An
/// adapter that decodes on worker threads must serialize rows into this
/// iterator itself; the core never synchronizes.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row, QueryError>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// Event/type metadata by type name.
    Metadata,
    /// A heap class row by its binary name.
    ClassByName,
}

/// A loaded heap dump or recording, projected to rows.
///
/// Only `stream` is mandatory. Everything else is a capability the
/// engine probes for and works around when absent: a missing count
/// disables the streaming heuristic, a missing index falls back to a
/// full scan, a missing graph service turns graph operators into error
/// rows.
pub trait HeapSource {
    /// Short label for logs and progress, typically the file name.
    fn label(&self) -> &str;

    fn stream(&mut self, root: SourceRoot) -> Result<RowStream<'_>, QueryError>;

    fn total_count(&self, _root: SourceRoot) -> Option<u64> {
        None
    }

    fn lookup(&self, _kind: LookupKind, _name: &str) -> Option<Row> {
        None
    }

    /// Index over instances of one exact class, when the backend built one.
    fn objects_of_class(&mut self, _class_name: &str) -> Option<RowStream<'_>> {
        None
    }

    fn graph(&self) -> Option<&dyn GraphService> {
        None
    }
}

/// One hop in a path from an object towards a GC root.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub object_id: i64,
    pub class_name: String,
    /// Field in the referring object this hop was reached through.
    pub field: Option<String>,
    /// Set on the terminal step: which kind of GC root holds it.
    pub root_kind: Option<String>,
}

/// One node of a retained-size breakdown tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakdownNode {
    pub name: String,
    pub retained: i64,
    pub count: u64,
    pub children: Vec<BreakdownNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DominatorEntry {
    pub object_id: i64,
    pub class_name: String,
    pub retained: i64,
    pub dominated_count: u64,
}

/// Heavyweight graph analyses behind precomputed indices (dominator
/// tree, reachability). Methods report `QueryError::Unsupported` when
/// their precondition has not been computed yet; the pipeline turns
/// that into a single error row instead of aborting.
pub trait GraphService {
    fn path_to_root(&self, object_id: i64) -> Result<Vec<PathStep>, QueryError>;

    fn retention_paths(&self, object_id: i64) -> Result<Vec<Vec<PathStep>>, QueryError>;

    fn retained_breakdown(
        &self,
        object_id: i64,
        max_depth: usize,
    ) -> Result<BreakdownNode, QueryError>;

    fn dominators(&self, mode: &str) -> Result<Vec<DominatorEntry>, QueryError>;

    fn leak_detectors(&self) -> Vec<String>;

    fn run_detector(
        &self,
        name: &str,
        threshold: Option<f64>,
        min_size: Option<i64>,
    ) -> Result<Vec<Row>, QueryError>;
}
