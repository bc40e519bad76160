use quarry_protocol::Value;
use serde::{Deserialize, Serialize};

/// A parsed query: one root, an optional type selector, bracket
/// predicates and a pipeline. Nodes are read-only once the parser
/// returns; the executor never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub root: SourceRoot,
    pub selector: TypeSelector,
    pub predicates: Vec<BoolExpr>,
    pub pipeline: Vec<PipelineOp>,
    /// `--stream` / `--no-stream` override for the cardinality heuristic.
    pub force_streaming: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceRoot {
    Objects,
    Classes,
    GcRoots,
    Events,
    Metadata,
    ConstantPool,
    Chunks,
}

impl SourceRoot {
    pub fn name(&self) -> &'static str {
        match self {
            SourceRoot::Objects => "objects",
            SourceRoot::Classes => "classes",
            SourceRoot::GcRoots => "gcroots",
            SourceRoot::Events => "events",
            SourceRoot::Metadata => "metadata",
            SourceRoot::ConstantPool => "constantpool",
            SourceRoot::Chunks => "chunks",
        }
    }

    pub fn from_name(name: &str) -> Option<SourceRoot> {
        match name.to_ascii_lowercase().as_str() {
            "objects" => Some(SourceRoot::Objects),
            "classes" => Some(SourceRoot::Classes),
            "gcroots" => Some(SourceRoot::GcRoots),
            "events" => Some(SourceRoot::Events),
            "metadata" => Some(SourceRoot::Metadata),
            "constantpool" => Some(SourceRoot::ConstantPool),
            "chunks" => Some(SourceRoot::Chunks),
            _ => None,
        }
    }
}

/// Restricts a root to matching type names. Empty patterns mean "all".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeSelector {
    pub patterns: Vec<TypePattern>,
    /// Set by the `instanceof` keyword: match subtypes too.
    pub include_subtypes: bool,
}

impl TypeSelector {
    pub fn all() -> TypeSelector {
        TypeSelector::default()
    }

    pub fn is_all(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// A type name pattern, already translated to descriptor form where the
/// surface syntax used Java array suffixes (`int[]` becomes `[I`,
/// `java.lang.Object[][]` becomes `[[Ljava.lang.Object;`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePattern {
    pub name: String,
    /// Contains `*` or `?`; matched as an anchored glob at runtime.
    pub is_glob: bool,
}

impl TypePattern {
    pub fn exact(name: impl Into<String>) -> TypePattern {
        TypePattern {
            name: name.into(),
            is_glob: false,
        }
    }

    pub fn glob(name: impl Into<String>) -> TypePattern {
        TypePattern {
            name: name.into(),
            is_glob: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    /// `~` / `=~`: the right side is an anchored regular expression
    /// tested against the stringified left side.
    Matches,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Matches => "~",
        }
    }
}

/// How a comparison treats a left side that resolves to a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantifier {
    /// At least one element satisfies the comparison (the default).
    Any,
    /// Every element satisfies the comparison.
    All,
    /// No element satisfies the comparison.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoolExpr {
    Compare {
        quantifier: Quantifier,
        left: ValueExpr,
        op: CompareOp,
        right: ValueExpr,
    },
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Not(Box<BoolExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueExpr {
    Literal(Value),
    /// A field path; segments were split on `.` and `/`.
    Field(Vec<String>),
    Binary {
        op: BinaryOp,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
    Call {
        name: String,
        args: Vec<ValueExpr>,
    },
    /// A string literal with `${expr}` embeddings.
    Template(Vec<TemplatePart>),
    /// A boolean expression in value position, as in the condition
    /// argument of `if(cond, then, else)`.
    Cond(Box<BoolExpr>),
}

impl ValueExpr {
    pub fn field(segments: &[&str]) -> ValueExpr {
        ValueExpr::Field(segments.iter().map(|s| s.to_string()).collect())
    }

    pub fn int(i: i64) -> ValueExpr {
        ValueExpr::Literal(Value::Int(i))
    }

    pub fn string(s: impl Into<String>) -> ValueExpr {
        ValueExpr::Literal(Value::string(s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Text(String),
    Expr(ValueExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Aggregation> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Aggregation::Count),
            "sum" => Some(Aggregation::Sum),
            "avg" | "average" => Some(Aggregation::Avg),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectField {
    pub expr: ValueExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: Vec<String>,
    pub ascending: bool,
}

/// What `groupBy` orders its output by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupSort {
    Key,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    Len,
    Uppercase,
    Lowercase,
    Trim,
    Replace,
    Abs,
    Round,
    Floor,
    Ceil,
}

impl TransformKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Len => "len",
            TransformKind::Uppercase => "uppercase",
            TransformKind::Lowercase => "lowercase",
            TransformKind::Trim => "trim",
            TransformKind::Replace => "replace",
            TransformKind::Abs => "abs",
            TransformKind::Round => "round",
            TransformKind::Floor => "floor",
            TransformKind::Ceil => "ceil",
        }
    }

    pub fn from_name(name: &str) -> Option<TransformKind> {
        match name {
            "len" => Some(TransformKind::Len),
            "uppercase" => Some(TransformKind::Uppercase),
            "lowercase" => Some(TransformKind::Lowercase),
            "trim" => Some(TransformKind::Trim),
            "replace" => Some(TransformKind::Replace),
            "abs" => Some(TransformKind::Abs),
            "round" => Some(TransformKind::Round),
            "floor" => Some(TransformKind::Floor),
            "ceil" => Some(TransformKind::Ceil),
            _ => None,
        }
    }
}

/// `checkLeaks` arguments; exactly one of `detector`/`filter` is set,
/// which the parser enforces.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckLeaksArgs {
    pub detector: Option<String>,
    pub filter: Option<BoolExpr>,
    pub threshold: Option<f64>,
    pub min_size: Option<i64>,
    pub duration: Option<i64>,
    pub format: Option<String>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineOp {
    Select(Vec<SelectField>),
    Filter(BoolExpr),
    /// Without `order_by` this takes the first `count` rows of the
    /// current order: after a `sortBy` that is "first n after the
    /// sort", at the head of a stream it is "first n emitted". Users
    /// rely on that, so it is preserved deliberately.
    Top {
        count: usize,
        order_by: Option<Vec<String>>,
        ascending: bool,
    },
    Head(usize),
    Tail(usize),
    Skip(usize),
    SortBy(Vec<SortKey>),
    Distinct(Vec<String>),
    Count,
    Aggregate {
        agg: Aggregation,
        field: Vec<String>,
    },
    Stats(Vec<String>),
    GroupBy {
        keys: Vec<Vec<String>>,
        agg: Aggregation,
        value: Option<ValueExpr>,
        sort: Option<GroupSort>,
        ascending: bool,
    },
    Transform {
        kind: TransformKind,
        field: Vec<String>,
        args: Vec<Value>,
    },
    PathToRoot {
        decorator_key: Option<String>,
    },
    RetentionPaths,
    RetainedBreakdown {
        max_depth: usize,
    },
    Dominators {
        mode: String,
    },
    CheckLeaks(CheckLeaksArgs),
}

impl PipelineOp {
    /// Operators that can head a streaming pipeline: they reduce an
    /// unbounded stream to a bounded intermediate.
    pub fn is_stream_head(&self) -> bool {
        matches!(
            self,
            PipelineOp::Top { .. }
                | PipelineOp::GroupBy { .. }
                | PipelineOp::Count
                | PipelineOp::Aggregate { .. }
                | PipelineOp::Stats(_)
        )
    }
}
