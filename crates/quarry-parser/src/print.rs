//! Canonical rendering of the AST. Printing and reparsing a query gives
//! back the same tree, which is what the round-trip tests pin down.

use crate::ast::*;
use quarry_protocol::Value;
use std::fmt;

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.root.name())?;

        if !self.selector.is_all() {
            write!(f, "/")?;
            if self.selector.include_subtypes {
                write!(f, "instanceof ")?;
            }
            if self.selector.patterns.len() == 1 {
                write!(f, "{}", self.selector.patterns[0].name)?;
            } else {
                write!(f, "(")?;
                for (idx, pattern) in self.selector.patterns.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", pattern.name)?;
                }
                write!(f, ")")?;
            }
        }

        for predicate in &self.predicates {
            write!(f, "[{}]", predicate)?;
        }

        for op in &self.pipeline {
            write!(f, " | {}", op)?;
        }

        match self.force_streaming {
            Some(true) => write!(f, " --stream")?,
            Some(false) => write!(f, " --no-stream")?,
            None => {}
        }

        Ok(())
    }
}

// precedence levels: or < and < not < comparison
fn fmt_bool(expr: &BoolExpr, f: &mut fmt::Formatter, parent: u8) -> fmt::Result {
    let prec = match expr {
        BoolExpr::Or(..) => 1,
        BoolExpr::And(..) => 2,
        BoolExpr::Not(..) => 3,
        BoolExpr::Compare { .. } => 4,
    };
    if prec < parent {
        write!(f, "(")?;
    }
    match expr {
        BoolExpr::Or(left, right) => {
            fmt_bool(left, f, 1)?;
            write!(f, " or ")?;
            fmt_bool(right, f, 2)?;
        }
        BoolExpr::And(left, right) => {
            fmt_bool(left, f, 2)?;
            write!(f, " and ")?;
            fmt_bool(right, f, 3)?;
        }
        BoolExpr::Not(inner) => {
            write!(f, "not ")?;
            fmt_bool(inner, f, 3)?;
        }
        BoolExpr::Compare {
            quantifier,
            left,
            op,
            right,
        } => {
            let wrapper = match quantifier {
                Quantifier::Any => None,
                Quantifier::All => Some("all"),
                Quantifier::None => Some("none"),
            };
            if let Some(name) = wrapper {
                write!(f, "{}(", name)?;
            }
            write!(f, "{} {} {}", left, op.symbol(), right)?;
            if wrapper.is_some() {
                write!(f, ")")?;
            }
        }
    }
    if prec < parent {
        write!(f, ")")?;
    }
    Ok(())
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_bool(self, f, 0)
    }
}

// precedence levels: additive < multiplicative < primary
fn fmt_value(expr: &ValueExpr, f: &mut fmt::Formatter, parent: u8) -> fmt::Result {
    let prec = match expr {
        ValueExpr::Binary { op, .. } => match op {
            BinaryOp::Add | BinaryOp::Subtract => 1,
            BinaryOp::Multiply | BinaryOp::Divide => 2,
        },
        _ => 3,
    };
    if prec < parent {
        write!(f, "(")?;
    }
    match expr {
        ValueExpr::Literal(value) => fmt_literal(value, f)?,
        ValueExpr::Field(segments) => write!(f, "{}", segments.join("."))?,
        ValueExpr::Binary { op, left, right } => {
            fmt_value(left, f, prec)?;
            write!(f, " {} ", op.symbol())?;
            // same-precedence right children keep their parentheses so
            // `a - (b - c)` survives the round trip
            fmt_value(right, f, prec + 1)?;
        }
        ValueExpr::Call { name, args } => {
            write!(f, "{}(", name)?;
            for (idx, arg) in args.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ")")?;
        }
        ValueExpr::Template(parts) => {
            write!(f, "\"")?;
            for part in parts {
                match part {
                    TemplatePart::Text(text) => write!(f, "{}", escaped(text))?,
                    TemplatePart::Expr(expr) => write!(f, "${{{}}}", expr)?,
                }
            }
            write!(f, "\"")?;
        }
        ValueExpr::Cond(inner) => write!(f, "{}", inner)?,
    }
    if prec < parent {
        write!(f, ")")?;
    }
    Ok(())
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_value(self, f, 0)
    }
}

fn fmt_literal(value: &Value, f: &mut fmt::Formatter) -> fmt::Result {
    match value {
        Value::Nothing => write!(f, "null"),
        Value::Boolean(b) => write!(f, "{}", b),
        Value::Int(i) => write!(f, "{}", i),
        Value::Float(fl) => write!(f, "{}", float_repr(*fl)),
        Value::String(s) => write!(f, "\"{}\"", escaped(s)),
        // lists and rows have no literal syntax; render for diagnostics
        other => write!(f, "\"{}\"", escaped(&other.to_string())),
    }
}

/// Whole floats keep a decimal point so they reparse as floats.
fn float_repr(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn escaped(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn fmt_path(f: &mut fmt::Formatter, path: &[String]) -> fmt::Result {
    write!(f, "{}", path.join("."))
}

impl fmt::Display for PipelineOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineOp::Select(fields) => {
                write!(f, "select(")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field.expr)?;
                    if let Some(alias) = &field.alias {
                        write!(f, " as {}", alias)?;
                    }
                }
                write!(f, ")")
            }
            PipelineOp::Filter(expr) => write!(f, "filter({})", expr),
            PipelineOp::Top {
                count,
                order_by,
                ascending,
            } => {
                write!(f, "top({}", count)?;
                if let Some(path) = order_by {
                    write!(f, ", ")?;
                    fmt_path(f, path)?;
                }
                if *ascending {
                    write!(f, ", asc")?;
                }
                write!(f, ")")
            }
            PipelineOp::Head(n) => write!(f, "head({})", n),
            PipelineOp::Tail(n) => write!(f, "tail({})", n),
            PipelineOp::Skip(n) => write!(f, "skip({})", n),
            PipelineOp::SortBy(keys) => {
                write!(f, "sortBy(")?;
                for (idx, key) in keys.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_path(f, &key.field)?;
                    if !key.ascending {
                        write!(f, " desc")?;
                    }
                }
                write!(f, ")")
            }
            PipelineOp::Distinct(field) => {
                write!(f, "distinct(")?;
                fmt_path(f, field)?;
                write!(f, ")")
            }
            PipelineOp::Count => write!(f, "count()"),
            PipelineOp::Aggregate { agg, field } => {
                write!(f, "{}(", agg.name())?;
                fmt_path(f, field)?;
                write!(f, ")")
            }
            PipelineOp::Stats(field) => {
                write!(f, "stats(")?;
                fmt_path(f, field)?;
                write!(f, ")")
            }
            PipelineOp::GroupBy {
                keys,
                agg,
                value,
                sort,
                ascending,
            } => {
                write!(f, "groupBy(")?;
                for (idx, key) in keys.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_path(f, key)?;
                }
                write!(f, ", agg={}", agg.name())?;
                if let Some(value) = value {
                    write!(f, ", value={}", value)?;
                }
                if let Some(sort) = sort {
                    let sort_name = match sort {
                        GroupSort::Key => "key",
                        GroupSort::Value => "value",
                    };
                    write!(f, ", sortBy={}, asc={}", sort_name, ascending)?;
                }
                write!(f, ")")
            }
            PipelineOp::Transform { kind, field, args } => {
                write!(f, "{}(", kind.name())?;
                fmt_path(f, field)?;
                for arg in args {
                    write!(f, ", ")?;
                    fmt_literal(arg, f)?;
                }
                write!(f, ")")
            }
            PipelineOp::PathToRoot { decorator_key } => {
                write!(f, "pathToRoot(")?;
                if let Some(key) = decorator_key {
                    write!(f, "decoratorKey=\"{}\"", escaped(key))?;
                }
                write!(f, ")")
            }
            PipelineOp::RetentionPaths => write!(f, "retentionPaths()"),
            PipelineOp::RetainedBreakdown { max_depth } => {
                write!(f, "retainedBreakdown({})", max_depth)
            }
            PipelineOp::Dominators { mode } => write!(f, "dominators({})", mode),
            PipelineOp::CheckLeaks(args) => {
                let mut parts: Vec<String> = Vec::new();
                if let Some(detector) = &args.detector {
                    parts.push(format!("detector=\"{}\"", escaped(detector)));
                }
                if let Some(filter) = &args.filter {
                    parts.push(format!("filter={}", filter));
                }
                if let Some(threshold) = args.threshold {
                    parts.push(format!("threshold={}", float_repr(threshold)));
                }
                if let Some(min_size) = args.min_size {
                    parts.push(format!("minSize={}", min_size));
                }
                if let Some(duration) = args.duration {
                    parts.push(format!("duration={}", duration));
                }
                if let Some(format) = &args.format {
                    parts.push(format!("format=\"{}\"", escaped(format)));
                }
                if !args.fields.is_empty() {
                    parts.push(format!("fields=\"{}\"", escaped(&args.fields.join(","))));
                }
                write!(f, "checkLeaks({})", parts.join(", "))
            }
        }
    }
}
