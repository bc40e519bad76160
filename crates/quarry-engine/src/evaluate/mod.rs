//! Evaluation of scalar expressions and predicates against a single
//! row. Per-row failures (missing fields, type mismatches) fold to null
//! and never abort the query; only the parser rejects queries.

pub(crate) mod functions;

use quarry_parser::ast::{BinaryOp, BoolExpr, CompareOp, Quantifier, TemplatePart, ValueExpr};
use quarry_protocol::{compare_numeric, value_eq, Row, Value};
use regex::Regex;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Evaluates expressions for one query. Owns a cache of compiled regex
/// patterns so `~` predicates don't recompile per row on long scans.
#[derive(Default)]
pub struct Evaluator {
    regex_cache: RefCell<HashMap<String, Option<Regex>>>,
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator::default()
    }

    pub fn evaluate(&self, expr: &ValueExpr, row: &Row) -> Value {
        match expr {
            ValueExpr::Literal(value) => value.clone(),
            ValueExpr::Field(path) => row.get_path(path),
            ValueExpr::Binary { op, left, right } => {
                let left = self.evaluate(left, row);
                let right = self.evaluate(right, row);
                binary(*op, &left, &right)
            }
            ValueExpr::Call { name, args } => {
                let args: Vec<Value> = args.iter().map(|arg| self.evaluate(arg, row)).collect();
                functions::call(name, &args)
            }
            ValueExpr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        // null renders as the empty string
                        TemplatePart::Expr(expr) => {
                            out.push_str(&self.evaluate(expr, row).to_string())
                        }
                    }
                }
                Value::String(out)
            }
            ValueExpr::Cond(inner) => Value::Boolean(self.matches(inner, row)),
        }
    }

    pub fn matches(&self, expr: &BoolExpr, row: &Row) -> bool {
        match expr {
            BoolExpr::And(left, right) => self.matches(left, row) && self.matches(right, row),
            BoolExpr::Or(left, right) => self.matches(left, row) || self.matches(right, row),
            BoolExpr::Not(inner) => !self.matches(inner, row),
            BoolExpr::Compare {
                quantifier,
                left,
                op,
                right,
            } => {
                let left = self.evaluate(left, row);
                let right = self.evaluate(right, row);
                self.compare(*quantifier, &left, *op, &right)
            }
        }
    }

    /// When the left side resolved to a sequence, the quantifier decides
    /// how the element-wise comparisons combine. An empty sequence
    /// satisfies `all` and `none` vacuously, never `any`.
    fn compare(&self, quantifier: Quantifier, left: &Value, op: CompareOp, right: &Value) -> bool {
        match left {
            Value::List(items) => match quantifier {
                Quantifier::Any => items.iter().any(|item| self.compare_scalar(item, op, right)),
                Quantifier::All => items.iter().all(|item| self.compare_scalar(item, op, right)),
                Quantifier::None => !items.iter().any(|item| self.compare_scalar(item, op, right)),
            },
            scalar => {
                let hit = self.compare_scalar(scalar, op, right);
                if quantifier == Quantifier::None {
                    !hit
                } else {
                    hit
                }
            }
        }
    }

    fn compare_scalar(&self, left: &Value, op: CompareOp, right: &Value) -> bool {
        match op {
            CompareOp::Eq => value_eq(left, right),
            CompareOp::NotEq => !value_eq(left, right),
            CompareOp::Matches => self.regex_match(left, right),
            ordered => {
                // ordered comparisons never hold against null
                if left.is_nothing() || right.is_nothing() {
                    return false;
                }
                let ordering = compare_numeric(left, right);
                match ordered {
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    _ => unreachable!("equality handled above"),
                }
            }
        }
    }

    /// The right side is treated as an anchored regular expression and
    /// tested against the stringified left side. An invalid pattern
    /// matches nothing.
    fn regex_match(&self, left: &Value, right: &Value) -> bool {
        if left.is_nothing() || right.is_nothing() {
            return false;
        }
        let pattern = right.to_string();
        let mut cache = self.regex_cache.borrow_mut();
        let compiled = cache.entry(pattern.clone()).or_insert_with(|| {
            match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    log::debug!("invalid match pattern '{}': {}", pattern, err);
                    None
                }
            }
        });
        match compiled {
            Some(regex) => regex.is_match(&left.to_string()),
            None => false,
        }
    }
}

/// `+` adds when both sides are numeric and concatenates renderings
/// otherwise. The other operators promote to double; division by zero
/// is NaN, not an error.
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Int(l), Value::Int(r)) => match l.checked_add(*r) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(*l as f64 + *r as f64),
            },
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => Value::Float(l + r),
                _ => Value::String(format!("{}{}", left, right)),
            },
        },
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return Value::Nothing;
            };
            match op {
                BinaryOp::Subtract => Value::Float(l - r),
                BinaryOp::Multiply => Value::Float(l * r),
                BinaryOp::Divide => {
                    if r == 0.0 {
                        Value::Float(f64::NAN)
                    } else {
                        Value::Float(l / r)
                    }
                }
                BinaryOp::Add => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use quarry_parser::parse_predicate;

    fn row() -> Row {
        indexmap! {
            "className".to_string() => Value::string("java.lang.String"),
            "shallow".to_string() => Value::int(24),
            "retained".to_string() => Value::nothing(),
            "frames".to_string() => Value::list(vec![Value::int(3), Value::int(7)]),
            "path".to_string() => Value::string("/tmp/x"),
            "bytes".to_string() => Value::int(1024),
        }
        .into()
    }

    fn eval(source: &str) -> bool {
        let evaluator = Evaluator::new();
        let expr = parse_predicate(source).unwrap();
        evaluator.matches(&expr, &row())
    }

    #[test]
    fn missing_fields_compare_as_null() {
        assert!(eval("missing == null"));
        assert!(!eval("missing == 0"));
        assert!(eval("missing != 0"));
        assert!(!eval("missing > 0"));
    }

    #[test]
    fn null_field_is_distinct_from_every_value() {
        assert!(eval("retained == null"));
        assert!(eval("retained != 5"));
        assert!(!eval("retained < 5"));
    }

    #[test]
    fn and_or_not_combine() {
        assert!(eval("shallow > 16 and className ~ \"java\\..*\""));
        assert!(eval("shallow > 9000 or shallow > 16"));
        assert!(eval("not shallow > 9000"));
    }

    #[test]
    fn regex_operator_is_anchored() {
        assert!(eval("className ~ \"java\\.lang\\..*\""));
        // unanchored substring must not match
        assert!(!eval("className ~ \"lang\""));
        assert!(eval("className ~ \".*lang.*\""));
    }

    #[test]
    fn invalid_regex_matches_nothing() {
        assert!(!eval("className ~ \"(unclosed\""));
    }

    #[test]
    fn quantifiers_over_sequences() {
        assert!(eval("frames > 5")); // any, by default
        assert!(!eval("all(frames > 5)"));
        assert!(eval("all(frames > 2)"));
        assert!(eval("none(frames > 100)"));
    }

    #[test]
    fn concat_and_arithmetic_share_plus() {
        let evaluator = Evaluator::new();
        let expr = quarry_parser::parse_query(
            r#"chunks | select(path + " (" + bytes + " bytes)" as description)"#,
        )
        .unwrap();
        let select = match &expr.pipeline[0] {
            quarry_parser::ast::PipelineOp::Select(fields) => fields[0].expr.clone(),
            other => panic!("expected select, got {:?}", other),
        };

        assert_eq!(
            evaluator.evaluate(&select, &row()),
            Value::string("/tmp/x (1024 bytes)")
        );
    }

    #[test]
    fn division_by_zero_is_nan() {
        let evaluator = Evaluator::new();
        let query = quarry_parser::parse_query("objects | select(shallow / 0 as ratio)").unwrap();
        let expr = match &query.pipeline[0] {
            quarry_parser::ast::PipelineOp::Select(fields) => fields[0].expr.clone(),
            other => panic!("expected select, got {:?}", other),
        };

        match evaluator.evaluate(&expr, &row()) {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("expected NaN, got {:?}", other),
        }
    }
}
