//! Attribute expression evaluation over sample rows
//!
//! Three-valued logic: comparisons involving NULL yield NULL, and a row
//! matches only when the expression evaluates to TRUE.

use std::cmp::Ordering;
use std::collections::HashSet;

use regex::RegexBuilder;
use serde_json::Value;

use super::ast::{BinaryOp, Expr, Literal, SubqueryRef, UnaryOp};
use super::errors::{ExprError, ExprResult};
use crate::dataset::SampleRow;

/// Resolves functions and subqueries the evaluator has no built-in for
pub trait FunctionResolver: Send + Sync {
    /// Returns None when the function is unknown
    fn call(&self, name: &str, args: &[Value], row: &SampleRow) -> Option<Value>;

    /// Key values produced by `IN (SELECT ...)`, None when unknown
    fn subquery_values(&self, _subquery: &SubqueryRef) -> Option<Vec<Value>> {
        None
    }
}

/// Resolver that knows no functions
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFunctions;

impl FunctionResolver for NoFunctions {
    fn call(&self, _name: &str, _args: &[Value], _row: &SampleRow) -> Option<Value> {
        None
    }
}

/// Evaluates parsed expressions against rows
pub struct Evaluator<'a> {
    resolver: &'a dyn FunctionResolver,
    id_column: Option<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(resolver: &'a dyn FunctionResolver) -> Self {
        Self {
            resolver,
            id_column: None,
        }
    }

    /// Column that maps to the row id when absent from the attributes
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    /// True only when the expression evaluates to TRUE
    pub fn matches(&self, expr: &Expr, row: &SampleRow) -> ExprResult<bool> {
        Ok(truth(&self.eval(expr, row)?)? == Some(true))
    }

    pub fn eval(&self, expr: &Expr, row: &SampleRow) -> ExprResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(lit.to_value()),
            Expr::Column(col) => self.column(col.name(), row),
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, row))
                    .collect::<ExprResult<Vec<_>>>()?;
                if let Some(v) = builtin(name, &values) {
                    return Ok(v);
                }
                self.resolver
                    .call(name, &values, row)
                    .ok_or_else(|| ExprError::UnknownFunction(name.clone()))
            }
            Expr::Unary { op: UnaryOp::Neg, expr } => match self.eval(expr, row)? {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => Ok(match n.as_i64() {
                    Some(i) => i.checked_neg().map(Value::from).unwrap_or(Value::Null),
                    None => Value::from(-n.as_f64().unwrap_or(0.0)),
                }),
                other => Err(ExprError::Eval(format!("cannot negate {}", other))),
            },
            Expr::Unary { op: UnaryOp::Not, expr } => {
                let t = truth(&self.eval(expr, row)?)?;
                Ok(from_truth(t.map(|b| !b)))
            }
            Expr::Binary { left, op, right } => self.binary(left, *op, right, row),
            Expr::InList {
                expr,
                items,
                negated,
            } => {
                let needle = self.eval(expr, row)?;
                if needle.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in items {
                    match equals(&needle, &self.eval(item, row)?) {
                        Some(true) => return Ok(Value::Bool(!negated)),
                        Some(false) => {}
                        None => saw_null = true,
                    }
                }
                Ok(if saw_null { Value::Null } else { Value::Bool(*negated) })
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let needle = self.eval(expr, row)?;
                if needle.is_null() {
                    return Ok(Value::Null);
                }
                let values = self.resolver.subquery_values(subquery).ok_or_else(|| {
                    ExprError::Unsupported(format!("subquery on {}", subquery.table))
                })?;
                let keys: HashSet<String> = values.iter().map(Value::to_string).collect();
                let found = keys.contains(&needle.to_string())
                    || values.iter().any(|v| equals(&needle, v) == Some(true));
                Ok(Value::Bool(found != *negated))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = self.eval(expr, row)?;
                let lo = self.eval(low, row)?;
                let hi = self.eval(high, row)?;
                let above = compare(&v, &lo).map(|o| o != Ordering::Less);
                let below = compare(&v, &hi).map(|o| o != Ordering::Greater);
                let inside = and3(above, below);
                Ok(from_truth(inside.map(|b| b != *negated)))
            }
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, row)?;
                Ok(Value::Bool(v.is_null() != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                case_insensitive,
                negated,
            } => {
                let v = self.eval(expr, row)?;
                let p = self.eval(pattern, row)?;
                let (text, pattern) = match (as_text(&v), as_text(&p)) {
                    (Some(t), Some(p)) => (t, p),
                    _ => return Ok(Value::Null),
                };
                let matched = like(&text, &pattern, *case_insensitive)?;
                Ok(Value::Bool(matched != *negated))
            }
        }
    }

    fn column(&self, name: &str, row: &SampleRow) -> ExprResult<Value> {
        if let Some(v) = row.attributes.get(name) {
            return Ok(v.clone());
        }
        if let Some((_, v)) = row
            .attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            return Ok(v.clone());
        }
        let is_id = name == "$id"
            || self
                .id_column
                .as_deref()
                .map_or(false, |c| c.eq_ignore_ascii_case(name));
        if is_id {
            return Ok(Value::from(row.id));
        }
        Err(ExprError::UnknownColumn(name.to_string()))
    }

    fn binary(&self, left: &Expr, op: BinaryOp, right: &Expr, row: &SampleRow) -> ExprResult<Value> {
        match op {
            BinaryOp::And => {
                let l = truth(&self.eval(left, row)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = truth(&self.eval(right, row)?)?;
                Ok(from_truth(and3(l, r)))
            }
            BinaryOp::Or => {
                let l = truth(&self.eval(left, row)?)?;
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = truth(&self.eval(right, row)?)?;
                Ok(from_truth(or3(l, r)))
            }
            _ => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                if op.is_comparison() {
                    return Ok(from_truth(compare(&l, &r).map(|o| ordering_satisfies(op, o))));
                }
                if op == BinaryOp::Concat {
                    return Ok(match (as_text(&l), as_text(&r)) {
                        (Some(a), Some(b)) => Value::String(a + &b),
                        _ => Value::Null,
                    });
                }
                arithmetic(op, &l, &r)
            }
        }
    }
}

fn ordering_satisfies(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::NotEq => ord != Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Lte => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Gte => ord != Ordering::Less,
        _ => false,
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> ExprResult<Value> {
    let (a, b) = match (l, r) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
        (Value::Number(a), Value::Number(b)) => (a, b),
        _ => {
            return Err(ExprError::Eval(format!(
                "operator {} needs numbers",
                op.as_str()
            )))
        }
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Mod => x.checked_rem(y),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::from(v));
        }
        if op == BinaryOp::Mod {
            return Ok(Value::Null);
        }
    }
    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
    let v = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div if y == 0.0 => return Ok(Value::Null),
        BinaryOp::Div => x / y,
        BinaryOp::Mod if y == 0.0 => return Ok(Value::Null),
        BinaryOp::Mod => x % y,
        _ => return Err(ExprError::Eval(format!("unsupported operator {}", op.as_str()))),
    };
    Ok(Value::from(v))
}

/// Built-in scalar functions shared by every dialect
fn builtin(name: &str, args: &[Value]) -> Option<Value> {
    let lowered = name.to_ascii_lowercase();
    match (lowered.as_str(), args) {
        ("lower", [v]) => Some(as_text(v).map(|s| Value::String(s.to_lowercase())).unwrap_or(Value::Null)),
        ("upper", [v]) => Some(as_text(v).map(|s| Value::String(s.to_uppercase())).unwrap_or(Value::Null)),
        ("length", [v]) => Some(
            as_text(v)
                .map(|s| Value::from(s.chars().count() as i64))
                .unwrap_or(Value::Null),
        ),
        ("abs", [Value::Number(n)]) => Some(match n.as_i64() {
            Some(i) => i.checked_abs().map(Value::from).unwrap_or(Value::Null),
            None => Value::from(n.as_f64().unwrap_or(0.0).abs()),
        }),
        ("coalesce", values) if !values.is_empty() => {
            Some(values.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
        }
        _ => None,
    }
}

/// SQL truth value of a scalar
fn truth(v: &Value) -> ExprResult<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => Ok(Some(n.as_f64().map_or(false, |f| f != 0.0))),
        other => Err(ExprError::Eval(format!("{} is not a boolean", other))),
    }
}

fn from_truth(t: Option<bool>) -> Value {
    t.map(Value::Bool).unwrap_or(Value::Null)
}

fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn equals(a: &Value, b: &Value) -> Option<bool> {
    compare(a, b).map(|o| o == Ordering::Equal)
}

/// Orders two scalars; None when either is NULL or they are incomparable
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
                return Some(i.cmp(&j));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(s)) => x.as_f64()?.partial_cmp(&s.trim().parse::<f64>().ok()?),
        (Value::String(s), Value::Number(y)) => s.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

fn like(text: &str, pattern: &str, case_insensitive: bool) -> ExprResult<bool> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    let compiled = RegexBuilder::new(&re)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| ExprError::Eval(e.to_string()))?;
    Ok(compiled.is_match(text))
}

/// Evaluate a literal-only expression (no columns, no functions)
pub fn eval_constant(expr: &Expr) -> Option<Literal> {
    let row = SampleRow::new(0, Value::Object(Default::default()));
    match Evaluator::new(&NoFunctions).eval(expr, &row).ok()? {
        Value::Null => Some(Literal::Null),
        Value::Bool(b) => Some(Literal::Bool(b)),
        Value::Number(n) => n
            .as_i64()
            .map(Literal::Int)
            .or_else(|| n.as_f64().map(Literal::Float)),
        Value::String(s) => Some(Literal::Str(s)),
        _ => None,
    }
}
