//! Parsed attribute expression structures

use std::fmt;

use serde::Serialize;

use super::lexer::{quote_ident, quote_literal};

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// Returns the integer value if this literal is integral
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Literal::Int(v) => Some(*v),
            Literal::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Literal::Null => serde_json::Value::Null,
            Literal::Bool(b) => serde_json::Value::Bool(*b),
            Literal::Int(i) => serde_json::Value::from(*i),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Literal::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Possibly qualified column reference (`t."geom"`, `"schema"."t"."fid"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub parts: Vec<String>,
    /// The column name was written as a double-quoted identifier
    pub quoted: bool,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parts: vec![name.into()],
            quoted: false,
        }
    }

    /// Quoted names match exactly, bare names case-insensitively
    pub fn names(&self, column: &str) -> bool {
        if self.quoted {
            self.name() == column
        } else {
            self.name().eq_ignore_ascii_case(column)
        }
    }

    /// Unqualified column name
    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    /// Table or alias qualifier, if any
    pub fn qualifier(&self) -> Option<&str> {
        if self.parts.len() >= 2 {
            Some(self.parts[self.parts.len() - 2].as_str())
        } else {
            None
        }
    }
}

/// Schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.into(),
        }
    }

    /// Render with quoted identifiers
    pub fn render(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// `SELECT column FROM table [AS alias]` inside an IN list
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryRef {
    pub column: ColumnRef,
    pub table: QualifiedName,
    pub alias: Option<String>,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Returns true for comparison operators
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }
}

/// Attribute expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Column(ColumnRef),
    /// Function call, name kept as written
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        items: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: SubqueryRef,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    IsNull { expr: Box<Expr>, negated: bool },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        case_insensitive: bool,
        negated: bool,
    },
}

impl Expr {
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Returns the column reference if this node is a bare column
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the integer literal value, folding unary minus
    pub fn as_int_literal(&self) -> Option<i64> {
        match self {
            Expr::Literal(lit) => lit.as_i64(),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr,
            } => expr.as_int_literal().and_then(i64::checked_neg),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::Null) => write!(f, "NULL"),
            Expr::Literal(Literal::Bool(b)) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Expr::Literal(Literal::Int(i)) => write!(f, "{}", i),
            Expr::Literal(Literal::Float(v)) => write!(f, "{}", v),
            Expr::Literal(Literal::Str(s)) => write!(f, "{}", quote_literal(s)),
            Expr::Column(c) => {
                let rendered: Vec<String> = c.parts.iter().map(|p| quote_ident(p)).collect();
                write!(f, "{}", rendered.join("."))
            }
            Expr::Call { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, rendered.join(", "))
            }
            Expr::Unary { op: UnaryOp::Neg, expr } => write!(f, "-{}", expr),
            Expr::Unary { op: UnaryOp::Not, expr } => write!(f, "NOT ({})", expr),
            Expr::Binary { left, op, right } => write!(f, "({} {} {})", left, op.as_str(), right),
            Expr::InList {
                expr,
                items,
                negated,
            } => {
                let rendered: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}IN ({})", expr, not, rendered.join(", "))
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let column = Expr::Column(subquery.column.clone());
                write!(f, "{} {}IN (SELECT {} FROM {}", expr, not, column, subquery.table)?;
                if let Some(alias) = &subquery.alias {
                    write!(f, " AS {}", quote_ident(alias))?;
                }
                write!(f, ")")
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}BETWEEN {} AND {}", expr, not, low, high)
            }
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Like {
                expr,
                pattern,
                case_insensitive,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(f, "{} {}{} {}", expr, not, op, pattern)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_ref_parts() {
        let col = ColumnRef {
            parts: vec!["t".into(), "geom".into()],
            quoted: true,
        };
        assert_eq!(col.name(), "geom");
        assert_eq!(col.qualifier(), Some("t"));
        assert_eq!(ColumnRef::new("fid").qualifier(), None);
    }

    #[test]
    fn test_quoted_column_matches_exactly() {
        let bare = ColumnRef::new("FID");
        assert!(bare.names("fid"));
        let quoted = ColumnRef {
            parts: vec!["FID".into()],
            quoted: true,
        };
        assert!(!quoted.names("fid"));
        assert!(quoted.names("FID"));
    }

    #[test]
    fn test_qualified_name_render() {
        assert_eq!(QualifiedName::new(Some("public"), "roads").render(), "\"public\".\"roads\"");
        assert_eq!(QualifiedName::new(None, "roads").to_string(), "\"roads\"");
    }

    #[test]
    fn test_negative_int_literal() {
        let e = Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(Expr::Literal(Literal::Int(5))),
        };
        assert_eq!(e.as_int_literal(), Some(-5));
        assert_eq!(Expr::Literal(Literal::Float(2.5)).as_int_literal(), None);
    }
}
