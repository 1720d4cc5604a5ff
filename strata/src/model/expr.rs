//! SQL expression tree rendered to ClickHouse SQL

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Rendered single-quoted
    String(String),
}

impl Literal {
    /// Literal for a client-supplied JSON value; strings end up single-quoted.
    pub fn from_json(value: &Value) -> Literal {
        match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Literal::Int(i),
                None => Literal::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Literal::String(s.clone()),
            other => Literal::String(other.to_string()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Literal),
    Function { name: String, args: Vec<Expr> },
    Tuple(Vec<Expr>),
    Infix {
        left: Box<Expr>,
        op: String,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// Verbatim SQL, e.g. `*` or `count()`
    Raw(String),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn literal(lit: Literal) -> Expr {
        Expr::Literal(lit)
    }

    pub fn string(s: impl Into<String>) -> Expr {
        Expr::Literal(Literal::String(s.into()))
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn infix(left: Expr, op: impl Into<String>, right: Expr) -> Expr {
        Expr::Infix {
            left: Box::new(left),
            op: op.into(),
            right: Box::new(right),
        }
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expr::Column(name) => Some(name),
            _ => None,
        }
    }
}

fn combine(
    exprs: impl IntoIterator<Item = Option<Expr>>,
    wrap: fn(Vec<Expr>) -> Expr,
) -> Option<Expr> {
    let mut parts: Vec<Expr> = exprs.into_iter().flatten().collect();
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(wrap(parts)),
    }
}

/// Conjunction of the present expressions
pub fn and(exprs: impl IntoIterator<Item = Option<Expr>>) -> Option<Expr> {
    combine(exprs, Expr::And)
}

/// Disjunction of the present expressions
pub fn or(exprs: impl IntoIterator<Item = Option<Expr>>) -> Option<Expr> {
    combine(exprs, Expr::Or)
}

fn write_joined(f: &mut fmt::Formatter<'_>, exprs: &[Expr], sep: &str) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "\"{}\"", name.replace('"', "\\\"")),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                write_joined(f, args, ", ")?;
                f.write_str(")")
            }
            // a one-element tuple compares like its element
            Expr::Tuple(exprs) if exprs.len() == 1 => write!(f, "{}", exprs[0]),
            Expr::Tuple(exprs) => {
                f.write_str("tuple(")?;
                write_joined(f, exprs, ", ")?;
                f.write_str(")")
            }
            Expr::Infix { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Not(inner) => write!(f, "NOT ({})", inner),
            Expr::And(exprs) => {
                f.write_str("(")?;
                write_joined(f, exprs, " AND ")?;
                f.write_str(")")
            }
            Expr::Or(exprs) => {
                f.write_str("(")?;
                write_joined(f, exprs, " OR ")?;
                f.write_str(")")
            }
            Expr::Raw(sql) => f.write_str(sql),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_quoting() {
        assert_eq!(Literal::from_json(&json!("it's")).to_string(), "'it\\'s'");
        assert_eq!(Literal::from_json(&json!(5)).to_string(), "5");
        assert_eq!(Literal::from_json(&json!(1.5)).to_string(), "1.5");
        assert_eq!(Literal::from_json(&json!(null)).to_string(), "NULL");
    }

    #[test]
    fn test_and_skips_missing() {
        assert_eq!(and([None, None]), None);

        let single = and([None, Some(Expr::column("a"))]).unwrap();
        assert_eq!(single.to_string(), "\"a\"");

        let both = and([Some(Expr::column("a")), Some(Expr::column("b"))]).unwrap();
        assert_eq!(both.to_string(), "(\"a\" AND \"b\")");
    }

    #[test]
    fn test_tuple_rendering() {
        let one = Expr::Tuple(vec![Expr::column("ts")]);
        assert_eq!(one.to_string(), "\"ts\"");

        let two = Expr::Tuple(vec![Expr::column("ts"), Expr::literal(Literal::Int(1))]);
        assert_eq!(two.to_string(), "tuple(\"ts\", 1)");
    }

    #[test]
    fn test_nested() {
        let e = or([
            Some(Expr::infix(Expr::column("a"), ">", Expr::literal(Literal::Int(1)))),
            and([
                Some(Expr::infix(Expr::column("a"), "=", Expr::literal(Literal::Int(1)))),
                Some(Expr::Not(Box::new(Expr::column("b")))),
            ]),
        ])
        .unwrap();
        assert_eq!(e.to_string(), "(\"a\" > 1 OR (\"a\" = 1 AND NOT (\"b\")))");
    }
}
