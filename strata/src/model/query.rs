//! Physical queries and execution plans

use super::expr::Expr;
use super::row::QueryResultRow;
use crate::schema::Schema;
use crate::search_after::SharedSearchAfterStrategy;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectCommand {
    pub distinct: bool,
    pub columns: Vec<Expr>,
    /// Already-quoted table identifier
    pub from: String,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SelectCommand {
    /// Column names of the ORDER BY list, skipping non-column expressions
    pub fn order_by_field_names(&self) -> Vec<String> {
        self.order_by
            .iter()
            .filter_map(|o| o.expr.as_column().map(str::to_string))
            .collect()
    }
}

impl fmt::Display for SelectCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        if self.columns.is_empty() {
            f.write_str("*")?;
        }
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", col)?;
        }
        write!(f, " FROM {}", self.from)?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            for (i, g) in self.group_by.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", g)?;
            }
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            for (i, o) in self.order_by.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                let dir = match o.direction {
                    OrderDirection::Asc => "ASC",
                    OrderDirection::Desc => "DESC",
                };
                write!(f, "{} {}", o.expr, dir)?;
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryType {
    /// Documents for `hits.hits`
    Hits,
    /// Row count for `hits.total`
    Count,
    /// `terms` bucket aggregation under `name`
    Terms { name: String, field: String },
    /// Distinct values for `_terms_enum`
    TermsEnum,
    /// `max_bucket`/`min_bucket` over the buckets of query `parent`.
    /// Computed from the parent's rows, never sent to a backend.
    SiblingBucket {
        name: String,
        parent: usize,
        pick_max: bool,
    },
}

impl QueryType {
    /// Whether the query is answered by a backend round-trip
    pub fn needs_backend(&self) -> bool {
        !matches!(self, QueryType::SiblingBucket { .. })
    }
}

/// Field computed from other columns after the rows come back
#[derive(Clone)]
pub struct RuntimeField {
    pub name: String,
    pub eval: Arc<dyn Fn(&QueryResultRow) -> Option<Value> + Send + Sync>,
}

impl fmt::Debug for RuntimeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeField")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One SQL statement of a plan plus what is needed to render its result
#[derive(Debug, Clone)]
pub struct Query {
    pub select_command: SelectCommand,
    pub query_type: QueryType,
    pub table_name: String,
    /// Logical indexes the query covers
    pub indexes: Vec<String>,
    pub schema: Schema,
    /// Raw `search_after` value from the request
    pub search_after: Option<Value>,
    pub search_after_strategy: Option<SharedSearchAfterStrategy>,
    /// Trailing client sort field with no ORDER BY counterpart (e.g. `_doc`)
    pub tiebreaker: Option<String>,
    pub runtime_fields: Vec<RuntimeField>,
}

impl Query {
    pub fn new(select_command: SelectCommand, query_type: QueryType, table_name: &str) -> Self {
        Self {
            select_command,
            query_type,
            table_name: table_name.to_string(),
            indexes: Vec::new(),
            schema: Schema::default(),
            search_after: None,
            search_after_strategy: None,
            tiebreaker: None,
            runtime_fields: Vec::new(),
        }
    }

    pub fn sql(&self) -> String {
        self.select_command.to_string()
    }
}

/// Rewrites the rows of all queries of a plan at once (e.g. folding
/// sibling pipeline aggregations into their parent's buckets).
pub trait QueryRowsTransformer: Send + Sync {
    fn transform(&self, results: Vec<Vec<QueryResultRow>>) -> Vec<Vec<QueryResultRow>>;
}

/// Decides after job `n` finished whether the remaining jobs are still needed.
pub type InterruptFn = Arc<dyn Fn(usize, &[QueryResultRow]) -> bool + Send + Sync>;

pub struct ExecutionPlan {
    pub name: String,
    pub start_time: Instant,
    pub index_pattern: String,
    pub queries: Vec<Query>,
    pub interrupt: Option<InterruptFn>,
    pub rows_transformers: Vec<Arc<dyn QueryRowsTransformer>>,
}

impl ExecutionPlan {
    pub fn new(queries: Vec<Query>) -> Self {
        Self {
            name: String::new(),
            start_time: Instant::now(),
            index_pattern: String::new(),
            queries,
            interrupt: None,
            rows_transformers: Vec::new(),
        }
    }

    /// True when results after job `n` are no longer needed
    pub fn interrupt(&self, n: usize, rows: &[QueryResultRow]) -> bool {
        self.interrupt.as_ref().is_some_and(|f| f(n, rows))
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("name", &self.name)
            .field("index_pattern", &self.index_pattern)
            .field("queries", &self.queries)
            .field("interruptible", &self.interrupt.is_some())
            .field("rows_transformers", &self.rows_transformers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::expr::Literal;

    #[test]
    fn test_select_rendering() {
        let cmd = SelectCommand {
            columns: vec![Expr::column("msg")],
            from: "\"logs\"".to_string(),
            where_clause: Some(Expr::infix(
                Expr::column("level"),
                "=",
                Expr::literal(Literal::String("error".into())),
            )),
            order_by: vec![OrderByExpr::desc(Expr::column("ts"))],
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(
            cmd.to_string(),
            "SELECT \"msg\" FROM \"logs\" WHERE \"level\" = 'error' ORDER BY \"ts\" DESC LIMIT 10"
        );
        assert_eq!(cmd.order_by_field_names(), vec!["ts"]);
    }

    #[test]
    fn test_group_by_and_distinct() {
        let cmd = SelectCommand {
            distinct: true,
            columns: vec![Expr::column("host"), Expr::Raw("count()".into())],
            from: "\"logs\"".to_string(),
            group_by: vec![Expr::column("host")],
            ..Default::default()
        };
        assert_eq!(
            cmd.to_string(),
            "SELECT DISTINCT \"host\", count() FROM \"logs\" GROUP BY \"host\""
        );
    }

    #[test]
    fn test_interrupt() {
        let mut plan = ExecutionPlan::new(vec![]);
        assert!(!plan.interrupt(0, &[]));
        plan.interrupt = Some(Arc::new(|n, _| n == 1));
        assert!(plan.interrupt(1, &[]));
    }
}
