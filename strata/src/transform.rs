//! Rewrites applied to an execution plan between translation and execution

use crate::model::{ExecutionPlan, QueryType};
use crate::search_after::SearchAfterStrategyKind;
use crate::Result;
use tracing::debug;

pub trait TransformationPipeline: Send + Sync {
    fn transform(&self, plan: ExecutionPlan) -> Result<ExecutionPlan>;
}

/// Schema-dependent checks: attaches the configured search-after strategy to
/// every hits query, validates its cursor and narrows its WHERE clause.
#[derive(Debug, Clone, Copy)]
pub struct SchemaCheckPass {
    search_after_strategy: SearchAfterStrategyKind,
    strip_tiebreaker: bool,
}

impl SchemaCheckPass {
    pub fn new(search_after_strategy: SearchAfterStrategyKind, strip_tiebreaker: bool) -> Self {
        Self {
            search_after_strategy,
            strip_tiebreaker,
        }
    }
}

impl TransformationPipeline for SchemaCheckPass {
    fn transform(&self, mut plan: ExecutionPlan) -> Result<ExecutionPlan> {
        for query in plan
            .queries
            .iter_mut()
            .filter(|q| q.query_type == QueryType::Hits)
        {
            let shared = self
                .search_after_strategy
                .create_shared(self.strip_tiebreaker);
            {
                let mut strategy = shared.lock();
                strategy.validate_and_parse(query, &query.schema)?;
                strategy.transform_query(query)?;
                debug!(
                    strategy = strategy.name(),
                    sql = %query.sql(),
                    "Applied search_after strategy"
                );
            }
            query.search_after_strategy = Some(shared);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Expr, OrderByExpr, Query, SelectCommand};
    use crate::schema::Field;
    use crate::table::FieldType;
    use crate::Error;
    use serde_json::json;

    fn plan(search_after: serde_json::Value) -> ExecutionPlan {
        let cmd = SelectCommand {
            from: "\"logs\"".to_string(),
            order_by: vec![OrderByExpr::desc(Expr::column("status"))],
            ..Default::default()
        };
        let mut hits = Query::new(cmd.clone(), QueryType::Hits, "logs");
        hits.schema.fields.insert(
            "status".to_string(),
            Field {
                property_name: "status".to_string(),
                internal_name: "status".to_string(),
                field_type: FieldType::Long,
            },
        );
        hits.search_after = Some(search_after);
        let count = Query::new(cmd, QueryType::Count, "logs");
        ExecutionPlan::new(vec![hits, count])
    }

    #[test]
    fn test_applies_strategy_to_hits_only() {
        let pass = SchemaCheckPass::new(SearchAfterStrategyKind::BasicAndFast, true);
        let plan = pass.transform(plan(json!([5]))).unwrap();
        assert!(plan.queries[0].search_after_strategy.is_some());
        assert_eq!(
            plan.queries[0].sql(),
            "SELECT * FROM \"logs\" WHERE 5 > \"status\" ORDER BY \"status\" DESC"
        );
        assert!(plan.queries[1].search_after_strategy.is_none());
        assert_eq!(plan.queries[1].select_command.where_clause, None);
    }

    #[test]
    fn test_invalid_cursor_aborts_plan() {
        let pass = SchemaCheckPass::new(SearchAfterStrategyKind::Bulletproof, true);
        let err = pass.transform(plan(json!("nope"))).unwrap_err();
        assert!(matches!(err, Error::InvalidSearchAfter(_)));
    }
}
