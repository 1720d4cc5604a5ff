//! Row rewrites between execution and response building

use crate::model::{ExecutionPlan, QueryResultCol, QueryResultRow, QueryType};
use crate::schema::Schema;

/// Column names become field names, runtime fields are computed and the
/// plan's own row transformers run last.
pub(crate) fn post_process(
    plan: &ExecutionPlan,
    mut results: Vec<Vec<QueryResultRow>>,
) -> Vec<Vec<QueryResultRow>> {
    let Some(first) = plan.queries.first() else {
        return results;
    };

    for rows in results.iter_mut() {
        for row in rows.iter_mut() {
            rename_columns(&first.schema, row);
        }
    }

    // runtime fields read field names, so they run after renaming
    for (query, rows) in plan.queries.iter().zip(results.iter_mut()) {
        if query.query_type != QueryType::Hits || query.runtime_fields.is_empty() {
            continue;
        }
        for row in rows.iter_mut() {
            let computed: Vec<QueryResultCol> = {
                let source: &QueryResultRow = row;
                query
                    .runtime_fields
                    .iter()
                    .filter_map(|f| (f.eval)(source).map(|v| QueryResultCol::new(f.name.clone(), v)))
                    .collect()
            };
            row.cols.extend(computed);
        }
    }

    plan.rows_transformers
        .iter()
        .fold(results, |results, t| t.transform(results))
}

fn rename_columns(schema: &Schema, row: &mut QueryResultRow) {
    for col in row.cols.iter_mut() {
        if let Some(field) = schema.field_for_column(&col.col_name) {
            if field.property_name != col.col_name {
                col.col_name = field.property_name.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Query, QueryRowsTransformer, RuntimeField, SelectCommand};
    use crate::schema::Field;
    use crate::table::FieldType;
    use serde_json::json;
    use std::sync::Arc;

    fn hits_query() -> Query {
        let mut query = Query::new(SelectCommand::default(), QueryType::Hits, "logs");
        query.schema.fields.insert(
            "message".to_string(),
            Field {
                property_name: "message".to_string(),
                internal_name: "msg".to_string(),
                field_type: FieldType::Text,
            },
        );
        query
    }

    #[test]
    fn test_renames_columns_to_fields() {
        let plan = ExecutionPlan::new(vec![hits_query()]);
        let rows = vec![vec![QueryResultRow::new(
            "logs",
            vec![
                QueryResultCol::new("msg", json!("hello")),
                QueryResultCol::new("other", json!(1)),
            ],
        )]];
        let out = post_process(&plan, rows);
        assert_eq!(out[0][0].get("message"), Some(&json!("hello")));
        assert_eq!(out[0][0].get("other"), Some(&json!(1)));
        assert_eq!(out[0][0].get("msg"), None);
    }

    #[test]
    fn test_runtime_fields_see_field_names() {
        let mut query = hits_query();
        query.runtime_fields.push(RuntimeField {
            name: "shout".to_string(),
            eval: Arc::new(|row| {
                row.get("message")
                    .and_then(|v| v.as_str())
                    .map(|s| json!(s.to_uppercase()))
            }),
        });
        let plan = ExecutionPlan::new(vec![query]);
        let rows = vec![vec![QueryResultRow::new(
            "logs",
            vec![QueryResultCol::new("msg", json!("hello"))],
        )]];
        let out = post_process(&plan, rows);
        assert_eq!(out[0][0].get("shout"), Some(&json!("HELLO")));
    }

    struct Reverse;

    impl QueryRowsTransformer for Reverse {
        fn transform(&self, mut results: Vec<Vec<QueryResultRow>>) -> Vec<Vec<QueryResultRow>> {
            results.reverse();
            results
        }
    }

    #[test]
    fn test_plan_transformers_run_last() {
        let mut plan = ExecutionPlan::new(vec![hits_query(), hits_query()]);
        plan.rows_transformers.push(Arc::new(Reverse));
        let rows = vec![
            vec![QueryResultRow::new("a", vec![QueryResultCol::new("msg", json!(1))])],
            vec![],
        ];
        let out = post_process(&plan, rows);
        assert!(out[0].is_empty());
        assert_eq!(out[1][0].get("message"), Some(&json!(1)));
    }

    #[test]
    fn test_empty_plan_passes_through() {
        let plan = ExecutionPlan::new(vec![]);
        assert!(post_process(&plan, vec![]).is_empty());
    }
}
