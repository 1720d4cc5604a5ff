//! Cursor (`search_after`) pagination strategies
//!
//! A strategy is created per request. `validate_and_parse` reads the client
//! cursor, `transform_query` narrows the WHERE clause to rows after the
//! cursor, and `transform_hit` appends whatever the next request needs to
//! each returned hit's `sort` array.

use crate::error::{Error, Result};
use crate::model::{and, or, Expr, Literal, OrderDirection, Query, QueryResultRow, SearchHit};
use crate::schema::Schema;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub trait SearchAfterStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks the query's cursor against its ORDER BY list and remembers the
    /// typed cursor values.
    fn validate_and_parse(&mut self, query: &Query, schema: &Schema) -> Result<()>;

    /// Adds the "after the cursor" condition to the WHERE clause.
    fn transform_query(&self, query: &mut Query) -> Result<()>;

    /// `rows` is the prefix of the result ending with the row behind `hit`.
    fn transform_hit(
        &mut self,
        hit: &mut SearchHit,
        pk_column: Option<&str>,
        sort_field_names: &[String],
        rows: &[QueryResultRow],
    );
}

/// Strategy shared between the query it rewrote and the hits it annotates
pub type SharedSearchAfterStrategy = Arc<Mutex<Box<dyn SearchAfterStrategy>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchAfterStrategyKind {
    #[default]
    BasicAndFast,
    Bulletproof,
    JustDiscardTheParameter,
}

impl SearchAfterStrategyKind {
    pub fn create(self, strip_tiebreaker: bool) -> Box<dyn SearchAfterStrategy> {
        match self {
            Self::BasicAndFast => Box::new(BasicAndFast {
                strip_tiebreaker,
                sort_params: Vec::new(),
            }),
            Self::Bulletproof => Box::<Bulletproof>::default(),
            Self::JustDiscardTheParameter => Box::new(JustDiscardTheParameter),
        }
    }

    pub fn create_shared(self, strip_tiebreaker: bool) -> SharedSearchAfterStrategy {
        Arc::new(Mutex::new(self.create(strip_tiebreaker)))
    }
}

impl fmt::Display for SearchAfterStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BasicAndFast => "basic_and_fast",
            Self::Bulletproof => "bulletproof",
            Self::JustDiscardTheParameter => "just_discard_the_parameter",
        };
        f.write_str(s)
    }
}

/// Cursor values matched to ORDER BY columns, plus whatever trails them.
struct ParsedCursor {
    sort_params: Vec<Expr>,
    other_params: Vec<Value>,
}

fn parse_cursor(query: &Query, schema: &Schema) -> Result<Option<ParsedCursor>> {
    let Some(search_after) = &query.search_after else {
        return Ok(None);
    };
    let Value::Array(values) = search_after else {
        return Err(Error::InvalidSearchAfter(format!(
            "search_after must be an array, got: {}",
            search_after
        )));
    };

    let order_by = &query.select_command.order_by;
    if values.len() < order_by.len() {
        return Err(Error::InvalidSearchAfter(format!(
            "len(search_after) < len(sort fields), search_after: {}, sort fields: {}",
            search_after,
            order_by.len()
        )));
    }

    let mut sort_params = Vec::with_capacity(order_by.len());
    for (value, order) in values.iter().zip(order_by) {
        let column = order.expr.as_column().ok_or_else(|| {
            Error::InvalidSearchAfter("order by must be a column reference".to_string())
        })?;
        let field = schema.resolve_field(column).ok_or_else(|| {
            Error::InvalidSearchAfter(format!("could not resolve field: {}", column))
        })?;

        if field.field_type.is_date() {
            sort_params.push(timestamp_param(value)?);
        } else {
            sort_params.push(Expr::literal(Literal::from_json(value)));
        }
    }

    Ok(Some(ParsedCursor {
        sort_params,
        other_params: values[order_by.len()..].to_vec(),
    }))
}

/// Date cursors are always epoch milliseconds, as that is how hits render them.
fn timestamp_param(value: &Value) -> Result<Expr> {
    let Some(number) = value.as_f64() else {
        return Err(Error::InvalidSearchAfter(format!(
            "search_after for a date field must be a number, got: {}",
            value
        )));
    };
    if number < 0.0 || number.fract() != 0.0 || number > i64::MAX as f64 {
        return Err(Error::InvalidSearchAfter(format!(
            "search_after for a date field must be a unix timestamp in milliseconds, got: {}",
            value
        )));
    }
    Ok(Expr::function(
        "fromUnixTimestamp64Milli",
        vec![Expr::literal(Literal::Int(number as i64))],
    ))
}

/// `(cursor...) > (cols...)`, with each ascending column's operands swapped
fn after_cursor_tuples(query: &Query, sort_params: &[Expr]) -> (Expr, Expr) {
    let mut lhs = Vec::with_capacity(sort_params.len());
    let mut rhs = Vec::with_capacity(sort_params.len());
    for (param, order) in sort_params.iter().zip(&query.select_command.order_by) {
        match order.direction {
            OrderDirection::Desc => {
                lhs.push(param.clone());
                rhs.push(order.expr.clone());
            }
            OrderDirection::Asc => {
                lhs.push(order.expr.clone());
                rhs.push(param.clone());
            }
        }
    }
    (Expr::Tuple(lhs), Expr::Tuple(rhs))
}

fn add_to_where(query: &mut Query, condition: Expr) {
    let existing = query.select_command.where_clause.take();
    query.select_command.where_clause = and([existing, Some(condition)]);
}

/// Tuple comparison only. Rows sharing the cursor's sort values are skipped,
/// so this is exact only for unique sort keys.
#[derive(Debug)]
pub struct BasicAndFast {
    strip_tiebreaker: bool,
    sort_params: Vec<Expr>,
}

impl SearchAfterStrategy for BasicAndFast {
    fn name(&self) -> &'static str {
        "basic_and_fast"
    }

    fn validate_and_parse(&mut self, query: &Query, schema: &Schema) -> Result<()> {
        let Some(parsed) = parse_cursor(query, schema)? else {
            return Ok(());
        };
        let tiebreaker_only = self.strip_tiebreaker
            && query.tiebreaker.is_some()
            && parsed.other_params.len() == 1;
        if !parsed.other_params.is_empty() && !tiebreaker_only {
            return Err(Error::InvalidSearchAfter(format!(
                "basic_and_fast accepts only sort values, got {} extra",
                parsed.other_params.len()
            )));
        }
        if tiebreaker_only {
            debug!(
                tiebreaker = ?query.tiebreaker,
                "Ignoring trailing search_after tiebreaker value"
            );
        }
        self.sort_params = parsed.sort_params;
        Ok(())
    }

    fn transform_query(&self, query: &mut Query) -> Result<()> {
        if self.sort_params.is_empty() {
            return Ok(());
        }
        let (lhs, rhs) = after_cursor_tuples(query, &self.sort_params);
        add_to_where(query, Expr::infix(lhs, ">", rhs));
        Ok(())
    }

    fn transform_hit(
        &mut self,
        _hit: &mut SearchHit,
        _pk_column: Option<&str>,
        _sort_field_names: &[String],
        _rows: &[QueryResultRow],
    ) {
    }
}

/// Tuple comparison plus the primary keys of already returned rows that
/// share the cursor's sort values. Each hit's `sort` carries those keys
/// after the sort values.
#[derive(Debug, Default)]
pub struct Bulletproof {
    sort_params_raw: Vec<Value>,
    sort_params: Vec<Expr>,
    primary_keys: Vec<Value>,
    /// How many trailing rows (including the cursor's keys) share sort values
    last_n_rows_same_sort_values: usize,
}

impl Bulletproof {
    fn row_matches_cursor(&self, hit: &SearchHit) -> bool {
        let n = self.sort_params_raw.len();
        n > 0
            && hit.sort.len() >= n
            && hit.sort[..n]
                .iter()
                .zip(&self.sort_params_raw)
                .all(|(a, b)| json_values_equal(a, b))
    }
}

impl SearchAfterStrategy for Bulletproof {
    fn name(&self) -> &'static str {
        "bulletproof"
    }

    fn validate_and_parse(&mut self, query: &Query, schema: &Schema) -> Result<()> {
        let Some(parsed) = parse_cursor(query, schema)? else {
            return Ok(());
        };
        if let Some(Value::Array(values)) = &query.search_after {
            self.sort_params_raw = values[..parsed.sort_params.len()].to_vec();
        }
        self.sort_params = parsed.sort_params;
        self.primary_keys = parsed.other_params;
        Ok(())
    }

    fn transform_query(&self, query: &mut Query) -> Result<()> {
        if self.sort_params.is_empty() {
            return Ok(());
        }
        let (lhs, rhs) = after_cursor_tuples(query, &self.sort_params);
        let after = Expr::infix(lhs.clone(), ">", rhs.clone());

        let pk_column = query
            .schema
            .primary_key_field()
            .map(|f| f.internal_name.clone());
        let Some(pk_column) = pk_column.filter(|_| !self.primary_keys.is_empty()) else {
            add_to_where(query, after);
            return Ok(());
        };

        let seen = Expr::Tuple(
            self.primary_keys
                .iter()
                .map(|pk| Expr::literal(Literal::from_json(pk)))
                .collect(),
        );
        let same_but_unseen = and([
            Some(Expr::infix(lhs, "=", rhs)),
            Some(Expr::infix(Expr::column(pk_column), "NOT IN", seen)),
        ]);
        if let Some(condition) = or([Some(after), same_but_unseen]) {
            add_to_where(query, condition);
        }
        Ok(())
    }

    fn transform_hit(
        &mut self,
        hit: &mut SearchHit,
        pk_column: Option<&str>,
        sort_field_names: &[String],
        rows: &[QueryResultRow],
    ) {
        let Some(pk_column) = pk_column else {
            return;
        };
        let Some(last) = rows.last() else {
            warn!("Bulletproof search_after: no rows for hit");
            return;
        };
        let Some(pk) = last.get(pk_column) else {
            warn!(pk_column, "Bulletproof search_after: primary key column not in rows");
            return;
        };

        let cursor_tie = self.row_matches_cursor(hit);
        hit.sort.push(pk.clone());

        if rows.len() == 1 {
            self.last_n_rows_same_sort_values = 1;
            if cursor_tie {
                hit.sort.extend(self.primary_keys.iter().cloned());
                self.last_n_rows_same_sort_values += self.primary_keys.len();
            }
            return;
        }

        let prev = &rows[rows.len() - 2];
        if !last.same_subset_of_columns(prev, sort_field_names) {
            self.last_n_rows_same_sort_values = 1;
            return;
        }

        let mut added = 0;
        for row in rows[..rows.len() - 1]
            .iter()
            .rev()
            .take(self.last_n_rows_same_sort_values)
        {
            if let Some(v) = row.get(pk_column) {
                hit.sort.push(v.clone());
            }
            added += 1;
        }
        // every row of this page so far ties with the cursor
        if added < self.last_n_rows_same_sort_values {
            hit.sort.extend(self.primary_keys.iter().cloned());
        }
        self.last_n_rows_same_sort_values += 1;
    }
}

/// Ignores the cursor entirely
#[derive(Debug)]
pub struct JustDiscardTheParameter;

impl SearchAfterStrategy for JustDiscardTheParameter {
    fn name(&self) -> &'static str {
        "just_discard_the_parameter"
    }

    fn validate_and_parse(&mut self, _query: &Query, _schema: &Schema) -> Result<()> {
        Ok(())
    }

    fn transform_query(&self, _query: &mut Query) -> Result<()> {
        Ok(())
    }

    fn transform_hit(
        &mut self,
        _hit: &mut SearchHit,
        _pk_column: Option<&str>,
        _sort_field_names: &[String],
        _rows: &[QueryResultRow],
    ) {
    }
}

fn json_values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderByExpr, QueryResultCol, QueryType, SelectCommand};
    use crate::schema::Field;
    use crate::table::FieldType;
    use serde_json::json;

    fn schema() -> Schema {
        let mut schema = Schema::default();
        for (name, ty) in [
            ("@timestamp", FieldType::Date),
            ("message", FieldType::Text),
            ("count", FieldType::Long),
            ("id", FieldType::Keyword),
        ] {
            schema.fields.insert(
                name.to_string(),
                Field {
                    property_name: name.to_string(),
                    internal_name: name.to_string(),
                    field_type: ty,
                },
            );
        }
        schema.primary_key = Some("id".to_string());
        schema
    }

    fn query(order_by: Vec<OrderByExpr>, search_after: Option<Value>) -> Query {
        let cmd = SelectCommand {
            from: "\"logs\"".to_string(),
            order_by,
            ..Default::default()
        };
        let mut q = Query::new(cmd, QueryType::Hits, "logs");
        q.schema = schema();
        q.search_after = search_after;
        q
    }

    fn run(kind: SearchAfterStrategyKind, mut q: Query) -> Result<Query> {
        let mut strategy = kind.create(true);
        strategy.validate_and_parse(&q, &schema())?;
        strategy.transform_query(&mut q)?;
        Ok(q)
    }

    fn where_sql(q: &Query) -> Option<String> {
        q.select_command.where_clause.as_ref().map(|w| w.to_string())
    }

    #[test]
    fn test_validation_grid() {
        let cases: Vec<(Option<Value>, bool, bool)> = vec![
            (None, true, true),
            (Some(json!([])), false, false),
            (Some(json!([1])), true, true),
            (Some(json!([1.0])), true, true),
            (Some(json!([1.1])), false, false),
            (Some(json!([-1])), false, false),
            (Some(json!("string is bad")), false, false),
            (Some(json!([10, 20, 30, 40])), true, false),
        ];
        for (cursor, bulletproof_ok, basic_ok) in cases {
            let q = query(
                vec![OrderByExpr::desc(Expr::column("@timestamp"))],
                cursor.clone(),
            );
            let mut basic = SearchAfterStrategyKind::BasicAndFast.create(false);
            let mut bullet = SearchAfterStrategyKind::Bulletproof.create(false);
            assert_eq!(
                basic.validate_and_parse(&q, &schema()).is_ok(),
                basic_ok,
                "basic_and_fast {:?}",
                cursor
            );
            assert_eq!(
                bullet.validate_and_parse(&q, &schema()).is_ok(),
                bulletproof_ok,
                "bulletproof {:?}",
                cursor
            );
        }
    }

    #[test]
    fn test_descending_cursor_keeps_cursor_on_left() {
        for kind in [
            SearchAfterStrategyKind::BasicAndFast,
            SearchAfterStrategyKind::Bulletproof,
        ] {
            let q = query(vec![OrderByExpr::desc(Expr::column("count"))], Some(json!([5])));
            let q = run(kind, q).unwrap();
            // count < 5
            assert_eq!(where_sql(&q).as_deref(), Some("5 > \"count\""), "{}", kind);
        }
    }

    #[test]
    fn test_ascending_cursor_swaps_operands() {
        for kind in [
            SearchAfterStrategyKind::BasicAndFast,
            SearchAfterStrategyKind::Bulletproof,
        ] {
            let q = query(vec![OrderByExpr::asc(Expr::column("count"))], Some(json!([5])));
            let q = run(kind, q).unwrap();
            assert_eq!(where_sql(&q).as_deref(), Some("\"count\" > 5"), "{}", kind);
        }
    }

    #[test]
    fn test_mixed_directions_and_date_conversion() {
        let q = query(
            vec![
                OrderByExpr::desc(Expr::column("@timestamp")),
                OrderByExpr::asc(Expr::column("message")),
            ],
            Some(json!([1706000000000_i64, "abc"])),
        );
        let q = run(SearchAfterStrategyKind::BasicAndFast, q).unwrap();
        assert_eq!(
            where_sql(&q).as_deref(),
            Some(
                "tuple(fromUnixTimestamp64Milli(1706000000000), \"message\") > tuple(\"@timestamp\", 'abc')"
            )
        );
    }

    #[test]
    fn test_existing_where_is_kept() {
        let mut q = query(vec![OrderByExpr::desc(Expr::column("count"))], Some(json!([5])));
        q.select_command.where_clause = Some(Expr::infix(
            Expr::column("message"),
            "=",
            Expr::string("hi"),
        ));
        let q = run(SearchAfterStrategyKind::BasicAndFast, q).unwrap();
        assert_eq!(
            where_sql(&q).as_deref(),
            Some("(\"message\" = 'hi' AND 5 > \"count\")")
        );
    }

    /// Known approximation: one trailing value is assumed to be a client
    /// tiebreaker only when the translator recorded one.
    #[test]
    fn test_basic_strips_recorded_tiebreaker() {
        let mut q = query(vec![OrderByExpr::desc(Expr::column("count"))], Some(json!([5, 17])));
        q.tiebreaker = Some("_doc".to_string());
        let q = run(SearchAfterStrategyKind::BasicAndFast, q).unwrap();
        assert_eq!(where_sql(&q).as_deref(), Some("5 > \"count\""));

        let mut q = query(vec![OrderByExpr::desc(Expr::column("count"))], Some(json!([5, 17])));
        q.tiebreaker = Some("_doc".to_string());
        let mut strict = SearchAfterStrategyKind::BasicAndFast.create(false);
        assert!(strict.validate_and_parse(&q, &schema()).is_err());
    }

    #[test]
    fn test_bulletproof_excludes_seen_keys() {
        let q = query(
            vec![OrderByExpr::desc(Expr::column("count"))],
            Some(json!([5, "a", "b"])),
        );
        let q = run(SearchAfterStrategyKind::Bulletproof, q).unwrap();
        assert_eq!(
            where_sql(&q).as_deref(),
            Some("(5 > \"count\" OR (5 = \"count\" AND \"id\" NOT IN tuple('a', 'b')))")
        );
    }

    #[test]
    fn test_bulletproof_without_primary_key_degrades() {
        let mut q = query(
            vec![OrderByExpr::desc(Expr::column("count"))],
            Some(json!([5, "a"])),
        );
        q.schema.primary_key = None;
        let q = run(SearchAfterStrategyKind::Bulletproof, q).unwrap();
        assert_eq!(where_sql(&q).as_deref(), Some("5 > \"count\""));
    }

    #[test]
    fn test_discard_ignores_cursor() {
        let q = query(vec![OrderByExpr::desc(Expr::column("count"))], Some(json!("junk")));
        let q = run(SearchAfterStrategyKind::JustDiscardTheParameter, q).unwrap();
        assert_eq!(where_sql(&q), None);
    }

    fn row(count: i64, id: &str) -> QueryResultRow {
        QueryResultRow::new(
            "logs",
            vec![
                QueryResultCol::new("count", json!(count)),
                QueryResultCol::new("id", json!(id)),
            ],
        )
    }

    fn hits_for(strategy: &mut dyn SearchAfterStrategy, rows: &[QueryResultRow]) -> Vec<Vec<Value>> {
        let names = vec!["count".to_string()];
        (0..rows.len())
            .map(|i| {
                let mut hit = SearchHit {
                    sort: vec![rows[i].get("count").cloned().unwrap_or(Value::Null)],
                    ..Default::default()
                };
                strategy.transform_hit(&mut hit, Some("id"), &names, &rows[..=i]);
                hit.sort
            })
            .collect()
    }

    #[test]
    fn test_bulletproof_hits_carry_tied_keys() {
        let q = query(vec![OrderByExpr::desc(Expr::column("count"))], None);
        let mut strategy = SearchAfterStrategyKind::Bulletproof.create(false);
        strategy.validate_and_parse(&q, &schema()).unwrap();

        let rows = vec![row(9, "a"), row(7, "b"), row(7, "c"), row(7, "d")];
        let sorts = hits_for(strategy.as_mut(), &rows);
        assert_eq!(sorts[0], vec![json!(9), json!("a")]);
        assert_eq!(sorts[1], vec![json!(7), json!("b")]);
        assert_eq!(sorts[2], vec![json!(7), json!("c"), json!("b")]);
        assert_eq!(sorts[3], vec![json!(7), json!("d"), json!("c"), json!("b")]);
    }

    #[test]
    fn test_bulletproof_hits_carry_cursor_keys_on_tie() {
        let q = query(
            vec![OrderByExpr::desc(Expr::column("count"))],
            Some(json!([7, "b"])),
        );
        let mut strategy = SearchAfterStrategyKind::Bulletproof.create(false);
        strategy.validate_and_parse(&q, &schema()).unwrap();

        let rows = vec![row(7, "c"), row(7, "d"), row(3, "e")];
        let sorts = hits_for(strategy.as_mut(), &rows);
        assert_eq!(sorts[0], vec![json!(7), json!("c"), json!("b")]);
        assert_eq!(sorts[1], vec![json!(7), json!("d"), json!("c"), json!("b")]);
        assert_eq!(sorts[2], vec![json!(3), json!("e")]);
    }
}
