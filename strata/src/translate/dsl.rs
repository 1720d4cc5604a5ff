//! Query DSL translator from Elasticsearch format to ClickHouse SQL

use super::types::*;
use super::QueryTranslator;
use crate::error::{Error, Result};
use crate::model::{
    and, or, ExecutionPlan, Expr, Literal, OrderByExpr, OrderDirection, Query,
    QueryResultCol, QueryResultRow, QueryRowsTransformer, QueryType, RuntimeField, SearchHit,
    SearchResponse, SelectCommand, TotalHits,
};
use crate::schema::Schema;
use crate::table::{Table, INDEX_NAME_COLUMN};
use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Default number of hits when the request has no `size`
const DEFAULT_SIZE: usize = 10;

/// Maximum allowed search result limit
const MAX_SEARCH_LIMIT: usize = 10_000;

const DOC_COUNT: &str = "doc_count";

/// Translates requests against one table (or one common-table subset).
pub struct DslTranslator {
    table_name: String,
    from: String,
    schema: Schema,
    indexes: Vec<String>,
    is_common_table: bool,
}

impl DslTranslator {
    pub fn new(table: &Table, schema: Schema, indexes: Vec<String>, is_common_table: bool) -> Self {
        Self {
            table_name: table.name.clone(),
            from: table.full_name(),
            schema,
            indexes,
            is_common_table,
        }
    }

    /// Backing column of a client field name
    fn column(&self, field: &str) -> String {
        self.schema
            .resolve_field(field)
            .map(|f| f.internal_name.clone())
            .unwrap_or_else(|| field.to_string())
    }

    fn is_date(&self, field: &str) -> bool {
        self.schema
            .resolve_field(field)
            .is_some_and(|f| f.field_type.is_date())
    }

    fn is_text(&self, field: &str) -> bool {
        self.schema
            .resolve_field(field)
            .is_some_and(|f| f.field_type == crate::table::FieldType::Text)
    }

    /// Restricts a common table to the requested logical indexes
    fn index_filter(&self) -> Option<Expr> {
        if !self.is_common_table {
            return None;
        }
        let column = Expr::column(INDEX_NAME_COLUMN);
        match self.indexes.as_slice() {
            [single] => Some(Expr::infix(column, "=", Expr::string(single.clone()))),
            many => Some(Expr::infix(
                column,
                "IN",
                Expr::function("tuple", many.iter().map(|i| Expr::string(i.clone())).collect()),
            )),
        }
    }

    fn where_clause(&self, query: Option<&EsQuery>) -> Result<Option<Expr>> {
        let filter = match query {
            Some(q) => self.translate_query(q)?,
            None => None,
        };
        Ok(and([filter, self.index_filter()]))
    }

    /// `None` means "matches everything"
    pub fn translate_query(&self, query: &EsQuery) -> Result<Option<Expr>> {
        match query {
            EsQuery::MatchAll(_) => Ok(None),
            EsQuery::Term(terms) => Ok(and(terms.iter().map(|(field, value)| {
                Some(Expr::infix(
                    Expr::column(self.column(field)),
                    "=",
                    Expr::literal(Literal::from_json(value.value())),
                ))
            }))),
            EsQuery::Terms(terms) => Ok(and(terms.iter().map(|(field, values)| {
                Some(Expr::infix(
                    Expr::column(self.column(field)),
                    "IN",
                    Expr::function(
                        "tuple",
                        values
                            .iter()
                            .map(|v| Expr::literal(Literal::from_json(v)))
                            .collect(),
                    ),
                ))
            }))),
            EsQuery::Match(matches) => Ok(and(matches.iter().map(|(field, m)| {
                let column = Expr::column(self.column(field));
                let value = m.query();
                if self.is_text(field) {
                    let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                    Some(Expr::infix(
                        column,
                        "ILIKE",
                        Expr::string(format!("%{}%", escape_like(&text))),
                    ))
                } else {
                    Some(Expr::infix(column, "=", Expr::literal(Literal::from_json(value))))
                }
            }))),
            EsQuery::Range(ranges) => {
                let mut parts = Vec::new();
                for (field, params) in ranges {
                    parts.push(self.translate_range(field, params)?);
                }
                Ok(and(parts))
            }
            EsQuery::Exists(exists) => Ok(Some(Expr::function(
                "isNotNull",
                vec![Expr::column(self.column(&exists.field))],
            ))),
            EsQuery::Bool(bool_query) => self.translate_bool(bool_query),
        }
    }

    fn range_value(&self, field: &str, value: &Value) -> Result<Expr> {
        if !self.is_date(field) {
            return Ok(Expr::literal(Literal::from_json(value)));
        }
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(|ms| {
                    Expr::function("fromUnixTimestamp64Milli", vec![Expr::literal(Literal::Int(ms))])
                })
                .ok_or_else(|| {
                    Error::MalformedRequest(format!("invalid date bound for {}: {}", field, value))
                }),
            Value::String(s) => Ok(Expr::function(
                "parseDateTime64BestEffort",
                vec![Expr::string(s.clone()), Expr::literal(Literal::Int(3))],
            )),
            other => Err(Error::MalformedRequest(format!(
                "invalid date bound for {}: {}",
                field, other
            ))),
        }
    }

    fn translate_range(&self, field: &str, params: &RangeParams) -> Result<Option<Expr>> {
        let column = Expr::column(self.column(field));
        let bounds = [
            (">=", &params.gte),
            (">", &params.gt),
            ("<=", &params.lte),
            ("<", &params.lt),
        ];
        let mut parts = Vec::new();
        for (op, bound) in bounds {
            if let Some(value) = bound {
                parts.push(Some(Expr::infix(
                    column.clone(),
                    op,
                    self.range_value(field, value)?,
                )));
            }
        }
        if parts.is_empty() {
            return Err(Error::MalformedRequest(format!(
                "range query on {} must have at least one bound",
                field
            )));
        }
        Ok(and(parts))
    }

    fn translate_list(&self, list: &Option<QueryList>) -> Result<Vec<Option<Expr>>> {
        match list {
            Some(list) => list.iter().map(|q| self.translate_query(q)).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn translate_bool(&self, bool_query: &BoolQuery) -> Result<Option<Expr>> {
        let mut required = self.translate_list(&bool_query.must)?;
        required.extend(self.translate_list(&bool_query.filter)?);

        let excluded: Vec<Option<Expr>> = self
            .translate_list(&bool_query.must_not)?
            .into_iter()
            .map(|e| match e {
                Some(e) => Some(Expr::Not(Box::new(e))),
                // must_not match_all
                None => Some(Expr::Raw("false".to_string())),
            })
            .collect();

        let should = self.translate_list(&bool_query.should)?;
        let min_should = bool_query
            .minimum_should_match
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())));
        let should_required = match min_should {
            Some(n) => n >= 1,
            None => required.is_empty(),
        };

        let should_expr = if should_required && !should.is_empty() {
            if should.iter().any(Option::is_none) {
                None
            } else {
                or(should)
            }
        } else {
            None
        };

        Ok(and(required
            .into_iter()
            .chain(excluded)
            .chain(std::iter::once(should_expr))))
    }

    /// ORDER BY list plus the trailing client tiebreaker (`_doc`, `_score`...)
    fn order_by(&self, sort: Option<SortList>) -> Result<(Vec<OrderByExpr>, Option<String>)> {
        let mut order_by = Vec::new();
        let mut tiebreaker = None;
        for clause in sort.map(SortList::into_vec).unwrap_or_default() {
            let entries: Vec<(String, Option<String>)> = match clause {
                SortClause::Field(field) => vec![(field, None)],
                SortClause::Object(map) => map
                    .into_iter()
                    .map(|(field, order)| {
                        let order = order.order().map(str::to_string);
                        (field, order)
                    })
                    .collect(),
            };
            for (field, order) in entries {
                if field.starts_with('_') {
                    tiebreaker = Some(field);
                    continue;
                }
                let direction = match order.as_deref() {
                    None | Some("asc") => OrderDirection::Asc,
                    Some("desc") => OrderDirection::Desc,
                    Some(other) => {
                        return Err(Error::MalformedRequest(format!(
                            "invalid sort order '{}' for {}",
                            other, field
                        )))
                    }
                };
                order_by.push(OrderByExpr {
                    expr: Expr::column(self.column(&field)),
                    direction,
                });
            }
        }
        Ok((order_by, tiebreaker))
    }

    fn runtime_fields(
        &self,
        mappings: Option<BTreeMap<String, RuntimeMapping>>,
    ) -> Result<Vec<RuntimeField>> {
        let mut fields = Vec::new();
        for (name, mapping) in mappings.unwrap_or_default() {
            let source = mapping.script.as_ref().map(RuntimeScript::source).unwrap_or("");
            let Some(source_field) = emit_doc_value_field(source) else {
                return Err(Error::Translation(format!(
                    "unsupported runtime field script for {}: {}",
                    name, source
                )));
            };
            let column = self.column(&source_field);
            fields.push(RuntimeField {
                name,
                eval: Arc::new(move |row: &QueryResultRow| {
                    row.get(&source_field).or_else(|| row.get(&column)).cloned()
                }),
            });
        }
        Ok(fields)
    }

    fn new_query(&self, select_command: SelectCommand, query_type: QueryType) -> Query {
        let mut query = Query::new(select_command, query_type, &self.table_name);
        query.indexes = self.indexes.clone();
        query.schema = self.schema.clone();
        query
    }

    fn aggregation_queries(
        &self,
        aggs: BTreeMap<String, EsAggregation>,
        where_clause: &Option<Expr>,
        first_index: usize,
    ) -> Result<(Vec<Query>, Vec<Arc<dyn QueryRowsTransformer>>)> {
        let mut queries = Vec::new();
        let mut transformers: Vec<Arc<dyn QueryRowsTransformer>> = Vec::new();
        let mut positions = BTreeMap::new();

        for (name, agg) in &aggs {
            let Some(terms) = &agg.terms else { continue };
            let column = Expr::column(self.column(&terms.field));
            let cmd = SelectCommand {
                columns: vec![
                    column.clone(),
                    Expr::Raw(format!("count() AS \"{}\"", DOC_COUNT)),
                ],
                from: self.from.clone(),
                where_clause: where_clause.clone(),
                group_by: vec![column],
                order_by: vec![OrderByExpr::desc(Expr::column(DOC_COUNT))],
                limit: Some(terms.size.unwrap_or(DEFAULT_SIZE).min(MAX_SEARCH_LIMIT)),
                ..Default::default()
            };
            positions.insert(name.clone(), first_index + queries.len());
            queries.push(self.new_query(
                cmd,
                QueryType::Terms {
                    name: name.clone(),
                    field: terms.field.clone(),
                },
            ));
        }

        for (name, agg) in &aggs {
            let (path, pick_max) = match (&agg.max_bucket, &agg.min_bucket) {
                (Some(p), _) => (&p.buckets_path, true),
                (None, Some(p)) => (&p.buckets_path, false),
                (None, None) => continue,
            };
            let parent_name = path.split('>').next().unwrap_or(path);
            let Some(&parent) = positions.get(parent_name) else {
                return Err(Error::Translation(format!(
                    "buckets_path '{}' of {} does not point at a terms aggregation",
                    path, name
                )));
            };
            let target = first_index + queries.len();
            queries.push(self.new_query(
                SelectCommand::default(),
                QueryType::SiblingBucket {
                    name: name.clone(),
                    parent,
                    pick_max,
                },
            ));
            transformers.push(Arc::new(SiblingBucketFold {
                parent,
                target,
                pick_max,
            }));
        }

        if queries.is_empty() && !aggs.is_empty() {
            return Err(Error::Translation(
                "only terms, max_bucket and min_bucket aggregations are supported".to_string(),
            ));
        }
        Ok((queries, transformers))
    }

    /// Single count query for `_count`
    pub fn parse_count(&self, body: &Value) -> Result<Query> {
        let request: EsCountRequest = if body.is_null() {
            EsCountRequest::default()
        } else {
            serde_json::from_value(body.clone())
                .map_err(|e| Error::MalformedRequest(format!("invalid count body: {}", e)))?
        };
        let cmd = SelectCommand {
            columns: vec![Expr::Raw("count()".to_string())],
            from: self.from.clone(),
            where_clause: self.where_clause(request.query.as_ref())?,
            ..Default::default()
        };
        Ok(self.new_query(cmd, QueryType::Count))
    }

    /// Distinct values of one field starting with the requested prefix
    pub fn parse_terms_enum(&self, request: &EsTermsEnumRequest) -> Result<Query> {
        let column = Expr::column(self.column(&request.field));
        let prefix = request.string.as_deref().filter(|s| !s.is_empty()).map(|s| {
            Expr::infix(
                Expr::function("toString", vec![column.clone()]),
                "ILIKE",
                Expr::string(format!("{}%", escape_like(s))),
            )
        });
        let filter = match &request.index_filter {
            Some(q) => self.translate_query(q)?,
            None => None,
        };
        let cmd = SelectCommand {
            distinct: true,
            columns: vec![column.clone()],
            from: self.from.clone(),
            where_clause: and([prefix, filter, self.index_filter()]),
            order_by: vec![OrderByExpr::asc(column)],
            limit: Some(request.size.unwrap_or(DEFAULT_SIZE).min(MAX_SEARCH_LIMIT)),
            ..Default::default()
        };
        Ok(self.new_query(cmd, QueryType::TermsEnum))
    }

    /// Property names of the ORDER BY columns, as rows carry them after renaming
    fn sort_field_names(&self, query: &Query) -> Vec<String> {
        query
            .select_command
            .order_by_field_names()
            .into_iter()
            .map(|col| {
                query
                    .schema
                    .field_for_column(&col)
                    .map(|f| f.property_name.clone())
                    .unwrap_or(col)
            })
            .collect()
    }

    fn make_hits(&self, query: &Query, rows: &[QueryResultRow]) -> Vec<SearchHit> {
        let sort_names = self.sort_field_names(query);
        let pk = query.schema.primary_key.clone();
        let mut strategy = query.search_after_strategy.as_ref().map(|s| s.lock());

        let mut hits = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let mut source = Map::new();
            let mut fields = Map::new();
            for col in &row.cols {
                if query.runtime_fields.iter().any(|f| f.name == col.col_name) {
                    fields.insert(col.col_name.clone(), json!([col.value]));
                } else {
                    source.insert(col.col_name.clone(), col.value.clone());
                }
            }

            let sort = sort_names
                .iter()
                .map(|name| {
                    let value = row.get(name).cloned().unwrap_or(Value::Null);
                    if self.is_date(name) {
                        date_to_millis(&value).map(Value::from).unwrap_or(value)
                    } else {
                        value
                    }
                })
                .collect();

            let id = pk
                .as_ref()
                .and_then(|pk| row.get(pk))
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .unwrap_or_else(|| format!("{}-{}", row.index, i));

            let mut hit = SearchHit {
                index: row.index.clone(),
                id,
                score: if sort_names.is_empty() { Some(1.0) } else { None },
                source,
                fields,
                sort,
            };
            if let Some(strategy) = strategy.as_mut() {
                strategy.transform_hit(&mut hit, pk.as_deref(), &sort_names, &rows[..=i]);
            }
            hits.push(hit);
        }
        hits
    }
}

impl QueryTranslator for DslTranslator {
    fn parse_query(&self, body: &Value) -> Result<ExecutionPlan> {
        let request: EsSearchRequest = if body.is_null() {
            EsSearchRequest::default()
        } else {
            serde_json::from_value(body.clone())
                .map_err(|e| Error::MalformedRequest(format!("invalid search body: {}", e)))?
        };

        let where_clause = self.where_clause(request.query.as_ref())?;
        let (order_by, tiebreaker) = self.order_by(request.sort)?;
        let size = request.size.unwrap_or(DEFAULT_SIZE).min(MAX_SEARCH_LIMIT);
        let offset = request.from.filter(|&f| f > 0);
        let runtime_fields = self.runtime_fields(request.runtime_mappings)?;
        let has_cursor = request.search_after.is_some();

        let mut queries = Vec::new();
        if size > 0 {
            let cmd = SelectCommand {
                from: self.from.clone(),
                where_clause: where_clause.clone(),
                order_by,
                limit: Some(size),
                offset,
                ..Default::default()
            };
            let mut hits = self.new_query(cmd, QueryType::Hits);
            hits.search_after = request.search_after;
            hits.tiebreaker = tiebreaker;
            hits.runtime_fields = runtime_fields;
            queries.push(hits);
        }

        let track_total = !matches!(request.track_total_hits, Some(TrackTotalHits::Bool(false)));
        if track_total {
            let cmd = SelectCommand {
                columns: vec![Expr::Raw("count()".to_string())],
                from: self.from.clone(),
                where_clause: where_clause.clone(),
                ..Default::default()
            };
            queries.push(self.new_query(cmd, QueryType::Count));
        }

        let (agg_queries, rows_transformers) = match request.aggs {
            Some(aggs) => self.aggregation_queries(aggs, &where_clause, queries.len())?,
            None => (Vec::new(), Vec::new()),
        };
        let only_hits_and_count =
            agg_queries.is_empty() && queries.len() == 2 && size > 0 && offset.is_none() && !has_cursor;
        queries.extend(agg_queries);

        let mut plan = ExecutionPlan::new(queries);
        plan.rows_transformers = rows_transformers;
        if only_hits_and_count {
            // a short first page already is the total
            plan.interrupt = Some(Arc::new(move |n, rows| n == 0 && rows.len() < size));
        }
        Ok(plan)
    }

    fn make_search_response(
        &self,
        queries: &[Query],
        results: Vec<Vec<QueryResultRow>>,
    ) -> Result<SearchResponse> {
        let mut response = SearchResponse::default();
        let mut aggregations = BTreeMap::new();
        let mut total = None;
        let mut wants_total = false;

        for (query, rows) in queries.iter().zip(&results) {
            match &query.query_type {
                QueryType::Hits => response.hits.hits = self.make_hits(query, rows),
                QueryType::Count => {
                    wants_total = true;
                    total = rows.first().and_then(|r| r.cols.first()).and_then(|c| as_u64(&c.value));
                }
                QueryType::Terms { name, .. } => {
                    let buckets: Vec<Value> = rows
                        .iter()
                        .map(|row| {
                            let key = row.cols.first().map(|c| c.value.clone()).unwrap_or(Value::Null);
                            let doc_count = row.get(DOC_COUNT).and_then(as_u64).unwrap_or(0);
                            json!({"key": key, "doc_count": doc_count})
                        })
                        .collect();
                    aggregations.insert(
                        name.clone(),
                        json!({
                            "doc_count_error_upper_bound": 0,
                            "sum_other_doc_count": 0,
                            "buckets": buckets,
                        }),
                    );
                }
                QueryType::SiblingBucket { name, .. } => {
                    let row = rows.first();
                    aggregations.insert(
                        name.clone(),
                        json!({
                            "value": row.and_then(|r| r.get("value")).cloned().unwrap_or(Value::Null),
                            "keys": row.and_then(|r| r.get("keys")).cloned().unwrap_or(json!([])),
                        }),
                    );
                }
                QueryType::TermsEnum => {}
            }
        }

        if wants_total {
            // count job skipped by the plan's interrupt
            let value = total.unwrap_or(response.hits.hits.len() as u64);
            response.hits.total = Some(TotalHits::eq(value));
        }
        if !aggregations.is_empty() {
            response.aggregations = Some(aggregations);
        }
        Ok(response)
    }
}

/// Folds the buckets of a terms query into the max/min bucket row.
#[derive(Debug)]
pub struct SiblingBucketFold {
    parent: usize,
    target: usize,
    pick_max: bool,
}

impl QueryRowsTransformer for SiblingBucketFold {
    fn transform(&self, mut results: Vec<Vec<QueryResultRow>>) -> Vec<Vec<QueryResultRow>> {
        let Some(parent_rows) = results.get(self.parent) else {
            return results;
        };
        let counts = parent_rows.iter().filter_map(|row| {
            let key = row.cols.first()?.value.clone();
            let count = row.get(DOC_COUNT).and_then(as_u64)?;
            Some((key, count))
        });

        let mut best: Option<(u64, Vec<Value>)> = None;
        for (key, count) in counts {
            let better = match &best {
                None => true,
                Some((value, _)) if self.pick_max => count > *value,
                Some((value, _)) => count < *value,
            };
            if better {
                best = Some((count, vec![key]));
            } else if let Some((value, keys)) = &mut best {
                if *value == count {
                    keys.push(key);
                }
            }
        }

        let row = match best {
            Some((value, keys)) => QueryResultRow::new(
                "",
                vec![
                    QueryResultCol::new("value", json!(value)),
                    QueryResultCol::new("keys", Value::Array(keys)),
                ],
            ),
            None => QueryResultRow::new("", vec![QueryResultCol::new("value", Value::Null)]),
        };
        if let Some(target) = results.get_mut(self.target) {
            *target = vec![row];
        }
        results
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Field read by a `emit(doc['field'].value)` script
fn emit_doc_value_field(source: &str) -> Option<String> {
    static EMIT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = EMIT
        .get_or_init(|| {
            Regex::new(r#"^\s*emit\(\s*doc\[\s*['"]([^'"]+)['"]\s*\]\.value\s*\)\s*;?\s*$"#).ok()
        })
        .as_ref()?;
    re.captures(source).map(|c| c[1].to_string())
}

/// Epoch milliseconds of a ClickHouse or ISO-8601 timestamp
pub fn date_to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::table::FieldType;

    fn schema() -> Schema {
        let mut schema = Schema::default();
        for (prop, col, ty) in [
            ("@timestamp", "timestamp", FieldType::Date),
            ("message", "message", FieldType::Text),
            ("level", "level", FieldType::Keyword),
            ("status", "status", FieldType::Long),
            ("id", "id", FieldType::Keyword),
        ] {
            schema.fields.insert(
                prop.to_string(),
                Field {
                    property_name: prop.to_string(),
                    internal_name: col.to_string(),
                    field_type: ty,
                },
            );
        }
        schema.primary_key = Some("id".to_string());
        schema
    }

    fn translator() -> DslTranslator {
        DslTranslator::new(&Table::new("logs"), schema(), vec!["logs".to_string()], false)
    }

    fn common_translator(indexes: &[&str]) -> DslTranslator {
        DslTranslator::new(
            &Table::new(crate::table::COMMON_TABLE_NAME),
            schema(),
            indexes.iter().map(|s| s.to_string()).collect(),
            true,
        )
    }

    #[test]
    fn test_default_plan_has_hits_and_count() {
        let plan = translator().parse_query(&json!({})).unwrap();
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.queries[0].sql(), "SELECT * FROM \"logs\" LIMIT 10");
        assert_eq!(plan.queries[1].sql(), "SELECT count() FROM \"logs\"");
        assert!(plan.interrupt(0, &[]));
    }

    #[test]
    fn test_bool_query_translation() {
        let body = json!({
            "query": {"bool": {
                "filter": [{"term": {"level": "error"}}, {"range": {"status": {"gte": 500}}}],
                "must_not": {"exists": {"field": "id"}}
            }},
            "size": 5,
            "track_total_hits": false
        });
        let plan = translator().parse_query(&body).unwrap();
        assert_eq!(plan.queries.len(), 1);
        assert_eq!(
            plan.queries[0].sql(),
            "SELECT * FROM \"logs\" WHERE (\"level\" = 'error' AND \"status\" >= 500 AND NOT (isNotNull(\"id\"))) LIMIT 5"
        );
        assert!(plan.interrupt.is_none());
    }

    #[test]
    fn test_should_without_must_is_required() {
        let body = json!({"query": {"bool": {"should": [
            {"term": {"level": "error"}},
            {"term": {"level": "warn"}}
        ]}}});
        let where_clause = translator()
            .parse_query(&body)
            .unwrap()
            .queries[0]
            .select_command
            .where_clause
            .clone()
            .unwrap();
        assert_eq!(
            where_clause.to_string(),
            "(\"level\" = 'error' OR \"level\" = 'warn')"
        );
    }

    #[test]
    fn test_match_on_text_uses_ilike() {
        let body = json!({"query": {"match": {"message": "100%"}}});
        let plan = translator().parse_query(&body).unwrap();
        assert_eq!(
            plan.queries[0].select_command.where_clause.as_ref().unwrap().to_string(),
            "\"message\" ILIKE '%100\\\\%%'"
        );
    }

    #[test]
    fn test_date_range_and_sort() {
        let body = json!({
            "query": {"range": {"@timestamp": {"gte": "2024-01-01T00:00:00Z", "lt": 1706000000000_i64}}},
            "sort": [{"@timestamp": {"order": "desc"}}, {"_doc": "asc"}],
            "search_after": [1706000000000_i64, 4]
        });
        let plan = translator().parse_query(&body).unwrap();
        let hits = &plan.queries[0];
        assert_eq!(
            hits.sql(),
            "SELECT * FROM \"logs\" WHERE (\"timestamp\" >= parseDateTime64BestEffort('2024-01-01T00:00:00Z', 3) AND \"timestamp\" < fromUnixTimestamp64Milli(1706000000000)) ORDER BY \"timestamp\" DESC LIMIT 10"
        );
        assert_eq!(hits.tiebreaker.as_deref(), Some("_doc"));
        assert!(hits.search_after.is_some());
        // cursor pages never skip the count query
        assert!(plan.interrupt.is_none());
    }

    #[test]
    fn test_common_table_filter() {
        let plan = common_translator(&["logs-1", "logs-2"])
            .parse_query(&json!({"size": 1}))
            .unwrap();
        assert_eq!(
            plan.queries[0].sql(),
            "SELECT * FROM \"strata_common_table\" WHERE \"__strata_index_name\" IN tuple('logs-1', 'logs-2') LIMIT 1"
        );

        let count = common_translator(&["logs-1"]).parse_count(&Value::Null).unwrap();
        assert_eq!(
            count.sql(),
            "SELECT count() FROM \"strata_common_table\" WHERE \"__strata_index_name\" = 'logs-1'"
        );
    }

    #[test]
    fn test_invalid_sort_order() {
        let body = json!({"sort": [{"status": "sideways"}]});
        assert!(matches!(
            translator().parse_query(&body),
            Err(Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_terms_and_max_bucket() {
        let body = json!({
            "size": 0,
            "aggs": {
                "by_level": {"terms": {"field": "level", "size": 3}},
                "top_level": {"max_bucket": {"buckets_path": "by_level>_count"}}
            }
        });
        let t = translator();
        let plan = t.parse_query(&body).unwrap();
        assert_eq!(plan.queries.len(), 3);
        assert_eq!(
            plan.queries[1].sql(),
            "SELECT \"level\", count() AS \"doc_count\" FROM \"logs\" GROUP BY \"level\" ORDER BY \"doc_count\" DESC LIMIT 3"
        );
        assert!(!plan.queries[2].query_type.needs_backend());

        let terms_rows = vec![
            QueryResultRow::new("logs", vec![
                QueryResultCol::new("level", json!("error")),
                QueryResultCol::new("doc_count", json!(7)),
            ]),
            QueryResultRow::new("logs", vec![
                QueryResultCol::new("level", json!("warn")),
                QueryResultCol::new("doc_count", json!(7)),
            ]),
            QueryResultRow::new("logs", vec![
                QueryResultCol::new("level", json!("info")),
                QueryResultCol::new("doc_count", json!(2)),
            ]),
        ];
        let count_rows = vec![QueryResultRow::new("logs", vec![QueryResultCol::new("count()", json!(16))])];
        let mut results = vec![count_rows, terms_rows, vec![]];
        for transformer in &plan.rows_transformers {
            results = transformer.transform(results);
        }
        let response = t.make_search_response(&plan.queries, results).unwrap();
        let aggs = response.aggregations.unwrap();
        assert_eq!(aggs["by_level"]["buckets"][0]["key"], "error");
        assert_eq!(aggs["top_level"]["value"], 7);
        assert_eq!(aggs["top_level"]["keys"], json!(["error", "warn"]));
        assert_eq!(response.hits.total.unwrap().value, 16);
    }

    #[test]
    fn test_unsupported_aggregation() {
        let body = json!({"aggs": {"x": {}}});
        assert!(matches!(
            translator().parse_query(&body),
            Err(Error::Translation(_))
        ));
    }

    #[test]
    fn test_hits_response_with_sort_and_runtime_field() {
        let body = json!({
            "sort": [{"@timestamp": "desc"}],
            "runtime_mappings": {"lvl": {"type": "keyword", "script": {"source": "emit(doc['level'].value)"}}}
        });
        let t = translator();
        let plan = t.parse_query(&body).unwrap();
        let hits_query = &plan.queries[0];
        let rf = &hits_query.runtime_fields[0];

        let mut row = QueryResultRow::new("logs", vec![
            QueryResultCol::new("@timestamp", json!("2024-01-24 08:53:20.000")),
            QueryResultCol::new("level", json!("error")),
            QueryResultCol::new("id", json!("a1")),
        ]);
        let value = (rf.eval)(&row).unwrap();
        row.cols.push(QueryResultCol::new("lvl", value));

        let response = t
            .make_search_response(&plan.queries, vec![vec![row], vec![]])
            .unwrap();
        let hit = &response.hits.hits[0];
        assert_eq!(hit.id, "a1");
        assert_eq!(hit.sort, vec![json!(1706086400000_i64)]);
        assert_eq!(hit.fields["lvl"], json!(["error"]));
        assert!(!hit.source.contains_key("lvl"));
        // interrupted count falls back to the page length
        assert_eq!(response.hits.total.unwrap().value, 1);
    }

    #[test]
    fn test_unsupported_runtime_script() {
        let body = json!({"runtime_mappings": {"x": {"type": "long", "script": "emit(1 + 1)"}}});
        assert!(matches!(
            translator().parse_query(&body),
            Err(Error::Translation(_))
        ));
    }

    #[test]
    fn test_terms_enum_query() {
        let req = EsTermsEnumRequest {
            field: "level".to_string(),
            string: Some("er".to_string()),
            size: Some(5),
            index_filter: None,
        };
        let query = translator().parse_terms_enum(&req).unwrap();
        assert_eq!(
            query.sql(),
            "SELECT DISTINCT \"level\" FROM \"logs\" WHERE toString(\"level\") ILIKE 'er%' ORDER BY \"level\" ASC LIMIT 5"
        );
    }

    #[test]
    fn test_date_to_millis() {
        assert_eq!(date_to_millis(&json!("1970-01-01 00:00:01.500")), Some(1500));
        assert_eq!(date_to_millis(&json!("1970-01-01T00:00:02Z")), Some(2000));
        assert_eq!(date_to_millis(&json!(5)), Some(5));
        assert_eq!(date_to_millis(&json!("nope")), None);
    }
}
