//! Query runner
//!
//! Drives a search from index pattern to Elasticsearch-shaped response:
//!
//! ```text
//! pattern → TableResolver → translate → transform → JobScheduler → post-process → response
//! ```
//!
//! Elastic-only decisions are forwarded to the configured Elasticsearch
//! connector. Async searches run the same pipeline on a background task and
//! park their result in the [`AsyncResultStore`] until it is fetched.

mod ab_testing;
mod async_search;
mod jobs;
mod postprocess;

pub use ab_testing::{AbResultsSender, AbTestingResult, AbTestingSide, LoggingAbResultsSender};
pub use async_search::{new_async_id, AsyncQuery, ASYNC_ID_PREFIX};

use crate::async_store::{AsyncResultStore, InMemoryAsyncResultStore};
use crate::backend::{BackendConnector, ElasticsearchConnector};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::SearchTimer;
use crate::model::{ExecutionPlan, SearchResponse};
use crate::resolver::{
    is_index_pattern, ClickhouseDecision, ConnectorDecision, Decision, Pipeline, TableResolver,
};
use crate::schema::{Schema, SchemaRegistry, StaticSchemaRegistry};
use crate::table::{Table, TableDiscovery, COMMON_TABLE_NAME};
use crate::transform::{SchemaCheckPass, TransformationPipeline};
use crate::translate::types::EsTermsEnumRequest;
use crate::translate::{DslTranslator, QueryTranslator};
use jobs::JobScheduler;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name given to the plan whose result goes back to the client
pub const MAIN_EXECUTION_PLAN: &str = "main";

/// Where a decision sends a request
enum Route {
    /// Nothing matched; answer with an empty response
    Empty,
    /// Elastic-only decision
    Elastic,
    Clickhouse(ClickhouseDecision),
}

/// A translated and transformed plan, ready to execute
pub(crate) struct PreparedPlan {
    plan: ExecutionPlan,
    translator: Arc<dyn QueryTranslator>,
    table: Arc<Table>,
}

/// Tables, schema and logical indexes a ClickHouse decision points at
struct ResolvedTarget {
    indexes: Vec<String>,
    schema: Schema,
    table: Table,
}

/// Executes searches for the HTTP layer.
///
/// Cheap to clone: every clone shares the same stores, budget and contexts.
#[derive(Clone)]
pub struct QueryRunner {
    config: Arc<Config>,
    resolver: Arc<TableResolver>,
    discovery: Arc<dyn TableDiscovery>,
    schemas: Arc<dyn SchemaRegistry>,
    scheduler: JobScheduler,
    elastic: Option<Arc<dyn ElasticsearchConnector>>,
    transformation: Arc<dyn TransformationPipeline>,
    async_store: Arc<dyn AsyncResultStore>,
    async_contexts: Arc<Mutex<HashMap<String, CancellationToken>>>,
    ab_sender: Arc<dyn AbResultsSender>,
    shutdown: CancellationToken,
}

impl QueryRunner {
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<TableResolver>,
        discovery: Arc<dyn TableDiscovery>,
        backend: Arc<dyn BackendConnector>,
    ) -> Self {
        let runner_config = &config.runner;
        let scheduler = JobScheduler::new(
            backend,
            runner_config.max_parallel_queries,
            runner_config.drain_timeout(),
        );
        let transformation = Arc::new(SchemaCheckPass::new(
            runner_config.search_after_strategy,
            runner_config.strip_search_after_tiebreaker,
        ));
        let schemas = Arc::new(StaticSchemaRegistry::new(Arc::clone(&discovery)));

        Self {
            config,
            resolver,
            discovery,
            schemas,
            scheduler,
            elastic: None,
            transformation,
            async_store: Arc::new(InMemoryAsyncResultStore::new()),
            async_contexts: Arc::new(Mutex::new(HashMap::new())),
            ab_sender: Arc::new(LoggingAbResultsSender),
            shutdown: CancellationToken::new(),
        }
    }

    /// Forward Elastic-routed searches and A/B comparisons to this cluster
    pub fn with_elastic(mut self, elastic: Arc<dyn ElasticsearchConnector>) -> Self {
        self.elastic = Some(elastic);
        self
    }

    pub fn with_schema_registry(mut self, schemas: Arc<dyn SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_transformation(mut self, transformation: Arc<dyn TransformationPipeline>) -> Self {
        self.transformation = transformation;
        self
    }

    pub fn with_async_store(mut self, store: Arc<dyn AsyncResultStore>) -> Self {
        self.async_store = store;
        self
    }

    pub fn with_ab_results_sender(mut self, sender: Arc<dyn AbResultsSender>) -> Self {
        self.ab_sender = sender;
        self
    }

    pub fn resolver(&self) -> &Arc<TableResolver> {
        &self.resolver
    }

    pub fn async_store(&self) -> &Arc<dyn AsyncResultStore> {
        &self.async_store
    }

    /// Async wait used when a request does not set `wait_for_completion_timeout`
    pub fn default_wait_for_completion(&self) -> std::time::Duration {
        self.config.runner.default_wait_for_completion()
    }

    /// Number of async searches still running
    pub fn running_async_searches(&self) -> usize {
        self.async_contexts.lock().len()
    }

    /// Cancel every running async search
    pub fn close(&self) {
        self.shutdown.cancel();
        info!("Query runner stopped");
    }

    pub async fn handle_search(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let timer = SearchTimer::new("search");
        let result = self.search(index_pattern, body).await;
        match &result {
            Ok(_) => timer.success(),
            Err(e) => {
                warn!(pattern = %index_pattern, error = %e, "Search failed");
                timer.error(e.error_type())
            }
        }
        result
    }

    async fn search(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let start = Instant::now();
        let decision = self.resolver.resolve_pipeline(Pipeline::Query, index_pattern);
        let target = match route(&decision)? {
            Route::Empty => return Ok(serde_json::to_value(SearchResponse::empty())?),
            Route::Elastic => return self.forward_search(index_pattern, body).await,
            Route::Clickhouse(target) => target,
        };
        let Some(prepared) = self.prepare(index_pattern, &target, body, start)? else {
            return Ok(serde_json::to_value(SearchResponse::empty())?);
        };

        if decision.enable_ab_testing {
            if let Some(elastic) = self.ab_testing_partner(&decision) {
                return self
                    .execute_ab_testing(&decision, index_pattern, body, prepared, elastic)
                    .await;
            }
        }

        // dropping this future (client gone) cancels the jobs through the token
        let cancel = self.shutdown.child_token();
        let _guard = cancel.clone().drop_guard();
        let response = self.execute(&cancel, prepared).await?;
        Ok(serde_json::to_value(response)?)
    }

    /// Translate the request and run the transformation passes.
    ///
    /// `None` when the decision names no index that can be queried.
    pub(crate) fn prepare(
        &self,
        index_pattern: &str,
        target: &ClickhouseDecision,
        body: &Value,
        start: Instant,
    ) -> Result<Option<PreparedPlan>> {
        let Some(resolved) = self.resolve_target(target)? else {
            debug!(pattern = %index_pattern, "No queryable index left after filtering");
            return Ok(None);
        };

        let translator = DslTranslator::new(
            &resolved.table,
            resolved.schema,
            resolved.indexes,
            target.is_common_table,
        );
        let plan = translator.parse_query(body).map_err(|e| {
            error!(pattern = %index_pattern, error = %e, "Failed to translate search request");
            e
        })?;
        for (i, query) in plan.queries.iter().enumerate() {
            if query.query_type.needs_backend() {
                info!(query = i, sql = %query.sql(), "Input SQL query");
            }
        }

        let mut plan = self.transformation.transform(plan)?;
        plan.index_pattern = index_pattern.to_string();
        plan.name = MAIN_EXECUTION_PLAN.to_string();
        plan.start_time = start;

        Ok(Some(PreparedPlan {
            plan,
            translator: Arc::new(translator),
            table: Arc::new(resolved.table),
        }))
    }

    /// Run a prepared plan and build the response
    pub(crate) async fn execute(
        &self,
        cancel: &CancellationToken,
        prepared: PreparedPlan,
    ) -> Result<SearchResponse> {
        let PreparedPlan {
            plan,
            translator,
            table,
        } = prepared;

        let results = self.scheduler.run(cancel, &plan, table).await?;
        let results = postprocess::post_process(&plan, results);
        let mut response = translator.make_search_response(&plan.queries, results)?;
        response.took = plan.start_time.elapsed().as_millis() as u64;
        debug!(
            plan = %plan.name,
            pattern = %plan.index_pattern,
            took_ms = response.took,
            hits = response.hits.hits.len(),
            "Execution plan finished"
        );
        Ok(response)
    }

    fn resolve_target(&self, target: &ClickhouseDecision) -> Result<Option<ResolvedTarget>> {
        if target.is_common_table {
            self.resolve_common_table(target)
        } else {
            self.resolve_single_table(target).map(Some)
        }
    }

    fn resolve_single_table(&self, target: &ClickhouseDecision) -> Result<ResolvedTarget> {
        let Some(index) = target.indexes.first() else {
            return Err(Error::NoSuchTable(format!(
                "no index given for table {}",
                target.table_name
            )));
        };
        if target.indexes.len() > 1 {
            warn!(
                indexes = ?target.indexes,
                "Multiple indexes in search request, using the first one: {}",
                index
            );
        }

        let tables = self.discovery.table_definitions();
        let table = tables
            .get(&target.table_name)
            .ok_or_else(|| Error::NoSuchTable(format!("can't load {} table", target.table_name)))?;
        let schema = self
            .schemas
            .find_schema(index)
            .or_else(|| self.schemas.find_schema(&target.table_name))
            .ok_or_else(|| Error::NoSuchTable(format!("can't load {} schema", index)))?;

        Ok(ResolvedTarget {
            indexes: vec![index.clone()],
            schema,
            table: table.clone(),
        })
    }

    /// Keeps only the indexes stored in the common table and merges their schemas
    fn resolve_common_table(&self, target: &ClickhouseDecision) -> Result<Option<ResolvedTarget>> {
        let tables = self.discovery.table_definitions();
        let indexes: Vec<String> = target
            .indexes
            .iter()
            .filter(|index| {
                let table_name = self
                    .config
                    .indexes
                    .get(index.as_str())
                    .map_or(index.as_str(), |c| c.table_name(index));
                tables.get(table_name).is_some_and(|t| t.is_virtual)
            })
            .cloned()
            .collect();
        if indexes.is_empty() {
            return Ok(None);
        }

        let table = tables
            .get(COMMON_TABLE_NAME)
            .ok_or_else(|| Error::NoSuchTable(format!("can't load {} table", COMMON_TABLE_NAME)))?;

        let all = self.schemas.all_schemas();
        let mut schemas = Vec::with_capacity(indexes.len());
        for index in &indexes {
            let schema = all
                .get(index)
                .ok_or_else(|| Error::NoSuchTable(format!("can't load {} schema", index)))?;
            schemas.push(schema);
        }

        Ok(Some(ResolvedTarget {
            schema: Schema::union(schemas),
            indexes,
            table: table.clone(),
        }))
    }

    async fn forward_search(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let elastic = self.elastic_connector(index_pattern)?;
        debug!(pattern = %index_pattern, "Forwarding search to Elasticsearch");
        elastic.search(index_pattern, body).await
    }

    fn elastic_connector(&self, index_pattern: &str) -> Result<&Arc<dyn ElasticsearchConnector>> {
        self.elastic.as_ref().ok_or_else(|| {
            Error::Routing(format!(
                "{} is routed to Elasticsearch, but no Elasticsearch connection is configured",
                index_pattern
            ))
        })
    }

    /// Elasticsearch connector to compare against, if the decision names two backends
    fn ab_testing_partner(&self, decision: &Decision) -> Option<Arc<dyn ElasticsearchConnector>> {
        let has_both = decision.use_connectors.len() == 2
            && decision.use_connectors.iter().any(|c| c.is_elastic())
            && decision.clickhouse().is_some();
        if !has_both {
            warn!(
                pattern = %decision.index_pattern,
                connectors = decision.use_connectors.len(),
                "A/B testing needs one ClickHouse and one Elasticsearch connector, running normally"
            );
            return None;
        }
        if self.elastic.is_none() {
            warn!(
                pattern = %decision.index_pattern,
                "A/B testing enabled but no Elasticsearch connection is configured"
            );
        }
        self.elastic.clone()
    }

    /// Answer from the first connector; compare with the second in the background
    async fn execute_ab_testing(
        &self,
        decision: &Decision,
        index_pattern: &str,
        body: &Value,
        prepared: PreparedPlan,
        elastic: Arc<dyn ElasticsearchConnector>,
    ) -> Result<Value> {
        let clickhouse_first = matches!(
            decision.use_connectors.first(),
            Some(ConnectorDecision::Clickhouse(_))
        );
        let timeout = self.config.runner.ab_testing_timeout();

        let runner = self.clone();
        let cancel = self.shutdown.child_token();
        let run_clickhouse = async move {
            let start = Instant::now();
            let result = runner
                .execute(&cancel, prepared)
                .await
                .and_then(|r| serde_json::to_value(r).map_err(Error::from));
            (result, start.elapsed())
        };
        let pattern = index_pattern.to_string();
        let request = body.clone();
        let run_elastic = async move {
            let start = Instant::now();
            let result = elastic.search(&pattern, &request).await;
            (result, start.elapsed())
        };

        let (main_name, secondary_name) = if clickhouse_first {
            ("clickhouse", "elasticsearch")
        } else {
            ("elasticsearch", "clickhouse")
        };
        let (main, secondary) = if clickhouse_first {
            let secondary = tokio::spawn(run_elastic);
            (run_clickhouse.await, secondary)
        } else {
            let secondary = tokio::spawn(run_clickhouse);
            (run_elastic.await, secondary)
        };
        let (main_result, main_took) = main;

        let main_side = AbTestingSide::new(main_name, main_took, &main_result);
        let sender = Arc::clone(&self.ab_sender);
        let pattern = index_pattern.to_string();
        tokio::spawn(async move {
            let secondary = match tokio::time::timeout(timeout, secondary).await {
                Ok(Ok((result, took))) => AbTestingSide::new(secondary_name, took, &result),
                Ok(Err(join)) => AbTestingSide::new(
                    secondary_name,
                    timeout,
                    &Err(Error::JobPanicked(join.to_string())),
                ),
                Err(_) => AbTestingSide::new(
                    secondary_name,
                    timeout,
                    &Err(Error::Execution(format!("timed out after {:?}", timeout))),
                ),
            };
            sender
                .send(AbTestingResult {
                    index_pattern: pattern,
                    main: main_side,
                    secondary,
                })
                .await;
        });

        main_result
    }

    /// `_msearch`: every header/body pair is an independent search
    pub async fn handle_multi_search(&self, default_index: Option<&str>, lines: Vec<Value>) -> Result<Value> {
        let searches = split_multi_search(lines, default_index)?;
        debug!(
            searches = searches.len(),
            indexes = ?searches.iter().map(|s| s.0.as_str()).collect::<Vec<_>>(),
            "Handling multi search"
        );

        let mut responses = Vec::with_capacity(searches.len());
        for (index, body) in searches {
            match self.handle_search(&index, &body).await {
                Ok(response) => responses.push(response),
                Err(e) => responses.push(multi_search_error(&e)),
            }
        }
        Ok(json!({ "responses": responses }))
    }

    /// `_count`
    pub async fn handle_count(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let timer = SearchTimer::new("count");
        let result = self.count(index_pattern, body).await;
        match &result {
            Ok(_) => timer.success(),
            Err(e) => timer.error(e.error_type()),
        }
        result
    }

    async fn count(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let decision = self.resolver.resolve_pipeline(Pipeline::Query, index_pattern);
        let not_found = || {
            if is_index_pattern(index_pattern) {
                Ok(count_response(0))
            } else {
                warn!(pattern = %index_pattern, "Could not resolve table name");
                Err(Error::IndexNotFound(index_pattern.to_string()))
            }
        };

        let target = match route(&decision)? {
            Route::Empty => return not_found(),
            Route::Elastic => {
                let elastic = self.elastic_connector(index_pattern)?;
                return elastic.count(index_pattern, body).await;
            }
            Route::Clickhouse(target) => target,
        };
        let Some(resolved) = self.resolve_target(&target)? else {
            return not_found();
        };

        let translator = DslTranslator::new(
            &resolved.table,
            resolved.schema,
            resolved.indexes,
            target.is_common_table,
        );
        let query = translator.parse_count(body)?;
        let plan = ExecutionPlan::new(vec![query]);
        let cancel = self.shutdown.child_token();
        let _guard = cancel.clone().drop_guard();
        let results = self
            .scheduler
            .run(&cancel, &plan, Arc::new(resolved.table))
            .await?;

        let count = results
            .first()
            .and_then(|rows| rows.first())
            .and_then(|row| row.cols.first())
            .and_then(|col| col.value.as_u64().or_else(|| col.value.as_str()?.parse().ok()))
            .unwrap_or(0);
        Ok(count_response(count))
    }

    /// `_terms_enum`
    pub async fn handle_terms_enum(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let request: EsTermsEnumRequest = serde_json::from_value(body.clone())
            .map_err(|e| Error::MalformedRequest(format!("invalid terms enum body: {}", e)))?;

        let decision = self.resolver.resolve_pipeline(Pipeline::Query, index_pattern);
        let target = match route(&decision)? {
            Route::Empty => return Ok(terms_enum_response(Vec::new())),
            Route::Elastic => {
                warn!(pattern = %index_pattern, "Terms enum is not forwarded to Elasticsearch");
                return Ok(terms_enum_response(Vec::new()));
            }
            Route::Clickhouse(target) => target,
        };
        let Some(resolved) = self.resolve_target(&target)? else {
            return Ok(terms_enum_response(Vec::new()));
        };

        let translator = DslTranslator::new(
            &resolved.table,
            resolved.schema.clone(),
            resolved.indexes,
            target.is_common_table,
        );
        let query = translator.parse_terms_enum(&request)?;
        let plan = ExecutionPlan::new(vec![query]);
        let cancel = self.shutdown.child_token();
        let _guard = cancel.clone().drop_guard();
        let results = self
            .scheduler
            .run(&cancel, &plan, Arc::new(resolved.table))
            .await?;

        let terms = results
            .into_iter()
            .flatten()
            .filter_map(|row| row.cols.into_iter().next())
            .filter_map(|col| match col.value {
                Value::Null => None,
                Value::String(s) => Some(Value::String(s)),
                other => Some(Value::String(other.to_string())),
            })
            .collect();
        Ok(terms_enum_response(terms))
    }
}

/// Classify a decision, turning its failure states into errors
fn route(decision: &Decision) -> Result<Route> {
    if let Some(err) = &decision.err {
        return Err(Error::Routing(err.clone()));
    }
    if decision.is_empty {
        return Ok(Route::Empty);
    }
    if decision.is_closed {
        return Err(Error::IndexNotFound(decision.index_pattern.clone()));
    }
    if decision.use_connectors.is_empty() {
        return Err(Error::Routing("no connectors to use".to_string()));
    }
    match decision.clickhouse() {
        Some(target) => Ok(Route::Clickhouse(target.clone())),
        None => Ok(Route::Elastic),
    }
}

/// Pairs each NDJSON header with the body that follows it
fn split_multi_search(lines: Vec<Value>, default_index: Option<&str>) -> Result<Vec<(String, Value)>> {
    let mut searches = Vec::with_capacity(lines.len() / 2);
    let mut lines = lines.into_iter();
    while let Some(header) = lines.next() {
        let index = match header.get("index") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
            _ => default_index.unwrap_or("*").to_string(),
        };
        let body = lines.next().ok_or_else(|| {
            Error::MalformedRequest("multi search header without a body".to_string())
        })?;
        if !body.is_object() {
            return Err(Error::MalformedRequest(format!(
                "multi search body must be an object, got: {}",
                body
            )));
        }
        searches.push((index, body));
    }
    Ok(searches)
}

fn multi_search_error(e: &Error) -> Value {
    use crate::error::ErrorCategory;
    let status = match e.category() {
        ErrorCategory::NotFound => 404,
        ErrorCategory::Malformed => 400,
        ErrorCategory::Capacity => 429,
        ErrorCategory::Routing | ErrorCategory::Execution => 500,
    };
    json!({
        "error": {"type": e.error_type(), "reason": e.to_string()},
        "status": status,
    })
}

fn count_response(count: u64) -> Value {
    json!({
        "count": count,
        "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
    })
}

fn terms_enum_response(terms: Vec<Value>) -> Value {
    json!({
        "_shards": {"total": 1, "successful": 1, "failed": 0},
        "terms": terms,
        "complete": true,
    })
}
