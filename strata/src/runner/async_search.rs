//! Async search lifecycle
//!
//! A submission races the plan against `wait_for_completion_timeout`. When
//! the plan wins, the response is returned inline. Otherwise the client gets
//! a "still running" response. The plan and its bookkeeping run in a task of
//! their own, so the result is stored under the async id even when the
//! submitting request is dropped mid-wait. Fetching a stored result
//! consumes it.

use super::jobs::panic_message;
use super::{route, QueryRunner, Route};
use crate::async_store::AsyncRequestResult;
use crate::error::{Error, Result};
use crate::metrics::SearchTimer;
use crate::model::{AsyncSearchResponse, AsyncSearchStatusResponse, SearchResponse};
use crate::resolver::Pipeline;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Every async id handed out starts with this
pub const ASYNC_ID_PREFIX: &str = "strata_async_";

const STATUS_OK: u16 = 200;
const STATUS_UNAVAILABLE: u16 = 503;

pub fn new_async_id() -> String {
    format!("{}{}", ASYNC_ID_PREFIX, Uuid::new_v4().simple())
}

/// One submitted async search
#[derive(Debug, Clone)]
pub struct AsyncQuery {
    pub async_id: String,
    pub wait_for_results: Duration,
    pub keep_on_completion: bool,
    pub start_time: Instant,
    pub start_time_millis: i64,
}

impl AsyncQuery {
    pub fn new(wait_for_results: Duration, keep_on_completion: bool) -> Self {
        Self {
            async_id: new_async_id(),
            wait_for_results,
            keep_on_completion,
            start_time: Instant::now(),
            start_time_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn empty_response(&self, is_partial: bool, status: u16) -> Result<Value> {
        let response =
            AsyncSearchResponse::empty(&self.async_id, is_partial, status, self.start_time_millis);
        Ok(serde_json::to_value(response)?)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Flip the waiting flag; true for the side that got there first
fn claim(waiting: &AtomicBool) -> bool {
    waiting
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

fn delivered_or_cancelled(
    delivered: std::result::Result<Result<Value>, oneshot::error::RecvError>,
) -> Result<Value> {
    delivered.unwrap_or_else(|_| Err(Error::Cancelled("async search task stopped".to_string())))
}

/// Hands the result over to the store when the submitter goes away mid-wait
struct DetachOnDrop(Arc<AtomicBool>);

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn joined(result: std::result::Result<Result<SearchResponse>, JoinError>) -> Result<SearchResponse> {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(Error::JobPanicked(panic_message(e.into_panic()))),
        Err(e) => Err(Error::Cancelled(e.to_string())),
    }
}

impl QueryRunner {
    /// `_async_search` submission
    pub async fn handle_async_search(
        &self,
        index_pattern: &str,
        body: &Value,
        wait_for_results: Duration,
        keep_on_completion: bool,
    ) -> Result<Value> {
        let timer = SearchTimer::new("async_search");
        let query = AsyncQuery::new(wait_for_results, keep_on_completion);
        info!(async_id = %query.async_id, pattern = %index_pattern, "Async search started");

        let result = self.async_search(index_pattern, body, query).await;
        match &result {
            Ok(_) => timer.success(),
            Err(e) => timer.error(e.error_type()),
        }
        result
    }

    async fn async_search(&self, index_pattern: &str, body: &Value, query: AsyncQuery) -> Result<Value> {
        self.check_async_admission(&query.async_id)?;

        let decision = self.resolver.resolve_pipeline(Pipeline::Query, index_pattern);
        let target = match route(&decision)? {
            Route::Empty => return query.empty_response(false, STATUS_OK),
            Route::Elastic => {
                let forwarded = self.forward_search(index_pattern, body).await?;
                let mut wrapped = query.empty_response(false, STATUS_OK)?;
                wrapped["response"] = forwarded;
                return Ok(wrapped);
            }
            Route::Clickhouse(target) => target,
        };
        if decision.enable_ab_testing {
            debug!(
                async_id = %query.async_id,
                "A/B testing applies to synchronous searches, running the ClickHouse plan only"
            );
        }
        let Some(prepared) = self.prepare(index_pattern, &target, body, query.start_time)? else {
            return query.empty_response(false, STATUS_OK);
        };

        // not tied to the HTTP request: the client may go away before the plan finishes
        let cancel = self.shutdown.child_token();
        self.async_contexts
            .lock()
            .insert(query.async_id.clone(), cancel.clone());

        // true while the submitter still waits for an inline answer; whichever
        // side flips it first decides whether the result is delivered inline
        // or stored
        let waiting = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = oneshot::channel();
        {
            let runner = self.clone();
            let query = query.clone();
            let waiting = Arc::clone(&waiting);
            tokio::spawn(async move {
                let plan = {
                    let runner = runner.clone();
                    tokio::spawn(async move { runner.execute(&cancel, prepared).await })
                };
                let outcome = joined(plan.await);
                let inline = claim(&waiting);
                let keep = !inline || query.keep_on_completion;
                let completed = runner.complete_async(&query, outcome, keep);
                if inline {
                    // the submitter may have been dropped after the claim
                    let _ = tx.send(completed);
                } else if let Err(e) = completed {
                    debug!(
                        async_id = %query.async_id,
                        error = %e,
                        "Async search finished with error"
                    );
                }
            });
        }

        let _guard = DetachOnDrop(Arc::clone(&waiting));
        match tokio::time::timeout(query.wait_for_results, &mut rx).await {
            Ok(delivered) => delivered_or_cancelled(delivered),
            Err(_) if claim(&waiting) => {
                debug!(
                    async_id = %query.async_id,
                    wait = ?query.wait_for_results,
                    "Async search still running, returning partial response"
                );
                query.empty_response(true, STATUS_OK)
            }
            // the plan finished right at the deadline and is being delivered
            Err(_) => delivered_or_cancelled(rx.await),
        }
    }

    /// Refuse new async work once the store holds too many or too large results
    fn check_async_admission(&self, async_id: &str) -> Result<()> {
        let limits = &self.config.runner;
        let entries = self.async_store.entry_count();
        let bytes = self.async_store.size_bytes();
        if entries < limits.async_queries_limit && bytes < limits.async_queries_limit_bytes {
            return Ok(());
        }
        error!(
            async_id,
            entries,
            bytes,
            "Cannot handle async search, too many async queries"
        );
        Err(Error::TooManyAsyncQueries(format!(
            "{} stored results holding {} bytes",
            entries, bytes
        )))
    }

    /// Record the outcome of a finished async search.
    ///
    /// Searches deleted while running leave nothing behind.
    fn complete_async(
        &self,
        query: &AsyncQuery,
        outcome: Result<SearchResponse>,
        keep: bool,
    ) -> Result<Value> {
        let id = &query.async_id;
        let still_registered = self.async_contexts.lock().remove(id).is_some();
        let keep = keep && still_registered;
        let took = query.start_time.elapsed();

        match outcome {
            Ok(response) => {
                let body = AsyncSearchResponse::from_search(
                    response,
                    id.as_str(),
                    false,
                    STATUS_OK,
                    query.start_time_millis,
                );
                if keep {
                    let bytes = serde_json::to_vec(&body)?;
                    self.async_store
                        .store(id, AsyncRequestResult::success(bytes, took)?);
                }
                info!(async_id = %id, took = ?took, stored = keep, "Async search finished");
                Ok(serde_json::to_value(body)?)
            }
            Err(e) => {
                error!(async_id = %id, error = %e, "Async search failed");
                if keep {
                    self.async_store
                        .store(id, AsyncRequestResult::failure(e.to_string(), took));
                }
                Err(e)
            }
        }
    }

    /// `_async_search/status/:id`
    pub fn handle_async_search_status(&self, id: &str) -> Result<Value> {
        debug!(async_id = %id, "Handling async search status");
        // a stored result means the search is no longer running; anything
        // else is reported as running
        let status = match self.async_store.load(id) {
            Some(_) => AsyncSearchStatusResponse {
                id: id.to_string(),
                is_running: false,
                is_partial: false,
                completion_status: Some(STATUS_OK),
            },
            None => AsyncSearchStatusResponse {
                id: id.to_string(),
                is_running: true,
                is_partial: true,
                completion_status: None,
            },
        };
        Ok(serde_json::to_value(status)?)
    }

    /// `GET _async_search/:id`; a finished result is handed out once
    pub fn handle_partial_async_search(&self, id: &str) -> Result<Value> {
        let empty = |is_partial: bool, status: u16| -> Result<Value> {
            Ok(serde_json::to_value(AsyncSearchResponse::empty(
                id,
                is_partial,
                status,
                now_millis(),
            ))?)
        };

        if !id.starts_with(ASYNC_ID_PREFIX) {
            warn!(async_id = %id, "Not a strata async id");
            return empty(false, STATUS_UNAVAILABLE);
        }

        match self.async_store.delete(id) {
            Some(result) => {
                if let Some(err) = result.error() {
                    error!(
                        async_id = %id,
                        took = ?result.took(),
                        error = %err,
                        "Error processing async query"
                    );
                    return empty(false, STATUS_UNAVAILABLE);
                }
                let body = result.response_body()?;
                info!(async_id = %id, took = ?result.took(), "Async query delivered");
                Ok(serde_json::from_slice(&body)?)
            }
            None => {
                debug!(async_id = %id, "Async query partial result");
                empty(true, STATUS_OK)
            }
        }
    }

    /// `DELETE _async_search/:id`: cancels the search and drops its result
    pub fn delete_async_search(&self, id: &str) -> Result<Value> {
        if !id.starts_with(ASYNC_ID_PREFIX) {
            return Err(Error::MalformedRequest(format!(
                "invalid async search id: {}",
                id
            )));
        }
        if let Some(cancel) = self.async_contexts.lock().remove(id) {
            cancel.cancel();
            info!(async_id = %id, "Cancelled running async search");
        }
        self.async_store.delete(id);
        Ok(json!({"acknowledged": true}))
    }
}
