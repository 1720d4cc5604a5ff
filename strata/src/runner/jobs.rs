//! Sub-query scheduling
//!
//! Every backend query of a plan becomes one job. A batch runs in parallel
//! only when the runner's budget has room for all of its jobs at once;
//! otherwise it runs sequentially instead of waiting for permits.

use crate::backend::{BackendConnector, PerformanceResult};
use crate::error::{Error, Result};
use crate::model::{ExecutionPlan, Query, QueryResultRow};
use crate::table::Table;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MODE_SEQUENTIAL: &str = "sequential";
const MODE_PARALLEL: &str = "parallel";

/// Runs the backend queries of execution plans
#[derive(Clone)]
pub(crate) struct JobScheduler {
    backend: Arc<dyn BackendConnector>,
    /// `None` disables parallel execution
    budget: Option<Arc<Semaphore>>,
    drain_timeout: Duration,
}

/// Rows of one finished job, keyed by the plan position of its query
type JobOutput = (usize, Vec<QueryResultRow>);

impl JobScheduler {
    pub(crate) fn new(
        backend: Arc<dyn BackendConnector>,
        max_parallel_queries: usize,
        drain_timeout: Duration,
    ) -> Self {
        let budget = (max_parallel_queries > 0).then(|| Arc::new(Semaphore::new(max_parallel_queries)));
        Self {
            backend,
            budget,
            drain_timeout,
        }
    }

    /// Permits currently free in the parallel budget
    pub(crate) fn available_parallelism(&self) -> usize {
        self.budget.as_ref().map_or(0, |b| b.available_permits())
    }

    /// Execute every backend query of `plan`.
    ///
    /// The result has one entry per plan query, in plan order. Queries that
    /// need no backend, or that an interrupt made unnecessary, get no rows.
    pub(crate) async fn run(
        &self,
        cancel: &CancellationToken,
        plan: &ExecutionPlan,
        table: Arc<Table>,
    ) -> Result<Vec<Vec<QueryResultRow>>> {
        let jobs: Vec<(usize, Query)> = plan
            .queries
            .iter()
            .enumerate()
            .filter(|(_, q)| q.query_type.needs_backend())
            .map(|(i, q)| (i, q.clone()))
            .collect();

        let outputs = match self.try_reserve(jobs.len()) {
            Some(_permit) => {
                crate::metrics::record_parallel_batch(MODE_PARALLEL, jobs.len());
                self.run_parallel(cancel, plan, table, jobs).await?
            }
            None => {
                crate::metrics::record_parallel_batch(MODE_SEQUENTIAL, jobs.len());
                self.run_sequential(cancel, plan, table, jobs).await?
            }
        };

        let mut results = vec![Vec::new(); plan.queries.len()];
        for (position, rows) in outputs {
            results[position] = rows;
        }
        Ok(results)
    }

    /// Permits for a parallel batch of `jobs`, or `None` to run sequentially
    fn try_reserve(&self, jobs: usize) -> Option<tokio::sync::OwnedSemaphorePermit> {
        if jobs <= 1 {
            return None;
        }
        let budget = self.budget.as_ref()?;
        let wanted = u32::try_from(jobs).ok()?;
        match Arc::clone(budget).try_acquire_many_owned(wanted) {
            Ok(permit) => Some(permit),
            Err(_) => {
                debug!(
                    jobs,
                    available = budget.available_permits(),
                    "Parallel budget exhausted, running jobs sequentially"
                );
                None
            }
        }
    }

    async fn run_sequential(
        &self,
        cancel: &CancellationToken,
        plan: &ExecutionPlan,
        table: Arc<Table>,
        jobs: Vec<(usize, Query)>,
    ) -> Result<Vec<JobOutput>> {
        let mut outputs = Vec::with_capacity(jobs.len());
        for (position, query) in jobs {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("search cancelled".to_string()));
            }
            let rows = run_job(
                Arc::clone(&self.backend),
                cancel.clone(),
                Arc::clone(&table),
                position,
                query,
                MODE_SEQUENTIAL,
            )
            .await?;
            let interrupted = plan.interrupt(position, &rows);
            outputs.push((position, rows));
            if interrupted {
                info!(job = position, "Job triggered interrupt");
                break;
            }
        }
        Ok(outputs)
    }

    async fn run_parallel(
        &self,
        cancel: &CancellationToken,
        plan: &ExecutionPlan,
        table: Arc<Table>,
        jobs: Vec<(usize, Query)>,
    ) -> Result<Vec<JobOutput>> {
        let total = jobs.len();
        let batch = cancel.child_token();
        // stops whatever is still running once results are in
        let _stop_rest = batch.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel::<(usize, Result<Vec<QueryResultRow>>)>(total);

        for (position, query) in jobs {
            let tx = tx.clone();
            let backend = Arc::clone(&self.backend);
            let table = Arc::clone(&table);
            let batch = batch.clone();
            tokio::spawn(async move {
                let result = run_job(backend, batch, table, position, query, MODE_PARALLEL).await;
                let _ = tx.send((position, result)).await;
            });
        }
        drop(tx);

        let mut outputs = Vec::with_capacity(total);
        let mut expected = total;
        let mut received = 0;
        while received < expected {
            let Some((position, result)) = rx.recv().await else {
                break;
            };
            received += 1;

            match result {
                Ok(rows) => {
                    if plan.interrupt(position, &rows) {
                        info!(job = position, "Job triggered interrupt");
                        expected -= 1;
                    }
                    outputs.push((position, rows));
                }
                Err(e) => {
                    warn!(job = position, error = %e, "Job failed, cancelling the rest");
                    batch.cancel();
                    self.drain(&mut rx, total - received).await;
                    return Err(e);
                }
            }
        }
        Ok(outputs)
    }

    /// Wait (bounded) for cancelled jobs to report back
    async fn drain(
        &self,
        rx: &mut mpsc::Receiver<(usize, Result<Vec<QueryResultRow>>)>,
        remaining: usize,
    ) {
        let drained = tokio::time::timeout(self.drain_timeout, async {
            for _ in 0..remaining {
                if rx.recv().await.is_none() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining,
                timeout = ?self.drain_timeout,
                "Gave up draining cancelled jobs"
            );
        }
    }
}

async fn run_job(
    backend: Arc<dyn BackendConnector>,
    cancel: CancellationToken,
    table: Arc<Table>,
    position: usize,
    query: Query,
    mode: &'static str,
) -> Result<Vec<QueryResultRow>> {
    let outcome = AssertUnwindSafe(backend.process_query(&cancel, &table, &query))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok((rows, perf))) => {
            log_performance(position, &perf);
            Ok(rows)
        }
        Ok(Err(e)) => {
            error!(job = position, sql = %query.sql(), error = %e, "Query job failed");
            Err(e)
        }
        Err(panic) => {
            let message = panic_message(panic);
            error!(job = position, sql = %query.sql(), "Query job panicked: {}", message);
            Err(Error::JobPanicked(message))
        }
    };
    crate::metrics::record_query_job(mode, result.is_ok());
    result
}

fn log_performance(position: usize, perf: &PerformanceResult) {
    debug!(
        job = position,
        elapsed = ?perf.elapsed,
        rows_read = perf.rows_read,
        bytes_read = perf.bytes_read,
        rows_returned = perf.rows_returned,
        "Query job finished"
    );
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
