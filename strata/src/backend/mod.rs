//! Backend connectors the query runner talks to

mod clickhouse;
mod elastic;

pub use clickhouse::ClickhouseHttpConnector;
pub use elastic::HttpElasticsearchConnector;

use crate::model::{Query, QueryResultRow};
use crate::table::Table;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Statistics reported for one executed sub-query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceResult {
    pub elapsed: Duration,
    pub rows_read: u64,
    pub bytes_read: u64,
    pub rows_returned: usize,
}

/// SQL backend executing physical queries.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Run one query against `table`. Implementations must stop waiting
    /// once `cancel` fires and return `Error::Cancelled`.
    async fn process_query(
        &self,
        cancel: &CancellationToken,
        table: &Table,
        query: &Query,
    ) -> Result<(Vec<QueryResultRow>, PerformanceResult)>;
}

/// Elasticsearch cluster used for forwarding and index listing.
#[async_trait]
pub trait ElasticsearchConnector: Send + Sync {
    async fn search(&self, index_pattern: &str, body: &Value) -> Result<Value>;

    async fn count(&self, index_pattern: &str, body: &Value) -> Result<Value>;

    /// Names of all indexes, aliases and data streams
    async fn list_indexes(&self) -> Result<Vec<String>>;
}
