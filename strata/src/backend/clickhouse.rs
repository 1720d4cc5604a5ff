//! ClickHouse over its HTTP interface

use super::{BackendConnector, PerformanceResult};
use crate::config::ClickhouseConfig;
use crate::error::{Error, Result};
use crate::model::{Query, QueryResultCol, QueryResultRow};
use crate::table::{Table, INDEX_NAME_COLUMN};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct ClickhouseHttpConnector {
    client: Client,
    url: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonCompactResponse {
    meta: Vec<ColumnMeta>,
    data: Vec<Vec<Value>>,
    #[serde(default)]
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Statistics {
    #[serde(default)]
    rows_read: u64,
    #[serde(default)]
    bytes_read: u64,
}

impl ClickhouseHttpConnector {
    pub fn new(config: &ClickhouseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    async fn execute(&self, sql: String) -> Result<JsonCompactResponse> {
        let mut request = self
            .client
            .post(&self.url)
            .query(&[
                ("database", self.database.as_str()),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .body(sql);
        if let Some(user) = &self.user {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "ClickHouse returned {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(response.json().await?)
    }
}

/// Rows keyed by column name; the common-table index column becomes the row's index.
fn into_rows(response: JsonCompactResponse, default_index: &str) -> Vec<QueryResultRow> {
    response
        .data
        .into_iter()
        .map(|values| {
            let mut row = QueryResultRow::new(default_index, Vec::with_capacity(values.len()));
            for (meta, value) in response.meta.iter().zip(values) {
                if meta.name == INDEX_NAME_COLUMN {
                    if let Value::String(index) = value {
                        row.index = index;
                    }
                    continue;
                }
                row.cols.push(QueryResultCol::new(meta.name.clone(), value));
            }
            row
        })
        .collect()
}

#[async_trait]
impl BackendConnector for ClickhouseHttpConnector {
    async fn process_query(
        &self,
        cancel: &CancellationToken,
        table: &Table,
        query: &Query,
    ) -> Result<(Vec<QueryResultRow>, PerformanceResult)> {
        let sql = query.sql();
        debug!(table = %table.name, sql = %sql, "Executing ClickHouse query");
        let start = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!("query on {} cancelled", table.name)));
            }
            response = self.execute(format!("{} FORMAT JSONCompact", sql)) => response,
        };
        let response = response.map_err(|e| {
            error!(sql = %sql, error = %e, "ClickHouse query failed");
            e
        })?;

        let default_index = query
            .indexes
            .first()
            .map(String::as_str)
            .unwrap_or(&table.name);
        let stats = response
            .statistics
            .as_ref()
            .map(|s| (s.rows_read, s.bytes_read))
            .unwrap_or_default();
        let rows = into_rows(response, default_index);
        let perf = PerformanceResult {
            elapsed: start.elapsed(),
            rows_read: stats.0,
            bytes_read: stats.1,
            rows_returned: rows.len(),
        };
        Ok((rows, perf))
    }
}

impl std::fmt::Debug for ClickhouseHttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickhouseHttpConnector")
            .field("url", &self.url)
            .field("database", &self.database)
            .finish()
    }
}
