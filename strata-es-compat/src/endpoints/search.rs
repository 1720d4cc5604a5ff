//! ES-compatible _search endpoint

use super::parse_json_body;
use crate::error::EsCompatError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use strata::QueryRunner;

/// State for ES compat handlers
#[derive(Clone)]
pub struct EsCompatState {
    pub runner: QueryRunner,
}

impl EsCompatState {
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

/// Pattern used when the URL names no index
pub(crate) const ALL_INDEXES: &str = "*";

/// GET|POST /_search - Search across all indices
/// GET|POST /{index}/_search - Search specific index or pattern
pub async fn search_handler(
    State(state): State<EsCompatState>,
    index: Option<Path<String>>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    let pattern = index.map(|p| p.0).unwrap_or_else(|| ALL_INDEXES.to_string());
    let body = parse_json_body(&body)?;

    let response = state.runner.handle_search(&pattern, &body).await?;
    Ok(Json(response))
}
