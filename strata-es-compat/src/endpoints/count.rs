//! ES-compatible _count and _terms_enum endpoints

use super::parse_json_body;
use super::search::EsCompatState;
use crate::error::EsCompatError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

/// GET|POST /{index}/_count
pub async fn count_handler(
    State(state): State<EsCompatState>,
    Path(index): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    let body = parse_json_body(&body)?;
    Ok(Json(state.runner.handle_count(&index, &body).await?))
}

/// POST /{index}/_terms_enum
pub async fn terms_enum_handler(
    State(state): State<EsCompatState>,
    Path(index): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    let body = parse_json_body(&body)?;
    if body.is_null() {
        return Err(EsCompatError::InvalidRequestBody(
            "terms enum requires a request body".to_string(),
        ));
    }
    Ok(Json(state.runner.handle_terms_enum(&index, &body).await?))
}
