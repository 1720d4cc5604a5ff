//! ES-compatible _msearch endpoint

use super::search::EsCompatState;
use crate::error::EsCompatError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

/// POST /_msearch - Multi-search
/// POST /{index}/_msearch - Multi-search with a default index
pub async fn msearch_handler(
    State(state): State<EsCompatState>,
    index: Option<Path<String>>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    let lines = parse_ndjson(&body)?;
    let default_index = index.as_ref().map(|p| p.0.as_str());

    let response = state.runner.handle_multi_search(default_index, lines).await?;
    Ok(Json(response))
}

/// Split an NDJSON body into one JSON value per non-blank line
fn parse_ndjson(body: &Bytes) -> Result<Vec<Value>, EsCompatError> {
    let text =
        std::str::from_utf8(body).map_err(|e| EsCompatError::InvalidRequestBody(e.to_string()))?;

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                EsCompatError::InvalidRequestBody(format!("line {}: {}", i + 1, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let body = Bytes::from("{\"index\":\"logs\"}\n\n{\"size\":1}\n");
        let lines = parse_ndjson(&body).unwrap();
        assert_eq!(lines, vec![json!({"index": "logs"}), json!({"size": 1})]);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let body = Bytes::from("{}\n{not json}\n");
        let err = parse_ndjson(&body).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
