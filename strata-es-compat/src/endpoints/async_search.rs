//! ES-compatible _async_search endpoints

use super::parse_json_body;
use super::search::EsCompatState;
use crate::error::EsCompatError;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Query string of an async search submission
#[derive(Debug, Default, Deserialize)]
pub struct AsyncSearchParams {
    /// Elasticsearch time value, e.g. `1s` or `500ms`
    pub wait_for_completion_timeout: Option<String>,
    #[serde(default)]
    pub keep_on_completion: bool,
}

/// POST /{index}/_async_search
pub async fn async_search_handler(
    State(state): State<EsCompatState>,
    Path(index): Path<String>,
    Query(params): Query<AsyncSearchParams>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    let wait = match params.wait_for_completion_timeout.as_deref() {
        Some(value) => parse_time_value(value)?,
        None => state.runner.default_wait_for_completion(),
    };
    let body = parse_json_body(&body)?;

    let response = state
        .runner
        .handle_async_search(&index, &body, wait, params.keep_on_completion)
        .await?;
    Ok(Json(response))
}

/// GET /_async_search/{id}
pub async fn get_async_search_handler(
    State(state): State<EsCompatState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, EsCompatError> {
    Ok(Json(state.runner.handle_partial_async_search(&id)?))
}

/// GET /_async_search/status/{id}
pub async fn async_search_status_handler(
    State(state): State<EsCompatState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, EsCompatError> {
    Ok(Json(state.runner.handle_async_search_status(&id)?))
}

/// DELETE /_async_search/{id}
pub async fn delete_async_search_handler(
    State(state): State<EsCompatState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, EsCompatError> {
    Ok(Json(state.runner.delete_async_search(&id)?))
}

/// Parse an Elasticsearch time value (`d`, `h`, `m`, `s`, `ms`, `micros`, `nanos`)
pub(crate) fn parse_time_value(value: &str) -> Result<Duration, EsCompatError> {
    let invalid = || {
        EsCompatError::InvalidParameter(format!(
            "failed to parse time value [{}]: unit is missing or unrecognized",
            value
        ))
    };
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (number, unit) = value.split_at(split);
    let number: u64 = number.parse().map_err(|_| invalid())?;

    let seconds_per_unit = match unit {
        "nanos" => return Ok(Duration::from_nanos(number)),
        "micros" => return Ok(Duration::from_micros(number)),
        "ms" => return Ok(Duration::from_millis(number)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(invalid()),
    };
    let seconds = number.checked_mul(seconds_per_unit).ok_or_else(|| {
        EsCompatError::InvalidParameter(format!("time value [{}] is too large", value))
    })?;
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_value() {
        assert_eq!(parse_time_value("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_time_value("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_time_value("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_time_value("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_time_value("100micros").unwrap(), Duration::from_micros(100));
    }

    #[test]
    fn test_parse_time_value_rejects_garbage() {
        assert!(parse_time_value("10").is_err());
        assert!(parse_time_value("s").is_err());
        assert!(parse_time_value("1y").is_err());
        assert!(parse_time_value("-1s").is_err());
        assert!(matches!(
            parse_time_value("999999999999999999d"),
            Err(EsCompatError::InvalidParameter(_))
        ));
        assert_eq!(
            parse_time_value("3d").unwrap(),
            Duration::from_secs(3 * 86_400)
        );
    }
}
