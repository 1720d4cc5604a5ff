//! Error types for ES compatibility layer

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use strata::ErrorCategory;

/// ES compatibility layer errors
#[derive(Debug, thiserror::Error)]
pub enum EsCompatError {
    #[error("Invalid request body: {0}")]
    InvalidRequestBody(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Strata(#[from] strata::Error),
}

/// Elasticsearch-style error response
#[derive(Debug, Serialize)]
struct EsErrorResponse {
    error: EsErrorDetail,
    status: u16,
}

#[derive(Debug, Serialize)]
struct EsErrorDetail {
    root_cause: Vec<RootCause>,
    #[serde(rename = "type")]
    error_type: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RootCause {
    #[serde(rename = "type")]
    error_type: String,
    reason: String,
}

impl EsCompatError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequestBody(_) | Self::InvalidParameter(_) => ErrorCategory::Malformed,
            Self::Strata(e) => e.category(),
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequestBody(_) => "parse_exception",
            Self::InvalidParameter(_) => "illegal_argument_exception",
            Self::Strata(strata::Error::InvalidSearchAfter(_)) => "illegal_argument_exception",
            Self::Strata(e) => match e.category() {
                ErrorCategory::NotFound => "index_not_found_exception",
                ErrorCategory::Malformed => "parsing_exception",
                ErrorCategory::Capacity => "es_rejected_execution_exception",
                ErrorCategory::Routing => "illegal_state_exception",
                ErrorCategory::Execution => "search_phase_execution_exception",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Malformed => StatusCode::BAD_REQUEST,
            ErrorCategory::Capacity => StatusCode::TOO_MANY_REQUESTS,
            ErrorCategory::Routing | ErrorCategory::Execution => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for EsCompatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type().to_string();
        let reason = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %reason, "Request failed");
        }

        let body = EsErrorResponse {
            error: EsErrorDetail {
                root_cause: vec![RootCause {
                    error_type: error_type.clone(),
                    reason: reason.clone(),
                }],
                error_type,
                reason,
            },
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (strata::Error::Routing("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (strata::Error::IndexNotFound("logs".into()), StatusCode::NOT_FOUND),
            (strata::Error::MalformedRequest("x".into()), StatusCode::BAD_REQUEST),
            (strata::Error::TooManyAsyncQueries("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (strata::Error::Backend("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(EsCompatError::from(err).status_code(), status);
        }
        assert_eq!(
            EsCompatError::InvalidParameter("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_types() {
        let err = EsCompatError::from(strata::Error::IndexNotFound("logs".into()));
        assert_eq!(err.error_type(), "index_not_found_exception");
        let err = EsCompatError::from(strata::Error::InvalidSearchAfter("bad".into()));
        assert_eq!(err.error_type(), "illegal_argument_exception");
    }
}
