//! ES-compatible API router

use crate::endpoints::{
    async_search_handler, async_search_status_handler, count_handler,
    delete_async_search_handler, get_async_search_handler, msearch_handler, search_handler,
    table_resolver_handler, terms_enum_handler, EsCompatState,
};
use crate::error::EsCompatError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use strata::QueryRunner;

/// Create the ES-compatible router
///
/// # Endpoints
///
/// - `GET|POST /_search` - Search all indices
/// - `GET|POST /{index}/_search` - Search specific index or pattern
/// - `POST /{index}/_async_search` - Submit async search
/// - `GET /_async_search/status/{id}` - Async search status
/// - `GET /_async_search/{id}` - Fetch async search result
/// - `DELETE /_async_search/{id}` - Cancel and forget async search
/// - `POST /_msearch`, `POST /{index}/_msearch` - Multi-search
/// - `GET|POST /{index}/_count` - Count
/// - `POST /{index}/_terms_enum` - Terms enum
/// - `GET /_strata/table_resolver` - Routing diagnostics
pub fn es_compat_router(runner: QueryRunner) -> Router {
    let state = EsCompatState::new(runner);

    Router::new()
        // Search endpoints
        .route("/_search", get(search_handler_no_index).post(search_handler_no_index))
        .route("/:index/_search", get(search_handler).post(search_handler))
        // Async search
        .route("/:index/_async_search", post(async_search_handler))
        .route("/_async_search/status/:id", get(async_search_status_handler))
        .route(
            "/_async_search/:id",
            get(get_async_search_handler).delete(delete_async_search_handler),
        )
        // Multi-search
        .route("/_msearch", post(msearch_handler_no_index))
        .route("/:index/_msearch", post(msearch_handler))
        // Count and suggestions
        .route("/:index/_count", get(count_handler).post(count_handler))
        .route("/:index/_terms_enum", post(terms_enum_handler))
        // Diagnostics
        .route("/_strata/table_resolver", get(table_resolver_handler))
        .with_state(state)
}

// Wrapper handlers for routes without index parameter

async fn search_handler_no_index(
    state: State<EsCompatState>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    search_handler(state, None, body).await
}

async fn msearch_handler_no_index(
    state: State<EsCompatState>,
    body: Bytes,
) -> Result<Json<Value>, EsCompatError> {
    msearch_handler(state, None::<Path<String>>, body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    /// Verify that parameterised routes (/:index/...) and the static
    /// `_async_search` routes do not shadow each other.
    #[tokio::test]
    async fn test_index_specific_routes_match() {
        let router = Router::new()
            .route("/_search", post(|| async { StatusCode::OK }))
            .route("/:index/_search", post(|| async { StatusCode::OK }))
            .route("/:index/_async_search", post(|| async { StatusCode::OK }))
            .route("/_async_search/status/:id", get(|| async { StatusCode::OK }))
            .route(
                "/_async_search/:id",
                get(|| async { StatusCode::OK }).delete(|| async { StatusCode::OK }),
            )
            .route("/:index/_count", post(|| async { StatusCode::OK }))
            .route("/_strata/table_resolver", get(|| async { StatusCode::OK }));

        let cases = vec![
            ("POST", "/_search"),
            ("POST", "/logs-2024-01/_search"),
            ("POST", "/logs-*/_async_search"),
            ("GET", "/_async_search/status/strata_async_1"),
            ("GET", "/_async_search/strata_async_1"),
            ("DELETE", "/_async_search/strata_async_1"),
            ("POST", "/logs/_count"),
            ("GET", "/_strata/table_resolver"),
        ];

        for (method, path) in cases {
            let req = Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap();

            let resp = router.clone().oneshot(req).await.unwrap();
            assert_ne!(
                resp.status(),
                StatusCode::NOT_FOUND,
                "Route {method} {path} should match but got 404"
            );
        }
    }
}
