//! ES-compatible API endpoints

pub mod async_search;
pub mod count;
pub mod diagnostics;
pub mod msearch;
pub mod search;

pub use async_search::{
    async_search_handler, async_search_status_handler, delete_async_search_handler,
    get_async_search_handler,
};
pub use count::{count_handler, terms_enum_handler};
pub use diagnostics::table_resolver_handler;
pub use msearch::msearch_handler;
pub use search::{search_handler, EsCompatState};

use crate::error::EsCompatError;
use axum::body::Bytes;
use serde_json::Value;

/// Decode a JSON request body; an empty body means "no body"
pub(crate) fn parse_json_body(body: &Bytes) -> Result<Value, EsCompatError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| EsCompatError::InvalidRequestBody(e.to_string()))
}
