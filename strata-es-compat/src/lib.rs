//! Elasticsearch API surface for the strata query proxy
//!
//! Kibana and other Elasticsearch clients talk to these routes; every request
//! is handed to a [`strata::QueryRunner`] and its result or error is shaped
//! the way Elasticsearch would answer.
//!
//! # Endpoints
//!
//! - `GET|POST /_search`, `GET|POST /{index}/_search` - Search
//! - `POST /{index}/_async_search` - Async search submission
//! - `GET /_async_search/{id}`, `GET /_async_search/status/{id}`,
//!   `DELETE /_async_search/{id}` - Async search lifecycle
//! - `POST /_msearch`, `POST /{index}/_msearch` - Multi-search (NDJSON)
//! - `GET|POST /{index}/_count` - Document count
//! - `POST /{index}/_terms_enum` - Field value suggestions
//! - `GET /_strata/table_resolver` - Recent routing decisions

pub mod error;
pub mod router;

mod endpoints;

pub use endpoints::EsCompatState;
pub use error::EsCompatError;
pub use router::es_compat_router;

/// Result type for ES compat operations
pub type Result<T> = std::result::Result<T, EsCompatError>;
