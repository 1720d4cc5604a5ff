//! Elasticsearch request translation

mod dsl;
pub mod types;

pub use dsl::{date_to_millis, DslTranslator, SiblingBucketFold};

use crate::model::{ExecutionPlan, Query, QueryResultRow, SearchResponse};
use crate::Result;
use serde_json::Value;

/// Turns a search body into physical queries and their rows back into a response.
pub trait QueryTranslator: Send + Sync {
    fn parse_query(&self, body: &Value) -> Result<ExecutionPlan>;

    /// `results[i]` holds the rows of `queries[i]`.
    fn make_search_response(
        &self,
        queries: &[Query],
        results: Vec<Vec<QueryResultRow>>,
    ) -> Result<SearchResponse>;
}
