//! Elasticsearch-shaped response bodies

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// ES search response format
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub took: u64,
    pub timed_out: bool,
    #[serde(rename = "_shards")]
    pub shards: ShardStats,
    pub hits: SearchHits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardStats {
    pub total: u32,
    pub successful: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl Default for ShardStats {
    fn default() -> Self {
        Self {
            total: 1,
            successful: 1,
            skipped: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchHits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalHits>,
    pub max_score: Option<f32>,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TotalHits {
    pub value: u64,
    pub relation: String,
}

impl TotalHits {
    pub fn eq(value: u64) -> Self {
        Self {
            value,
            relation: "eq".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: Option<f32>,
    #[serde(rename = "_source")]
    pub source: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
}

impl SearchResponse {
    /// Response with no hits, as returned for empty or unresolved patterns
    pub fn empty() -> Self {
        Self {
            hits: SearchHits {
                total: Some(TotalHits::eq(0)),
                max_score: None,
                hits: Vec::new(),
            },
            ..Default::default()
        }
    }
}

/// Body of `_async_search` submissions and fetches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsyncSearchResponse {
    pub id: String,
    pub is_partial: bool,
    pub is_running: bool,
    pub start_time_in_millis: i64,
    pub expiration_time_in_millis: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<u16>,
    pub response: SearchResponse,
}

/// How long a finished async search stays fetchable, as reported to clients
const ASYNC_KEEP_ALIVE_MILLIS: i64 = 5 * 24 * 60 * 60 * 1000;

impl AsyncSearchResponse {
    /// Wrap a search response; a partial response is also still running.
    pub fn from_search(
        response: SearchResponse,
        id: impl Into<String>,
        is_partial: bool,
        completion_status: u16,
        start_time_in_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            is_partial,
            is_running: is_partial,
            start_time_in_millis,
            expiration_time_in_millis: start_time_in_millis + ASYNC_KEEP_ALIVE_MILLIS,
            completion_status: Some(completion_status),
            response,
        }
    }

    pub fn empty(
        id: impl Into<String>,
        is_partial: bool,
        completion_status: u16,
        start_time_in_millis: i64,
    ) -> Self {
        Self::from_search(
            SearchResponse::empty(),
            id,
            is_partial,
            completion_status,
            start_time_in_millis,
        )
    }
}

/// Body of `_async_search/status/:id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsyncSearchStatusResponse {
    pub id: String,
    pub is_running: bool,
    pub is_partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<u16>,
}
