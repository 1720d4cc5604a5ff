//! Elasticsearch Query DSL types
//!
//! These types represent the subset of ES Query DSL that strata translates.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Root ES search request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsSearchRequest {
    #[serde(default)]
    pub query: Option<EsQuery>,

    /// Starting offset (default 0)
    #[serde(default)]
    pub from: Option<usize>,

    /// Maximum number of results (default 10)
    #[serde(default)]
    pub size: Option<usize>,

    #[serde(default)]
    pub sort: Option<SortList>,

    #[serde(default)]
    pub search_after: Option<Value>,

    #[serde(default)]
    pub track_total_hits: Option<TrackTotalHits>,

    #[serde(default, alias = "aggregations")]
    pub aggs: Option<BTreeMap<String, EsAggregation>>,

    #[serde(default)]
    pub runtime_mappings: Option<BTreeMap<String, RuntimeMapping>>,
}

/// `_count` request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsCountRequest {
    #[serde(default)]
    pub query: Option<EsQuery>,
}

/// `_terms_enum` request body
#[derive(Debug, Clone, Deserialize)]
pub struct EsTermsEnumRequest {
    pub field: String,
    #[serde(default)]
    pub string: Option<String>,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub index_filter: Option<EsQuery>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum TrackTotalHits {
    Bool(bool),
    Count(u64),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SortList {
    Single(SortClause),
    Multiple(Vec<SortClause>),
}

impl SortList {
    pub fn into_vec(self) -> Vec<SortClause> {
        match self {
            SortList::Single(c) => vec![c],
            SortList::Multiple(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SortClause {
    Field(String),
    Object(BTreeMap<String, SortOrder>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SortOrder {
    Simple(String),
    Object {
        #[serde(default)]
        order: Option<String>,
    },
}

impl SortOrder {
    pub fn order(&self) -> Option<&str> {
        match self {
            SortOrder::Simple(s) => Some(s),
            SortOrder::Object { order } => order.as_deref(),
        }
    }
}

/// ES Query types
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EsQuery {
    MatchAll(MatchAllQuery),

    /// Match query (full-text on text fields, equality otherwise)
    Match(BTreeMap<String, MatchQuery>),

    /// Term query (exact match, not analyzed)
    Term(BTreeMap<String, TermValue>),

    /// Terms query (multiple exact matches)
    Terms(BTreeMap<String, Vec<Value>>),

    Range(BTreeMap<String, RangeParams>),

    /// Bool query (must, should, must_not, filter)
    Bool(BoolQuery),

    Exists(ExistsQuery),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchAllQuery {
    #[serde(default)]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MatchQuery {
    Simple(Value),
    Object {
        query: Value,
        #[serde(default)]
        operator: Option<String>,
    },
}

impl MatchQuery {
    pub fn query(&self) -> &Value {
        match self {
            MatchQuery::Simple(v) => v,
            MatchQuery::Object { query, .. } => query,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TermValue {
    Object {
        value: Value,
        #[serde(default)]
        boost: Option<f32>,
    },
    Simple(Value),
}

impl TermValue {
    pub fn value(&self) -> &Value {
        match self {
            TermValue::Simple(v) => v,
            TermValue::Object { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeParams {
    #[serde(default)]
    pub gte: Option<Value>,
    #[serde(default)]
    pub gt: Option<Value>,
    #[serde(default)]
    pub lte: Option<Value>,
    #[serde(default)]
    pub lt: Option<Value>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoolQuery {
    #[serde(default)]
    pub must: Option<QueryList>,
    #[serde(default)]
    pub should: Option<QueryList>,
    #[serde(default)]
    pub must_not: Option<QueryList>,
    #[serde(default)]
    pub filter: Option<QueryList>,
    #[serde(default)]
    pub minimum_should_match: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryList {
    Single(Box<EsQuery>),
    Multiple(Vec<EsQuery>),
}

impl QueryList {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &EsQuery> + '_> {
        match self {
            QueryList::Single(q) => Box::new(std::iter::once(q.as_ref())),
            QueryList::Multiple(v) => Box::new(v.iter()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, QueryList::Multiple(v) if v.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExistsQuery {
    pub field: String,
}

/// ES Aggregation types
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsAggregation {
    #[serde(default)]
    pub terms: Option<TermsAgg>,
    #[serde(default)]
    pub max_bucket: Option<BucketsPathAgg>,
    #[serde(default)]
    pub min_bucket: Option<BucketsPathAgg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TermsAgg {
    pub field: String,
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketsPathAgg {
    pub buckets_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeMapping {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub script: Option<RuntimeScript>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuntimeScript {
    Source(String),
    Object { source: String },
}

impl RuntimeScript {
    pub fn source(&self) -> &str {
        match self {
            RuntimeScript::Source(s) => s,
            RuntimeScript::Object { source } => source,
        }
    }
}
