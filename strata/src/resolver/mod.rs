//! Table resolver
//!
//! Decides which backend connectors serve an index pattern.
//!
//! # Architecture
//!
//! ```text
//! pattern → Splitter → [name, name, ...] → Rule chain (per name) → Merger → Decision
//! ```
//!
//! Every pipeline (query, ingest) owns its own splitter, rule chain and
//! merger. Resolution always runs against an immutable [`ResolverSnapshot`];
//! the background refresh loop swaps snapshots atomically.
//!
//! # Example
//!
//! ```ignore
//! let resolver = TableResolver::new(config, discovery, None);
//! let decision = resolver.resolve("query", "logs-*");
//! if let Some(err) = &decision.err {
//!     warn!("cannot route logs-*: {}", err);
//! }
//! ```

mod decision;
mod merger;
mod pattern;
mod rules;

pub use decision::{ClickhouseDecision, ConnectorDecision, Decision, ElasticDecision};
pub use pattern::{
    index_matches, is_index_pattern, is_internal_index, ParsedPattern, INTERNAL_INDEX_PREFIX,
};
pub use rules::ELASTIC_AB_TESTING_OPTIMIZER;

use crate::backend::ElasticsearchConnector;
use crate::config::{Config, IndexConfig, ResolverConfig, Target};
use crate::error::Result;
use crate::table::{TableDiscovery, TableMap};
use merger::DecisionMerger;
use parking_lot::{Mutex, RwLock};
use pattern::PatternSplitter;
use rules::{Rule, RuleContext};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A named processing lane with its own routing defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Query,
    Ingest,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Query => "query",
            Pipeline::Ingest => "ingest",
        }
    }

    pub fn targets<'a>(&self, index: &'a IndexConfig) -> &'a [Target] {
        match self {
            Pipeline::Query => &index.query_target,
            Pipeline::Ingest => &index.ingest_target,
        }
    }

    pub fn default_targets<'a>(&self, resolver: &'a ResolverConfig) -> &'a [Target] {
        match self {
            Pipeline::Query => &resolver.default_query_target,
            Pipeline::Ingest => &resolver.default_ingest_target,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "query" => Ok(Pipeline::Query),
            "ingest" => Ok(Pipeline::Ingest),
            other => Err(format!("pipeline '{}' not found", other)),
        }
    }
}

/// Everything resolution reads, frozen at one point in time
#[derive(Debug, Clone)]
pub struct ResolverSnapshot {
    pub config: Arc<Config>,
    pub tables: Arc<TableMap>,
    pub elastic_indexes: Arc<BTreeSet<String>>,
}

impl ResolverSnapshot {
    /// Whether any backend or the config knows about `name`
    pub fn is_known_name(&self, name: &str) -> bool {
        self.config.indexes.contains_key(name)
            || self.elastic_indexes.contains(name)
            || self.tables.contains_key(name)
    }
}

/// Decisions recently made for one pattern, keyed by pipeline name
#[derive(Debug, Clone, Serialize)]
pub struct PatternDecisions {
    pub pattern: String,
    pub decisions: BTreeMap<String, Decision>,
}

struct PipelineResolver {
    splitter_name: &'static str,
    splitter: PatternSplitter,
    rules: Vec<Rule>,
    merger_name: &'static str,
    merger: DecisionMerger,
}

impl PipelineResolver {
    fn resolve(&self, pipeline: Pipeline, snapshot: &ResolverSnapshot, pattern: &str) -> Decision {
        let parsed = match (self.splitter)(pattern, snapshot) {
            Ok(parsed) => parsed,
            Err(mut decision) => {
                decision.resolver_name = self.splitter_name.to_string();
                return decision;
            }
        };

        let ctx = RuleContext { pipeline, snapshot };
        let mut decisions = Vec::with_capacity(parsed.parts.len());
        for part in &parsed.parts {
            let found = self
                .rules
                .iter()
                .find_map(|rule| (rule.apply)(&ctx, part).map(|d| (rule.name, d)));
            match found {
                Some((name, mut decision)) => {
                    decision.resolver_name = name.to_string();
                    decision.index_pattern = part.clone();
                    decisions.push(decision);
                }
                None => debug!(pipeline = %pipeline, index = %part, "No rule matched index"),
            }
        }

        let matched = decisions.len();
        let mut merged = (self.merger)(decisions);
        if matched > 1 || merged.resolver_name.is_empty() {
            merged.resolver_name = self.merger_name.to_string();
        }
        merged
    }
}

/// Resolves index patterns to backend connectors
pub struct TableResolver {
    config: Arc<Config>,
    discovery: Arc<dyn TableDiscovery>,
    elastic: Option<Arc<dyn ElasticsearchConnector>>,
    snapshot: RwLock<Arc<ResolverSnapshot>>,
    pipelines: BTreeMap<Pipeline, PipelineResolver>,
    recent_decisions: Mutex<BTreeMap<Pipeline, BTreeMap<String, Decision>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TableResolver {
    pub fn new(
        config: Arc<Config>,
        discovery: Arc<dyn TableDiscovery>,
        elastic: Option<Arc<dyn ElasticsearchConnector>>,
    ) -> Self {
        let snapshot = ResolverSnapshot {
            config: Arc::clone(&config),
            tables: discovery.table_definitions(),
            elastic_indexes: Arc::new(BTreeSet::new()),
        };

        let mut pipelines = BTreeMap::new();
        pipelines.insert(
            Pipeline::Ingest,
            PipelineResolver {
                splitter_name: "singleIndexSplitter",
                splitter: pattern::single_index_splitter,
                rules: rules::rule_chain(),
                merger_name: "basicDecisionMerger",
                merger: merger::basic_decision_merger,
            },
        );
        pipelines.insert(
            Pipeline::Query,
            PipelineResolver {
                splitter_name: "wildcardPatternSplitter",
                splitter: pattern::wildcard_pattern_splitter,
                rules: rules::rule_chain(),
                merger_name: "basicDecisionMerger",
                merger: merger::basic_decision_merger,
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            discovery,
            elastic,
            snapshot: RwLock::new(Arc::new(snapshot)),
            pipelines,
            recent_decisions: Mutex::new(BTreeMap::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Resolve `pattern` for the pipeline with the given name.
    ///
    /// Never fails: problems are reported through `Decision::err`.
    pub fn resolve(&self, pipeline: &str, pattern: &str) -> Decision {
        match pipeline.parse::<Pipeline>() {
            Ok(p) => self.resolve_pipeline(p, pattern),
            Err(err) => Decision {
                err: Some(err),
                reason: "Pipeline not found. This is a bug.".to_string(),
                resolver_name: "tableResolver".to_string(),
                index_pattern: pattern.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn resolve_pipeline(&self, pipeline: Pipeline, pattern: &str) -> Decision {
        let snapshot = self.snapshot();
        let mut decision = match self.pipelines.get(&pipeline) {
            Some(resolver) => resolver.resolve(pipeline, &snapshot, pattern),
            None => Decision::error(format!("pipeline '{}' not found", pipeline)),
        };
        decision.index_pattern = pattern.to_string();

        debug!(
            pipeline = %pipeline,
            pattern = %pattern,
            "Decision: {}",
            decision
        );
        crate::metrics::record_decision(pipeline.as_str(), &decision);

        self.recent_decisions
            .lock()
            .entry(pipeline)
            .or_default()
            .insert(pattern.to_string(), decision.clone());

        decision
    }

    /// Names of all configured pipelines, sorted
    pub fn pipelines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().map(|p| p.to_string()).collect();
        names.sort();
        names
    }

    /// Recently resolved patterns, sorted by pattern
    pub fn recent_decisions(&self) -> Vec<PatternDecisions> {
        let recent = self.recent_decisions.lock();

        let patterns: BTreeSet<&String> = recent.values().flat_map(|m| m.keys()).collect();
        patterns
            .into_iter()
            .map(|pattern| PatternDecisions {
                pattern: pattern.clone(),
                decisions: recent
                    .iter()
                    .filter_map(|(pipeline, decisions)| {
                        decisions
                            .get(pattern)
                            .map(|d| (pipeline.to_string(), d.clone()))
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> Arc<ResolverSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the known Elasticsearch index names
    pub fn set_elastic_indexes(&self, names: impl IntoIterator<Item = String>) {
        let current = self.snapshot();
        self.swap_snapshot(ResolverSnapshot {
            config: Arc::clone(&self.config),
            tables: Arc::clone(&current.tables),
            elastic_indexes: Arc::new(names.into_iter().collect()),
        });
    }

    fn swap_snapshot(&self, snapshot: ResolverSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
        self.recent_decisions.lock().clear();
    }

    /// Reload tables and Elasticsearch indexes, then swap the snapshot
    pub async fn refresh(&self) -> Result<()> {
        self.discovery.reload().await?;

        let elastic_indexes = match &self.elastic {
            Some(elastic) => match elastic.list_indexes().await {
                Ok(names) => Arc::new(names.into_iter().collect()),
                Err(e) => {
                    warn!("Failed to list Elasticsearch indexes, keeping previous: {}", e);
                    Arc::clone(&self.snapshot().elastic_indexes)
                }
            },
            None => Arc::new(BTreeSet::new()),
        };

        let snapshot = ResolverSnapshot {
            config: Arc::clone(&self.config),
            tables: self.discovery.table_definitions(),
            elastic_indexes,
        };
        debug!(
            tables = snapshot.tables.len(),
            elastic_indexes = snapshot.elastic_indexes.len(),
            "Table resolver state updated"
        );
        self.swap_snapshot(snapshot);
        Ok(())
    }

    /// Run the refresh loop until [`TableResolver::stop`] is called
    pub async fn start(&self) {
        let period = self.config.resolver.refresh_interval();
        info!("Table resolver started (refresh interval: {:?})", period);

        let mut interval = tokio::time::interval(period);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::error!("Table resolver refresh error: {:?}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Table resolver stopped");
                        break;
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
