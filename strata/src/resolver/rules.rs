//! Per-index routing rules
//!
//! Each rule looks at one concrete index name and either returns a terminal
//! decision or `None` to defer to the next rule.

use super::decision::{ConnectorDecision, Decision, ElasticDecision};
use super::pattern::is_internal_index;
use super::{Pipeline, ResolverSnapshot};
use crate::config::Target;
use crate::table::COMMON_TABLE_NAME;

/// Optimizer that turns on A/B comparison against Elasticsearch
pub const ELASTIC_AB_TESTING_OPTIMIZER: &str = "elastic_ab_testing";

pub(crate) struct RuleContext<'a> {
    pub pipeline: Pipeline,
    pub snapshot: &'a ResolverSnapshot,
}

pub(crate) type RuleFn = fn(&RuleContext<'_>, &str) -> Option<Decision>;

pub(crate) struct Rule {
    pub name: &'static str,
    pub apply: RuleFn,
}

/// The rule chain, in evaluation order.
pub(crate) fn rule_chain() -> Vec<Rule> {
    vec![
        Rule {
            name: "kibanaInternal",
            apply: resolve_internal_elastic_name,
        },
        Rule {
            name: "disabled",
            apply: disabled_in_config,
        },
        Rule {
            name: "commonTable",
            apply: common_table,
        },
        Rule {
            name: "singleIndex",
            apply: single_index,
        },
        Rule {
            name: "defaultWildcard",
            apply: default_wildcard,
        },
    ]
}

fn unsupported(err: String) -> Decision {
    let mut decision = Decision::error(err);
    decision.reason = "Unsupported configuration".to_string();
    decision
}

fn resolve_internal_elastic_name(_ctx: &RuleContext<'_>, part: &str) -> Option<Decision> {
    if !is_internal_index(part) {
        return None;
    }
    Some(Decision::connectors(
        vec![ConnectorDecision::Elastic(ElasticDecision {
            management_call: true,
        })],
        "It's kibana internals",
    ))
}

fn disabled_in_config(ctx: &RuleContext<'_>, part: &str) -> Option<Decision> {
    let index = ctx.snapshot.config.indexes.get(part)?;
    if ctx.pipeline.targets(index).is_empty() {
        return Some(Decision::closed("Index is disabled in config."));
    }
    None
}

fn common_table(ctx: &RuleContext<'_>, part: &str) -> Option<Decision> {
    if part == COMMON_TABLE_NAME {
        let mut decision = Decision::error("common table is not allowed to be queried directly");
        decision.reason = "It's internal table. Not allowed to be queried directly.".to_string();
        return Some(decision);
    }

    let snapshot = ctx.snapshot;
    let virtual_table_exists = snapshot.config.resolver.auto_discovery
        && snapshot.tables.get(part).is_some_and(|t| t.is_virtual);

    let index = snapshot.config.indexes.get(part);
    let configured = index.is_some_and(|i| i.use_common_table);
    if !configured && !virtual_table_exists {
        return None;
    }

    let enable_ab_testing = snapshot
        .config
        .resolver
        .optimizer_enabled(ELASTIC_AB_TESTING_OPTIMIZER)
        || index.is_some_and(|i| i.optimizer_enabled(ELASTIC_AB_TESTING_OPTIMIZER));

    Some(
        Decision::connectors(
            vec![ConnectorDecision::clickhouse(
                COMMON_TABLE_NAME,
                vec![part.to_string()],
                true,
            )],
            "Common table will be used.",
        )
        .with_ab_testing(enable_ab_testing),
    )
}

fn single_index(ctx: &RuleContext<'_>, part: &str) -> Option<Decision> {
    let index = ctx.snapshot.config.indexes.get(part)?;
    if index.use_common_table {
        return None;
    }

    let clickhouse = || {
        ConnectorDecision::clickhouse(index.table_name(part), vec![part.to_string()], false)
    };

    // zero targets are handled by the disabled rule
    let targets = ctx.pipeline.targets(index);
    match targets {
        [target] => {
            let connector = match target {
                Target::Elasticsearch => ConnectorDecision::elastic(),
                Target::Clickhouse => clickhouse(),
                Target::Other(other) => {
                    return Some(unsupported(format!("unsupported target: {}", other)))
                }
            };
            Some(Decision::connectors(vec![connector], "Enabled in the config."))
        }
        [first, second] => match ctx.pipeline {
            Pipeline::Ingest => Some(Decision::connectors(
                vec![clickhouse(), ConnectorDecision::elastic()],
                "Enabled in the config. Dual write is enabled.",
            )),
            Pipeline::Query => match (first, second) {
                (Target::Clickhouse, Target::Elasticsearch) => Some(
                    Decision::connectors(
                        vec![clickhouse(), ConnectorDecision::elastic()],
                        "Enabled in the config. A/B testing.",
                    )
                    .with_ab_testing(true),
                ),
                (Target::Elasticsearch, Target::Clickhouse) => Some(
                    Decision::connectors(
                        vec![ConnectorDecision::elastic(), clickhouse()],
                        "Enabled in the config. A/B testing.",
                    )
                    .with_ab_testing(true),
                ),
                _ => Some(unsupported(format!(
                    "unsupported configuration for pipeline {}, targets: {}, {}",
                    ctx.pipeline, first, second
                ))),
            },
        },
        _ => Some(unsupported("too many backend connector".to_string())),
    }
}

fn default_wildcard(ctx: &RuleContext<'_>, part: &str) -> Option<Decision> {
    let snapshot = ctx.snapshot;

    // Queries against names no backend knows about contribute nothing.
    // Ingest may create new indexes, so it always falls through to the default.
    if ctx.pipeline == Pipeline::Query && !snapshot.is_known_name(part) {
        return None;
    }

    let use_common_table = snapshot.config.resolver.use_common_table_for_wildcard;
    let mut connectors = Vec::new();
    for target in ctx.pipeline.default_targets(&snapshot.config.resolver) {
        match target {
            Target::Clickhouse => {
                let table_name = if use_common_table {
                    COMMON_TABLE_NAME.to_string()
                } else {
                    snapshot
                        .config
                        .indexes
                        .get(part)
                        .map(|i| i.table_name(part).to_string())
                        .unwrap_or_else(|| part.to_string())
                };
                connectors.push(ConnectorDecision::clickhouse(
                    table_name,
                    vec![part.to_string()],
                    use_common_table,
                ));
            }
            Target::Elasticsearch => connectors.push(ConnectorDecision::elastic()),
            Target::Other(other) => {
                return Some(unsupported(format!("unsupported target: {}", other)))
            }
        }
    }

    let reason = format!(
        "Using default wildcard ('*') configuration for {} processor",
        ctx.pipeline
    );
    if connectors.is_empty() {
        return Some(Decision::closed(reason));
    }
    Some(Decision::connectors(connectors, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::table::{Table, TableMap};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn snapshot(toml: &str) -> ResolverSnapshot {
        let mut tables = TableMap::new();
        let mut virt = Table::new("virtual-logs");
        virt.is_virtual = true;
        tables.insert(virt.name.clone(), virt);
        ResolverSnapshot {
            config: Arc::new(Config::from_toml_str(toml).unwrap()),
            tables: Arc::new(tables),
            elastic_indexes: Arc::new(BTreeSet::from(["es-only".to_string()])),
        }
    }

    fn first_match(snapshot: &ResolverSnapshot, pipeline: Pipeline, part: &str) -> Option<(&'static str, Decision)> {
        let ctx = RuleContext { pipeline, snapshot };
        rule_chain()
            .into_iter()
            .find_map(|rule| (rule.apply)(&ctx, part).map(|d| (rule.name, d)))
    }

    #[test]
    fn test_internal_index_short_circuits() {
        let snap = snapshot(
            r#"
            [indexes.".kibana"]
            query_target = []
            "#,
        );
        let (name, decision) = first_match(&snap, Pipeline::Query, ".kibana").unwrap();
        assert_eq!(name, "kibanaInternal");
        assert_eq!(
            decision.use_connectors,
            vec![ConnectorDecision::Elastic(ElasticDecision {
                management_call: true
            })]
        );
    }

    #[test]
    fn test_disabled_only_for_pipeline_without_targets() {
        let snap = snapshot(
            r#"
            [indexes.closed]
            ingest_target = ["clickhouse"]
            "#,
        );
        let (name, decision) = first_match(&snap, Pipeline::Query, "closed").unwrap();
        assert_eq!(name, "disabled");
        assert!(decision.is_closed);

        let (name, _) = first_match(&snap, Pipeline::Ingest, "closed").unwrap();
        assert_eq!(name, "singleIndex");
    }

    #[test]
    fn test_common_table_direct_query_rejected() {
        let snap = snapshot("");
        let (_, decision) = first_match(&snap, Pipeline::Query, COMMON_TABLE_NAME).unwrap();
        assert_eq!(
            decision.err.as_deref(),
            Some("common table is not allowed to be queried directly")
        );
    }

    #[test]
    fn test_common_table_configured_and_virtual() {
        let snap = snapshot(
            r#"
            [resolver]
            auto_discovery = true
            [indexes.shared]
            query_target = ["clickhouse"]
            use_common_table = true
            "#,
        );
        let expected = vec![ConnectorDecision::clickhouse(
            COMMON_TABLE_NAME,
            vec!["shared".into()],
            true,
        )];
        let (_, decision) = first_match(&snap, Pipeline::Query, "shared").unwrap();
        assert_eq!(decision.use_connectors, expected);
        assert!(!decision.enable_ab_testing);

        let (name, decision) = first_match(&snap, Pipeline::Query, "virtual-logs").unwrap();
        assert_eq!(name, "commonTable");
        assert!(decision.use_connectors[0].as_clickhouse().unwrap().is_common_table);
    }

    #[test]
    fn test_virtual_table_ignored_without_auto_discovery() {
        let snap = snapshot(
            r#"
            [resolver]
            default_query_target = ["clickhouse"]
            [indexes.virtual-logs]
            query_target = ["clickhouse"]
            "#,
        );
        let (name, _) = first_match(&snap, Pipeline::Query, "virtual-logs").unwrap();
        assert_eq!(name, "singleIndex");
    }

    #[test]
    fn test_common_table_ab_optimizer() {
        let snap = snapshot(
            r#"
            [resolver.default_optimizers.elastic_ab_testing]
            disabled = false
            [indexes.shared]
            query_target = ["clickhouse"]
            use_common_table = true
            "#,
        );
        let (_, decision) = first_match(&snap, Pipeline::Query, "shared").unwrap();
        assert!(decision.enable_ab_testing);
    }

    #[test]
    fn test_single_index_targets() {
        let snap = snapshot(
            r#"
            [indexes.ch]
            query_target = ["clickhouse"]
            override = "ch_physical"
            [indexes.es]
            query_target = ["elasticsearch"]
            [indexes.ab]
            query_target = ["elasticsearch", "clickhouse"]
            ingest_target = ["clickhouse", "elasticsearch"]
            [indexes.twice]
            query_target = ["clickhouse", "clickhouse"]
            [indexes.three]
            query_target = ["clickhouse", "elasticsearch", "clickhouse"]
            [indexes.odd]
            query_target = ["kafka"]
            "#,
        );

        let (_, d) = first_match(&snap, Pipeline::Query, "ch").unwrap();
        assert_eq!(
            d.use_connectors,
            vec![ConnectorDecision::clickhouse("ch_physical", vec!["ch".into()], false)]
        );

        let (_, d) = first_match(&snap, Pipeline::Query, "es").unwrap();
        assert_eq!(d.use_connectors, vec![ConnectorDecision::elastic()]);

        let (_, d) = first_match(&snap, Pipeline::Query, "ab").unwrap();
        assert!(d.enable_ab_testing);
        assert!(d.use_connectors[0].is_elastic());
        assert!(d.use_connectors[1].as_clickhouse().is_some());

        let (_, d) = first_match(&snap, Pipeline::Ingest, "ab").unwrap();
        assert!(!d.enable_ab_testing);
        assert_eq!(d.reason, "Enabled in the config. Dual write is enabled.");

        let (_, d) = first_match(&snap, Pipeline::Query, "twice").unwrap();
        assert!(d.err.unwrap().starts_with("unsupported configuration for pipeline query"));

        let (_, d) = first_match(&snap, Pipeline::Query, "three").unwrap();
        assert_eq!(d.err.as_deref(), Some("too many backend connector"));

        let (_, d) = first_match(&snap, Pipeline::Query, "odd").unwrap();
        assert_eq!(d.err.as_deref(), Some("unsupported target: kafka"));
    }

    #[test]
    fn test_default_wildcard() {
        let snap = snapshot(
            r#"
            [resolver]
            default_query_target = ["clickhouse"]
            use_common_table_for_wildcard = true
            "#,
        );
        let (name, d) = first_match(&snap, Pipeline::Query, "es-only").unwrap();
        assert_eq!(name, "defaultWildcard");
        assert_eq!(
            d.use_connectors,
            vec![ConnectorDecision::clickhouse(
                COMMON_TABLE_NAME,
                vec!["es-only".into()],
                true
            )]
        );
    }

    #[test]
    fn test_default_wildcard_unknown_name_unresolved_for_query() {
        let snap = snapshot("");
        assert!(first_match(&snap, Pipeline::Query, "nowhere").is_none());

        let (name, d) = first_match(&snap, Pipeline::Ingest, "nowhere").unwrap();
        assert_eq!(name, "defaultWildcard");
        assert_eq!(d.use_connectors, vec![ConnectorDecision::elastic()]);
    }

    #[test]
    fn test_default_wildcard_no_targets_closes() {
        let snap = snapshot(
            r#"
            [resolver]
            default_query_target = []
            "#,
        );
        let (_, d) = first_match(&snap, Pipeline::Query, "es-only").unwrap();
        assert!(d.is_closed);
    }
}
