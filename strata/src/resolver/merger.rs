//! Merging of per-index decisions into one decision for the whole pattern

use super::decision::{ConnectorDecision, Decision};

pub(crate) type DecisionMerger = fn(Vec<Decision>) -> Decision;

fn incompatible(reason: &str, err: String) -> Decision {
    let mut decision = Decision::error(err);
    decision.reason = reason.to_string();
    decision
}

/// Merge the decisions for every name a pattern matched.
///
/// Inputs are put in canonical order first, so the outcome (including which
/// error is reported) does not depend on the order names were matched in.
pub(crate) fn basic_decision_merger(mut decisions: Vec<Decision>) -> Decision {
    if decisions.len() <= 1 {
        return decisions
            .pop()
            .unwrap_or_else(|| Decision::empty("No indexes matched, no decisions made."));
    }

    decisions.sort();

    if let Some(failed) = decisions.iter().find(|d| d.err.is_some()) {
        return failed.clone();
    }

    if let Some(empty) = decisions.iter().find(|d| d.is_empty) {
        return incompatible(
            "Got an empty decision. This is a bug.",
            format!("could not resolve index, empty index: {}", empty.index_pattern),
        );
    }

    let first = &decisions[0];
    if let Some(other) = decisions
        .iter()
        .find(|d| d.enable_ab_testing != first.enable_ab_testing)
    {
        return incompatible(
            "One of the indexes matching the pattern does A/B testing, while another index does not - inconsistency.",
            format!(
                "inconsistent A/B testing configuration - index {} (A/B testing: {}) and index {} (A/B testing: {})",
                other.index_pattern,
                other.enable_ab_testing,
                first.index_pattern,
                first.enable_ab_testing
            ),
        );
    }
    let enable_ab_testing = first.enable_ab_testing;

    let open: Vec<Decision> = decisions.into_iter().filter(|d| !d.is_closed).collect();
    let Some((head, rest)) = open.split_first() else {
        return Decision::closed("All indexes matching the pattern are closed.");
    };

    let mut use_connectors = head.use_connectors.clone();
    for decision in rest {
        if decision.use_connectors.len() != head.use_connectors.len() {
            return incompatible(
                "Inconsistent number of connectors",
                format!(
                    "inconsistent number of connectors - index {} ({} connectors) and index {} ({} connectors)",
                    decision.index_pattern,
                    decision.use_connectors.len(),
                    head.index_pattern,
                    head.use_connectors.len()
                ),
            );
        }
        if let Err(failed) =
            merge_use_connectors(&mut use_connectors, &decision.use_connectors, &decision.index_pattern)
        {
            return failed;
        }
    }

    for connector in &mut use_connectors {
        if let ConnectorDecision::Clickhouse(ch) = connector {
            ch.indexes.sort();
            ch.indexes.dedup();
        }
    }

    Decision::connectors(use_connectors, "Merged decisions").with_ab_testing(enable_ab_testing)
}

fn merge_use_connectors(
    lhs: &mut [ConnectorDecision],
    rhs: &[ConnectorDecision],
    rhs_index: &str,
) -> std::result::Result<(), Decision> {
    for rhs_conn in rhs {
        let mut found_matching = false;
        for lhs_conn in lhs.iter_mut() {
            let lhs_desc = lhs_conn.to_string();
            match (lhs_conn, rhs_conn) {
                (ConnectorDecision::Elastic(_), ConnectorDecision::Elastic(_)) => {
                    found_matching = true;
                }
                (ConnectorDecision::Clickhouse(l), ConnectorDecision::Clickhouse(r)) => {
                    if l.table_name != r.table_name {
                        return Err(incompatible(
                            "Incompatible decisions for two indexes - they use a different ClickHouse table",
                            format!(
                                "incompatible decisions for two indexes (different ClickHouse table) - {} and {}",
                                rhs_conn, lhs_desc
                            ),
                        ));
                    }
                    if l.is_common_table != r.is_common_table {
                        return Err(incompatible(
                            "Incompatible decisions for two indexes - one uses the common table, the other does not",
                            format!(
                                "incompatible decisions for two indexes (common table usage) - {} and {}",
                                rhs_conn, lhs_desc
                            ),
                        ));
                    }
                    if l.is_common_table {
                        l.indexes.extend(r.indexes.iter().cloned());
                    } else if l != r {
                        return Err(incompatible(
                            "Incompatible decisions for two indexes - they use ClickHouse tables differently",
                            format!(
                                "incompatible decisions for two indexes (different usage of ClickHouse) - {} and {}",
                                rhs_conn, lhs_desc
                            ),
                        ));
                    }
                    found_matching = true;
                }
                _ => {}
            }
        }
        if !found_matching {
            let lhs_desc: Vec<String> = lhs.iter().map(|c| c.to_string()).collect();
            return Err(incompatible(
                "Incompatible decisions for two indexes - they use different connectors",
                format!(
                    "incompatible decisions for two indexes - they use different connectors: could not find connector {} used for index {} in decisions: [{}]",
                    rhs_conn,
                    rhs_index,
                    lhs_desc.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::COMMON_TABLE_NAME;
    use proptest::prelude::*;

    fn named(mut d: Decision, name: &str) -> Decision {
        d.index_pattern = name.to_string();
        d
    }

    fn common(name: &str) -> Decision {
        named(
            Decision::connectors(
                vec![ConnectorDecision::clickhouse(
                    COMMON_TABLE_NAME,
                    vec![name.to_string()],
                    true,
                )],
                "Common table will be used.",
            ),
            name,
        )
    }

    fn own_table(name: &str, table: &str) -> Decision {
        named(
            Decision::connectors(
                vec![ConnectorDecision::clickhouse(table, vec![name.to_string()], false)],
                "Enabled in the config.",
            ),
            name,
        )
    }

    fn elastic(name: &str) -> Decision {
        named(
            Decision::connectors(vec![ConnectorDecision::elastic()], "Enabled in the config."),
            name,
        )
    }

    #[test]
    fn test_empty_input() {
        let merged = basic_decision_merger(vec![]);
        assert!(merged.is_empty);
        assert_eq!(merged.reason, "No indexes matched, no decisions made.");
    }

    #[test]
    fn test_single_input_unchanged() {
        let d = common("logs-1");
        assert_eq!(basic_decision_merger(vec![d.clone()]), d);
    }

    #[test]
    fn test_error_fails_fast() {
        let merged = basic_decision_merger(vec![common("a"), Decision::error("boom")]);
        assert_eq!(merged.err.as_deref(), Some("boom"));
    }

    #[test]
    fn test_empty_input_decision_is_bug() {
        let merged = basic_decision_merger(vec![common("a"), named(Decision::empty("x"), "b")]);
        assert!(merged.err.unwrap().starts_with("could not resolve index"));
    }

    #[test]
    fn test_common_tables_union_indexes() {
        let merged = basic_decision_merger(vec![common("logs-2"), common("logs-1"), common("logs-2")]);
        assert!(merged.err.is_none());
        assert_eq!(merged.reason, "Merged decisions");
        assert_eq!(
            merged.use_connectors,
            vec![ConnectorDecision::clickhouse(
                COMMON_TABLE_NAME,
                vec!["logs-1".into(), "logs-2".into()],
                true
            )]
        );
    }

    #[test]
    fn test_all_closed() {
        let merged = basic_decision_merger(vec![
            named(Decision::closed("off"), "a"),
            named(Decision::closed("off"), "b"),
        ]);
        assert!(merged.is_closed);
        assert!(merged.use_connectors.is_empty());
    }

    #[test]
    fn test_closed_discarded() {
        let merged =
            basic_decision_merger(vec![named(Decision::closed("off"), "a"), elastic("b")]);
        assert!(!merged.is_closed);
        assert_eq!(merged.use_connectors, vec![ConnectorDecision::elastic()]);
    }

    #[test]
    fn test_ab_inconsistency() {
        let merged = basic_decision_merger(vec![common("a").with_ab_testing(true), common("b")]);
        assert!(merged
            .err
            .unwrap()
            .starts_with("inconsistent A/B testing configuration"));
    }

    #[test]
    fn test_common_vs_own_table_same_name() {
        let mut shared_name = own_table("b", COMMON_TABLE_NAME);
        shared_name.index_pattern = "b".into();
        let merged = basic_decision_merger(vec![common("a"), shared_name]);
        assert!(merged.err.unwrap().contains("(common table usage)"));
    }

    #[test]
    fn test_different_tables() {
        let merged = basic_decision_merger(vec![own_table("a", "a"), own_table("b", "b")]);
        assert!(merged.err.unwrap().contains("(different ClickHouse table)"));
    }

    #[test]
    fn test_different_connectors() {
        let merged = basic_decision_merger(vec![own_table("a", "a"), elastic("b")]);
        assert!(merged.err.unwrap().contains("they use different connectors"));
    }

    #[test]
    fn test_connector_count_mismatch() {
        let two = named(
            Decision::connectors(
                vec![
                    ConnectorDecision::clickhouse("a", vec!["a".into()], false),
                    ConnectorDecision::elastic(),
                ],
                "",
            ),
            "a",
        );
        let merged = basic_decision_merger(vec![two, elastic("b")]);
        assert!(merged.err.unwrap().starts_with("inconsistent number of connectors"));
    }

    #[test]
    fn test_identical_own_tables_merge() {
        let merged = basic_decision_merger(vec![own_table("a", "t"), own_table("a", "t")]);
        assert!(merged.err.is_none());
        assert_eq!(merged.use_connectors.len(), 1);
    }

    fn arb_decision() -> impl Strategy<Value = Decision> {
        prop_oneof![
            "[a-d]".prop_map(|n| common(&n)),
            "[a-d]".prop_map(|n| own_table(&n, &n)),
            "[a-d]".prop_map(|n| elastic(&n)),
            "[a-d]".prop_map(|n| named(Decision::closed("off"), &n)),
            "[a-d]".prop_map(|n| common(&n).with_ab_testing(true)),
        ]
    }

    proptest! {
        #[test]
        fn prop_merge_is_order_independent(
            decisions in proptest::collection::vec(arb_decision(), 0..6),
            seed in any::<u64>(),
        ) {
            let mut shuffled = decisions.clone();
            // deterministic permutation driven by the seed
            let n = shuffled.len();
            if n > 1 {
                let mut s = seed;
                for i in (1..n).rev() {
                    s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let j = (s % (i as u64 + 1)) as usize;
                    shuffled.swap(i, j);
                }
            }
            prop_assert_eq!(basic_decision_merger(decisions), basic_decision_merger(shuffled));
        }
    }
}
