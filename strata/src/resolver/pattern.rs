//! Index pattern splitting
//!
//! Turns a raw request pattern like `logs-*,metrics` into the concrete index
//! names the rule chain is evaluated on.

use super::decision::Decision;
use super::ResolverSnapshot;
use crate::table::COMMON_TABLE_NAME;

/// Prefix of Kibana/Elasticsearch system indexes
pub const INTERNAL_INDEX_PREFIX: &str = ".";

/// A request pattern split into concrete names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    pub source: String,
    pub is_pattern: bool,
    /// Deduplicated, sorted concrete names
    pub parts: Vec<String>,
}

/// Splits a pattern, or rejects it with a terminal decision.
pub(crate) type PatternSplitter =
    fn(&str, &ResolverSnapshot) -> std::result::Result<ParsedPattern, Decision>;

pub fn is_internal_index(name: &str) -> bool {
    name.starts_with(INTERNAL_INDEX_PREFIX)
}

pub fn is_index_pattern(name: &str) -> bool {
    name.contains('*') || name.contains(',')
}

/// Match an Elasticsearch index pattern where `*` matches any run of characters.
pub fn index_matches(pattern: &str, name: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = name.chars().collect();

    let mut dp = vec![vec![false; text_chars.len() + 1]; pattern_chars.len() + 1];
    dp[0][0] = true;

    // Handle leading wildcards
    for (i, &p) in pattern_chars.iter().enumerate() {
        if p == '*' {
            dp[i + 1][0] = dp[i][0];
        }
    }

    for (i, &p) in pattern_chars.iter().enumerate() {
        for (j, &t) in text_chars.iter().enumerate() {
            if p == '*' {
                dp[i + 1][j + 1] = dp[i][j + 1] || dp[i + 1][j];
            } else if p == t {
                dp[i + 1][j + 1] = dp[i][j];
            }
        }
    }

    dp[pattern_chars.len()][text_chars.len()]
}

/// Query pipeline splitter: expands wildcards against every known name.
pub(crate) fn wildcard_pattern_splitter(
    pattern: &str,
    snapshot: &ResolverSnapshot,
) -> std::result::Result<ParsedPattern, Decision> {
    let sub_patterns: Vec<&str> = pattern.split(',').collect();

    let mut names: Vec<String> = Vec::new();
    for sub in &sub_patterns {
        if !sub.contains('*') || is_internal_index(sub) {
            names.push(sub.to_string());
            continue;
        }

        names.extend(
            snapshot
                .config
                .indexes
                .keys()
                .filter(|name| index_matches(sub, name))
                .cloned(),
        );
        names.extend(
            snapshot
                .elastic_indexes
                .iter()
                .filter(|name| index_matches(sub, name))
                .cloned(),
        );
        if snapshot.config.resolver.auto_discovery {
            names.extend(
                snapshot
                    .tables
                    .keys()
                    .filter(|name| name.as_str() != COMMON_TABLE_NAME)
                    .filter(|name| index_matches(sub, name))
                    .cloned(),
            );
        }
    }

    names.sort();
    names.dedup();

    Ok(ParsedPattern {
        source: pattern.to_string(),
        is_pattern: sub_patterns.len() > 1 || pattern.contains('*'),
        parts: names,
    })
}

/// Ingest pipeline splitter: writes target exactly one index.
pub(crate) fn single_index_splitter(
    pattern: &str,
    _snapshot: &ResolverSnapshot,
) -> std::result::Result<ParsedPattern, Decision> {
    if is_index_pattern(pattern) {
        let mut decision = Decision::error("pattern is not allowed");
        decision.reason = "Pattern is not allowed.".to_string();
        return Err(decision);
    }

    Ok(ParsedPattern {
        source: pattern.to_string(),
        is_pattern: false,
        parts: vec![pattern.to_string()],
    })
}
