//! Routing decisions produced by the table resolver

use serde::Serialize;
use std::fmt;

/// One backend a decision routes to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "connector", rename_all = "snake_case")]
pub enum ConnectorDecision {
    Clickhouse(ClickhouseDecision),
    Elastic(ElasticDecision),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ClickhouseDecision {
    pub table_name: String,
    /// Logical indexes physically stored in `table_name`
    pub indexes: Vec<String>,
    pub is_common_table: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ElasticDecision {
    /// Internal or administrative traffic (e.g. Kibana system indexes)
    pub management_call: bool,
}

impl ConnectorDecision {
    pub fn clickhouse(
        table_name: impl Into<String>,
        indexes: Vec<String>,
        is_common_table: bool,
    ) -> Self {
        ConnectorDecision::Clickhouse(ClickhouseDecision {
            table_name: table_name.into(),
            indexes,
            is_common_table,
        })
    }

    pub fn elastic() -> Self {
        ConnectorDecision::Elastic(ElasticDecision::default())
    }

    pub fn as_clickhouse(&self) -> Option<&ClickhouseDecision> {
        match self {
            ConnectorDecision::Clickhouse(c) => Some(c),
            ConnectorDecision::Elastic(_) => None,
        }
    }

    pub fn is_elastic(&self) -> bool {
        matches!(self, ConnectorDecision::Elastic(_))
    }
}

impl fmt::Display for ConnectorDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorDecision::Clickhouse(c) => {
                write!(f, "clickhouse table: {}", c.table_name)?;
                if c.is_common_table {
                    write!(f, " (common table, indexes: {})", c.indexes.join(", "))?;
                }
                Ok(())
            }
            ConnectorDecision::Elastic(e) => {
                write!(f, "elastic")?;
                if e.management_call {
                    write!(f, " (management call)")?;
                }
                Ok(())
            }
        }
    }
}

/// Resolved routing outcome for one index pattern.
///
/// Exactly one of `err`, `is_empty`, `is_closed` or a non-empty
/// `use_connectors` describes the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Decision {
    pub use_connectors: Vec<ConnectorDecision>,
    pub is_empty: bool,
    pub is_closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    pub enable_ab_testing: bool,
    pub reason: String,
    pub resolver_name: String,
    pub index_pattern: String,
}

impl Decision {
    pub fn error(err: impl Into<String>) -> Self {
        Self {
            err: Some(err.into()),
            ..Default::default()
        }
    }

    pub fn empty(reason: impl Into<String>) -> Self {
        Self {
            is_empty: true,
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self {
            is_closed: true,
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn connectors(use_connectors: Vec<ConnectorDecision>, reason: impl Into<String>) -> Self {
        Self {
            use_connectors,
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_ab_testing(mut self, enabled: bool) -> Self {
        self.enable_ab_testing = enabled;
        self
    }

    /// First ClickHouse connector, if the decision routes to ClickHouse at all
    pub fn clickhouse(&self) -> Option<&ClickhouseDecision> {
        self.use_connectors.iter().find_map(|c| c.as_clickhouse())
    }

    /// True when every connector is an Elastic one
    pub fn is_elastic_only(&self) -> bool {
        !self.use_connectors.is_empty() && self.use_connectors.iter().all(|c| c.is_elastic())
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.err {
            return write!(f, "Error: {}", err);
        }
        if self.is_empty {
            return write!(f, "Empty: {}", self.reason);
        }
        if self.is_closed {
            return write!(f, "Closed: {}", self.reason);
        }
        let connectors: Vec<String> = self.use_connectors.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", connectors.join(", "))?;
        if self.enable_ab_testing {
            write!(f, ", A/B testing")?;
        }
        write!(f, " ({})", self.reason)
    }
}
