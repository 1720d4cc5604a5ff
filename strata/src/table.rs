//! Physical table definitions and their discovery
//!
//! Tables come from the `[tables]` config section. Indexes marked `virtual`
//! are stored in the shared [`COMMON_TABLE_NAME`] table and told apart by the
//! [`INDEX_NAME_COLUMN`] column.

use crate::config::{Config, TableConfig};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared table holding the rows of every virtual index.
pub const COMMON_TABLE_NAME: &str = "strata_common_table";

/// Column of the common table that carries the logical index name.
pub const INDEX_NAME_COLUMN: &str = "__strata_index_name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Keyword,
    Text,
    Long,
    Integer,
    Double,
    Float,
    Boolean,
    Date,
    Timestamp,
    Ip,
    Object,
}

impl FieldType {
    pub fn is_date(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Timestamp)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Long | FieldType::Integer | FieldType::Double | FieldType::Float
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Keyword => "keyword",
            FieldType::Text => "text",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
            FieldType::Ip => "ip",
            FieldType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: FieldType,
    /// Elasticsearch field name when it differs from `name`
    pub field: Option<String>,
}

impl Column {
    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub is_virtual: bool,
    pub primary_key: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_virtual: false,
            primary_key: None,
            columns: Vec::new(),
        }
    }

    pub fn from_config(name: &str, config: &TableConfig) -> Self {
        Self {
            name: name.to_string(),
            is_virtual: config.virtual_table,
            primary_key: config.primary_key.clone(),
            columns: config
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    column_type: c.column_type,
                    field: c.field.clone(),
                })
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Quoted identifier for use in generated SQL
    pub fn full_name(&self) -> String {
        format!("\"{}\"", self.name.replace('"', "\\\""))
    }
}

/// Snapshot of all known tables keyed by name
pub type TableMap = BTreeMap<String, Table>;

/// Source of physical table definitions.
#[async_trait]
pub trait TableDiscovery: Send + Sync {
    /// Current read-only snapshot
    fn table_definitions(&self) -> Arc<TableMap>;

    /// Refresh the snapshot from the backing store
    async fn reload(&self) -> Result<()>;
}

/// Table discovery over the `[tables]` config section
pub struct StaticTableDiscovery {
    tables: RwLock<Arc<TableMap>>,
}

impl StaticTableDiscovery {
    pub fn new(tables: TableMap) -> Self {
        Self {
            tables: RwLock::new(Arc::new(tables)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let tables = config
            .tables
            .iter()
            .map(|(name, t)| (name.clone(), Table::from_config(name, t)))
            .collect();
        Self::new(tables)
    }

    /// Add or replace one table definition
    pub fn insert(&self, table: Table) {
        let mut guard = self.tables.write();
        let mut next = (**guard).clone();
        next.insert(table.name.clone(), table);
        *guard = Arc::new(next);
    }
}

#[async_trait]
impl TableDiscovery for StaticTableDiscovery {
    fn table_definitions(&self) -> Arc<TableMap> {
        Arc::clone(&self.tables.read())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = Config::from_toml_str(
            r#"
            [tables.logs-1]
            virtual = true
            columns = [{ name = "msg", type = "text", field = "message" }]
            "#,
        )
        .unwrap();

        let discovery = StaticTableDiscovery::from_config(&config);
        let tables = discovery.table_definitions();
        let table = &tables["logs-1"];
        assert!(table.is_virtual);
        assert_eq!(table.column("msg").unwrap().field_name(), "message");
    }

    #[test]
    fn test_insert_swaps_snapshot() {
        let discovery = StaticTableDiscovery::new(TableMap::new());
        let before = discovery.table_definitions();
        discovery.insert(Table::new("events"));

        assert!(before.is_empty());
        assert!(discovery.table_definitions().contains_key("events"));
    }

    #[test]
    fn test_full_name_quotes() {
        assert_eq!(Table::new("logs").full_name(), "\"logs\"");
    }
}
