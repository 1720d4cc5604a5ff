//! Index schemas: the Elasticsearch-facing view of a table

use crate::table::{FieldType, Table, TableDiscovery};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    /// Name clients use in queries and see in `_source`
    pub property_name: String,
    /// Backing column name
    pub internal_name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub fields: BTreeMap<String, Field>,
    /// Property name of the primary key field, if any
    pub primary_key: Option<String>,
}

impl Schema {
    pub fn from_table(table: &Table) -> Self {
        let fields = table
            .columns
            .iter()
            .map(|c| {
                let field = Field {
                    property_name: c.field_name().to_string(),
                    internal_name: c.name.clone(),
                    field_type: c.column_type,
                };
                (field.property_name.clone(), field)
            })
            .collect();
        let primary_key = table
            .primary_key
            .as_ref()
            .and_then(|pk| table.column(pk))
            .map(|c| c.field_name().to_string());
        Self {
            fields,
            primary_key,
        }
    }

    /// Look up a field by property name, falling back to the column name.
    pub fn resolve_field(&self, name: &str) -> Option<&Field> {
        self.fields
            .get(name)
            .or_else(|| self.fields.values().find(|f| f.internal_name == name))
    }

    pub fn field_for_column(&self, column: &str) -> Option<&Field> {
        self.fields.values().find(|f| f.internal_name == column)
    }

    pub fn primary_key_field(&self) -> Option<&Field> {
        self.primary_key
            .as_ref()
            .and_then(|pk| self.fields.get(pk))
    }

    /// Union of several schemas; the first definition of a field wins.
    pub fn union<'a>(schemas: impl IntoIterator<Item = &'a Schema>) -> Schema {
        let mut merged = Schema::default();
        for schema in schemas {
            for (name, field) in &schema.fields {
                merged
                    .fields
                    .entry(name.clone())
                    .or_insert_with(|| field.clone());
            }
            if merged.primary_key.is_none() {
                merged.primary_key = schema.primary_key.clone();
            }
        }
        merged
    }
}

/// Lookup of per-index schemas.
pub trait SchemaRegistry: Send + Sync {
    fn find_schema(&self, index: &str) -> Option<Schema>;
    fn all_schemas(&self) -> BTreeMap<String, Schema>;
}

/// Schema registry deriving one schema per discovered table
pub struct StaticSchemaRegistry {
    discovery: Arc<dyn TableDiscovery>,
}

impl StaticSchemaRegistry {
    pub fn new(discovery: Arc<dyn TableDiscovery>) -> Self {
        Self { discovery }
    }
}

impl SchemaRegistry for StaticSchemaRegistry {
    fn find_schema(&self, index: &str) -> Option<Schema> {
        self.discovery
            .table_definitions()
            .get(index)
            .map(Schema::from_table)
    }

    fn all_schemas(&self) -> BTreeMap<String, Schema> {
        self.discovery
            .table_definitions()
            .iter()
            .map(|(name, table)| (name.clone(), Schema::from_table(table)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, StaticTableDiscovery, TableMap};

    fn table(name: &str, cols: &[(&str, FieldType)]) -> Table {
        let mut t = Table::new(name);
        t.columns = cols
            .iter()
            .map(|(n, ty)| Column {
                name: n.to_string(),
                column_type: *ty,
                field: None,
            })
            .collect();
        t
    }

    #[test]
    fn test_resolve_by_column_name() {
        let mut t = table("logs", &[("ts", FieldType::Date)]);
        t.columns[0].field = Some("@timestamp".to_string());
        let schema = Schema::from_table(&t);

        assert_eq!(schema.resolve_field("@timestamp").unwrap().internal_name, "ts");
        assert_eq!(schema.resolve_field("ts").unwrap().property_name, "@timestamp");
        assert!(schema.resolve_field("nope").is_none());
    }

    #[test]
    fn test_primary_key() {
        let mut t = table("logs", &[("id", FieldType::Keyword)]);
        t.primary_key = Some("id".to_string());
        let schema = Schema::from_table(&t);
        assert_eq!(schema.primary_key_field().unwrap().internal_name, "id");
    }

    #[test]
    fn test_union_keeps_first_definition() {
        let a = Schema::from_table(&table("a", &[("x", FieldType::Long)]));
        let b = Schema::from_table(&table(
            "b",
            &[("x", FieldType::Keyword), ("y", FieldType::Text)],
        ));
        let merged = Schema::union([&a, &b]);
        assert_eq!(merged.fields.len(), 2);
        assert_eq!(merged.fields["x"].field_type, FieldType::Long);
    }

    #[test]
    fn test_registry_reads_discovery() {
        let mut tables = TableMap::new();
        tables.insert("logs".into(), table("logs", &[("msg", FieldType::Text)]));
        let registry = StaticSchemaRegistry::new(Arc::new(StaticTableDiscovery::new(tables)));

        assert!(registry.find_schema("logs").is_some());
        assert!(registry.find_schema("other").is_none());
        assert_eq!(registry.all_schemas().len(), 1);
    }
}
