use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResultCol {
    pub col_name: String,
    pub value: Value,
}

impl QueryResultCol {
    pub fn new(col_name: impl Into<String>, value: Value) -> Self {
        Self {
            col_name: col_name.into(),
            value,
        }
    }
}

/// One row returned by a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResultRow {
    /// Logical index the row came from, when known
    pub index: String,
    pub cols: Vec<QueryResultCol>,
}

impl QueryResultRow {
    pub fn new(index: impl Into<String>, cols: Vec<QueryResultCol>) -> Self {
        Self {
            index: index.into(),
            cols,
        }
    }

    pub fn get(&self, col_name: &str) -> Option<&Value> {
        self.cols
            .iter()
            .find(|c| c.col_name == col_name)
            .map(|c| &c.value)
    }

    /// Whether both rows agree on every column listed in `names`.
    pub fn same_subset_of_columns(&self, other: &QueryResultRow, names: &[String]) -> bool {
        names.iter().all(|name| self.get(name) == other.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_subset_of_columns() {
        let a = QueryResultRow::new(
            "logs",
            vec![
                QueryResultCol::new("ts", json!(1)),
                QueryResultCol::new("id", json!("a")),
            ],
        );
        let b = QueryResultRow::new(
            "logs",
            vec![
                QueryResultCol::new("ts", json!(1)),
                QueryResultCol::new("id", json!("b")),
            ],
        );
        assert!(a.same_subset_of_columns(&b, &["ts".to_string()]));
        assert!(!a.same_subset_of_columns(&b, &["ts".to_string(), "id".to_string()]));
    }
}
