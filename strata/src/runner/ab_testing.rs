//! A/B comparison of two backends serving the same search
//!
//! The client always gets the answer of the first connector of the decision.
//! The second one runs in the background; once both are done (or the
//! comparison timed out) the pair is handed to an [`AbResultsSender`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// Differences reported per comparison at most
const MAX_REPORTED_DIFFERENCES: usize = 20;

/// Response keys that differ between backends on every request
const IGNORED_KEYS: &[&str] = &["took", "_shards"];

/// Outcome of one side of a comparison
#[derive(Debug, Clone, Serialize)]
pub struct AbTestingSide {
    pub connector: String,
    #[serde(with = "millis")]
    pub took: Duration,
    pub response: Option<Value>,
    pub error: Option<String>,
}

impl AbTestingSide {
    pub fn new(connector: impl Into<String>, took: Duration, result: &crate::Result<Value>) -> Self {
        let (response, error) = match result {
            Ok(value) => (Some(value.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            connector: connector.into(),
            took,
            response,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AbTestingResult {
    pub index_pattern: String,
    pub main: AbTestingSide,
    pub secondary: AbTestingSide,
}

impl AbTestingResult {
    /// JSON paths where the two responses disagree
    pub fn differences(&self) -> Vec<String> {
        let mut out = Vec::new();
        match (&self.main.response, &self.secondary.response) {
            (Some(a), Some(b)) => diff_values("", a, b, &mut out),
            (a, b) if a.is_some() != b.is_some() => out.push("<response>".to_string()),
            _ => {}
        }
        out
    }
}

/// Receiver of finished comparisons.
#[async_trait]
pub trait AbResultsSender: Send + Sync {
    async fn send(&self, result: AbTestingResult);
}

/// Logs a short summary of every comparison
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAbResultsSender;

#[async_trait]
impl AbResultsSender for LoggingAbResultsSender {
    async fn send(&self, result: AbTestingResult) {
        let differences = result.differences();
        if differences.is_empty() && result.secondary.error.is_none() {
            info!(
                pattern = %result.index_pattern,
                main = %result.main.connector,
                main_took_ms = result.main.took.as_millis() as u64,
                secondary = %result.secondary.connector,
                secondary_took_ms = result.secondary.took.as_millis() as u64,
                "A/B responses match"
            );
        } else {
            warn!(
                pattern = %result.index_pattern,
                main = %result.main.connector,
                secondary = %result.secondary.connector,
                secondary_error = ?result.secondary.error,
                differences = ?differences,
                "A/B responses differ"
            );
        }
    }
}

fn diff_values(path: &str, a: &Value, b: &Value, out: &mut Vec<String>) {
    if out.len() >= MAX_REPORTED_DIFFERENCES {
        return;
    }
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            let keys = a.keys().chain(b.keys().filter(|k| !a.contains_key(*k)));
            for key in keys {
                if path.is_empty() && IGNORED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let child = format!("{}/{}", path, key);
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => diff_values(&child, x, y, out),
                    _ => out.push(child),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                out.push(format!("{}[len {} != {}]", path, a.len(), b.len()));
                return;
            }
            for (i, (x, y)) in a.iter().zip(b).enumerate() {
                diff_values(&format!("{}/{}", path, i), x, y, out);
            }
        }
        (Value::Number(x), Value::Number(y)) if x.as_f64() == y.as_f64() => {}
        _ if a == b => {}
        _ => out.push(path.to_string()),
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(main: Value, secondary: crate::Result<Value>) -> AbTestingResult {
        AbTestingResult {
            index_pattern: "logs".to_string(),
            main: AbTestingSide::new("clickhouse", Duration::from_millis(3), &Ok(main)),
            secondary: AbTestingSide::new("elastic", Duration::from_millis(5), &secondary),
        }
    }

    #[test]
    fn test_identical_responses_ignore_took() {
        let r = result(
            json!({"took": 1, "hits": {"total": {"value": 2}}}),
            Ok(json!({"took": 9, "hits": {"total": {"value": 2.0}}})),
        );
        assert!(r.differences().is_empty());
    }

    #[test]
    fn test_reports_paths() {
        let r = result(
            json!({"hits": {"total": {"value": 2}, "hits": [1, 2]}}),
            Ok(json!({"hits": {"total": {"value": 3}, "hits": [1]}, "aggregations": {}})),
        );
        assert_eq!(
            r.differences(),
            vec![
                "/hits/hits[len 2 != 1]".to_string(),
                "/hits/total/value".to_string(),
                "/aggregations".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_secondary_response() {
        let r = result(json!({}), Err(crate::Error::Backend("down".into())));
        assert_eq!(r.differences(), vec!["<response>".to_string()]);
        assert_eq!(r.secondary.error.as_deref(), Some("Backend error: down"));
    }

    #[test]
    fn test_serializes_timings_as_millis() {
        let r = result(json!({}), Ok(json!({})));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["main"]["took"], 3);
        assert_eq!(json["secondary"]["connector"], "elastic");
    }
}
