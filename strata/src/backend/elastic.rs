//! Elasticsearch over its REST API

use super::ElasticsearchConnector;
use crate::config::ElasticsearchConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

pub struct HttpElasticsearchConnector {
    client: Client,
    url: String,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolveIndexResponse {
    #[serde(default)]
    indices: Vec<NamedEntry>,
    #[serde(default)]
    aliases: Vec<NamedEntry>,
    #[serde(default)]
    data_streams: Vec<NamedEntry>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    name: String,
}

impl ResolveIndexResponse {
    fn names(self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .indices
            .into_iter()
            .chain(self.aliases)
            .chain(self.data_streams)
            .map(|e| e.name)
            .collect();
        names.into_iter().collect()
    }
}

impl HttpElasticsearchConnector {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        // ES error bodies are passed through; only transport failures are errors here
        if status.is_server_error() && body.get("error").is_none() {
            return Err(Error::Backend(format!("Elasticsearch returned {}", status)));
        }
        Ok(body)
    }
}

#[async_trait]
impl ElasticsearchConnector for HttpElasticsearchConnector {
    async fn search(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        debug!(pattern = index_pattern, "Forwarding search to Elasticsearch");
        let url = format!("{}/{}/_search", self.url, index_pattern);
        self.send_json(self.client.post(url).json(body)).await
    }

    async fn count(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}/_count", self.url, index_pattern);
        self.send_json(self.client.post(url).json(body)).await
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let url = format!("{}/_resolve/index/*?expand_wildcards=open", self.url);
        let body = self.send_json(self.client.get(url)).await?;
        let resolved: ResolveIndexResponse = serde_json::from_value(body)?;
        Ok(resolved.names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_index_names() {
        let resolved: ResolveIndexResponse = serde_json::from_value(json!({
            "indices": [{"name": "logs-2"}, {"name": "logs-1", "attributes": ["open"]}],
            "aliases": [{"name": "logs", "indices": ["logs-1", "logs-2"]}],
            "data_streams": []
        }))
        .unwrap();
        assert_eq!(resolved.names(), vec!["logs", "logs-1", "logs-2"]);
    }

    #[test]
    fn test_resolve_index_missing_sections() {
        let resolved: ResolveIndexResponse = serde_json::from_value(json!({})).unwrap();
        assert!(resolved.names().is_empty());
    }
}
