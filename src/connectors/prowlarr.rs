use super::http::{ApiClient, KeyPlacement};
use super::ServiceKind;
use crate::error::{ArrboardError, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Indexer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub guid: String,
    pub indexer_id: i64,
    #[serde(default)]
    pub indexer: Option<String>,
    pub title: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub seeders: Option<i64>,
    #[serde(default)]
    pub leechers: Option<i64>,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SystemStatus {
    #[serde(default)]
    version: Option<String>,
}

/// Prowlarr v1 API client.
#[derive(Debug, Clone)]
pub struct ProwlarrClient {
    api: ApiClient,
}

impl ProwlarrClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                ServiceKind::Prowlarr,
                base_url,
                api_key,
                KeyPlacement::Header("X-Api-Key"),
            )?,
        })
    }

    pub async fn version(&self) -> Result<Option<String>> {
        let status: SystemStatus = self.api.get_json("/api/v1/system/status", &[]).await?;
        Ok(status.version)
    }

    pub async fn indexers(&self) -> Result<Vec<Indexer>> {
        self.api.get_json("/api/v1/indexer", &[]).await
    }

    /// Prowlarr only accepts full indexer documents on PUT, so the current one
    /// is fetched and sent back with `enable` flipped.
    pub async fn set_indexer_enabled(&self, indexer_id: i64, enabled: bool) -> Result<()> {
        let path = format!("/api/v1/indexer/{}", indexer_id);
        let mut indexer: Value = self.api.get_json(&path, &[]).await?;
        match indexer.as_object_mut() {
            Some(fields) => {
                fields.insert("enable".to_string(), Value::Bool(enabled));
            }
            None => {
                return Err(ArrboardError::MalformedUpstream(format!(
                    "indexer {} is not an object",
                    indexer_id
                )))
            }
        }
        self.api.send_empty(Method::PUT, &path, Some(&indexer)).await
    }

    pub async fn search(&self, query: &str, categories: &[i64]) -> Result<Vec<SearchResult>> {
        let mut params = vec![("query", query.to_string()), ("type", "search".to_string())];
        params.extend(categories.iter().map(|c| ("categories", c.to_string())));
        self.api.get_json("/api/v1/search", &params).await
    }

    pub async fn grab(&self, guid: &str, indexer_id: i64) -> Result<()> {
        let body = json!({ "guid": guid, "indexerId": indexer_id });
        self.api
            .send_empty(Method::POST, "/api/v1/search", Some(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexer_and_search_fixtures() {
        let indexers: Vec<Indexer> = serde_json::from_str(
            r#"[{"id": 1, "name": "Nyaa", "enable": true, "protocol": "torrent", "priority": 25, "fields": []}]"#,
        )
        .unwrap();
        assert!(indexers[0].enable);

        let results: Vec<SearchResult> = serde_json::from_str(
            r#"[{"guid": "g-1", "indexerId": 1, "indexer": "Nyaa", "title": "Some.Release.1080p",
                 "size": 1234, "seeders": 40, "protocol": "torrent"}]"#,
        )
        .unwrap();
        assert_eq!(results[0].indexer_id, 1);
        assert_eq!(results[0].seeders, Some(40));
        assert_eq!(results[0].leechers, None);
    }
}
