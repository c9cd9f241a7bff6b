use super::http::{ApiClient, KeyPlacement};
use super::ServiceKind;
use crate::error::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserPolicy {
    #[serde(default)]
    pub is_administrator: bool,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JellyfinUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub policy: UserPolicy,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ItemCounts {
    #[serde(default)]
    pub movie_count: i64,
    #[serde(default)]
    pub series_count: i64,
    #[serde(default)]
    pub episode_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemInfo {
    #[serde(default)]
    version: Option<String>,
}

/// Jellyfin client, authenticated with an API token header.
#[derive(Debug, Clone)]
pub struct JellyfinClient {
    api: ApiClient,
}

impl JellyfinClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                ServiceKind::Jellyfin,
                base_url,
                api_key,
                KeyPlacement::Header("X-Emby-Token"),
            )?,
        })
    }

    pub async fn version(&self) -> Result<Option<String>> {
        let info: SystemInfo = self.api.get_json("/System/Info", &[]).await?;
        Ok(info.version)
    }

    pub async fn users(&self) -> Result<Vec<JellyfinUser>> {
        self.api.get_json("/Users", &[]).await
    }

    pub async fn item_counts(&self) -> Result<ItemCounts> {
        self.api.get_json("/Items/Counts", &[]).await
    }
}
