//! Shared HTTP plumbing for API-key authenticated services.

use super::ServiceKind;
use crate::error::{ArrboardError, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = concat!("arrboard/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a service expects its API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    Header(&'static str),
    Query(&'static str),
}

pub fn build_client(cookies: bool) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .cookie_store(cookies)
        .build()?;
    Ok(client)
}

pub fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    service: ServiceKind,
    base_url: String,
    api_key: String,
    placement: KeyPlacement,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(
        service: ServiceKind,
        base_url: &str,
        api_key: &str,
        placement: KeyPlacement,
    ) -> Result<Self> {
        Ok(Self {
            service,
            base_url: trim_base(base_url),
            api_key: api_key.to_string(),
            placement,
            http: build_client(false)?,
        })
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(service = %self.service, %method, %url, "Upstream request");
        let builder = self.http.request(method, url);
        match self.placement {
            KeyPlacement::Header(name) => builder.header(name, &self.api_key),
            KeyPlacement::Query(name) => builder.query(&[(name, self.api_key.as_str())]),
        }
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ArrboardError::upstream(self.service, format!("{}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(ArrboardError::upstream(
                self.service,
                format!("{} returned {}: {}", path, status, body),
            ));
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response, path: &str) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            ArrboardError::upstream(self.service, format!("{}: invalid response: {}", path, e))
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let builder = self.request(Method::GET, path).query(query);
        let response = self.send(builder, path).await?;
        self.decode(response, path).await
    }

    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let builder = self.request(method, path).json(body);
        let response = self.send(builder, path).await?;
        self.decode(response, path).await
    }

    /// Send a request whose response body is irrelevant.
    pub async fn send_empty<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<()> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder, path).await?;
        Ok(())
    }
}
