use anyhow::Context;
use otelmap_core::model::service_map::MapAnalysis;
use otelmap_core::query::{ErrorResponse, SessionTokenResponse, StatusResponse};
use serde::de::DeserializeOwned;

const API_PREFIX: &str = "/api/v1";

/// Thin HTTP client for a running `otelmap run` API.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(addr: &str) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base)
    }

    pub async fn create_session(&self) -> anyhow::Result<SessionTokenResponse> {
        let resp = self
            .http
            .post(self.url("/session-token"))
            .send()
            .await
            .with_context(|| format!("connect otelmap api at {}", self.base))?;
        decode(resp).await
    }

    pub async fn service_map(
        &self,
        token: &str,
        start: Option<String>,
        end: Option<String>,
    ) -> anyhow::Result<MapAnalysis> {
        let mut query = Vec::new();
        if let Some(start) = start {
            query.push(("start", start));
        }
        if let Some(end) = end {
            query.push(("end", end));
        }
        let resp = self
            .http
            .get(self.url(&format!("/service-map/{token}")))
            .query(&query)
            .send()
            .await
            .with_context(|| format!("connect otelmap api at {}", self.base))?;
        decode(resp).await
    }

    pub async fn status(&self) -> anyhow::Result<StatusResponse> {
        let resp = self
            .http
            .get(self.url("/status"))
            .send()
            .await
            .with_context(|| format!("connect otelmap api at {}", self.base))?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.context("decode api response");
    }
    let message = resp
        .json::<ErrorResponse>()
        .await
        .map(|e| e.error)
        .unwrap_or_else(|_| "no error body".to_string());
    anyhow::bail!("api request failed with status {status}: {message}")
}
