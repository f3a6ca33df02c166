use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{FieldSyncError, Result};
use crate::models::Intent;

use super::Dispatcher;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Replays intents against the marketplace backend: each intent is POSTed as
/// JSON to `{endpoint}/intents/{name}`.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct IntentBody<'a> {
    name: &'a str,
    payload: &'a serde_json::Value,
    issued_at: String,
}

impl HttpDispatcher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(FieldSyncError::Validation(format!(
                "dispatch endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            bearer_token: None,
        })
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn url_for(&self, intent_name: &str) -> String {
        format!("{}/intents/{intent_name}", self.endpoint)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, intent: &Intent) -> Result<()> {
        let body = IntentBody {
            name: &intent.name,
            payload: &intent.payload,
            issued_at: intent.issued_at.to_rfc3339(),
        };
        let mut request = self.client.post(self.url_for(&intent.name)).json(&body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FieldSyncError::Dispatch(format!("{}: {err}", intent.name)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(FieldSyncError::Dispatch(format!(
            "{} rejected with HTTP {}: {}",
            intent.name,
            status.as_u16(),
            detail.trim()
        )))
    }
}
