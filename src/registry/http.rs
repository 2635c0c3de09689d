//! reqwest-backed registry API

use super::api::RegistryApi;
use super::types::{
    Ack, ConsentDecision, InboundMessage, MessageBatch, OutgoingMessage, PresenceList,
    PresenceRecord, PresenceUpdate, RegisterResponse,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;

/// HTTP client for the AIRC registry
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    /// Create a registry client rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a registry client reusing an existing reqwest client
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Decode a registry reply body.
///
/// Error statuses still carry a `{success:false, ...}` body worth reading,
/// so the status only matters when the body does not parse.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        if status.is_success() {
            Error::Registry(format!("Malformed registry response: {}", e))
        } else {
            Error::Registry(format!("Registry returned {}", status))
        }
    })
}

#[async_trait]
impl RegistryApi for HttpRegistry {
    async fn register(&self, update: &PresenceUpdate) -> Result<RegisterResponse> {
        let response = self
            .client
            .post(self.url("/presence"))
            .json(update)
            .send()
            .await?;
        read_json(response).await
    }

    async fn heartbeat(&self, token: &str, update: &PresenceUpdate) -> Result<Ack> {
        let response = self
            .client
            .post(self.url("/presence"))
            .bearer_auth(token)
            .json(update)
            .send()
            .await?;
        read_json(response).await
    }

    async fn fetch_messages(
        &self,
        token: &str,
        user: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>> {
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let response = self
            .client
            .get(self.url("/messages"))
            .bearer_auth(token)
            .query(&[("user", user), ("since", since.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "Message fetch failed with status {}",
                response.status()
            )));
        }

        let batch: MessageBatch = read_json(response).await?;
        Ok(batch.into_messages())
    }

    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> Result<Ack> {
        let response = self
            .client
            .post(self.url("/messages"))
            .bearer_auth(token)
            .json(message)
            .send()
            .await?;
        read_json(response).await
    }

    async fn list_presence(&self) -> Result<Vec<PresenceRecord>> {
        let response = self.client.get(self.url("/presence")).send().await?;
        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "Presence fetch failed with status {}",
                response.status()
            )));
        }
        let list: PresenceList = read_json(response).await?;
        Ok(list.active)
    }

    async fn post_consent(&self, token: &str, decision: &ConsentDecision) -> Result<Ack> {
        let response = self
            .client
            .post(self.url("/consent"))
            .bearer_auth(token)
            .json(decision)
            .send()
            .await?;
        read_json(response).await
    }
}
