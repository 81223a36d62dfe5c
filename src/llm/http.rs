//! HTTP chat-completion client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::{AgentError, ChatClient, ChatRequest, ChatResponse};

/// Bearer-authenticated client for an OpenAI-compatible chat endpoint.
///
/// One instance per agent: each carries its own endpoint, key and deadline.
pub struct HttpChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpChatClient {
    /// Create a new client for `endpoint` with the given bearer key and
    /// per-request timeout.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, AgentError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "chat endpoint returned an error");
            return Err(AgentError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        if let Some(err) = parsed.error {
            return Err(AgentError::Endpoint {
                status: status.as_u16(),
                body: err.message,
            });
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(AgentError::NoChoices)?;
        Ok(choice.message.content)
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        tracing::debug!(model = %request.model, endpoint = %self.endpoint, "sending chat completion");

        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.send(request)) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AgentError::Timeout(self.timeout)),
            },
        }
    }
}
