//! Planning agent.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AgentEndpoint;
use crate::llm::{AgentError, ChatClient, ChatMessage, ChatRequest, HttpChatClient};

/// Exploratory sampling: plans benefit from breadth.
const PLANNER_TEMPERATURE: f64 = 0.7;
const PLANNER_MAX_TOKENS: u32 = 4096;

/// Produces a step-by-step implementation plan for a task.
///
/// The plan is free text, consumed verbatim by the executor prompt; no
/// structured parsing happens here.
pub struct Planner {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl Planner {
    pub fn new(endpoint: &AgentEndpoint) -> Self {
        let client = HttpChatClient::new(
            endpoint.api_url.clone(),
            endpoint.api_key.clone(),
            endpoint.timeout,
        );
        Self::with_client(Arc::new(client), endpoint.model.clone())
    }

    /// Construct with an injected client (used by tests).
    pub fn with_client(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Generate a plan from the given prompt.
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: PLANNER_TEMPERATURE,
            max_tokens: PLANNER_MAX_TOKENS,
            response_format: None,
        };
        self.client.chat(&request, cancel).await
    }
}
