//! Scripted chat client shared by agent and loop tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::{AgentError, ChatClient, ChatRequest};

/// A canned reply for one chat call.
pub enum ScriptedReply {
    Ok(String),
    Err(AgentError),
}

/// Chat client that replays a fixed script and records every request.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Shorthand for a script of successful replies.
    pub fn ok(replies: Vec<&str>) -> Arc<Self> {
        Self::new(
            replies
                .into_iter()
                .map(|r| ScriptedReply::Ok(r.to_string()))
                .collect(),
        )
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat(
        &self,
        request: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(ScriptedReply::Ok(text)) => Ok(text),
            Some(ScriptedReply::Err(err)) => Err(err),
            None => Err(AgentError::NoChoices),
        }
    }
}
