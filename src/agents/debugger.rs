//! Failure-analysis agent.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AgentEndpoint;
use crate::context::ContextBuilder;
use crate::llm::{
    AgentError, ChatClient, ChatMessage, ChatRequest, HttpChatClient, ResponseFormat,
};

/// Deterministic sampling for analysis.
const DEBUGGER_TEMPERATURE: f64 = 0.0;
const DEBUGGER_MAX_TOKENS: u32 = 2048;

/// Category of fix suggested by the debugger. Advisory only; the fix content
/// is re-applied through the executor either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    CodePatch,
    Command,
    ConfigChange,
}

/// Structured result of a debugging call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugReport {
    pub analysis: String,
    pub fix_type: FixType,
    pub fix_content: String,
}

#[derive(Debug, Error)]
pub enum DebugError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The model answered with something other than the required JSON object.
    #[error("debugger returned invalid JSON: {source}\nraw output:\n{raw}")]
    InvalidJson {
        raw: String,
        source: serde_json::Error,
    },
}

/// Analyzes failed test transcripts and produces structured fixes.
pub struct Debugger {
    client: Arc<dyn ChatClient>,
    model: String,
    context: ContextBuilder,
}

impl Debugger {
    pub fn new(endpoint: &AgentEndpoint, work_dir: impl Into<PathBuf>) -> Self {
        let client = HttpChatClient::new(
            endpoint.api_url.clone(),
            endpoint.api_key.clone(),
            endpoint.timeout,
        );
        Self::with_client(Arc::new(client), endpoint.model.clone(), work_dir)
    }

    /// Construct with an injected client (used by tests).
    pub fn with_client(
        client: Arc<dyn ChatClient>,
        model: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            context: ContextBuilder::new(work_dir.into()),
        }
    }

    /// Analyze a failure transcript and return the suggested fix.
    pub async fn analyze(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<DebugReport, DebugError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(self.system_prompt()),
                ChatMessage::user(prompt),
            ],
            temperature: DEBUGGER_TEMPERATURE,
            max_tokens: DEBUGGER_MAX_TOKENS,
            response_format: Some(ResponseFormat::json_object()),
        };
        let raw = self.client.chat(&request, cancel).await?;
        parse_report(&raw)
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an expert debugger. Analyze the error log and source code provided.\n\n\
             {}\n\
             IMPORTANT: When suggesting fixes, you MUST follow the EXACT patterns from the codebase context above.\n\
             - Use the EXACT import paths shown (e.g., the module path from go.mod)\n\
             - Use the EXACT function signatures and patterns from sample files\n\
             - Do NOT introduce new frameworks or patterns not in the codebase\n\n\
             Output a JSON object with exactly these fields:\n\
             {{\n\
             \x20 \"analysis\": \"Brief description of the root cause\",\n\
             \x20 \"fix_type\": \"code_patch\" | \"command\" | \"config_change\",\n\
             \x20 \"fix_content\": \"The exact fix to apply (code diff, command to run, or config to change)\"\n\
             }}\n\
             Only output valid JSON. No additional text.",
            self.context.debug_preamble()
        )
    }
}

/// Parse the debugger's strict-JSON contract.
fn parse_report(raw: &str) -> Result<DebugReport, DebugError> {
    serde_json::from_str(raw.trim()).map_err(|source| DebugError::InvalidJson {
        raw: raw.to_string(),
        source,
    })
}
