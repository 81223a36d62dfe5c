//! Code-writing agent.
//!
//! The executor materializes code in one of two ways:
//! - **API mode**: call the model, parse delimited file blocks out of the
//!   response, write them under the work directory.
//! - **CLI mode**: spawn an external coding CLI that writes files itself.
//!
//! It also runs arbitrary shell commands (the test oracle) and carries the
//! consecutive-failure counter that drives the one-way API-to-CLI fallback.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::AgentEndpoint;
use crate::context::{ContextBuilder, TaskDomain};
use crate::llm::{AgentError, ChatClient, ChatMessage, ChatRequest, HttpChatClient};

/// Consecutive failed tests before the fallback gate opens.
pub const FALLBACK_THRESHOLD: u32 = 3;

/// Near-deterministic sampling for code output.
const EXECUTOR_TEMPERATURE: f64 = 0.1;
const EXECUTOR_MAX_TOKENS: u32 = 8192;

/// `--- FILE: path ---` delimited blocks, the primary output contract.
static FILE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)--- FILE: (.+?) ---\n(.*?)\n--- END FILE ---").expect("file block pattern")
});

/// Fenced blocks whose first line is a relative path with an extension.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?s)```([a-zA-Z0-9_/.\\-]+\\.[a-z]+)\n(.*?)\n```").expect("fenced block pattern")
});

/// How the executor writes code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Call the LLM API and write parsed file blocks to disk.
    Api,
    /// Spawn the coding CLI, which writes files directly.
    Cli,
}

impl ExecutorMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "api" => Some(ExecutorMode::Api),
            "cli" => Some(ExecutorMode::Cli),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutorMode::Api => "api",
            ExecutorMode::Cli => "cli",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The response matched neither file-block format. The raw response is
    /// kept for the task log.
    #[error("no file blocks found in response:\n{response}")]
    NoFileBlocks { response: String },

    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("coding CLI failed: {detail}")]
    Cli { detail: String },

    /// A shell command exited non-zero. Both streams are embedded because the
    /// debugger needs them.
    #[error("command exited with status {code}\nstdout: {stdout}\nstderr: {stderr}")]
    Command {
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// A parsed file block: relative path plus verbatim content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

/// Extract file blocks from a model response.
///
/// The fenced fallback is only consulted when the primary format yields
/// nothing, so mixed responses resolve in favour of the primary contract.
pub fn parse_file_blocks(response: &str) -> Vec<FileBlock> {
    let primary: Vec<FileBlock> = FILE_BLOCK
        .captures_iter(response)
        .map(|cap| FileBlock {
            path: cap[1].trim().to_string(),
            content: cap[2].to_string(),
        })
        .collect();
    if !primary.is_empty() {
        return primary;
    }

    FENCED_BLOCK
        .captures_iter(response)
        .map(|cap| FileBlock {
            path: cap[1].trim().to_string(),
            content: cap[2].to_string(),
        })
        .collect()
}

pub struct Executor {
    mode: ExecutorMode,
    work_dir: PathBuf,
    timeout: Duration,
    model: String,
    client: Arc<dyn ChatClient>,
    context: ContextBuilder,
    cli_program: String,

    consecutive_failures: u32,
    fallback_enabled: bool,
}

impl Executor {
    pub fn new(
        endpoint: &AgentEndpoint,
        mode: ExecutorMode,
        work_dir: impl Into<PathBuf>,
        fallback_enabled: bool,
    ) -> Self {
        let client = HttpChatClient::new(
            endpoint.api_url.clone(),
            endpoint.api_key.clone(),
            endpoint.timeout,
        );
        Self::with_client(
            Arc::new(client),
            endpoint.model.clone(),
            endpoint.timeout,
            mode,
            work_dir,
            fallback_enabled,
        )
    }

    /// Construct with an injected client (used by tests).
    pub fn with_client(
        client: Arc<dyn ChatClient>,
        model: impl Into<String>,
        timeout: Duration,
        mode: ExecutorMode,
        work_dir: impl Into<PathBuf>,
        fallback_enabled: bool,
    ) -> Self {
        let work_dir = work_dir.into();
        Self {
            mode,
            context: ContextBuilder::new(&work_dir),
            work_dir,
            timeout,
            model: model.into(),
            client,
            cli_program: "claude".to_string(),
            consecutive_failures: 0,
            fallback_enabled,
        }
    }

    /// Override the coding-CLI program (used by tests).
    pub fn with_cli_program(mut self, program: impl Into<String>) -> Self {
        self.cli_program = program.into();
        self
    }

    pub fn mode(&self) -> ExecutorMode {
        self.mode
    }

    /// Zero the failure counter. Called at task start and after every
    /// successful test.
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count one failed test. Returns true when the caller should switch to
    /// CLI mode: threshold reached, fallback enabled, still in API mode.
    pub fn increment_failures(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.fallback_enabled
            && self.consecutive_failures >= FALLBACK_THRESHOLD
            && self.mode == ExecutorMode::Api
    }

    /// One-way transition to CLI mode.
    pub fn switch_to_cli(&mut self) {
        tracing::info!(
            failures = self.consecutive_failures,
            "switching executor to CLI mode"
        );
        self.mode = ExecutorMode::Cli;
    }

    /// Materialize the changes described by `prompt`, in the current mode.
    pub async fn execute(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        match self.mode {
            ExecutorMode::Api => self.execute_api(prompt, cancel).await,
            ExecutorMode::Cli => self.execute_cli(prompt, cancel).await,
        }
    }

    async fn execute_api(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let system = match ContextBuilder::detect_domain(prompt) {
            TaskDomain::Backend => self.backend_system_prompt(),
            TaskDomain::Mobile => self.mobile_system_prompt(),
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            temperature: EXECUTOR_TEMPERATURE,
            max_tokens: EXECUTOR_MAX_TOKENS,
            response_format: None,
        };
        let response = self.client.chat(&request, cancel).await?;

        let blocks = parse_file_blocks(&response);
        if blocks.is_empty() {
            return Err(ExecError::NoFileBlocks { response });
        }
        let written = self.write_blocks(&blocks).await?;

        Ok(format!(
            "API response received ({} chars). Files written: {}",
            response.len(),
            written.join(", ")
        ))
    }

    /// Write parsed blocks under the work directory. Paths containing `..`
    /// are skipped; existing files are overwritten.
    async fn write_blocks(&self, blocks: &[FileBlock]) -> Result<Vec<String>, ExecError> {
        let mut written = Vec::new();

        for block in blocks {
            if block.path.contains("..") {
                tracing::warn!(path = %block.path, "skipping file block with parent traversal");
                continue;
            }

            let full_path = self.work_dir.join(&block.path);
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ExecError::WriteFile {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&full_path, &block.content)
                .await
                .map_err(|source| ExecError::WriteFile {
                    path: full_path.clone(),
                    source,
                })?;

            written.push(block.path.clone());
        }

        Ok(written)
    }

    async fn execute_cli(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let mut command = Command::new(&self.cli_program);
        command
            .arg("-p")
            .arg("--dangerously-skip-permissions")
            .arg(prompt)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = self.bounded_output(command, cancel).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ExecError::Cli {
                detail: format!(
                    "exit {}\nstdout: {stdout}\nstderr: {stderr}",
                    output.status.code().unwrap_or(-1)
                ),
            });
        }

        let mut result = stdout.trim().to_string();
        if !stderr.is_empty() {
            result.push_str("\n--- stderr ---\n");
            result.push_str(&stderr);
        }
        Ok(result)
    }

    /// Run a shell command in the work directory, bounded by the executor
    /// timeout and the cancellation token. Returns trimmed stdout.
    pub async fn run_shell(
        &self,
        command_line: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(command_line)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = self.bounded_output(command, cancel).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            return Err(ExecError::Command {
                code: output.status.code().unwrap_or(-1),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(stdout.trim().to_string())
    }

    async fn bounded_output(
        &self,
        mut command: Command,
        cancel: &CancellationToken,
    ) -> Result<std::process::Output, ExecError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            result = tokio::time::timeout(self.timeout, command.output()) => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(source)) => Err(ExecError::Spawn(source)),
                Err(_) => Err(ExecError::Timeout(self.timeout)),
            },
        }
    }

    fn backend_system_prompt(&self) -> String {
        format!(
            "You are an expert Go backend engineer specializing in Go-Fiber and GORM.\n\n\
             {}\n\
             === OUTPUT FORMAT ===\n\
             For each file you create or modify, use this EXACT format:\n\n\
             --- FILE: path/to/file.go ---\n\
             package example\n\n\
             // file contents here\n\
             --- END FILE ---\n\n\
             === CRITICAL RULES ===\n\
             1. COPY the import patterns EXACTLY from the sample files above - do NOT modify import paths\n\
             2. Use relative paths from project root (e.g., backend/internal/models/user.go)\n\
             3. Include COMPLETE file contents - no placeholders, no \"...\", no abbreviated code\n\
             4. Match the EXACT coding style from the sample files\n\
             5. When modifying routes.go: add new routes, do NOT change existing structure\n\
             6. DO NOT use chi, gorilla/mux, sqlx, or any framework not shown in samples\n\
             7. Output ONLY file blocks and brief explanations - no markdown code fences",
            self.context.backend_preamble()
        )
    }

    fn mobile_system_prompt(&self) -> String {
        format!(
            "You are an expert React Native / Expo developer specializing in TypeScript and NativeWind.\n\n\
             {}\n\
             === OUTPUT FORMAT ===\n\
             For each file you create or modify, use this EXACT format:\n\n\
             --- FILE: path/to/file.tsx ---\n\
             import React from 'react';\n\
             // file contents here\n\
             --- END FILE ---\n\n\
             === CRITICAL RULES ===\n\
             1. Use ONLY packages listed in the INSTALLED PACKAGES section above\n\
             2. Use useState/useEffect for state management (NOT react-query)\n\
             3. Use relative paths from project root (e.g., mobile/app/(protected)/pets/index.tsx)\n\
             4. Include COMPLETE file contents - no placeholders, no \"...\", no abbreviated code\n\
             5. Use className for NativeWind styling (NOT StyleSheet.create)\n\
             6. Import haptics from lib/haptics.ts using the EXACT function names shown above\n\
             7. Use the api client from lib/api.ts for API calls (axios-based)\n\
             8. Follow Expo Router file-based routing conventions\n\
             9. Every component must be a default export",
            self.context.mobile_preamble()
        )
    }
}
