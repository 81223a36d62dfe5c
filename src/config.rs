//! Configuration management for the orchestrator.
//!
//! Everything is loaded from environment variables at startup:
//! - `ENGINE_API_KEY` - Required. Key for the planning agent's endpoint.
//! - `ENGINE_API_URL`, `ENGINE_MODEL`, `ENGINE_TIMEOUT` - Planner endpoint,
//!   model and timeout in seconds (default 300).
//! - `EXECUTIONER_API_KEY`, `EXECUTIONER_API_URL`, `EXECUTIONER_MODEL`,
//!   `EXECUTIONER_TIMEOUT` - Executor endpoint (default timeout 600). The
//!   executor timeout also bounds every shell invocation.
//! - `EXECUTIONER_MODE` - `api` or `cli` (default `api`).
//! - `EXECUTIONER_FALLBACK_CLI` - Enable the one-way CLI fallback after
//!   repeated failures (default `true`).
//! - `DEBUGGER_API_KEY`, `DEBUGGER_API_URL`, `DEBUGGER_MODEL`,
//!   `DEBUGGER_TIMEOUT` - Debugger endpoint (default timeout 180).
//! - `PROJECT_ROOT`, `TASK_FILE`, `LOG_DIR` - Paths. `LOG_DIR` unset means
//!   task logs go to stdout only.
//! - `MAX_RETRIES` - Test attempts per task (default 5).
//! - `AUTO_COMMIT`, `GIT_PUSH` - Git behaviour after a successful task.
//! - `COOLIFY_ENABLED`, `COOLIFY_URL`, `COOLIFY_TOKEN`, `COOLIFY_SERVER`,
//!   `COOLIFY_PROJECT`, `COOLIFY_ENV` - Deploy platform.
//! - `GITHUB_PAT`, `GITHUB_OWNER`, `GITHUB_REPO_NAME` - Remote repository.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agents::ExecutorMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Endpoint settings for one agent: where to call, how to authenticate,
/// which model, and how long to wait.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Git remote and deploy-platform settings.
#[derive(Debug, Clone, Default)]
pub struct DeploySettings {
    pub enabled: bool,

    pub coolify_url: String,
    pub coolify_token: String,
    pub coolify_server: String,
    pub coolify_project: String,
    pub coolify_env: String,

    pub github_pat: String,
    pub github_owner: String,
    pub github_repo: String,
}

/// Process-wide configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Planning agent. A reasoning-tuned model pays off here.
    pub engine: AgentEndpoint,

    /// Code-writing agent.
    pub executioner: AgentEndpoint,
    pub executioner_mode: ExecutorMode,
    pub executioner_fallback_cli: bool,

    /// Failure-analysis agent.
    pub debugger: AgentEndpoint,

    /// Root of the project tree being generated.
    pub project_root: PathBuf,
    /// Task list document.
    pub task_file: PathBuf,
    /// Directory for per-task log files; `None` disables file logging.
    pub log_dir: Option<PathBuf>,

    /// Test attempts per task before giving up.
    pub max_retries: u32,
    /// Default verification command for backend work.
    pub test_command_backend: String,
    /// Default verification command for mobile work.
    pub test_command_mobile: String,

    /// Commit after every successful task.
    pub auto_commit: bool,
    /// Push once all tasks are processed.
    pub git_push: bool,

    pub deploy: DeploySettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `ENGINE_API_KEY` is not set,
    /// or `ConfigError::InvalidValue` for unparseable numeric or mode values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let engine_api_key = std::env::var("ENGINE_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ENGINE_API_KEY".to_string()))?;

        let engine = AgentEndpoint {
            api_key: engine_api_key,
            api_url: env_or(
                "ENGINE_API_URL",
                "https://api.deepseek.com/v1/chat/completions",
            ),
            model: env_or("ENGINE_MODEL", "deepseek-reasoner"),
            timeout: env_duration_secs("ENGINE_TIMEOUT", 300)?,
        };

        let executioner = AgentEndpoint {
            api_key: env_or("EXECUTIONER_API_KEY", ""),
            api_url: env_or(
                "EXECUTIONER_API_URL",
                "https://api.z.ai/api/paas/v4/chat/completions",
            ),
            model: env_or("EXECUTIONER_MODEL", "glm-4.7"),
            timeout: env_duration_secs("EXECUTIONER_TIMEOUT", 600)?,
        };

        let mode_raw = env_or("EXECUTIONER_MODE", "api");
        let executioner_mode = ExecutorMode::parse(&mode_raw)
            .ok_or_else(|| ConfigError::InvalidValue("EXECUTIONER_MODE".to_string(), mode_raw))?;

        let debugger = AgentEndpoint {
            api_key: env_or("DEBUGGER_API_KEY", ""),
            api_url: env_or(
                "DEBUGGER_API_URL",
                "https://api.z.ai/api/paas/v4/chat/completions",
            ),
            model: env_or("DEBUGGER_MODEL", "glm-4.7"),
            timeout: env_duration_secs("DEBUGGER_TIMEOUT", 180)?,
        };

        let deploy = DeploySettings {
            enabled: env_bool("COOLIFY_ENABLED", false),
            coolify_url: env_or("COOLIFY_URL", ""),
            coolify_token: env_or("COOLIFY_TOKEN", ""),
            coolify_server: env_or("COOLIFY_SERVER", ""),
            coolify_project: env_or("COOLIFY_PROJECT", ""),
            coolify_env: env_or("COOLIFY_ENV", ""),
            github_pat: env_or("GITHUB_PAT", ""),
            github_owner: env_or("GITHUB_OWNER", ""),
            github_repo: env_or("GITHUB_REPO_NAME", ""),
        };

        Ok(Self {
            engine,
            executioner,
            executioner_mode,
            executioner_fallback_cli: env_bool("EXECUTIONER_FALLBACK_CLI", true),
            debugger,
            project_root: PathBuf::from(env_or("PROJECT_ROOT", "..")),
            task_file: PathBuf::from(env_or("TASK_FILE", "../task_list.json")),
            log_dir: std::env::var("LOG_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            max_retries: env_u32("MAX_RETRIES", 5)?,
            test_command_backend: "cd backend && go build ./...".to_string(),
            test_command_mobile: "cd mobile && npx tsc --noEmit".to_string(),
            auto_commit: env_bool("AUTO_COMMIT", false),
            git_push: env_bool("GIT_PUSH", false),
            deploy,
        })
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

fn env_duration_secs(key: &str, fallback_secs: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => {
            let secs: u64 = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string(), value))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Ok(Duration::from_secs(fallback_secs)),
    }
}

fn env_u32(key: &str, fallback: u32) -> Result<u32, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), value)),
        _ => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that
    // touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_orchestrator_env() {
        for key in [
            "ENGINE_API_KEY",
            "ENGINE_API_URL",
            "ENGINE_MODEL",
            "ENGINE_TIMEOUT",
            "EXECUTIONER_MODE",
            "EXECUTIONER_TIMEOUT",
            "EXECUTIONER_FALLBACK_CLI",
            "DEBUGGER_TIMEOUT",
            "MAX_RETRIES",
            "LOG_DIR",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_engine_key_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_orchestrator_env();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "ENGINE_API_KEY"));
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_orchestrator_env();
        std::env::set_var("ENGINE_API_KEY", "k");

        let config = Config::from_env().unwrap();
        assert_eq!(config.engine.timeout, Duration::from_secs(300));
        assert_eq!(config.executioner.timeout, Duration::from_secs(600));
        assert_eq!(config.debugger.timeout, Duration::from_secs(180));
        assert_eq!(config.executioner_mode, ExecutorMode::Api);
        assert!(config.executioner_fallback_cli);
        assert_eq!(config.max_retries, 5);
        assert!(config.log_dir.is_none());

        std::env::remove_var("ENGINE_API_KEY");
    }

    #[test]
    fn invalid_numeric_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_orchestrator_env();
        std::env::set_var("ENGINE_API_KEY", "k");
        std::env::set_var("MAX_RETRIES", "not-a-number");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "MAX_RETRIES"));

        std::env::remove_var("ENGINE_API_KEY");
        std::env::remove_var("MAX_RETRIES");
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_orchestrator_env();
        std::env::set_var("ENGINE_API_KEY", "k");
        std::env::set_var("EXECUTIONER_MODE", "serverless");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "EXECUTIONER_MODE"));

        std::env::remove_var("ENGINE_API_KEY");
        std::env::remove_var("EXECUTIONER_MODE");
    }
}
