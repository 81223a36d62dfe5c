//! Git publishing and Coolify deployment.
//!
//! The terminal stage for deployment-flagged tasks: make sure the work
//! directory is a git repository, create the private GitHub remote, commit
//! and push, then create and trigger a Coolify application. Each step is
//! idempotent where the remote API allows (an already-existing repository is
//! success, a clean tree skips the commit).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::DeploySettings;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("git {command} failed: {detail}")]
    Git { command: String, detail: String },

    #[error("GitHub API returned {status}: {body}")]
    GitHub { status: u16, body: String },

    #[error("deploy API returned {status}: {body}")]
    Platform { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {}s", HTTP_TIMEOUT.as_secs())]
    TimedOut,

    #[error("{0} not configured")]
    MissingCredentials(&'static str),

    #[error("failed to run git: {0}")]
    Spawn(std::io::Error),

    #[error("malformed deploy response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

/// Runs the publish-and-deploy pipeline against one work directory.
pub struct Deployer {
    work_dir: PathBuf,
    settings: DeploySettings,
    http: reqwest::Client,
}

impl Deployer {
    pub fn new(settings: &DeploySettings, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            settings: settings.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// The full fixed sequence: init, remote repo, remote URL, commit, push,
    /// and (when a token is configured) the Coolify application.
    pub async fn full_deploy(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        self.ensure_repo(cancel).await?;
        self.create_remote_repo(description, cancel).await?;
        self.setup_remote(cancel).await?;

        let message = format!(
            "chore: Autonomous build complete\n\nGenerated by orchestrator on {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.commit_all(&message, cancel).await?;
        self.push(cancel).await?;

        if !self.settings.coolify_token.is_empty() {
            self.deploy_platform(cancel).await?;
        }

        tracing::info!("full deployment completed");
        Ok(())
    }

    /// Initialize a git repository unless one already exists.
    async fn ensure_repo(&self, cancel: &CancellationToken) -> Result<(), DeployError> {
        if self.git(&["rev-parse", "--git-dir"], cancel).await.is_err() {
            tracing::info!("initializing git repository");
            self.git(&["init"], cancel).await?;
        }
        Ok(())
    }

    /// Create the private remote repository. HTTP 422 means it already
    /// exists, which is success here.
    async fn create_remote_repo(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let s = &self.settings;
        if s.github_pat.is_empty() || s.github_owner.is_empty() || s.github_repo.is_empty() {
            return Err(DeployError::MissingCredentials("GitHub credentials"));
        }

        tracing::info!(owner = %s.github_owner, repo = %s.github_repo, "creating remote repository");
        let request = self
            .http
            .post("https://api.github.com/user/repos")
            .bearer_auth(&s.github_pat)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({
                "name": s.github_repo,
                "description": description,
                "private": true,
                "auto_init": false,
            }));
        let (status, body) = self.send(request, cancel).await?;

        match status {
            422 => {
                tracing::info!("repository already exists");
                Ok(())
            }
            201 => Ok(()),
            _ => Err(DeployError::GitHub { status, body }),
        }
    }

    /// Point `origin` at the token-embedded HTTPS URL, adding or updating.
    async fn setup_remote(&self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let s = &self.settings;
        let remote_url = format!(
            "https://{}@github.com/{}/{}.git",
            s.github_pat, s.github_owner, s.github_repo
        );

        if self
            .git(&["remote", "get-url", "origin"], cancel)
            .await
            .is_err()
        {
            self.git(&["remote", "add", "origin", &remote_url], cancel)
                .await?;
            tracing::info!("remote 'origin' added");
        } else {
            self.git(&["remote", "set-url", "origin", &remote_url], cancel)
                .await?;
            tracing::info!("remote 'origin' updated");
        }
        Ok(())
    }

    /// Stage everything; commit unless the tree is clean.
    async fn commit_all(
        &self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        self.git(&["add", "-A"], cancel).await?;

        let status = self.git(&["status", "--porcelain"], cancel).await?;
        if status.trim().is_empty() {
            tracing::info!("no changes to commit");
            return Ok(());
        }

        self.git(&["commit", "-m", message], cancel).await?;
        tracing::info!("changes committed");
        Ok(())
    }

    /// Push upstream. The default-branch name is unknown, so try the two
    /// common ones in order.
    async fn push(&self, cancel: &CancellationToken) -> Result<(), DeployError> {
        tracing::info!("pushing to remote");
        if self
            .git(&["push", "-u", "origin", "main"], cancel)
            .await
            .is_ok()
        {
            return Ok(());
        }
        self.git(&["push", "-u", "origin", "master"], cancel)
            .await
            .map(|_| ())
    }

    /// Create the Coolify application, populate env vars, trigger a deploy.
    async fn deploy_platform(&self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let s = &self.settings;
        if s.coolify_url.is_empty() {
            return Err(DeployError::MissingCredentials("Coolify URL"));
        }

        let app_uuid = self.create_application(cancel).await?;
        self.push_env_vars(&app_uuid, cancel).await;

        tracing::info!("triggering deployment");
        let request = self
            .http
            .post(format!("{}/api/v1/deploy", s.coolify_url))
            .bearer_auth(&s.coolify_token)
            .json(&json!({ "uuid": app_uuid, "force": true }));
        let (status, body) = self.send(request, cancel).await?;
        if status != 200 {
            return Err(DeployError::Platform { status, body });
        }

        tracing::info!(app = %app_uuid, "deployment triggered");
        Ok(())
    }

    async fn create_application(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let s = &self.settings;
        tracing::info!("creating application");

        let request = self
            .http
            .post(format!("{}/api/v1/applications/public", s.coolify_url))
            .bearer_auth(&s.coolify_token)
            .json(&application_descriptor(s));
        let (status, body) = self.send(request, cancel).await?;
        if status != 200 && status != 201 {
            return Err(DeployError::Platform { status, body });
        }

        #[derive(Deserialize)]
        struct Created {
            uuid: String,
        }
        let created: Created = serde_json::from_str(&body)?;
        tracing::info!(app = %created.uuid, "application created");
        Ok(created.uuid)
    }

    /// POST the fixed env-var set one key at a time. Individual failures are
    /// logged and swallowed; the deploy proceeds without them.
    async fn push_env_vars(&self, app_uuid: &str, cancel: &CancellationToken) {
        let s = &self.settings;
        let url = format!("{}/api/v1/applications/{}/envs", s.coolify_url, app_uuid);

        for (key, value) in default_env_vars(&s.github_repo) {
            let request = self
                .http
                .post(&url)
                .bearer_auth(&s.coolify_token)
                .json(&json!({ "key": key, "value": value, "is_preview": false }));
            if let Err(err) = self.send(request, cancel).await {
                tracing::warn!(key, "env var POST failed: {err}");
            }
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<(u16, String), DeployError> {
        let send = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, DeployError>((status, body))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(DeployError::Cancelled),
            result = tokio::time::timeout(HTTP_TIMEOUT, send) => match result {
                Ok(inner) => inner,
                Err(_) => Err(DeployError::TimedOut),
            },
        }
    }

    async fn git(&self, args: &[&str], cancel: &CancellationToken) -> Result<String, DeployError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            result = command.output() => result.map_err(DeployError::Spawn)?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(DeployError::Git {
                command: args.join(" "),
                detail,
            });
        }
        Ok(stdout)
    }
}

/// The fixed application descriptor POSTed to the deploy platform.
fn application_descriptor(settings: &DeploySettings) -> serde_json::Value {
    json!({
        "project_uuid": settings.coolify_project,
        "server_uuid": settings.coolify_server,
        "environment_name": "production",
        "git_repository": format!("{}/{}", settings.github_owner, settings.github_repo),
        "git_branch": "main",
        "build_pack": "dockerfile",
        "ports_exposes": "8080",
        "ports_mappings": ["8081:8080"],
        "base_directory": "/backend",
        "dockerfile_location": "/Dockerfile",
        "name": settings.github_repo,
    })
}

/// Baseline env vars for the generated backend.
fn default_env_vars(repo: &str) -> Vec<(&'static str, String)> {
    vec![
        ("DB_HOST", "postgres".to_string()),
        ("DB_PORT", "5432".to_string()),
        ("DB_NAME", repo.to_string()),
        ("DB_USER", "postgres".to_string()),
        ("DB_PASSWORD", "postgres".to_string()),
        ("JWT_SECRET", "change-me-32-chars-minimum-secret".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DeploySettings {
        DeploySettings {
            enabled: true,
            coolify_url: "http://coolify.internal:8000".to_string(),
            coolify_token: "tok".to_string(),
            coolify_server: "srv-uuid".to_string(),
            coolify_project: "proj-uuid".to_string(),
            coolify_env: "env-uuid".to_string(),
            github_pat: "pat".to_string(),
            github_owner: "acme".to_string(),
            github_repo: "petstack".to_string(),
        }
    }

    #[test]
    fn descriptor_matches_the_platform_contract() {
        let descriptor = application_descriptor(&settings());
        assert_eq!(descriptor["project_uuid"], "proj-uuid");
        assert_eq!(descriptor["server_uuid"], "srv-uuid");
        assert_eq!(descriptor["environment_name"], "production");
        assert_eq!(descriptor["git_repository"], "acme/petstack");
        assert_eq!(descriptor["git_branch"], "main");
        assert_eq!(descriptor["build_pack"], "dockerfile");
        assert_eq!(descriptor["ports_exposes"], "8080");
        assert_eq!(descriptor["ports_mappings"][0], "8081:8080");
        assert_eq!(descriptor["base_directory"], "/backend");
        assert_eq!(descriptor["dockerfile_location"], "/Dockerfile");
        assert_eq!(descriptor["name"], "petstack");
    }

    #[test]
    fn env_var_set_is_derived_from_the_repo_name() {
        let vars = default_env_vars("petstack");
        assert!(vars.contains(&("DB_NAME", "petstack".to_string())));
        assert!(vars.iter().any(|(k, _)| *k == "JWT_SECRET"));
        assert_eq!(vars.len(), 6);
    }

    #[tokio::test]
    async fn missing_github_credentials_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(&DeploySettings::default(), dir.path());
        let cancel = CancellationToken::new();

        let err = deployer
            .create_remote_repo("desc", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn ensure_repo_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(&settings(), dir.path());
        let cancel = CancellationToken::new();

        deployer.ensure_repo(&cancel).await.unwrap();
        assert!(dir.path().join(".git").is_dir());
        deployer.ensure_repo(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn commit_all_skips_a_clean_tree() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(&settings(), dir.path());
        let cancel = CancellationToken::new();

        deployer.ensure_repo(&cancel).await.unwrap();
        deployer
            .git(&["config", "user.email", "orchestrator@example.com"], &cancel)
            .await
            .unwrap();
        deployer
            .git(&["config", "user.name", "orchestrator"], &cancel)
            .await
            .unwrap();

        std::fs::write(dir.path().join("README.md"), "generated").unwrap();
        deployer.commit_all("first", &cancel).await.unwrap();
        // Second run sees a clean tree and commits nothing.
        deployer.commit_all("second", &cancel).await.unwrap();

        let log = deployer.git(&["log", "--oneline"], &cancel).await.unwrap();
        assert_eq!(log.trim().lines().count(), 1);
    }

    #[tokio::test]
    async fn git_errors_carry_the_command_and_detail() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(&settings(), dir.path());
        let cancel = CancellationToken::new();

        let err = deployer
            .git(&["rev-parse", "--git-dir"], &cancel)
            .await
            .unwrap_err();
        match err {
            DeployError::Git { command, detail } => {
                assert_eq!(command, "rev-parse --git-dir");
                assert!(!detail.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_git_calls() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(&settings(), dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = deployer.git(&["status"], &cancel).await.unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
    }
}
