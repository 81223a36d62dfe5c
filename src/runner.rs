//! Top-level run modes.
//!
//! Single mode drives one task by id; continuous mode drains the pending
//! queue until nothing is left. Both route deployment-flagged tasks to the
//! deploy pipeline instead of the agent loop, and both surface cancellation
//! as a task failure rather than a crash.

use std::time::Instant;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentSet;
use crate::config::DeploySettings;
use crate::deploy::Deployer;
use crate::driver::{format_duration, run_task, LoopSettings};
use crate::task::{Task, TaskStatus, TaskStore};

pub struct Runner {
    store: TaskStore,
    agents: AgentSet,
    settings: LoopSettings,
    deploy: DeploySettings,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        store: TaskStore,
        agents: AgentSet,
        settings: LoopSettings,
        deploy: DeploySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            agents,
            settings,
            deploy,
            cancel,
        }
    }

    /// Process pending tasks until the list is drained or cancellation hits.
    pub async fn run_continuous(&mut self) -> anyhow::Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("cancellation requested, stopping");
                return Ok(());
            }

            let Some(task) = self
                .store
                .next_pending()
                .await
                .context("select next pending task")?
            else {
                tracing::info!("no pending tasks, exiting");
                return Ok(());
            };

            tracing::info!(id = %task.id, title = %task.title, "picked task");
            self.process(task).await?;
        }
    }

    /// Run exactly one task by id. A missing id is a fatal error.
    pub async fn run_single(&mut self, task_id: &str) -> anyhow::Result<()> {
        let list = self.store.load().await.context("load task list")?;
        let Some(task) = list.tasks.into_iter().find(|t| t.id == task_id) else {
            anyhow::bail!("task {task_id} not found");
        };

        let failed = {
            let id = task.id.clone();
            self.process(task).await?;
            let list = self.store.load().await?;
            list.tasks
                .into_iter()
                .find(|t| t.id == id)
                .is_some_and(|t| t.status == TaskStatus::Failed)
        };
        if failed {
            anyhow::bail!("task {task_id} failed");
        }
        Ok(())
    }

    /// Mark a task in-progress, dispatch it, and persist the outcome.
    /// Store failures are fatal; task failures are recorded and absorbed.
    async fn process(&mut self, mut task: Task) -> anyhow::Result<()> {
        self.store
            .update_status(&task.id, TaskStatus::InProgress)
            .await?;

        let outcome = if task.is_deployment {
            self.run_deployment(&mut task).await
        } else {
            run_task(&mut task, &mut self.agents, &self.settings, &self.cancel)
                .await
                .map_err(anyhow::Error::from)
        };

        self.store
            .record_outcome(&task.id, task.attempts, &task.duration)
            .await?;

        match outcome {
            Ok(()) => {
                self.store
                    .update_status(&task.id, TaskStatus::Completed)
                    .await?;
                tracing::info!(
                    id = %task.id,
                    attempts = task.attempts,
                    duration = %task.duration,
                    "task completed"
                );
            }
            Err(err) => {
                tracing::error!(id = %task.id, "task failed: {err:#}");
                self.store.set_error(&task.id, &format!("{err:#}")).await?;
            }
        }
        Ok(())
    }

    async fn run_deployment(&self, task: &mut Task) -> anyhow::Result<()> {
        let started = Instant::now();
        tracing::info!("starting deployment task");

        let deployer = Deployer::new(&self.deploy, &self.settings.project_dir);
        let description = format!("{} - Generated by Autonomous App Factory", task.title);
        let result = deployer.full_deploy(&description, &self.cancel).await;

        task.attempts = 1;
        task.duration = format_duration(started.elapsed());
        result.map_err(anyhow::Error::from)
    }
}
