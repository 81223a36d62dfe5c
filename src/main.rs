//! autoforge - binary entry point.
//!
//! Wires configuration, project discovery, the agent set and the runner, and
//! installs the process-wide cancellation token flipped by SIGINT/SIGTERM.

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoforge::agents::{AgentSet, Debugger, Executor, ExecutorMode, Planner};
use autoforge::config::Config;
use autoforge::driver::LoopSettings;
use autoforge::project::ProjectPaths;
use autoforge::runner::Runner;
use autoforge::task::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Process every pending task in the list.
    Continuous,
    /// Process one task by id.
    Single,
}

#[derive(Parser)]
#[command(
    name = "autoforge",
    version,
    about = "Task-driven autonomous code-generation orchestrator"
)]
struct Cli {
    /// Run mode.
    #[arg(long, value_enum, default_value_t = Mode::Continuous)]
    mode: Mode,

    /// Task id to run (required with --mode single).
    #[arg(long)]
    task: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!("autoforge orchestrator");
    let paths = ProjectPaths::discover(&config.project_root, &config.task_file)?;
    info!("project root: {}", paths.root.display());
    info!("backend found: {}", paths.has_backend());
    info!("mobile found: {}", paths.has_mobile());
    info!("task file found: {}", paths.has_task_file());

    let agents = AgentSet {
        planner: Planner::new(&config.engine),
        executor: Executor::new(
            &config.executioner,
            config.executioner_mode,
            &paths.root,
            config.executioner_fallback_cli,
        ),
        debugger: Debugger::new(&config.debugger, &paths.root),
    };

    info!("planner timeout: {:?}", config.engine.timeout);
    info!("executor mode: {}", config.executioner_mode);
    if config.executioner_mode == ExecutorMode::Api {
        info!("executor model: {}", config.executioner.model);
    }

    let settings = LoopSettings {
        max_retries: config.max_retries,
        default_test_command: config.test_command_backend.clone(),
        project_dir: paths.root.clone(),
        log_dir: config.log_dir.clone(),
        auto_commit: config.auto_commit,
    };

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone())?;

    let store = TaskStore::new(&paths.task_file);
    let mut runner = Runner::new(store, agents, settings, config.deploy.clone(), cancel);

    match cli.mode {
        Mode::Single => {
            let task_id = cli
                .task
                .ok_or_else(|| anyhow::anyhow!("--task is required in single mode"))?;
            runner.run_single(&task_id).await?;
        }
        Mode::Continuous => runner.run_continuous().await?,
    }

    info!("orchestrator finished");
    Ok(())
}

#[cfg(unix)]
fn spawn_signal_listener(cancel: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        info!("shutdown signal received, cancelling current work");
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(cancel: CancellationToken) -> anyhow::Result<()> {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, cancelling current work");
        cancel.cancel();
    });
    Ok(())
}
