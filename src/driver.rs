//! The per-task loop: Plan -> Execute -> Test -> Correct.
//!
//! One call to [`run_task`] drives a task from in-progress to success or
//! failure. The loop is strictly sequential; every agent call, subprocess and
//! shell invocation honours the shared cancellation token. Errors inside the
//! retry cycle (debugger failures, fix-application failures, parse errors)
//! consume an attempt and keep the loop alive; only planning failures and
//! retry exhaustion end the task.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentSet, ExecError, Executor, FALLBACK_THRESHOLD};
use crate::llm::AgentError;
use crate::task::Task;
use crate::tasklog::TaskLogger;

/// Loop policy shared by every task in a run.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Test attempts per task. The first test after the initial execution
    /// counts as attempt 1.
    pub max_retries: u32,
    /// Verification command used when the task carries no override.
    pub default_test_command: String,
    /// Root of the generated project.
    pub project_dir: PathBuf,
    /// Directory for per-task logs; `None` keeps logs on stdout only.
    pub log_dir: Option<PathBuf>,
    /// Commit after every successful task, regardless of the task flag.
    pub auto_commit: bool,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("planning failed: {0}")]
    Plan(#[source] AgentError),

    #[error("tests failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Drive one task through the loop. Writes `attempts` and `duration` onto the
/// task on every exit path; the caller persists them.
pub async fn run_task(
    task: &mut Task,
    agents: &mut AgentSet,
    settings: &LoopSettings,
    cancel: &CancellationToken,
) -> Result<(), LoopError> {
    let started = Instant::now();
    let mut logger = TaskLogger::create(settings.log_dir.as_deref(), &task.id);

    logger.log("LOOP", format!("Starting task: {}", task.title));
    logger.log("LOOP", format!("Description: {}", task.description));
    logger.log("LOOP", format!("Executor mode: {}", agents.executor.mode()));

    agents.executor.reset_failures();

    logger.log("PLAN", "Generating implementation plan...");
    let plan_prompt = build_plan_prompt(task, &settings.project_dir);
    let plan = match agents.planner.generate(&plan_prompt, cancel).await {
        Ok(plan) => plan,
        Err(err) => {
            logger.log("PLAN", format!("ERROR: {err}"));
            task.duration = format_duration(started.elapsed());
            return Err(LoopError::Plan(err));
        }
    };
    logger.log("PLAN", format!("Plan generated ({} chars)", plan.len()));
    logger.log_content("PLAN_OUTPUT", &plan);

    // A failed initial execution is not fatal: the tree may already satisfy
    // the test, and the correction cycle can recover the rest.
    logger.log("EXEC", "Implementing plan...");
    let exec_prompt = build_exec_prompt(&plan, task);
    let mut exec_summary = match agents.executor.execute(&exec_prompt, cancel).await {
        Ok(summary) => {
            logger.log(
                "EXEC",
                format!("Execution complete ({} chars output)", summary.len()),
            );
            logger.log_content("EXEC_OUTPUT", &summary);
            summary
        }
        Err(err) => {
            logger.log("EXEC", format!("ERROR: {err}"));
            err.to_string()
        }
    };

    let test_command = task
        .test_command
        .clone()
        .unwrap_or_else(|| settings.default_test_command.clone());
    if task.test_command.is_some() {
        logger.log(
            "TEST",
            format!("Using task-specific test command: {test_command}"),
        );
    }

    let mut last_error = String::new();
    for attempt in 1..=settings.max_retries {
        task.attempts = attempt;
        logger.log(
            "TEST",
            format!(
                "Running tests (attempt {attempt}/{}): {test_command}",
                settings.max_retries
            ),
        );

        match agents.executor.run_shell(&test_command, cancel).await {
            Ok(output) => {
                logger.log("TEST", "Tests PASSED");
                logger.log_content("TEST_OUTPUT", &output);
                agents.executor.reset_failures();

                if task.auto_commit || settings.auto_commit {
                    logger.log("GIT", "Auto-committing changes...");
                    match auto_commit(task, &agents.executor, cancel).await {
                        Ok(()) => logger.log("GIT", "Changes committed"),
                        Err(err) => logger.log("GIT", format!("Auto-commit failed: {err}")),
                    }
                }

                task.duration = format_duration(started.elapsed());
                return Ok(());
            }
            Err(err) => {
                logger.log("TEST", format!("Tests FAILED: {err}"));
                last_error = err.to_string();
            }
        }

        let fallback = agents.executor.increment_failures();

        if attempt == settings.max_retries {
            break;
        }

        if fallback {
            // One-way switch: re-run the original implementation through the
            // coding CLI, then go straight to the next test attempt.
            agents.executor.switch_to_cli();
            logger.log(
                "FALLBACK",
                format!("API mode failed {FALLBACK_THRESHOLD} times, re-implementing via coding CLI"),
            );
            match agents.executor.execute(&exec_prompt, cancel).await {
                Ok(summary) => {
                    logger.log("EXEC", "CLI execution complete");
                    exec_summary = summary;
                }
                Err(err) => logger.log("EXEC", format!("CLI execution failed: {err}")),
            }
            continue;
        }

        logger.log("DEBUG", "Analyzing failure and generating fix...");
        let debug_prompt = build_debug_prompt(&test_command, &last_error, &exec_summary);
        let report = match agents.debugger.analyze(&debug_prompt, cancel).await {
            Ok(report) => report,
            Err(err) => {
                // Attempt is consumed; the next round re-tests the unmodified
                // tree, giving transient failures a chance to clear.
                logger.log("DEBUG", format!("Debugger error: {err}"));
                continue;
            }
        };
        logger.log("DEBUG", format!("Fix generated: {}", report.analysis));
        logger.log_content("FIX_OUTPUT", &report.fix_content);

        logger.log("FIX", "Applying fix...");
        let fix_prompt = format!(
            "Apply the following fix to the codebase:\n\n{}",
            report.fix_content
        );
        match agents.executor.execute(&fix_prompt, cancel).await {
            Ok(summary) => {
                logger.log("FIX", "Fix applied");
                exec_summary = summary;
            }
            Err(err) => logger.log("FIX", format!("Fix application failed: {err}")),
        }
    }

    task.duration = format_duration(started.elapsed());
    Err(LoopError::RetriesExhausted {
        attempts: task.attempts,
        last_error,
    })
}

async fn auto_commit(
    task: &Task,
    executor: &Executor,
    cancel: &CancellationToken,
) -> Result<(), ExecError> {
    executor.run_shell("git add -A", cancel).await?;

    let message = format!(
        "feat({id}): {title}\n\nAuto-committed by orchestrator after successful test.\nTask ID: {id}",
        id = task.id,
        title = task.title
    );
    executor
        .run_shell(&format!("git commit -m {}", shell_quote(&message)), cancel)
        .await?;
    Ok(())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn build_plan_prompt(task: &Task, project_dir: &Path) -> String {
    format!(
        "Create a detailed implementation plan for the following task.\n\n\
         PROJECT DIRECTORY: {}\n\n\
         TASK TITLE: {}\n\n\
         TASK DESCRIPTION:\n{}\n\n\
         Output a step-by-step plan with:\n\
         1. Files to create or modify (full paths from project root)\n\
         2. Code changes needed for each file\n\
         3. Any dependencies or imports required\n\
         4. Test criteria to verify the implementation\n\n\
         Be specific about file paths and code structure. Follow existing patterns in the codebase.",
        project_dir.display(),
        task.title,
        task.description
    )
}

fn build_exec_prompt(plan: &str, task: &Task) -> String {
    format!(
        "Implement the following plan. Create or modify files as needed.\n\n\
         PLAN:\n{plan}\n\n\
         TASK: {}\n\
         DESCRIPTION: {}\n\n\
         Important:\n\
         - Create all necessary files with complete contents\n\
         - Follow the existing code patterns and conventions\n\
         - Ensure all imports are correct\n\
         - Do not use placeholder code or \"...\"",
        task.title, task.description
    )
}

fn build_debug_prompt(test_command: &str, test_output: &str, exec_summary: &str) -> String {
    format!(
        "The following test command failed:\n\n\
         COMMAND: {test_command}\n\n\
         ERROR OUTPUT:\n{test_output}\n\n\
         PREVIOUS EXECUTION RESULT:\n{exec_summary}\n\n\
         Analyze the error and provide a specific fix. Include:\n\
         1. Root cause analysis\n\
         2. Exact code changes needed\n\
         3. File paths to modify"
    )
}

/// Render an elapsed time as a compact human-readable duration, rounded to
/// whole seconds ("12s", "4m32s", "1h2m3s").
pub(crate) fn format_duration(elapsed: Duration) -> String {
    let mut total = elapsed.as_secs();
    if elapsed.subsec_millis() >= 500 {
        total += 1;
    }

    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::agents::{Debugger, Executor, ExecutorMode, Planner};
    use crate::test_support::{ScriptedClient, ScriptedReply};

    const PLAN: &str = "1. Write the file\n2. Verify";

    fn file_block(path: &str, content: &str) -> String {
        format!("--- FILE: {path} ---\n{content}\n--- END FILE ---")
    }

    fn debug_reply(path: &str, content: &str) -> String {
        serde_json::json!({
            "analysis": "missing file",
            "fix_type": "code_patch",
            "fix_content": file_block(path, content),
        })
        .to_string()
    }

    struct Harness {
        planner: Arc<ScriptedClient>,
        exec: Arc<ScriptedClient>,
        debug: Arc<ScriptedClient>,
        agents: AgentSet,
        settings: LoopSettings,
        _dir: tempfile::TempDir,
    }

    fn harness(
        exec_replies: Vec<&str>,
        debug_replies: Vec<&str>,
        max_retries: u32,
        test_command: &str,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let planner = ScriptedClient::ok(vec![PLAN]);
        let exec = ScriptedClient::ok(exec_replies);
        let debug = ScriptedClient::ok(debug_replies);

        let agents = AgentSet {
            planner: Planner::with_client(planner.clone(), "planner-model"),
            executor: Executor::with_client(
                exec.clone(),
                "exec-model",
                Duration::from_secs(10),
                ExecutorMode::Api,
                dir.path(),
                true,
            ),
            debugger: Debugger::with_client(debug.clone(), "debug-model", dir.path()),
        };
        let settings = LoopSettings {
            max_retries,
            default_test_command: test_command.to_string(),
            project_dir: dir.path().to_path_buf(),
            log_dir: None,
            auto_commit: false,
        };

        Harness {
            planner,
            exec,
            debug,
            agents,
            settings,
            _dir: dir,
        }
    }

    fn task() -> Task {
        Task {
            id: "T1".to_string(),
            title: "Add X endpoint".to_string(),
            description: "do the thing".to_string(),
            status: crate::task::TaskStatus::InProgress,
            test_command: None,
            is_deployment: false,
            auto_commit: false,
            attempts: 0,
            duration: String::new(),
            error: None,
        }
    }

    #[tokio::test]
    async fn happy_path_succeeds_in_one_attempt() {
        let block = file_block("hello.txt", "hi");
        let mut h = harness(vec![&block], vec![], 5, "test -f hello.txt");
        let cancel = CancellationToken::new();
        let mut task = task();

        run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap();

        assert_eq!(task.attempts, 1);
        assert!(!task.duration.is_empty());
        assert_eq!(h.planner.call_count(), 1);
        assert_eq!(h.exec.call_count(), 1);
        assert_eq!(h.debug.call_count(), 0);
    }

    #[tokio::test]
    async fn one_correction_succeeds_on_second_attempt() {
        let first = file_block("notyet.txt", "wrong");
        let fix_applied = file_block("fixed.txt", "ok");
        let debug = debug_reply("fixed.txt", "ok");
        let mut h = harness(vec![&first, &fix_applied], vec![&debug], 5, "test -f fixed.txt");
        let cancel = CancellationToken::new();
        let mut task = task();

        run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap();

        assert_eq!(task.attempts, 2);
        assert_eq!(h.debug.call_count(), 1);
        assert_eq!(h.exec.call_count(), 2);
        // The fix went back through the executor as a free-text prompt.
        let fix_request = h.exec.last_request().unwrap();
        assert!(fix_request.messages[1]
            .content
            .starts_with("Apply the following fix to the codebase:"));
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error_with_telemetry() {
        let block = file_block("a.txt", "a");
        let fix = file_block("a.txt", "a2");
        let debug = debug_reply("a.txt", "a2");
        let mut h = harness(vec![&block, &fix], vec![&debug], 2, "echo boom >&2; exit 1");
        let cancel = CancellationToken::new();
        let mut task = task();

        let err = run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap_err();

        match err {
            LoopError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(task.attempts, 2);
        assert!(!task.duration.is_empty());
    }

    #[tokio::test]
    async fn single_retry_budget_never_calls_the_debugger() {
        let block = file_block("a.txt", "a");
        let mut h = harness(vec![&block], vec![], 1, "false");
        let cancel = CancellationToken::new();
        let mut task = task();

        let err = run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(h.debug.call_count(), 0);
    }

    #[tokio::test]
    async fn debugger_failure_consumes_the_attempt_without_aborting() {
        let block = file_block("a.txt", "a");
        // Prose instead of JSON: the debugger call fails, the loop re-tests.
        let mut h = harness(vec![&block], vec!["not json"], 2, "false");
        let cancel = CancellationToken::new();
        let mut task = task();

        let err = run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(h.debug.call_count(), 1);
        // No fix-application call was made after the debugger failure.
        assert_eq!(h.exec.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_diff_task_succeeds_without_file_blocks() {
        // The tree already satisfies the test; the executor's parse error
        // must not kill the task.
        let mut h = harness(vec!["no blocks here, nothing to change"], vec![], 5, "true");
        let cancel = CancellationToken::new();
        let mut task = task();

        run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap();
        assert_eq!(task.attempts, 1);
    }

    #[tokio::test]
    async fn planning_failure_fails_the_task_before_any_test() {
        let dir = tempfile::tempdir().unwrap();
        let planner = ScriptedClient::new(vec![ScriptedReply::Err(
            crate::llm::AgentError::Endpoint {
                status: 500,
                body: "upstream down".to_string(),
            },
        )]);
        let exec = ScriptedClient::ok(vec![]);
        let mut agents = AgentSet {
            planner: Planner::with_client(planner, "planner-model"),
            executor: Executor::with_client(
                exec.clone(),
                "exec-model",
                Duration::from_secs(10),
                ExecutorMode::Api,
                dir.path(),
                true,
            ),
            debugger: Debugger::with_client(ScriptedClient::ok(vec![]), "debug-model", dir.path()),
        };
        let settings = LoopSettings {
            max_retries: 5,
            default_test_command: "true".to_string(),
            project_dir: dir.path().to_path_buf(),
            log_dir: None,
            auto_commit: false,
        };
        let cancel = CancellationToken::new();
        let mut task = task();

        let err = run_task(&mut task, &mut agents, &settings, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Plan(_)));
        assert_eq!(task.attempts, 0);
        assert!(!task.duration.is_empty());
        assert_eq!(exec.call_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fallback_switches_to_cli_after_three_failures() {
        use std::os::unix::fs::PermissionsExt;

        let initial = file_block("a.txt", "v1");
        let fix1 = file_block("a.txt", "v2");
        let fix2 = file_block("a.txt", "v3");
        let d1 = debug_reply("a.txt", "v2");
        let d2 = debug_reply("a.txt", "v3");
        let mut h = harness(
            vec![&initial, &fix1, &fix2],
            vec![&d1, &d2],
            5,
            "test -f cli_ran.txt",
        );

        // Stand-in coding CLI: creates the file the test oracle wants.
        let stub = h.settings.project_dir.join("fake-cli.sh");
        std::fs::write(&stub, "#!/bin/sh\ntouch cli_ran.txt\necho done\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        h.agents.executor = Executor::with_client(
            h.exec.clone(),
            "exec-model",
            Duration::from_secs(10),
            ExecutorMode::Api,
            &h.settings.project_dir,
            true,
        )
        .with_cli_program(stub.to_string_lossy().to_string());

        let cancel = CancellationToken::new();
        let mut task = task();

        run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap();

        assert_eq!(task.attempts, 4);
        assert_eq!(h.agents.executor.mode(), ExecutorMode::Cli);
        // Two corrections before the gate opened; no API call afterwards.
        assert_eq!(h.debug.call_count(), 2);
        assert_eq!(h.exec.call_count(), 3);
    }

    #[tokio::test]
    async fn auto_commit_runs_after_success() {
        let block = file_block("hello.txt", "hi");
        let mut h = harness(vec![&block], vec![], 5, "test -f hello.txt");
        h.settings.auto_commit = true;
        let dir = &h.settings.project_dir;

        // A real repo so the commit lands.
        for args in [
            vec!["init"],
            vec!["config", "user.email", "orchestrator@example.com"],
            vec!["config", "user.name", "orchestrator"],
        ] {
            let status = std::process::Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .unwrap();
            assert!(status.status.success());
        }

        let cancel = CancellationToken::new();
        let mut task = task();
        run_task(&mut task, &mut h.agents, &h.settings, &cancel)
            .await
            .unwrap();

        let log = std::process::Command::new("git")
            .args(["log", "--oneline"])
            .current_dir(dir)
            .output()
            .unwrap();
        let log = String::from_utf8_lossy(&log.stdout).to_string();
        assert!(log.contains("feat(T1): Add X endpoint"));
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_millis(300)), "0s");
        assert_eq!(format_duration(Duration::from_millis(700)), "1s");
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(272)), "4m32s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn shell_quoting_survives_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
