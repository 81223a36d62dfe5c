//! # autoforge
//!
//! A task-driven autonomous code-generation orchestrator.
//!
//! Given a persistent task list, autoforge drives each task to completion
//! through a closed Plan -> Execute -> Test -> Correct loop backed by three
//! LLM agents, then optionally ships the result through a Git/Coolify
//! deployment pipeline.
//!
//! ```text
//!  Task Store ──► Runner ──► Loop Driver
//!                              │
//!                              ├─► Planner   (free-text plan)
//!                              ├─► Executor  (write files, run tests)
//!                              ├─► Debugger  (structured fix) ──┐
//!                              └──────────── retry ◄────────────┘
//!                              │
//!                              └─► Deployer  (deployment tasks)
//! ```
//!
//! ## Task flow
//! 1. The runner picks the next pending task and marks it in-progress.
//! 2. The planner turns the task into an implementation plan.
//! 3. The executor materializes file changes (LLM file blocks, or a coding
//!    CLI after the fallback gate trips) and runs the test command.
//! 4. On failure the debugger proposes a fix, which is re-applied through
//!    the executor; on success the task is marked completed.
//!
//! ## Modules
//! - `agents`: planner, executor and debugger
//! - `task`: task model and the JSON file store
//! - `driver`: the per-task retry loop
//! - `deploy`: git publishing and Coolify deployment

pub mod agents;
pub mod config;
pub mod context;
pub mod deploy;
pub mod driver;
pub mod llm;
pub mod project;
pub mod runner;
pub mod task;
pub mod tasklog;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
