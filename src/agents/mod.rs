//! The three LLM agents and their shared wiring.
//!
//! - [`Planner`]: turns a task into a free-text implementation plan.
//! - [`Executor`]: materializes code on disk, runs shell commands, and owns
//!   the API-to-CLI fallback state.
//! - [`Debugger`]: turns a failed test transcript into a structured fix.

mod debugger;
mod executor;
mod planner;

pub use debugger::{DebugError, DebugReport, Debugger, FixType};
pub use executor::{ExecError, Executor, ExecutorMode, FALLBACK_THRESHOLD};
pub use planner::Planner;

/// All agents used by the task loop, constructed once per process.
pub struct AgentSet {
    pub planner: Planner,
    pub executor: Executor,
    pub debugger: Debugger,
}
