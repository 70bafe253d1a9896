//! Autonomous plan execution engine with a sandboxed multi-language code runner.
//!
//! [`engine::PlanEngine`] turns an objective into steps through an
//! [`engine::Oracle`] and drives them to completion, revising the plan when a
//! step asks for it. [`sandbox::ProcessRunner`] executes code snippets in
//! private working directories under a hard timeout.

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod plan;
pub mod sandbox;

pub use activity::{ActivityLog, LogEntry};
pub use config::PilotConfig;
pub use engine::{CommandOracle, NextAction, Oracle, PlanEngine, PlanEvent, StepDirective};
pub use error::{EngineError, OracleError, RunnerError};
pub use plan::{Plan, PlanStore, Step, StepStatus};
pub use sandbox::{ExecutionResult, Language, ProcessRunner};
