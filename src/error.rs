use std::path::PathBuf;

use thiserror::Error;

use crate::sandbox::Language;

/// Failures of the decision oracle
#[derive(Debug, Error)]
pub enum OracleError {
    /// The oracle could not be reached or exited abnormally
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered with something that is not the expected structure
    #[error("oracle returned an unparsable response: {0}")]
    Unparsable(String),
}

/// Errors surfaced by the plan execution engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create plan: {0}")]
    Planning(#[source] OracleError),

    #[error("no active plan")]
    NoActivePlan,

    #[error("a plan run is already in progress")]
    RunInProgress,

    #[error("failed to get feedback: {0}")]
    Feedback(#[source] OracleError),

    #[error("oracle produced no usable plan")]
    NoValidPlan,

    #[error("step {index} failed to execute: {source}")]
    StepExecution {
        index: usize,
        #[source]
        source: OracleError,
    },

    /// Only raised when a retry ceiling is configured
    #[error("step {index} requested retry more than {limit} times")]
    RetryLimitExceeded { index: usize, limit: u32 },

    #[error("sandbox failure while running produced code: {0}")]
    Sandbox(#[from] RunnerError),
}

/// Environment failures of the process runner.
///
/// A program that exits non-zero is not an error; it is reported through
/// [`crate::sandbox::ExecutionResult`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{language} runtime unavailable at {}", path.display())]
    RuntimeUnavailable { language: Language, path: PathBuf },

    #[error("failed to create working directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write source file {}: {source}", path.display())]
    WriteSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to collect process status: {0}")]
    Wait(#[source] std::io::Error),
}
