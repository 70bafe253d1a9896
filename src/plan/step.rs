use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sandbox::ExecutionResult;

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    /// Display name of the status
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Single character marker used in plan listings
    pub fn marker(&self) -> char {
        match self {
            Self::Pending => ' ',
            Self::InProgress => '>',
            Self::Completed => 'x',
            Self::Failed => '!',
        }
    }
}

/// One unit of planned work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique ID
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    /// Oracle output for the latest attempt
    pub result: Option<String>,
    /// Code attached to the latest directive
    #[serde(default)]
    pub code: Option<String>,
    /// Sandbox result for `code`, when produced code execution is enabled
    #[serde(default)]
    pub execution: Option<ExecutionResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Create a pending step
    pub fn new(description: impl Into<String>) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("step-{}", &uuid[..8]),
            description: description.into(),
            status: StepStatus::Pending,
            result: None,
            code: None,
            execution: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Change status, stamping start and finish times
    pub fn set_status(&mut self, status: StepStatus) {
        self.status = status;
        match status {
            StepStatus::InProgress => {
                self.started_at = Some(Utc::now());
                self.finished_at = None;
            }
            StepStatus::Completed | StepStatus::Failed => {
                self.finished_at = Some(Utc::now());
            }
            StepStatus::Pending => {}
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}
