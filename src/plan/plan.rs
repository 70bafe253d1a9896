use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Step, StepStatus};

/// Context handed to the oracle when no step has completed yet
pub const NO_CONTEXT: &str = "No previous steps completed.";

/// Ordered steps plus a cursor marking execution progress.
///
/// `cursor <= steps.len()` always holds; `cursor == steps.len()` means the
/// plan is finished. The cursor only moves through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanRecord")]
pub struct Plan {
    pub title: String,
    steps: Vec<Step>,
    cursor: usize,
    pub created_at: DateTime<Utc>,
}

/// Unchecked serialized form
#[derive(Deserialize)]
struct PlanRecord {
    title: String,
    steps: Vec<Step>,
    cursor: usize,
    created_at: DateTime<Utc>,
}

impl TryFrom<PlanRecord> for Plan {
    type Error = String;

    fn try_from(record: PlanRecord) -> Result<Self, Self::Error> {
        if record.cursor > record.steps.len() {
            return Err(format!(
                "cursor {} is past the end of a {} step plan",
                record.cursor,
                record.steps.len()
            ));
        }
        Ok(Self {
            title: record.title,
            steps: record.steps,
            cursor: record.cursor,
            created_at: record.created_at,
        })
    }
}

impl Plan {
    /// New plan with every step pending and the cursor at the start
    pub fn new<I, S>(title: impl Into<String>, descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            title: title.into(),
            steps: descriptions.into_iter().map(Step::new).collect(),
            cursor: 0,
            created_at: Utc::now(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps can be edited in place but not added or removed
    pub fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.steps.len()
    }

    /// Index of the step under the cursor, `None` once finished
    pub fn active_index(&self) -> Option<usize> {
        (self.cursor < self.steps.len()).then_some(self.cursor)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.cursor)
    }

    /// Move to the next step
    pub fn advance(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }

    /// Jump to the end, skipping whatever is left
    pub fn finish(&mut self) {
        self.cursor = self.steps.len();
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_completed()).count()
    }

    /// Results of completed steps before the cursor, in order
    pub fn completed_context(&self) -> String {
        let mut context = String::new();
        for (i, step) in self.steps[..self.cursor].iter().enumerate() {
            if step.status != StepStatus::Completed {
                continue;
            }
            let _ = writeln!(
                context,
                "Step {}: {}\nResult: {}",
                i + 1,
                step.description,
                step.result.as_deref().unwrap_or("")
            );
        }

        if context.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            context
        }
    }

    /// Keep steps before `at` verbatim and replace the rest with new pending
    /// steps. The cursor of the returned plan is `at`.
    pub fn regenerate<I, S>(&self, at: usize, descriptions: I) -> Plan
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let at = at.min(self.steps.len());
        let mut steps = self.steps[..at].to_vec();
        steps.extend(descriptions.into_iter().map(Step::new));

        Plan {
            title: self.title.clone(),
            steps,
            cursor: at,
            created_at: self.created_at,
        }
    }

    /// Human readable state used for feedback prompts and the CLI
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Plan: {} ({}/{} steps completed)\n",
            self.title,
            self.completed_count(),
            self.steps.len()
        );
        for (i, step) in self.steps.iter().enumerate() {
            let pointer = if i == self.cursor { "->" } else { "  " };
            let _ = writeln!(
                out,
                "{} [{}] {}. {} ({})",
                pointer,
                step.status.marker(),
                i + 1,
                step.description,
                step.status.display_name()
            );
            if let Some(result) = &step.result {
                let _ = writeln!(out, "       result: {}", result);
            }
        }
        out
    }
}
