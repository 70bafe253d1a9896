use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::OracleError;
use crate::plan::Step;

/// Fresh plan proposed by the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub title: String,
    pub steps: Vec<String>,
}

/// Control flow requested after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NextAction {
    ContinueToNext,
    Retry,
    ModifyPlan,
    /// Also used for any value the engine does not recognize
    #[default]
    Complete,
}

impl NextAction {
    /// Lenient parse: case, `_` and `-` are ignored and unknown values mean `Complete`
    pub fn parse(value: &str) -> Self {
        let normalized: String = value
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "continuetonext" | "continue" | "next" => Self::ContinueToNext,
            "retry" => Self::Retry,
            "modifyplan" | "revise" => Self::ModifyPlan,
            _ => Self::Complete,
        }
    }
}

impl<'de> Deserialize<'de> for NextAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::parse(&String::deserialize(deserializer)?))
    }
}

/// The oracle's verdict for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDirective {
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, alias = "code", alias = "produced_code")]
    pub produced_code: Option<String>,
    #[serde(default, deserialize_with = "next_or_complete")]
    pub next: NextAction,
}

impl StepDirective {
    pub fn new(succeeded: bool, output: impl Into<String>, next: NextAction) -> Self {
        Self {
            succeeded,
            output: output.into(),
            produced_code: None,
            next,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.produced_code = Some(code.into());
        self
    }
}

/// `null` means the same as an absent value
fn next_or_complete<'de, D>(deserializer: D) -> Result<NextAction, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<NextAction>::deserialize(deserializer)?.unwrap_or_default())
}

/// External decision source for planning, step execution and revision.
///
/// Retries and backoff for these calls are the implementor's business; the
/// engine treats any error as fatal to the current operation.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Break an objective into a titled list of step descriptions
    async fn plan(&self, objective: &str) -> Result<PlanDraft, OracleError>;

    /// Execute one step given the results of earlier completed steps
    async fn decide(&self, step_description: &str, context: &str)
        -> Result<StepDirective, OracleError>;

    /// Propose replacement steps after `failed_step`
    async fn revise(
        &self,
        title: &str,
        completed_steps: &[Step],
        failed_step: &Step,
    ) -> Result<Vec<String>, OracleError>;

    /// Suggestions for the current plan state
    async fn advise(&self, plan_summary: &str) -> Result<Vec<String>, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_from_camel_case() {
        let directive: StepDirective = serde_json::from_str(
            r#"{"succeeded": true, "output": "42", "producedCode": "print(42)", "next": "continueToNext"}"#,
        )
        .unwrap();

        assert!(directive.succeeded);
        assert_eq!(directive.output, "42");
        assert_eq!(directive.produced_code.as_deref(), Some("print(42)"));
        assert_eq!(directive.next, NextAction::ContinueToNext);
    }

    #[test]
    fn test_directive_accepts_aliases() {
        let directive: StepDirective = serde_json::from_str(
            r#"{"succeeded": false, "output": "", "code": "x", "next": "modify_plan"}"#,
        )
        .unwrap();

        assert_eq!(directive.produced_code.as_deref(), Some("x"));
        assert_eq!(directive.next, NextAction::ModifyPlan);
    }

    #[test]
    fn test_unknown_next_means_complete() {
        let directive: StepDirective =
            serde_json::from_str(r#"{"succeeded": true, "output": "done", "next": "celebrate"}"#)
                .unwrap();
        assert_eq!(directive.next, NextAction::Complete);
    }

    #[test]
    fn test_absent_or_null_next_means_complete() {
        let absent: StepDirective =
            serde_json::from_str(r#"{"succeeded": true, "output": "done"}"#).unwrap();
        let null: StepDirective =
            serde_json::from_str(r#"{"succeeded": true, "output": "done", "next": null}"#)
                .unwrap();

        assert_eq!(absent.next, NextAction::Complete);
        assert_eq!(null.next, NextAction::Complete);
    }

    #[test]
    fn test_next_action_parse_is_lenient() {
        assert_eq!(NextAction::parse("continue_to_next"), NextAction::ContinueToNext);
        assert_eq!(NextAction::parse("ContinueToNext"), NextAction::ContinueToNext);
        assert_eq!(NextAction::parse("modify-plan"), NextAction::ModifyPlan);
        assert_eq!(NextAction::parse("RETRY"), NextAction::Retry);
        assert_eq!(NextAction::parse(""), NextAction::Complete);
    }

    #[test]
    fn test_next_action_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&NextAction::ContinueToNext).unwrap(),
            "\"continueToNext\""
        );
        assert_eq!(
            serde_json::to_string(&NextAction::ModifyPlan).unwrap(),
            "\"modifyPlan\""
        );
    }
}
