use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::oracle::{Oracle, PlanDraft, StepDirective};
use super::prompts;
use crate::config::{AgentSpec, OracleConfig};
use crate::error::OracleError;
use crate::plan::Step;

/// Longest slice of a bad reply quoted back in an error
const REPLY_EXCERPT: usize = 200;

#[derive(Deserialize)]
struct Revision {
    steps: Vec<String>,
}

#[derive(Deserialize)]
struct Advice {
    suggestions: Vec<String>,
}

/// Oracle backed by a command line agent.
///
/// The prompt is appended as the last argument and the agent's stdout must
/// contain one JSON object.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    name: String,
    spec: AgentSpec,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(name: impl Into<String>, spec: AgentSpec, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            spec,
            timeout,
        }
    }

    /// Build from config, using the default agent when `name` is `None`
    pub fn from_config(config: &OracleConfig, name: Option<&str>) -> Result<Self> {
        let name = name.unwrap_or(&config.default_agent);
        let spec = config.get_agent(name).ok_or_else(|| {
            anyhow!(
                "Unknown agent '{}' (available: {})",
                name,
                config.available_agents().join(", ")
            )
        })?;
        Ok(Self::new(
            name,
            spec.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, prompt), fields(agent = %self.name))]
    async fn ask<T: DeserializeOwned>(&self, prompt: String) -> Result<T, OracleError> {
        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("invoking agent");
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                OracleError::Unavailable(format!(
                    "{} did not answer within {}s",
                    self.name,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| OracleError::Unavailable(format!("failed to start {}: {}", self.name, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(code = ?output.status.code(), "agent exited unsuccessfully");
            return Err(OracleError::Unavailable(format!(
                "{} exited with {:?}: {}",
                self.name,
                output.status.code(),
                stderr.trim()
            )));
        }

        parse_reply(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract and parse the outermost JSON object in an agent reply.
///
/// Agents tend to wrap JSON in prose or code fences, so everything outside
/// the first `{` and the last `}` is ignored.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, OracleError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(OracleError::Unparsable(format!(
                "no JSON object in reply: {}",
                excerpt(reply)
            )))
        }
    };

    serde_json::from_str(json)
        .map_err(|e| OracleError::Unparsable(format!("{}: {}", e, excerpt(json))))
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > REPLY_EXCERPT {
        format!("{}...", text.chars().take(REPLY_EXCERPT).collect::<String>())
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    async fn plan(&self, objective: &str) -> Result<PlanDraft, OracleError> {
        self.ask(prompts::planning_prompt(objective)).await
    }

    async fn decide(
        &self,
        step_description: &str,
        context: &str,
    ) -> Result<StepDirective, OracleError> {
        self.ask(prompts::execution_prompt(step_description, context))
            .await
    }

    async fn revise(
        &self,
        title: &str,
        completed_steps: &[Step],
        failed_step: &Step,
    ) -> Result<Vec<String>, OracleError> {
        let revision: Revision = self
            .ask(prompts::revision_prompt(title, completed_steps, failed_step))
            .await?;
        Ok(revision.steps)
    }

    async fn advise(&self, plan_summary: &str) -> Result<Vec<String>, OracleError> {
        let advice: Advice = self.ask(prompts::feedback_prompt(plan_summary)).await?;
        Ok(advice.suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NextAction;

    /// Agent that ignores its prompt and prints a fixed reply
    fn echo_agent(reply: &str) -> CommandOracle {
        let spec = AgentSpec {
            command: "sh".into(),
            args: vec!["-c".into(), format!("printf '%s' '{}'", reply), "agent".into()],
            description: String::new(),
        };
        CommandOracle::new("echo", spec, Duration::from_secs(10))
    }

    // ========================================
    // parse_reply Tests
    // ========================================

    #[test]
    fn test_parse_reply_with_code_fence() {
        let reply = "Here you go:\n```json\n{\"title\": \"Sum\", \"steps\": [\"a\", \"b\"]}\n```\n";
        let draft: PlanDraft = parse_reply(reply).unwrap();
        assert_eq!(draft.title, "Sum");
        assert_eq!(draft.steps, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_reply_without_json() {
        let err = parse_reply::<PlanDraft>("I cannot help with that").unwrap_err();
        assert!(matches!(err, OracleError::Unparsable(_)));
    }

    #[test]
    fn test_parse_reply_wrong_shape() {
        let err = parse_reply::<PlanDraft>(r#"{"name": "x"}"#).unwrap_err();
        assert!(matches!(err, OracleError::Unparsable(_)));
    }

    #[test]
    fn test_excerpt_truncates_long_replies() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), REPLY_EXCERPT + 3);
    }

    // ========================================
    // from_config Tests
    // ========================================

    #[test]
    fn test_from_config_uses_default_agent() {
        let oracle = CommandOracle::from_config(&OracleConfig::default(), None).unwrap();
        assert_eq!(oracle.name(), "claude");
    }

    #[test]
    fn test_from_config_unknown_agent() {
        let err = CommandOracle::from_config(&OracleConfig::default(), Some("nope")).unwrap_err();
        assert!(err.to_string().contains("Unknown agent 'nope'"));
    }

    // ========================================
    // Agent invocation Tests
    // ========================================

    #[tokio::test]
    async fn test_plan_through_agent_command() {
        let oracle = echo_agent(r#"{"title": "Add", "steps": ["read", "sum"]}"#);
        let draft = oracle.plan("add two numbers").await.unwrap();
        assert_eq!(draft.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_decide_through_agent_command() {
        let oracle = echo_agent(r#"{"succeeded": true, "output": "3", "next": "complete"}"#);
        let directive = oracle.decide("sum", "No previous steps completed.").await.unwrap();
        assert!(directive.succeeded);
        assert_eq!(directive.next, NextAction::Complete);
    }

    #[tokio::test]
    async fn test_revise_and_advise_through_agent_command() {
        let oracle = echo_agent(r#"{"steps": ["retry differently"], "suggestions": ["add tests"]}"#);
        let failed = Step::new("broken");

        assert_eq!(
            oracle.revise("t", &[], &failed).await.unwrap(),
            vec!["retry differently"]
        );
        assert_eq!(oracle.advise("summary").await.unwrap(), vec!["add tests"]);
    }

    #[tokio::test]
    async fn test_failing_agent_is_unavailable() {
        let spec = AgentSpec {
            command: "sh".into(),
            args: vec!["-c".into(), "echo quota exceeded >&2; exit 3".into(), "agent".into()],
            description: String::new(),
        };
        let oracle = CommandOracle::new("broken", spec, Duration::from_secs(10));

        match oracle.plan("anything").await.unwrap_err() {
            OracleError::Unavailable(msg) => assert!(msg.contains("quota exceeded")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_agent_binary_is_unavailable() {
        let spec = AgentSpec {
            command: "pilot-no-such-agent-binary".into(),
            args: vec![],
            description: String::new(),
        };
        let oracle = CommandOracle::new("ghost", spec, Duration::from_secs(10));

        assert!(matches!(
            oracle.advise("summary").await.unwrap_err(),
            OracleError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_slow_agent_times_out() {
        let spec = AgentSpec {
            command: "sh".into(),
            args: vec!["-c".into(), "sleep 10".into(), "agent".into()],
            description: String::new(),
        };
        let oracle = CommandOracle::new("slow", spec, Duration::from_millis(200));

        match oracle.plan("anything").await.unwrap_err() {
            OracleError::Unavailable(msg) => assert!(msg.contains("did not answer")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
