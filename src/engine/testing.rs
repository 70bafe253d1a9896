//! Scripted oracle for driving the engine in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use super::oracle::{Oracle, PlanDraft, StepDirective};
use crate::error::OracleError;
use crate::plan::{Plan, Step};

/// Arguments of one `revise` call
#[derive(Debug, Clone)]
pub struct RevisionCall {
    pub title: String,
    pub completed_steps: Vec<Step>,
    pub failed_step: Step,
}

#[derive(Default)]
struct Script {
    drafts: VecDeque<Result<PlanDraft, OracleError>>,
    directives: VecDeque<Result<StepDirective, OracleError>>,
    revisions: VecDeque<Vec<String>>,
    advice: Vec<String>,
    decide_calls: Vec<(String, String)>,
    revise_calls: Vec<RevisionCall>,
    observer: Option<watch::Receiver<Option<Plan>>>,
    observed: Vec<Plan>,
}

impl Script {
    /// Snapshot the visible plan as the engine published it before this call
    fn observe(&mut self) {
        let snapshot = self.observer.as_ref().and_then(|rx| rx.borrow().clone());
        if let Some(plan) = snapshot {
            self.observed.push(plan);
        }
    }
}

/// Gate that parks `decide` until released
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Oracle answering from queues filled by the test
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<Script>,
    gate: Option<Arc<Gate>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan<const N: usize>(self, title: &str, steps: [&str; N]) -> Self {
        self.script.lock().unwrap().drafts.push_back(Ok(PlanDraft {
            title: title.into(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
        }));
        self
    }

    pub fn with_plan_error(self, error: OracleError) -> Self {
        self.script.lock().unwrap().drafts.push_back(Err(error));
        self
    }

    pub fn then(self, directive: StepDirective) -> Self {
        self.script
            .lock()
            .unwrap()
            .directives
            .push_back(Ok(directive));
        self
    }

    pub fn then_error(self, error: OracleError) -> Self {
        self.script.lock().unwrap().directives.push_back(Err(error));
        self
    }

    pub fn with_revision<const N: usize>(self, steps: [&str; N]) -> Self {
        self.script
            .lock()
            .unwrap()
            .revisions
            .push_back(steps.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_advice(self, advice: &[&str]) -> Self {
        self.script.lock().unwrap().advice = advice.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Park every `decide` call on a gate the test controls
    pub fn gated(mut self) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Record the engine's visible plan at every `decide` and `revise` call
    pub fn observe(&self, plans: watch::Receiver<Option<Plan>>) {
        self.script.lock().unwrap().observer = Some(plans);
    }

    pub fn observed_plans(&self) -> Vec<Plan> {
        self.script.lock().unwrap().observed.clone()
    }

    /// (step description, context) for each `decide` call
    pub fn decide_calls(&self) -> Vec<(String, String)> {
        self.script.lock().unwrap().decide_calls.clone()
    }

    pub fn revise_calls(&self) -> Vec<RevisionCall> {
        self.script.lock().unwrap().revise_calls.clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn plan(&self, _objective: &str) -> Result<PlanDraft, OracleError> {
        self.script
            .lock()
            .unwrap()
            .drafts
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Unavailable("no scripted plan".into())))
    }

    async fn decide(
        &self,
        step_description: &str,
        context: &str,
    ) -> Result<StepDirective, OracleError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let mut script = self.script.lock().unwrap();
        script.observe();
        script
            .decide_calls
            .push((step_description.to_string(), context.to_string()));
        script
            .directives
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Unavailable("no scripted directive".into())))
    }

    async fn revise(
        &self,
        title: &str,
        completed_steps: &[Step],
        failed_step: &Step,
    ) -> Result<Vec<String>, OracleError> {
        let mut script = self.script.lock().unwrap();
        script.observe();
        script.revise_calls.push(RevisionCall {
            title: title.to_string(),
            completed_steps: completed_steps.to_vec(),
            failed_step: failed_step.clone(),
        });
        script
            .revisions
            .pop_front()
            .ok_or_else(|| OracleError::Unavailable("no scripted revision".into()))
    }

    async fn advise(&self, _plan_summary: &str) -> Result<Vec<String>, OracleError> {
        Ok(self.script.lock().unwrap().advice.clone())
    }
}
