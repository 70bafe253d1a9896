use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use super::oracle::{NextAction, Oracle, StepDirective};
use crate::activity::ActivityLog;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::plan::{Plan, StepStatus};
use crate::sandbox::ProcessRunner;

/// Capacity of the event channel. Slow observers lag instead of blocking the engine.
const EVENT_CAPACITY: usize = 256;

/// Ordered notifications about plan mutations
#[derive(Debug, Clone, PartialEq)]
pub enum PlanEvent {
    PlanCreated {
        title: String,
        steps: usize,
    },
    StepStarted {
        index: usize,
        step_id: String,
        description: String,
    },
    StepFinished {
        index: usize,
        step_id: String,
        status: StepStatus,
        next: NextAction,
    },
    PlanRevised {
        from_index: usize,
        steps: usize,
    },
    PlanFinished {
        output: String,
    },
    Reset,
}

struct EngineState {
    plan: Option<Plan>,
    /// Bumped whenever the visible plan is replaced from outside a run
    generation: u64,
    last_output: Option<String>,
}

/// Drives a plan step by step through an [`Oracle`].
///
/// The engine is the single writer of the plan. Readers get copies through
/// [`PlanEngine::plan`], the watch channel from [`PlanEngine::subscribe`] or
/// the event stream from [`PlanEngine::events`].
pub struct PlanEngine {
    oracle: Arc<dyn Oracle>,
    config: EngineConfig,
    runner: Option<ProcessRunner>,
    activity: ActivityLog,
    state: Mutex<EngineState>,
    /// Set while a `run_plan` call is in flight, detached or not
    running: AtomicBool,
    plan_tx: watch::Sender<Option<Plan>>,
    events: broadcast::Sender<PlanEvent>,
}

impl PlanEngine {
    pub fn new(oracle: Arc<dyn Oracle>, config: EngineConfig) -> Self {
        let (plan_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            oracle,
            config,
            runner: None,
            activity: ActivityLog::new(),
            state: Mutex::new(EngineState {
                plan: None,
                generation: 0,
                last_output: None,
            }),
            running: AtomicBool::new(false),
            plan_tx,
            events,
        }
    }

    /// Sandbox used for produced code when `execute_code` is enabled
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Copy of the visible plan
    pub async fn plan(&self) -> Option<Plan> {
        self.state.lock().await.plan.clone()
    }

    /// Output of the last run that finished without being detached by a reset
    pub async fn last_output(&self) -> Option<String> {
        self.state.lock().await.last_output.clone()
    }

    /// Latest visible plan, updated after every published mutation
    pub fn subscribe(&self) -> watch::Receiver<Option<Plan>> {
        self.plan_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }

    /// Replace the visible plan from outside a run
    async fn install(&self, plan: Option<Plan>, event: PlanEvent) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.plan = plan.clone();
        state.last_output = None;
        self.plan_tx.send_replace(plan);
        let _ = self.events.send(event);
    }

    /// Publish a run's mutation unless the run was detached by a reset
    async fn publish(&self, generation: u64, plan: &Plan, event: PlanEvent) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(?event, "plan detached, mutation not published");
            return;
        }
        state.plan = Some(plan.clone());
        self.plan_tx.send_replace(Some(plan.clone()));
        let _ = self.events.send(event);
    }

    /// Ask the oracle for a plan and make it the active one
    #[instrument(skip(self))]
    pub async fn create_plan(&self, objective: &str) -> Result<Plan, EngineError> {
        self.activity
            .record(format!("Creating plan for objective: {}", objective));

        let draft = self.oracle.plan(objective).await.map_err(|e| {
            self.activity.record(format!("Planning failed: {}", e));
            EngineError::Planning(e)
        })?;

        let descriptions: Vec<String> = draft
            .steps
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if descriptions.is_empty() {
            self.activity.record("Planning produced no steps");
            return Err(EngineError::NoValidPlan);
        }

        let plan = Plan::new(draft.title, descriptions);
        info!(title = %plan.title, steps = plan.len(), "plan created");
        self.activity.record(format!(
            "Plan '{}' created with {} steps",
            plan.title,
            plan.len()
        ));

        let event = PlanEvent::PlanCreated {
            title: plan.title.clone(),
            steps: plan.len(),
        };
        self.install(Some(plan.clone()), event).await;
        Ok(plan)
    }

    /// Make a previously persisted plan the active one
    pub async fn restore(&self, plan: Plan) {
        self.activity.record(format!(
            "Restored plan '{}' at step {}/{}",
            plan.title,
            plan.cursor(),
            plan.len()
        ));
        let event = PlanEvent::PlanCreated {
            title: plan.title.clone(),
            steps: plan.len(),
        };
        self.install(Some(plan), event).await;
    }

    /// Clear the active plan.
    ///
    /// An in-flight [`PlanEngine::run_plan`] is not aborted: it keeps working
    /// on its own copy, stops publishing, and its return value stays
    /// authoritative.
    pub async fn reset(&self) {
        self.activity.record("Engine reset");
        self.install(None, PlanEvent::Reset).await;
    }

    /// Ask the oracle for suggestions on the active plan
    pub async fn request_feedback(&self) -> Result<Vec<String>, EngineError> {
        let plan = self.plan().await.ok_or(EngineError::NoActivePlan)?;

        self.activity
            .record(format!("Requesting feedback on '{}'", plan.title));
        self.oracle
            .advise(&plan.summary())
            .await
            .map_err(EngineError::Feedback)
    }

    /// Execute the active plan until it completes or an oracle call fails.
    ///
    /// A `Retry` directive repeats the same step. Unless `max_retries` is
    /// configured there is no ceiling, so an oracle that keeps answering
    /// `Retry` keeps this loop running.
    ///
    /// Only one run may be in flight per engine, including a run detached by
    /// [`PlanEngine::reset`]; a second call fails with
    /// [`EngineError::RunInProgress`].
    #[instrument(skip(self))]
    pub async fn run_plan(&self) -> Result<String, EngineError> {
        let _running = RunGuard::acquire(&self.running).ok_or(EngineError::RunInProgress)?;

        let (mut plan, generation) = {
            let state = self.state.lock().await;
            match &state.plan {
                Some(plan) if !plan.is_complete() => (plan.clone(), state.generation),
                _ => return Err(EngineError::NoActivePlan),
            }
        };

        self.activity.record(format!("Running plan '{}'", plan.title));
        let mut final_output: Option<String> = None;
        let mut retries: u32 = 0;

        while let Some(index) = plan.active_index() {
            let (step_id, description) = {
                let step = &mut plan.steps_mut()[index];
                step.set_status(StepStatus::InProgress);
                (step.id.clone(), step.description.clone())
            };
            info!(index, step = %description, "executing step");
            self.activity
                .record(format!("Step {}: {}", index + 1, description));
            self.publish(
                generation,
                &plan,
                PlanEvent::StepStarted {
                    index,
                    step_id: step_id.clone(),
                    description: description.clone(),
                },
            )
            .await;

            let context = plan.completed_context();
            let directive = match self.oracle.decide(&description, &context).await {
                Ok(directive) => directive,
                Err(source) => {
                    warn!(index, err = %source, "oracle failed during step");
                    self.activity
                        .record(format!("Step {} aborted: {}", index + 1, source));
                    return Err(EngineError::StepExecution { index, source });
                }
            };

            self.apply_directive(&mut plan, index, &directive).await?;
            let status = plan.steps()[index].status;
            self.activity.record(format!(
                "Step {} {} ({:?})",
                index + 1,
                status.display_name().to_lowercase(),
                directive.next
            ));
            self.publish(
                generation,
                &plan,
                PlanEvent::StepFinished {
                    index,
                    step_id,
                    status,
                    next: directive.next,
                },
            )
            .await;

            let was_last = index + 1 == plan.len();
            match directive.next {
                NextAction::ContinueToNext => {
                    retries = 0;
                    plan.advance();
                }
                NextAction::Retry => {
                    retries += 1;
                    if let Some(limit) = self.config.max_retries {
                        if retries > limit {
                            self.activity.record(format!(
                                "Step {} exceeded {} retries",
                                index + 1,
                                limit
                            ));
                            return Err(EngineError::RetryLimitExceeded { index, limit });
                        }
                    }
                    debug!(index, retries, "retrying step");
                }
                NextAction::ModifyPlan => {
                    retries = 0;
                    plan = self.regenerate(&plan, index).await?;
                    self.activity.record(format!(
                        "Plan revised from step {}: {} steps now",
                        index + 1,
                        plan.len()
                    ));
                    self.publish(
                        generation,
                        &plan,
                        PlanEvent::PlanRevised {
                            from_index: index,
                            steps: plan.len(),
                        },
                    )
                    .await;
                }
                NextAction::Complete => {
                    plan.finish();
                    final_output = Some(directive.output.clone());
                }
            }

            if directive.succeeded && was_last {
                final_output = Some(directive.output);
            }
        }

        let output = final_output.unwrap_or_default();
        info!(title = %plan.title, "plan finished");
        self.activity
            .record(format!("Plan '{}' finished", plan.title));
        {
            let mut state = self.state.lock().await;
            if state.generation == generation {
                state.last_output = Some(output.clone());
            }
        }
        self.publish(
            generation,
            &plan,
            PlanEvent::PlanFinished {
                output: output.clone(),
            },
        )
        .await;

        Ok(output)
    }

    /// Record the directive on the step, running produced code if enabled
    async fn apply_directive(
        &self,
        plan: &mut Plan,
        index: usize,
        directive: &StepDirective,
    ) -> Result<(), EngineError> {
        let execution = match (&self.runner, &directive.produced_code) {
            (Some(runner), Some(code)) if self.config.execute_code => {
                let result = runner.run_default(code, self.config.code_language).await?;
                Some(result)
            }
            _ => None,
        };

        let step = &mut plan.steps_mut()[index];
        step.result = Some(directive.output.clone());
        step.code = directive.produced_code.clone();
        step.execution = execution;
        step.set_status(if directive.succeeded {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        });
        Ok(())
    }

    /// Replace the steps from `index` on with a fresh continuation
    async fn regenerate(&self, plan: &Plan, index: usize) -> Result<Plan, EngineError> {
        let steps = plan.steps();
        let new_steps = self
            .oracle
            .revise(&plan.title, &steps[..index], &steps[index])
            .await
            .map_err(|source| {
                self.activity
                    .record(format!("Plan revision failed: {}", source));
                EngineError::StepExecution { index, source }
            })?;
        Ok(plan.regenerate(index, new_steps))
    }
}

/// Holds the engine's in-flight flag until dropped
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
