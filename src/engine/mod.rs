mod command;
mod oracle;
mod plan_engine;
pub mod prompts;
#[cfg(test)]
mod testing;

pub use command::{parse_reply, CommandOracle};
pub use oracle::{NextAction, Oracle, PlanDraft, StepDirective};
pub use plan_engine::{PlanEngine, PlanEvent};
