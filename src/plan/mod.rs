mod plan;
mod step;
mod store;

pub use plan::{Plan, NO_CONTEXT};
pub use step::{Step, StepStatus};
pub use store::PlanStore;
