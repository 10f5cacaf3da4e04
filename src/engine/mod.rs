mod context;
mod error;
mod registry;
mod runner;
mod steps;

pub use context::{WorkflowContext, WorkflowSettings};
pub use runner::run_workflow;
pub use steps::{CreateInstances, Step};
