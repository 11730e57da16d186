pub mod models;
pub mod parser;
pub mod trigger;

pub use models::{
    Defaults, EventConfig, Job, Matrix, RunDefaults, RunsOn, ScalarString, Step, Strategy, Trigger,
    Workflow,
};
pub use parser::{Severity, ValidationIssue, WorkflowParser};
pub use trigger::TriggerEvent;
