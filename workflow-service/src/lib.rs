// gridrun workflow service
// Parses GitHub Actions-style workflows and runs their matrix instances locally

pub mod error;
pub mod execution;
pub mod expression;
pub mod runners;
pub mod utils;
pub mod workflow;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export workflow types
pub use workflow::{Severity, TriggerEvent, ValidationIssue, Workflow, WorkflowParser};

// Re-export expression types
pub use expression::{EvalError, ExpressionContext, ExpressionEngine, Value};

// Re-export execution types
pub use execution::{
    progress_channel, CancelHandle, ExecutionEvent, ExecutorConfig, InstanceResult, JobStatus,
    MatrixExpander, MatrixInstance, PlannedInstance, Platform, ProgressReceiver, ProgressSender,
    StepResult, StepStatus, WorkflowExecutor, WorkflowResult,
};

// Re-export runner types
pub use runners::{ActionRegistry, RunnerRegistry, ShellRunner};
