// Execution Engine Module
// Matrix planning, per-instance contexts and concurrent instance execution

pub mod context;
pub mod events;
pub mod executor;
pub mod instance;
pub mod matrix;
pub mod result;

// Re-export key types
pub use context::{InstanceContext, RunSettings};
pub use events::{
    progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender,
};
pub use executor::{CancelHandle, ExecutorConfig, WorkflowExecutor};
pub use instance::InstanceRun;
pub use matrix::{MatrixExpander, MatrixInstance, PlannedInstance, Platform};
pub use result::{InstanceResult, JobStatus, StepResult, StepStatus, WorkflowResult};
