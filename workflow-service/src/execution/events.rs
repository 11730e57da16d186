// Execution Events
// Progress reporting and event types for workflow execution

use crate::execution::result::{JobStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during workflow execution.
///
/// Instances run concurrently, so every job and step event names the
/// instance (its display name) it belongs to.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Workflow execution started
    WorkflowStarted {
        workflow_name: String,
        total_instances: usize,
    },

    /// Workflow execution completed
    WorkflowCompleted {
        workflow_name: String,
        success: bool,
        duration: Duration,
    },

    /// The event does not trigger this workflow
    WorkflowSkipped {
        workflow_name: String,
        reason: String,
    },

    /// Job instance started
    JobStarted {
        job_id: String,
        instance: String,
        total_steps: usize,
    },

    /// Job instance completed
    JobCompleted {
        job_id: String,
        instance: String,
        status: JobStatus,
        duration: Duration,
    },

    /// Job instance was skipped or cancelled before starting
    JobSkipped {
        job_id: String,
        instance: String,
        status: JobStatus,
        reason: String,
    },

    /// Step execution started
    StepStarted {
        instance: String,
        step_name: String,
        step_index: usize,
    },

    /// Step output (stdout/stderr)
    StepOutput {
        instance: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        instance: String,
        step_name: String,
        step_index: usize,
        outcome: StepStatus,
        conclusion: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
        error: Option<String>,
    },

    /// Step was skipped (condition evaluated to false)
    StepSkipped {
        instance: String,
        step_name: String,
        step_index: usize,
        reason: String,
    },

    /// A step exported a variable through GITHUB_ENV
    EnvExported {
        instance: String,
        name: String,
        value: String,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        instance: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a step output event
    pub fn step_output(
        instance: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            instance: instance.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, instance: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            instance,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, instance: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            instance,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, instance: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            instance,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::WorkflowStarted {
            workflow_name: "CI".into(),
            total_instances: 13,
        });
        tx.send_event(ExecutionEvent::step_output("test (ubuntu-latest)", 2, "Python 3.8.10", false));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(
            event1,
            ExecutionEvent::WorkflowStarted {
                total_instances: 13,
                ..
            }
        ));

        let event2 = rx.recv().await.unwrap();
        if let ExecutionEvent::StepOutput {
            instance,
            step_index,
            output,
            is_error,
        } = event2
        {
            assert_eq!(instance, "test (ubuntu-latest)");
            assert_eq!(step_index, 2);
            assert_eq!(output, "Python 3.8.10");
            assert!(!is_error);
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_log_constructors() {
        let event = ExecutionEvent::warning("coverage.xml not found", Some("docs".into()));
        assert!(matches!(
            event,
            ExecutionEvent::Log {
                level: LogLevel::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::info("test", None));
    }
}
