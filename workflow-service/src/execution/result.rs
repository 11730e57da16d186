// Execution Results
// Step, job instance and workflow outcomes; serialized for `--report`

use crate::expression::Value;
use crate::workflow::TriggerEvent;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Result of a single step, before or after continue-on-error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl StepStatus {
    /// Value of `steps.<id>.outcome` / `steps.<id>.conclusion`
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Cancelled => "cancelled",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
    /// Result of the step itself
    pub outcome: StepStatus,
    /// Result after `continue-on-error`
    pub conclusion: StepStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub outputs: IndexMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl StepResult {
    pub fn skipped(index: usize, id: Option<String>, name: String) -> Self {
        Self {
            index,
            id,
            name,
            outcome: StepStatus::Skipped,
            conclusion: StepStatus::Skipped,
            exit_code: None,
            error: None,
            duration: Duration::ZERO,
            outputs: IndexMap::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// The step ran (it was not skipped by its condition)
    pub fn ran(&self) -> bool {
        self.outcome != StepStatus::Skipped
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceResult {
    pub job_id: String,
    pub display_name: String,
    /// Position in the job's expanded matrix
    pub index: usize,
    pub matrix: IndexMap<String, Value>,
    pub runs_on: Vec<String>,
    pub status: JobStatus,
    /// A failure here does not fail the workflow (`continue-on-error` on the job)
    pub continue_on_error: bool,
    /// Why the instance was skipped or cancelled before running, or why it errored
    pub reason: Option<String>,
    pub steps: Vec<StepResult>,
    /// Variables exported through `GITHUB_ENV`, final values
    pub exported_env: IndexMap<String, String>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
}

impl InstanceResult {
    /// Whether this instance makes the workflow fail
    pub fn is_blocking_failure(&self) -> bool {
        match self.status {
            JobStatus::Failure => !self.continue_on_error,
            JobStatus::Cancelled => true,
            JobStatus::Success | JobStatus::Skipped => false,
        }
    }

    /// Step by id or display name
    pub fn step(&self, key: &str) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|s| s.id.as_deref() == Some(key))
            .or_else(|| self.steps.iter().find(|s| s.name == key))
    }
}

/// Outcome of a whole workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow: String,
    pub event: TriggerEvent,
    /// False when the event does not match the workflow's `on:`
    pub triggered: bool,
    /// In plan order, whatever order they finished in
    pub instances: Vec<InstanceResult>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
}

impl WorkflowResult {
    pub fn success(&self) -> bool {
        !self.instances.iter().any(InstanceResult::is_blocking_failure)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.instances.iter().filter(|i| i.status == status).count()
    }

    pub fn failed_instances(&self) -> impl Iterator<Item = &InstanceResult> {
        self.instances
            .iter()
            .filter(|i| i.status == JobStatus::Failure)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
