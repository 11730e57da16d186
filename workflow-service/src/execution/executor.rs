// Workflow Executor
// Matches the trigger, plans instances and runs them concurrently

use crate::execution::context::RunSettings;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::instance::{not_run, InstanceRun};
use crate::execution::matrix::{MatrixExpander, PlannedInstance, Platform};
use crate::execution::result::{InstanceResult, JobStatus, WorkflowResult};
use crate::runners::shell::wait_cancelled;
use crate::runners::RunnerRegistry;
use crate::workflow::{TriggerEvent, Workflow};
use crate::{utils, ServiceError, ServiceResult};

use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Configuration for workflow execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// The checkout steps run in (`GITHUB_WORKSPACE`)
    pub working_dir: PathBuf,
    /// Where uploads are collected (default `<working_dir>/.gridrun/artifacts`)
    pub artifacts_dir: Option<PathBuf>,
    /// Maximum instances running at once across all jobs (0 = unlimited)
    pub max_parallel_instances: usize,
    /// Timeout for steps without `timeout-minutes`
    pub default_step_timeout: Option<Duration>,
    /// Skip instances whose `runs-on` names another platform
    pub host_only: bool,
    /// Skip `uses:` steps without a built-in implementation instead of failing them
    pub allow_unknown_actions: bool,
    /// Layered over the host environment
    pub extra_env: IndexMap<String, String>,
    /// Only run these jobs (empty = all)
    pub job_filter: Vec<String>,
    /// Only run instances whose matrix values match every pair
    pub matrix_filter: Vec<(String, String)>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            working_dir: utils::resolve_working_dir(),
            artifacts_dir: None,
            max_parallel_instances: 0,
            default_step_timeout: None,
            host_only: false,
            allow_unknown_actions: false,
            extra_env: IndexMap::new(),
            job_filter: Vec::new(),
            matrix_filter: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join(".gridrun").join("artifacts"))
    }
}

/// Cancels every instance of a running (or future) `execute`
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Per-job scheduling state
struct JobGate {
    semaphore: Option<Arc<Semaphore>>,
    cancel: Arc<watch::Sender<bool>>,
    fail_fast: bool,
}

/// Workflow executor
pub struct WorkflowExecutor {
    workflow: Arc<Workflow>,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
    runners: Arc<RunnerRegistry>,
    cancel: Arc<watch::Sender<bool>>,
}

impl WorkflowExecutor {
    pub fn new(workflow: Workflow) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            workflow: Arc::new(workflow),
            config: ExecutorConfig::default(),
            event_tx: None,
            runners: Arc::new(RunnerRegistry::new()),
            cancel: Arc::new(cancel),
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Replace the shell runner and action registry
    pub fn with_runners(mut self, runners: RunnerRegistry) -> Self {
        self.runners = Arc::new(runners);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn workflow_name(&self) -> String {
        self.workflow
            .name
            .clone()
            .unwrap_or_else(|| "workflow".to_string())
    }

    /// Instances that `execute` would run, after the job and matrix filters
    pub fn plan(&self) -> ServiceResult<Vec<PlannedInstance>> {
        for job_id in &self.config.job_filter {
            if !self.workflow.jobs.contains_key(job_id) {
                return Err(ServiceError::invalid(format!("unknown job '{}'", job_id)));
            }
        }

        Ok(MatrixExpander::plan(&self.workflow)
            .into_iter()
            .filter(|p| self.config.job_filter.is_empty() || self.config.job_filter.contains(&p.job_id))
            .filter(|p| p.instance.matches_filter(&self.config.matrix_filter))
            .collect())
    }

    /// Run the workflow for `event`.
    ///
    /// A workflow the event does not trigger is not an error; the result has
    /// `triggered == false` and no instances.
    pub async fn execute(&self, event: &TriggerEvent) -> ServiceResult<WorkflowResult> {
        let start = Instant::now();
        let workflow_name = self.workflow_name();

        if !self.workflow.on.matches(event)? {
            let reason = format!("{} does not trigger this workflow", event);
            tracing::info!("{}: {}", workflow_name, reason);
            self.event_tx.send_event(ExecutionEvent::WorkflowSkipped {
                workflow_name: workflow_name.clone(),
                reason,
            });
            return Ok(WorkflowResult {
                workflow: workflow_name,
                event: event.clone(),
                triggered: false,
                instances: Vec::new(),
                duration: start.elapsed(),
            });
        }

        let plan = self.plan()?;
        tracing::info!("{}: {} instance(s) planned for {}", workflow_name, plan.len(), event);
        self.event_tx.send_event(ExecutionEvent::WorkflowStarted {
            workflow_name: workflow_name.clone(),
            total_instances: plan.len(),
        });

        let mut host_env = utils::host_env();
        host_env.extend(self.config.extra_env.clone());
        let workspace = self
            .config
            .working_dir
            .canonicalize()
            .unwrap_or_else(|_| self.config.working_dir.clone());
        let settings = Arc::new(RunSettings {
            workflow_name: workflow_name.clone(),
            event: event.clone(),
            run_id: run_id(),
            workspace,
            host_env,
        });
        let config = Arc::new(self.config.clone());

        let global = (self.config.max_parallel_instances > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_parallel_instances)));

        // Each job gets its own cancel channel so fail-fast stays within the job;
        // the executor-wide cancel is forwarded into all of them.
        let mut forwarders = JoinSet::new();
        let mut gates: IndexMap<&str, JobGate> = IndexMap::new();
        for (job_id, job) in &self.workflow.jobs {
            let (tx, _) = watch::channel(*self.cancel.borrow());
            let tx = Arc::new(tx);
            let strategy = job.strategy.as_ref();

            let mut global_rx = self.cancel.subscribe();
            let job_tx = Arc::clone(&tx);
            forwarders.spawn(async move {
                if global_rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                    job_tx.send_replace(true);
                }
            });

            gates.insert(
                job_id.as_str(),
                JobGate {
                    semaphore: strategy
                        .and_then(|s| s.max_parallel)
                        .filter(|n| *n > 0)
                        .map(|n| Arc::new(Semaphore::new(n))),
                    cancel: tx,
                    fail_fast: strategy.is_some_and(|s| s.fail_fast),
                },
            );
        }

        let mut slots: Vec<Option<InstanceResult>> = vec![None; plan.len()];
        let mut tasks = JoinSet::new();

        for (position, planned) in plan.iter().enumerate() {
            let Some(gate) = gates.get(planned.job_id.as_str()) else {
                continue;
            };
            let run = InstanceRun {
                workflow: Arc::clone(&self.workflow),
                planned: planned.clone(),
                settings: Arc::clone(&settings),
                config: Arc::clone(&config),
                runners: Arc::clone(&self.runners),
                progress: self.event_tx.clone(),
                cancel: gate.cancel.subscribe(),
            };

            if self.config.host_only {
                if let Some(platform) = planned.platform.filter(|p| *p != Platform::host()) {
                    slots[position] = Some(run.not_started(
                        JobStatus::Skipped,
                        format!("runs on {}, host is {}", platform, Platform::host()),
                    ));
                    continue;
                }
            }

            let global = global.clone();
            let job_semaphore = gate.semaphore.clone();
            let job_cancel = Arc::clone(&gate.cancel);
            let fail_fast = gate.fail_fast;

            tracing::debug!(instance = %planned.display_name, "spawning instance");
            tasks.spawn(async move {
                let acquired = tokio::select! {
                    biased;
                    _ = wait_cancelled(Some(run.cancel.clone())) => None,
                    permits = acquire(job_semaphore, global) => Some(permits),
                };

                let Some(permits) = acquired else {
                    return (position, run.not_started(JobStatus::Cancelled, "cancelled before start"));
                };

                let result = run.run().await;
                if fail_fast && result.status == JobStatus::Failure {
                    tracing::warn!(job = %result.job_id, "fail-fast: cancelling remaining instances");
                    job_cancel.send_replace(true);
                }
                drop(permits);
                (position, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, result)) => slots[position] = Some(result),
                Err(e) => tracing::error!("instance task failed: {}", e),
            }
        }
        forwarders.abort_all();

        let instances: Vec<InstanceResult> = slots
            .into_iter()
            .zip(&plan)
            .map(|(slot, planned)| {
                slot.unwrap_or_else(|| {
                    not_run(planned, false, JobStatus::Failure, "instance task panicked")
                })
            })
            .collect();

        let result = WorkflowResult {
            workflow: workflow_name.clone(),
            event: event.clone(),
            triggered: true,
            instances,
            duration: start.elapsed(),
        };

        tracing::info!(
            "{}: {} succeeded, {} failed, {} cancelled, {} skipped in {:.2?}",
            workflow_name,
            result.count(JobStatus::Success),
            result.count(JobStatus::Failure),
            result.count(JobStatus::Cancelled),
            result.count(JobStatus::Skipped),
            result.duration
        );
        self.event_tx.send_event(ExecutionEvent::WorkflowCompleted {
            workflow_name,
            success: result.success(),
            duration: result.duration,
        });

        Ok(result)
    }
}

/// Take a job slot, then a global one
async fn acquire(
    job: Option<Arc<Semaphore>>,
    global: Option<Arc<Semaphore>>,
) -> Vec<OwnedSemaphorePermit> {
    let mut permits = Vec::with_capacity(2);
    for semaphore in [job, global].into_iter().flatten() {
        if let Ok(permit) = semaphore.acquire_owned().await {
            permits.push(permit);
        }
    }
    permits
}

fn run_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::execution::result::StepStatus;
    use crate::workflow::WorkflowParser;

    const MATRIX_WORKFLOW: &str = r#"
name: Matrix
on:
  push:
    branches: [main]
jobs:
  test:
    name: test
    strategy:
      matrix:
        install: [pip, wheel]
        flags: ['', '--pre']
        include:
          - install: sdist
            flags: '--no-deps'
    env:
      INSTALL_TYPE: ${{ matrix.install }}
      EXTRA_PIP_FLAGS: ${{ matrix.flags }}
    steps:
      - id: show
        run: echo "$INSTALL_TYPE[$EXTRA_PIP_FLAGS]"
"#;

    fn executor(yaml: &str, workspace: &tempfile::TempDir) -> WorkflowExecutor {
        let config = ExecutorConfig {
            working_dir: workspace.path().to_path_buf(),
            ..Default::default()
        };
        WorkflowExecutor::new(WorkflowParser::parse(yaml).unwrap()).with_config(config)
    }

    #[tokio::test]
    async fn test_instances_isolated_and_in_plan_order() {
        let workspace = tempfile::tempdir().unwrap();
        let result = executor(MATRIX_WORKFLOW, &workspace)
            .execute(&TriggerEvent::push("main"))
            .await
            .unwrap();

        assert!(result.triggered);
        assert!(result.success());
        let outputs: Vec<&str> = result
            .instances
            .iter()
            .map(|i| i.step("show").unwrap().stdout.as_str())
            .collect();
        assert_eq!(
            outputs,
            vec!["pip[]", "pip[--pre]", "wheel[]", "wheel[--pre]", "sdist[--no-deps]"]
        );
    }

    #[tokio::test]
    async fn test_untriggered_event() {
        let workspace = tempfile::tempdir().unwrap();
        let (tx, mut rx) = progress_channel();
        let result = executor(MATRIX_WORKFLOW, &workspace)
            .with_progress(tx)
            .execute(&TriggerEvent::push("feature/x"))
            .await
            .unwrap();

        assert!(!result.triggered);
        assert!(result.instances.is_empty());
        assert!(result.success());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::WorkflowSkipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_filters() {
        let workspace = tempfile::tempdir().unwrap();
        let mut exec = executor(MATRIX_WORKFLOW, &workspace);
        exec.config.matrix_filter = vec![("install".to_string(), "wheel".to_string())];
        assert_eq!(exec.plan().unwrap().len(), 2);

        exec.config.job_filter = vec!["nope".to_string()];
        assert!(exec.plan().is_err());
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let workspace = tempfile::tempdir().unwrap();
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        n: [1, 2, 3]
    steps:
      - id: check
        run: test "${{ matrix.n }}" != 2
"#;
        let result = executor(yaml, &workspace)
            .execute(&TriggerEvent::push("main"))
            .await
            .unwrap();

        let statuses: Vec<JobStatus> = result.instances.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Success, JobStatus::Failure, JobStatus::Success]
        );
        assert!(!result.success());
        assert_eq!(result.failed_instances().count(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_queued_siblings() {
        let workspace = tempfile::tempdir().unwrap();
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      fail-fast: true
      max-parallel: 1
      matrix:
        n: [1, 2, 3]
    steps:
      - run: test "${{ matrix.n }}" != 1
  other:
    steps:
      - id: ok
        run: echo fine
"#;
        let result = executor(yaml, &workspace)
            .execute(&TriggerEvent::push("main"))
            .await
            .unwrap();

        assert_eq!(result.instances[0].status, JobStatus::Failure);
        assert_eq!(result.instances[1].status, JobStatus::Cancelled);
        assert_eq!(result.instances[2].status, JobStatus::Cancelled);
        // fail-fast stays inside the job
        assert_eq!(result.instances[3].status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel_handle_before_execute() {
        let workspace = tempfile::tempdir().unwrap();
        let exec = executor(MATRIX_WORKFLOW, &workspace);
        let handle = exec.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());

        let result = exec.execute(&TriggerEvent::push("main")).await.unwrap();
        assert_eq!(result.count(JobStatus::Cancelled), 5);
        assert!(!result.success());
        assert!(result.instances[0]
            .steps
            .iter()
            .all(|s| s.outcome == StepStatus::Skipped));
    }

    #[tokio::test]
    async fn test_host_only_skips_other_platforms() {
        let workspace = tempfile::tempdir().unwrap();
        let other = if Platform::host() == Platform::Windows {
            "ubuntu-latest"
        } else {
            "windows-latest"
        };
        let yaml = format!(
            r#"
on: push
jobs:
  test:
    runs-on: ${{{{ matrix.os }}}}
    strategy:
      matrix:
        os: [{}]
    steps:
      - run: echo hi
"#,
            other
        );
        let mut exec = executor(&yaml, &workspace);
        exec.config.host_only = true;
        let result = exec.execute(&TriggerEvent::push("main")).await.unwrap();

        assert_eq!(result.instances[0].status, JobStatus::Skipped);
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_global_parallel_limit_and_events() {
        let workspace = tempfile::tempdir().unwrap();
        let (tx, mut rx) = progress_channel();
        let mut exec = executor(MATRIX_WORKFLOW, &workspace).with_progress(tx);
        exec.config.max_parallel_instances = 1;
        exec.config.extra_env.insert("GRIDRUN_TEST".to_string(), "1".to_string());

        let result = exec.execute(&TriggerEvent::push("main")).await.unwrap();
        assert!(result.success());
        drop(exec);

        let mut started = 0;
        let mut completed = false;
        while let Some(event) = rx.recv().await {
            match event {
                ExecutionEvent::JobStarted { .. } => started += 1,
                ExecutionEvent::WorkflowCompleted { success, .. } => completed = success,
                _ => {}
            }
        }
        assert_eq!(started, 5);
        assert!(completed);
    }
}
