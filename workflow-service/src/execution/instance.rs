// Job Instance Runner
// Runs one matrix instance: its steps in order, inside its own environment

use crate::execution::context::{InstanceContext, RunSettings};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::executor::ExecutorConfig;
use crate::execution::matrix::PlannedInstance;
use crate::execution::result::{InstanceResult, JobStatus, StepResult, StepStatus};
use crate::expression::{ExpressionEngine, StepContext, StrategyContext};
use crate::runners::shell::{sleep_for, wait_cancelled};
use crate::runners::{
    ActionContext, ActionInputs, ActionRef, CancelReceiver, FileCommands, OutputCallback,
    RunnerRegistry, Shell, ShellConfig,
};
use crate::workflow::{Job, Step, Workflow};
use crate::{ServiceError, ServiceResult};

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything one instance task needs; moved into the task that runs it
pub struct InstanceRun {
    pub workflow: Arc<Workflow>,
    pub planned: PlannedInstance,
    pub settings: Arc<RunSettings>,
    pub config: Arc<ExecutorConfig>,
    pub runners: Arc<RunnerRegistry>,
    pub progress: Option<ProgressSender>,
    /// Fail-fast siblings and Ctrl-C flip this
    pub cancel: CancelReceiver,
}

/// What running (not skipping) a step produced
struct StepRun {
    status: StepStatus,
    exit_code: Option<i32>,
    error: Option<String>,
    outputs: IndexMap<String, String>,
    stdout: String,
    stderr: String,
}

impl StepRun {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failure,
            exit_code: None,
            error: Some(error.into()),
            outputs: IndexMap::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Time limit handed to a single step
#[derive(Debug, Clone, Copy)]
struct StepLimit {
    timeout: Option<Duration>,
    /// The limit is what is left of the job's `timeout-minutes`
    job_bound: bool,
}

impl InstanceRun {
    pub async fn run(self) -> InstanceResult {
        let start = Instant::now();
        let workflow = Arc::clone(&self.workflow);
        let Some(job) = workflow.jobs.get(&self.planned.job_id) else {
            return not_run(
                &self.planned,
                false,
                JobStatus::Failure,
                format!("job '{}' not found", self.planned.job_id),
            );
        };

        let runner_temp = match tempfile::Builder::new().prefix("gridrun-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return self.not_started(JobStatus::Failure, format!("runner temp: {}", e))
            }
        };

        let strategy = StrategyContext {
            fail_fast: job.strategy.as_ref().is_some_and(|s| s.fail_fast),
            job_index: self.planned.instance.index,
            job_total: self.planned.job_total,
            max_parallel: job
                .strategy
                .as_ref()
                .and_then(|s| s.max_parallel)
                .unwrap_or(self.planned.job_total),
        };

        let mut ctx =
            InstanceContext::new(&self.settings, &self.planned, Some(strategy), runner_temp.path());
        if let Err(e) = ctx.load_env(&workflow.env, &job.env) {
            return self.not_started(JobStatus::Failure, format!("env: {}", e));
        }

        if let Some(condition) = &job.if_condition {
            match ctx.engine(ctx.condition_env()).evaluate_condition(condition) {
                Ok(true) => {}
                Ok(false) => {
                    return self.not_started(
                        JobStatus::Skipped,
                        format!("condition '{}' evaluated to false", condition),
                    )
                }
                Err(e) => {
                    return self.not_started(
                        JobStatus::Failure,
                        format!("condition '{}' failed to evaluate: {}", condition, e),
                    )
                }
            }
        }

        tracing::info!(
            job = %self.planned.job_id,
            instance = %self.planned.display_name,
            "instance started"
        );
        self.progress.send_event(ExecutionEvent::JobStarted {
            job_id: self.planned.job_id.clone(),
            instance: self.planned.display_name.clone(),
            total_steps: job.steps.len(),
        });

        let deadline = job.timeout_minutes.and_then(minutes).map(|d| start + d);
        let artifacts_dir = self
            .config
            .artifacts_dir()
            .join(&self.planned.job_id)
            .join(self.planned.slug());

        let mut reason = None;
        let mut steps = Vec::with_capacity(job.steps.len());

        for (index, step) in job.steps.iter().enumerate() {
            if !ctx.status.cancelled {
                if *self.cancel.borrow() {
                    ctx.status.cancelled = true;
                    reason = Some("cancelled".to_string());
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    ctx.status.cancelled = true;
                    reason = Some(job_timeout_message(job));
                }
            }

            let result = self
                .step(&mut ctx, job, step, index, runner_temp.path(), &artifacts_dir, deadline)
                .await;

            if result.outcome == StepStatus::Cancelled && reason.is_none() {
                reason = result.error.clone();
            }
            steps.push(result);
        }

        let status = if ctx.status.cancelled {
            JobStatus::Cancelled
        } else if ctx.status.failed {
            JobStatus::Failure
        } else {
            JobStatus::Success
        };
        if status == JobStatus::Failure && reason.is_none() {
            reason = steps
                .iter()
                .find(|s| s.conclusion == StepStatus::Failure)
                .map(|s| format!("step '{}' failed", s.name));
        }

        let duration = start.elapsed();
        tracing::info!(
            job = %self.planned.job_id,
            instance = %self.planned.display_name,
            status = %status,
            "instance finished in {:.2?}",
            duration
        );
        self.progress.send_event(ExecutionEvent::JobCompleted {
            job_id: self.planned.job_id.clone(),
            instance: self.planned.display_name.clone(),
            status,
            duration,
        });

        InstanceResult {
            job_id: self.planned.job_id.clone(),
            display_name: self.planned.display_name.clone(),
            index: self.planned.instance.index,
            matrix: self.planned.instance.values.clone(),
            runs_on: self.planned.runs_on.clone(),
            status,
            continue_on_error: job.continue_on_error,
            reason,
            steps,
            exported_env: ctx.exported_env().clone(),
            duration,
        }
    }

    /// Report an instance that ended before its first step (skipped, cancelled while queued)
    pub(crate) fn not_started(&self, status: JobStatus, reason: impl Into<String>) -> InstanceResult {
        let reason = reason.into();
        match status {
            JobStatus::Skipped => {
                tracing::info!(instance = %self.planned.display_name, "skipped: {}", reason)
            }
            JobStatus::Cancelled => {
                tracing::warn!(instance = %self.planned.display_name, "cancelled: {}", reason)
            }
            _ => tracing::error!(instance = %self.planned.display_name, "{}", reason),
        }
        self.progress.send_event(ExecutionEvent::JobSkipped {
            job_id: self.planned.job_id.clone(),
            instance: self.planned.display_name.clone(),
            status,
            reason: reason.clone(),
        });

        let job = self.workflow.jobs.get(&self.planned.job_id);
        let mut result = not_run(
            &self.planned,
            job.is_some_and(|j| j.continue_on_error),
            status,
            reason,
        );
        if let Some(job) = job {
            result.steps = job
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| StepResult::skipped(index, step.id.clone(), step.display_name()))
                .collect();
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn step(
        &self,
        ctx: &mut InstanceContext,
        job: &Job,
        step: &Step,
        index: usize,
        runner_temp: &Path,
        artifacts_dir: &Path,
        deadline: Option<Instant>,
    ) -> StepResult {
        let start = Instant::now();
        let instance = self.planned.display_name.clone();

        let condition_engine = ctx.engine(ctx.condition_env());
        let name = step.display_name();
        let name = condition_engine.interpolate(&name).unwrap_or(name);
        let condition = step.if_condition.as_deref().unwrap_or("");

        let run = match condition_engine.evaluate_condition(condition) {
            Ok(true) => None,
            Ok(false) => {
                let reason = if ctx.status.cancelled {
                    "instance cancelled".to_string()
                } else if ctx.status.failed {
                    "a previous step failed".to_string()
                } else {
                    format!("condition '{}' evaluated to false", condition)
                };
                return self.skip_step(ctx, step, index, name, reason);
            }
            Err(e) => Some(StepRun::failed(format!(
                "condition '{}' failed to evaluate: {}",
                condition, e
            ))),
        };

        if let Some(uses) = &step.uses {
            if let Ok(action) = ActionRef::parse(uses) {
                if !self.runners.actions().supports(&action) && self.config.allow_unknown_actions {
                    let reason = format!("unsupported action '{}' skipped", action);
                    self.progress
                        .send_event(ExecutionEvent::warning(reason.clone(), Some(instance)));
                    return self.skip_step(ctx, step, index, name, reason);
                }
            }
        }

        tracing::info!(instance = %instance, "step {}: {}", index + 1, name);
        self.progress.send_event(ExecutionEvent::StepStarted {
            instance: instance.clone(),
            step_name: name.clone(),
            step_index: index,
        });

        let limit = self.step_limit(ctx, step, deadline);
        let mut run = match run {
            Some(failed) => failed,
            None => match FileCommands::create(runner_temp, index) {
                Ok(commands) => {
                    let mut run = self
                        .execute(ctx, job, step, index, &commands, runner_temp, artifacts_dir, limit)
                        .await
                        .unwrap_or_else(|e| StepRun::failed(e.to_string()));
                    self.apply_file_commands(ctx, &commands, &mut run);
                    run
                }
                Err(e) => StepRun::failed(format!("file commands: {}", e)),
            },
        };

        if run.status == StepStatus::Cancelled {
            ctx.status.cancelled = true;
        }
        if run.status == StepStatus::Failure && limit.job_bound && deadline_passed(deadline) {
            run.status = StepStatus::Cancelled;
            run.error = Some(job_timeout_message(job));
            ctx.status.cancelled = true;
        }

        let outcome = run.status;
        let conclusion = if outcome == StepStatus::Failure && step.continue_on_error {
            StepStatus::Success
        } else {
            outcome
        };
        if conclusion == StepStatus::Failure {
            ctx.status.failed = true;
        }

        if let Some(id) = &step.id {
            ctx.record_step(
                id,
                StepContext {
                    outputs: run.outputs.clone(),
                    outcome: outcome.as_str().to_string(),
                    conclusion: conclusion.as_str().to_string(),
                },
            );
        }

        let duration = start.elapsed();
        match &run.error {
            Some(error) => tracing::warn!(instance = %instance, "step '{}' {}: {}", name, outcome, error),
            None => tracing::debug!(instance = %instance, "step '{}' {} in {:.2?}", name, outcome, duration),
        }
        self.progress.send_event(ExecutionEvent::StepCompleted {
            instance,
            step_name: name.clone(),
            step_index: index,
            outcome,
            conclusion,
            duration,
            exit_code: run.exit_code,
            error: run.error.clone(),
        });

        StepResult {
            index,
            id: step.id.clone(),
            name,
            outcome,
            conclusion,
            exit_code: run.exit_code,
            error: run.error,
            duration,
            outputs: run.outputs,
            stdout: run.stdout,
            stderr: run.stderr,
        }
    }

    fn skip_step(
        &self,
        ctx: &mut InstanceContext,
        step: &Step,
        index: usize,
        name: String,
        reason: String,
    ) -> StepResult {
        tracing::debug!(instance = %self.planned.display_name, "skipping '{}': {}", name, reason);
        if let Some(id) = &step.id {
            ctx.record_step(
                id,
                StepContext {
                    outputs: IndexMap::new(),
                    outcome: StepStatus::Skipped.as_str().to_string(),
                    conclusion: StepStatus::Skipped.as_str().to_string(),
                },
            );
        }
        self.progress.send_event(ExecutionEvent::StepSkipped {
            instance: self.planned.display_name.clone(),
            step_name: name.clone(),
            step_index: index,
            reason,
        });
        StepResult::skipped(index, step.id.clone(), name)
    }

    /// Step timeout capped by what is left of the job's; none once the instance is cancelled
    fn step_limit(&self, ctx: &InstanceContext, step: &Step, deadline: Option<Instant>) -> StepLimit {
        let own = step
            .timeout_minutes
            .and_then(minutes)
            .or(self.config.default_step_timeout);
        let remaining = match deadline {
            Some(d) if !ctx.status.cancelled => Some(d.saturating_duration_since(Instant::now())),
            _ => None,
        };

        match (own, remaining) {
            (Some(own), Some(left)) if left < own => StepLimit {
                timeout: Some(left),
                job_bound: true,
            },
            (None, Some(left)) => StepLimit {
                timeout: Some(left),
                job_bound: true,
            },
            (own, _) => StepLimit {
                timeout: own,
                job_bound: false,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        ctx: &mut InstanceContext,
        job: &Job,
        step: &Step,
        index: usize,
        commands: &FileCommands,
        runner_temp: &Path,
        artifacts_dir: &Path,
        limit: StepLimit,
    ) -> ServiceResult<StepRun> {
        let env = ctx.step_env(&step.env, commands)?;
        let engine = ctx.engine(ctx.expression_env(&step.env)?);
        // Steps that run after cancellation (always()) are not interrupted again
        let cancel = (!ctx.status.cancelled).then(|| self.cancel.clone());

        if let Some(script) = &step.run {
            let script = engine.interpolate(script)?;
            let shell = self.shell(job, step)?;
            let working_dir = self.working_dir(job, step, &engine)?;
            let config = ShellConfig {
                working_dir: None,
                timeout: limit.timeout,
                cancel,
            };

            let progress = self.progress.clone();
            let instance = self.planned.display_name.clone();
            let on_output: OutputCallback = Box::new(move |line, is_error| {
                progress.send_event(ExecutionEvent::step_output(
                    instance.clone(),
                    index,
                    line,
                    is_error,
                ));
            });

            let output = self
                .runners
                .shell()
                .run_with_shell(shell, &script, &env, &working_dir, &config, Some(on_output))
                .await;

            let status = if output.success() {
                StepStatus::Success
            } else if output.cancelled {
                StepStatus::Cancelled
            } else {
                StepStatus::Failure
            };
            return Ok(StepRun {
                status,
                exit_code: output.exit_code,
                error: output.failure_reason(limit.timeout),
                outputs: IndexMap::new(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let Some(uses) = &step.uses else {
            return Err(ServiceError::invalid("step has neither 'run' nor 'uses'"));
        };
        let action = ActionRef::parse(uses)?;
        let mut inputs = ActionInputs::new();
        for (key, value) in &step.with {
            inputs.insert(key.clone(), engine.interpolate_value(value)?);
        }

        let action_ctx = ActionContext {
            workspace: &self.settings.workspace,
            env: &env,
            runner_temp,
            artifacts_dir,
        };
        let outcome = tokio::select! {
            outcome = self.runners.actions().run(&action, &inputs, &action_ctx) => outcome,
            _ = sleep_for(limit.timeout) => {
                return Ok(StepRun::failed(match limit.timeout {
                    Some(t) => format!("timed out after {:?}", t),
                    None => "timed out".to_string(),
                }));
            }
            _ = wait_cancelled(cancel) => {
                let mut run = StepRun::failed("cancelled");
                run.status = StepStatus::Cancelled;
                return Ok(run);
            }
        }?;

        let instance = &self.planned.display_name;
        for line in &outcome.log {
            self.progress
                .send_event(ExecutionEvent::step_output(instance.clone(), index, line.clone(), false));
        }
        for warning in &outcome.warnings {
            tracing::warn!(instance = %instance, "{}: {}", action, warning);
            self.progress
                .send_event(ExecutionEvent::warning(warning.clone(), Some(instance.clone())));
        }
        for (name, value) in &outcome.env {
            ctx.export(name.clone(), value.clone());
            self.progress.send_event(ExecutionEvent::EnvExported {
                instance: instance.clone(),
                name: name.clone(),
                value: value.clone(),
            });
        }
        // The first entry ends up first on PATH
        for dir in outcome.path.iter().rev() {
            ctx.prepend_path(dir.display().to_string());
        }

        Ok(StepRun {
            status: StepStatus::Success,
            exit_code: None,
            error: None,
            outputs: outcome.outputs,
            stdout: outcome.log.join("\n"),
            stderr: outcome.warnings.join("\n"),
        })
    }

    /// GITHUB_ENV, GITHUB_OUTPUT and GITHUB_PATH take effect whatever the step's result
    fn apply_file_commands(
        &self,
        ctx: &mut InstanceContext,
        commands: &FileCommands,
        run: &mut StepRun,
    ) {
        let effects = match commands.collect() {
            Ok(effects) => effects,
            Err(e) => {
                if run.status == StepStatus::Success {
                    run.status = StepStatus::Failure;
                    run.error = Some(e.to_string());
                }
                return;
            }
        };

        for (name, value) in ctx.apply_effects(&effects) {
            self.progress.send_event(ExecutionEvent::EnvExported {
                instance: self.planned.display_name.clone(),
                name,
                value,
            });
        }
        run.outputs.extend(effects.outputs);
    }

    fn shell(&self, job: &Job, step: &Step) -> ServiceResult<Shell> {
        let name = step
            .shell
            .as_deref()
            .or_else(|| run_default(job.defaults.as_ref(), |d| d.shell.as_deref()))
            .or_else(|| run_default(self.workflow.defaults.as_ref(), |d| d.shell.as_deref()));

        match name {
            None => Ok(self.runners.shell().default_shell()),
            Some(name) => Shell::from_name(name)
                .ok_or_else(|| ServiceError::invalid(format!("unsupported shell '{}'", name))),
        }
    }

    fn working_dir(
        &self,
        job: &Job,
        step: &Step,
        engine: &ExpressionEngine,
    ) -> ServiceResult<PathBuf> {
        let dir = step
            .working_directory
            .as_deref()
            .or_else(|| run_default(job.defaults.as_ref(), |d| d.working_directory.as_deref()))
            .or_else(|| {
                run_default(self.workflow.defaults.as_ref(), |d| {
                    d.working_directory.as_deref()
                })
            });

        Ok(match dir {
            Some(dir) => self.settings.workspace.join(engine.interpolate(dir)?),
            None => self.settings.workspace.clone(),
        })
    }
}

fn run_default<'a>(
    defaults: Option<&'a crate::workflow::Defaults>,
    pick: impl Fn(&'a crate::workflow::RunDefaults) -> Option<&'a str>,
) -> Option<&'a str> {
    defaults.and_then(|d| d.run.as_ref()).and_then(pick)
}

/// Result for an instance that never ran a step (skipped, cancelled before start)
pub(crate) fn not_run(
    planned: &PlannedInstance,
    continue_on_error: bool,
    status: JobStatus,
    reason: impl Into<String>,
) -> InstanceResult {
    InstanceResult {
        job_id: planned.job_id.clone(),
        display_name: planned.display_name.clone(),
        index: planned.instance.index,
        matrix: planned.instance.values.clone(),
        runs_on: planned.runs_on.clone(),
        status,
        continue_on_error,
        reason: Some(reason.into()),
        steps: Vec::new(),
        exported_env: IndexMap::new(),
        duration: Duration::ZERO,
    }
}

/// `timeout-minutes` value as a duration; zero, negative and NaN mean no limit
pub(crate) fn minutes(value: f64) -> Option<Duration> {
    (value.is_finite() && value > 0.0).then(|| Duration::from_secs_f64(value * 60.0))
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn job_timeout_message(job: &Job) -> String {
    format!(
        "job exceeded timeout-minutes ({})",
        job.timeout_minutes.unwrap_or_default()
    )
}
