use super::{load_workflow, working_dir, EventArgs, FilterArgs};
use crate::output::{self, Tone};

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use workflow_service::execution::LogLevel;
use workflow_service::utils::parse_assignment;
use workflow_service::{
    progress_channel, ExecutionEvent, ExecutorConfig, JobStatus, StepStatus, WorkflowExecutor,
    WorkflowResult,
};

/// Run a workflow's matrix locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    #[command(flatten)]
    pub event: EventArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Set an environment variable for every step (can be repeated)
    #[arg(long, short = 'e', value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// Checkout the steps run in (default: repository root)
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Where uploaded artifacts and coverage reports are collected
    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Maximum instances running at once (0 = unlimited)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub max_parallel: usize,

    /// Timeout for steps without `timeout-minutes`
    #[arg(long, value_name = "MINUTES")]
    pub step_timeout: Option<f64>,

    /// Skip instances whose runs-on targets another platform
    #[arg(long)]
    pub host_only: bool,

    /// Skip unsupported `uses:` actions instead of failing the step
    #[arg(long)]
    pub allow_unknown_actions: bool,

    /// Write the result as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Do not echo step output
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let workflow = load_workflow(&args.workflow)?;
    let working_dir = working_dir(args.working_dir.as_ref())?;
    let event = args.event.to_event(&working_dir);

    let default_step_timeout = match args.step_timeout {
        Some(minutes) if minutes.is_finite() && minutes > 0.0 => {
            Some(Duration::from_secs_f64(minutes * 60.0))
        }
        Some(minutes) => return Err(eyre!("--step-timeout must be positive, got {}", minutes)),
        None => None,
    };

    let mut config = ExecutorConfig {
        working_dir,
        artifacts_dir: args.artifacts_dir.clone(),
        max_parallel_instances: args.max_parallel,
        default_step_timeout,
        host_only: args.host_only,
        allow_unknown_actions: args.allow_unknown_actions,
        job_filter: args.filters.jobs.clone(),
        matrix_filter: args.filters.matrix_filter()?,
        ..Default::default()
    };
    for pair in &args.env {
        let (name, value) = parse_assignment(pair).map_err(|e| eyre!("--env: {}", e))?;
        config.extra_env.insert(name, value);
    }

    tracing::debug!(
        working_dir = %config.working_dir.display(),
        artifacts_dir = %config.artifacts_dir().display(),
        max_parallel = config.max_parallel_instances,
        "executor configured"
    );

    let (tx, mut rx) = progress_channel();
    let executor = WorkflowExecutor::new(workflow)
        .with_config(config)
        .with_progress(tx);

    // Ctrl-C cancels the instances; always() steps still get to run
    let cancel = executor.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, cancelling running instances");
            cancel.cancel();
        }
    });

    output::status("Event", &event.to_string());
    let exec_handle = tokio::spawn(async move { executor.execute(&event).await });

    while let Some(event) = rx.recv().await {
        render(&event, args.quiet);
    }

    let result = exec_handle.await??;
    tracing::info!(workflow = %result.workflow, success = result.success(), "run finished");

    if let Some(path) = &args.report {
        std::fs::write(path, result.to_json_pretty()?)?;
        output::status("Report", &path.display().to_string());
    }

    if !result.triggered {
        return Ok(());
    }

    summary(&result);
    if !result.success() {
        std::process::exit(1);
    }

    Ok(())
}

fn render(event: &ExecutionEvent, quiet: bool) {
    match event {
        ExecutionEvent::WorkflowStarted {
            workflow_name,
            total_instances,
        } => {
            println!();
            output::header(&format!(
                "Workflow '{}' ({} instances)",
                workflow_name, total_instances
            ));
        }

        ExecutionEvent::WorkflowSkipped {
            workflow_name,
            reason,
        } => {
            output::info(&format!("Workflow '{}' not run: {}", workflow_name, reason));
        }

        ExecutionEvent::WorkflowCompleted {
            success, duration, ..
        } => {
            println!();
            if *success {
                output::success(&format!(
                    "Workflow completed successfully in {:.2}s",
                    duration.as_secs_f64()
                ));
            } else {
                output::failure(&format!(
                    "Workflow failed after {:.2}s",
                    duration.as_secs_f64()
                ));
            }
        }

        ExecutionEvent::JobStarted {
            instance,
            total_steps,
            ..
        } => {
            output::status("Starting", &format!("{} ({} steps)", instance, total_steps));
        }

        ExecutionEvent::JobCompleted {
            instance,
            status,
            duration,
            ..
        } => {
            let tone = match status {
                JobStatus::Success => Tone::Good,
                _ => Tone::Bad,
            };
            output::instance_line(
                instance,
                tone,
                &format!(
                    "{} ({:.2}s)",
                    status.as_str().to_uppercase(),
                    duration.as_secs_f64()
                ),
            );
        }

        ExecutionEvent::JobSkipped {
            instance,
            status,
            reason,
            ..
        } => {
            output::instance_line(instance, Tone::Caution, &format!("{}: {}", status, reason));
        }

        ExecutionEvent::StepStarted {
            instance,
            step_name,
            step_index,
        } => {
            if !quiet {
                output::step_header(instance, *step_index, step_name);
            }
        }

        ExecutionEvent::StepOutput {
            instance,
            output: text,
            is_error,
            ..
        } => {
            if !quiet {
                for line in text.lines() {
                    output::step_output(instance, line, *is_error);
                }
            }
        }

        ExecutionEvent::StepCompleted {
            instance,
            step_name,
            outcome,
            conclusion,
            duration,
            exit_code,
            error,
            ..
        } => {
            if *outcome == StepStatus::Success && quiet {
                return;
            }
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let mut line = format!(
                "{} {} ({:.2}s){}",
                step_name,
                outcome.as_str().to_uppercase(),
                duration.as_secs_f64(),
                exit_info
            );
            if outcome != conclusion {
                line.push_str(", continuing");
            }
            match outcome {
                StepStatus::Success => output::instance_line(instance, Tone::Good, &line),
                _ => {
                    output::instance_line(instance, Tone::Bad, &line);
                    if let Some(error) = error {
                        output::instance_line(instance, Tone::Bad, &format!("  {}", error));
                    }
                }
            }
        }

        ExecutionEvent::StepSkipped {
            instance,
            step_name,
            reason,
            ..
        } => {
            if !quiet {
                output::instance_line(
                    instance,
                    Tone::Muted,
                    &format!("{} skipped: {}", step_name, reason),
                );
            }
        }

        ExecutionEvent::EnvExported {
            instance,
            name,
            value,
        } => {
            if !quiet {
                output::instance_line(instance, Tone::Muted, &format!("env {}={}", name, value));
            }
        }

        ExecutionEvent::Log {
            level,
            message,
            instance,
        } => {
            if let Some(instance) = instance {
                let tone = match level {
                    LogLevel::Error => Tone::Bad,
                    LogLevel::Warning => Tone::Caution,
                    LogLevel::Info => Tone::Plain,
                    LogLevel::Debug => Tone::Muted,
                };
                output::instance_line(instance, tone, message);
                return;
            }
            match level {
                LogLevel::Error => output::error(message),
                LogLevel::Warning => output::warning(message),
                LogLevel::Info => output::info(message),
                LogLevel::Debug => output::tinted(Tone::Muted, message),
            }
        }
    }
}

fn summary(result: &WorkflowResult) {
    println!();
    output::header("Summary");
    for instance in &result.instances {
        let line = format!(
            "{:<10} {} ({:.2}s)",
            instance.status.as_str(),
            instance.display_name,
            instance.duration.as_secs_f64()
        );
        match instance.status {
            JobStatus::Success => output::success(&line),
            JobStatus::Skipped => output::tinted(Tone::Muted, &format!("  - {}", line)),
            _ => {
                output::failure(&line);
                if let Some(reason) = &instance.reason {
                    output::tinted(Tone::Bad, &format!("      {}", reason));
                }
            }
        }
    }
    output::tinted(Tone::Muted, &format!(
        "  {} succeeded, {} failed, {} cancelled, {} skipped",
        result.count(JobStatus::Success),
        result.count(JobStatus::Failure),
        result.count(JobStatus::Cancelled),
        result.count(JobStatus::Skipped)
    ));
}
