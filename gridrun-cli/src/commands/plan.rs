use super::{load_workflow, working_dir, EventArgs, FilterArgs};
use crate::output::{self, Tone};

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use workflow_service::{ExecutorConfig, Platform, WorkflowExecutor};

/// List the instances a run would start
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    #[command(flatten)]
    pub event: EventArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: PlanArgs) -> Result<()> {
    let workflow = load_workflow(&args.workflow)?;
    let checkout = working_dir(None)?;
    let event = args.event.to_event(&checkout);

    let triggered = workflow.on.matches(&event)?;
    let executor = WorkflowExecutor::new(workflow).with_config(ExecutorConfig {
        working_dir: checkout,
        job_filter: args.filters.jobs.clone(),
        matrix_filter: args.filters.matrix_filter()?,
        ..Default::default()
    });

    if !triggered {
        if args.json {
            println!("[]");
        } else {
            output::info(&format!(
                "Workflow '{}' is not triggered by {}",
                executor.workflow_name(),
                event
            ));
        }
        return Ok(());
    }

    let plan = executor.plan()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    output::header(&format!(
        "Workflow '{}' on {} ({} instances)",
        executor.workflow_name(),
        event,
        plan.len()
    ));
    let host = Platform::host();
    for (i, planned) in plan.iter().enumerate() {
        let line = format!(
            "{:>3}. {}  [{}]",
            i + 1,
            planned.display_name,
            planned.runs_on.join(", ")
        );
        match planned.platform {
            Some(platform) if platform != host => output::tinted(Tone::Muted, &format!("  {}", line)),
            _ => println!("  {}", line),
        }
    }
    Ok(())
}
