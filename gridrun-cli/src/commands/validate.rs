use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::bail;
use color_eyre::Result;

use workflow_service::{MatrixExpander, Severity, WorkflowParser};

/// Check a workflow file and print lint findings
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let path = &args.workflow;
    if !path.exists() {
        bail!("Workflow file not found: {}", path.display());
    }

    output::status("Validating", &path.display().to_string());

    let workflow = match WorkflowParser::from_file(path) {
        Ok(workflow) => workflow,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };
    output::success("YAML syntax valid");

    let issues = WorkflowParser::lint(&workflow);
    let errors = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count();
    for issue in &issues {
        match issue.severity {
            Severity::Error => output::error(&issue.to_string()),
            Severity::Warning => output::warning(&issue.to_string()),
        }
    }
    if errors > 0 {
        output::error(&format!("{} validation error(s)", errors));
        std::process::exit(1);
    }

    let steps: usize = workflow.jobs.values().map(|j| j.steps.len()).sum();
    let instances = MatrixExpander::plan(&workflow).len();
    output::success(&format!(
        "Structure: {} jobs, {} steps, {} instances",
        workflow.jobs.len(),
        steps,
        instances
    ));
    output::success(&format!("Triggers: {}", workflow.on.event_names().join(", ")));

    println!();
    output::success("Workflow is valid");
    Ok(())
}
