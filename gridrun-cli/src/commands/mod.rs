// Subcommands and the arguments they share

pub mod plan;
pub mod run;
pub mod validate;

use crate::output;

use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use workflow_service::utils::parse_assignment;
use workflow_service::{Severity, TriggerEvent, Workflow, WorkflowParser};

/// The event to simulate
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Event name (push, pull_request, workflow_dispatch, ...)
    #[arg(long, value_name = "EVENT", default_value = "push")]
    pub event: String,

    /// Branch or full ref (default: the checkout's current branch, else main)
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,

    /// Commit SHA (default: the checkout's HEAD)
    #[arg(long, value_name = "SHA")]
    pub sha: Option<String>,
}

impl EventArgs {
    pub fn to_event(&self, checkout: &Path) -> TriggerEvent {
        let git_ref = self
            .git_ref
            .clone()
            .or_else(|| git(checkout, &["symbolic-ref", "-q", "HEAD"]))
            .unwrap_or_else(|| "main".to_string());
        let event = TriggerEvent::new(self.event.clone(), git_ref);
        match self
            .sha
            .clone()
            .or_else(|| git(checkout, &["rev-parse", "HEAD"]))
        {
            Some(sha) => event.with_sha(sha),
            None => event,
        }
    }
}

/// Which instances to include
#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Only this job (can be repeated)
    #[arg(long = "job", value_name = "ID")]
    pub jobs: Vec<String>,

    /// Only instances with this matrix value (can be repeated)
    #[arg(long, short = 'm', value_name = "KEY=VALUE")]
    pub matrix: Vec<String>,
}

impl FilterArgs {
    pub fn matrix_filter(&self) -> Result<Vec<(String, String)>> {
        self.matrix
            .iter()
            .map(|pair| parse_assignment(pair).map_err(|e| eyre!("--matrix: {}", e)))
            .collect()
    }
}

/// Parse and validate a workflow file, printing lint warnings
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    if !path.exists() {
        bail!("Workflow file not found: {}", path.display());
    }

    output::status("Parsing", &path.display().to_string());
    let workflow = WorkflowParser::from_file(path)?;
    WorkflowParser::validate(&workflow)?;

    for issue in WorkflowParser::lint(&workflow) {
        if issue.severity == Severity::Warning {
            output::warning(&issue.to_string());
        }
    }
    Ok(workflow)
}

/// `--working-dir`, else the repository root above the current directory
pub fn working_dir(dir: Option<&PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) if dir.is_dir() => Ok(dir.clone()),
        Some(dir) => bail!("Working directory not found: {}", dir.display()),
        None => Ok(workflow_service::utils::resolve_working_dir()),
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    tracing::trace!(?args, %text, "git");
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_ref_and_sha() {
        let temp = tempfile::tempdir().unwrap();
        let args = EventArgs {
            event: "pull_request".to_string(),
            git_ref: Some("maint/0.6.x".to_string()),
            sha: Some("abc123".to_string()),
        };
        let event = args.to_event(temp.path());
        assert_eq!(event.name, "pull_request");
        assert_eq!(event.git_ref, "refs/heads/maint/0.6.x");
        assert_eq!(event.sha.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_ref_defaults_to_main_outside_git() {
        let temp = tempfile::tempdir().unwrap();
        let args = EventArgs {
            event: "push".to_string(),
            git_ref: None,
            sha: None,
        };
        let event = args.to_event(temp.path());
        if event.sha.is_none() {
            assert_eq!(event.git_ref, "refs/heads/main");
        }
    }

    #[test]
    fn test_matrix_filter() {
        let filters = FilterArgs {
            jobs: vec![],
            matrix: vec!["check=doc".to_string(), "python-version=3.8".to_string()],
        };
        assert_eq!(
            filters.matrix_filter().unwrap(),
            vec![
                ("check".to_string(), "doc".to_string()),
                ("python-version".to_string(), "3.8".to_string())
            ]
        );

        let bad = FilterArgs {
            jobs: vec![],
            matrix: vec!["check".to_string()],
        };
        assert!(bad.matrix_filter().is_err());
    }

    #[test]
    fn test_load_workflow_missing_file() {
        assert!(load_workflow(Path::new("/nonexistent/ci.yml")).is_err());
    }
}
