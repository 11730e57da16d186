use crate::expression::{strip_wrapper, ExprParser};
use crate::workflow::models::{Job, Workflow};
use crate::{ServiceError, ServiceResult};

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Parser for GitHub Actions-style workflow YAML files.
pub struct WorkflowParser;

/// How serious a validation finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding, located by job (and step) id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub location: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl WorkflowParser {
    /// Parse a workflow from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Workflow> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workflow from a YAML string.
    pub fn parse(content: &str) -> ServiceResult<Workflow> {
        let workflow: Workflow = serde_yaml::from_str(content)?;
        Ok(workflow)
    }

    /// Parse and validate a workflow from a YAML string.
    pub fn parse_and_validate(content: &str) -> ServiceResult<Workflow> {
        let workflow = Self::parse(content)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Validate a parsed workflow, failing on the first error-level issue.
    pub fn validate(workflow: &Workflow) -> ServiceResult<()> {
        match Self::lint(workflow)
            .into_iter()
            .find(|issue| issue.severity == Severity::Error)
        {
            Some(issue) => Err(ServiceError::InvalidInput(issue.to_string())),
            None => Ok(()),
        }
    }

    /// Collect every validation issue, errors and warnings alike.
    pub fn lint(workflow: &Workflow) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if workflow.jobs.is_empty() {
            issues.push(error("workflow", "workflow has no jobs"));
        }

        for (job_id, job) in &workflow.jobs {
            Self::lint_job(job_id, job, &mut issues);
        }

        issues
    }

    fn lint_job(job_id: &str, job: &Job, issues: &mut Vec<ValidationIssue>) {
        let location = format!("jobs.{}", job_id);

        if job.steps.is_empty() {
            issues.push(error(&location, "job has no steps"));
        }

        if let Some(condition) = &job.if_condition {
            check_expression(&location, "if", condition, issues);
        }

        if let Some(matrix) = job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
            let matrix_location = format!("{}.strategy.matrix", location);

            for (axis, values) in &matrix.dimensions {
                if values.is_empty() {
                    issues.push(error(
                        &matrix_location,
                        format!("axis '{}' has no values", axis),
                    ));
                }
            }

            for (i, entry) in matrix.exclude.iter().enumerate() {
                for key in entry.keys() {
                    if !matrix.dimensions.contains_key(key) {
                        issues.push(error(
                            &format!("{}.exclude[{}]", matrix_location, i),
                            format!("'{}' is not a matrix axis", key),
                        ));
                    }
                }
            }

            // An include entry missing an axis key leaves `matrix.<key>` empty for that instance
            for (i, entry) in matrix.include.iter().enumerate() {
                let missing: Vec<&str> = matrix
                    .dimensions
                    .keys()
                    .filter(|axis| !entry.contains_key(*axis))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    issues.push(warning(
                        &format!("{}.include[{}]", matrix_location, i),
                        format!(
                            "missing axis value(s) {}; they will substitute as empty strings",
                            missing.join(", ")
                        ),
                    ));
                }
            }

            if matrix.base_size() == 0 && matrix.include.is_empty() {
                issues.push(warning(&matrix_location, "matrix produces no job instances"));
            }
        }

        let mut seen_ids = HashSet::new();
        for (step_idx, step) in job.steps.iter().enumerate() {
            let step_location = format!(
                "{}.steps[{}] '{}'",
                location,
                step_idx,
                step.display_name()
            );

            match (step.run.is_some(), step.uses.is_some()) {
                (false, false) => issues.push(error(
                    &step_location,
                    "step must have either 'run' or 'uses'",
                )),
                (true, true) => issues.push(error(
                    &step_location,
                    "step cannot have both 'run' and 'uses'",
                )),
                _ => {}
            }

            if let Some(id) = &step.id {
                if !seen_ids.insert(id.as_str()) {
                    issues.push(error(
                        &step_location,
                        format!("duplicate step id '{}'", id),
                    ));
                }
            }

            if let Some(condition) = &step.if_condition {
                check_expression(&step_location, "if", condition, issues);
            }
        }
    }
}

fn check_expression(location: &str, field: &str, expr: &str, issues: &mut Vec<ValidationIssue>) {
    let body = strip_wrapper(expr);
    if body.is_empty() {
        return;
    }
    if let Err(e) = ExprParser::parse_str(body) {
        issues.push(error(location, format!("invalid '{}' expression '{}': {}", field, expr, e)));
    }
}

fn error(location: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        severity: Severity::Error,
        location: location.to_string(),
        message: message.into(),
    }
}

fn warning(location: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        severity: Severity::Warning,
        location: location.to_string(),
        message: message.into(),
    }
}
