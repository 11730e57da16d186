use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// A GitHub Actions-compatible workflow definition.
///
/// This represents the top-level structure of a workflow YAML file. Maps that
/// drive execution order (jobs, matrix axes, include entries) keep their
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// The name of the workflow
    #[serde(default)]
    pub name: Option<String>,

    /// The trigger configuration for the workflow
    #[serde(rename = "on")]
    pub on: Trigger,

    /// Workflow-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, ScalarString>,

    /// Default settings for all jobs in the workflow
    #[serde(default)]
    pub defaults: Option<Defaults>,

    /// The jobs that make up this workflow
    pub jobs: IndexMap<String, Job>,
}

/// Trigger configuration for when the workflow should run.
///
/// Supports multiple trigger formats:
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [main] } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single event trigger: `on: push`
    Single(String),

    /// Multiple events: `on: [push, pull_request]`
    Multiple(Vec<String>),

    /// Detailed event configuration
    Detailed(IndexMap<String, Option<EventConfig>>),
}

/// Configuration for a specific trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventConfig {
    /// Branch filters for push/pull_request events
    #[serde(default)]
    pub branches: Vec<String>,

    /// Branch ignore patterns
    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,

    /// Tag filters for push events
    #[serde(default)]
    pub tags: Vec<String>,

    /// Tag ignore patterns
    #[serde(default, rename = "tags-ignore")]
    pub tags_ignore: Vec<String>,

    /// Activity types (parsed, not matched locally)
    #[serde(default)]
    pub types: Vec<String>,
}

/// Default settings for jobs and steps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    /// Default settings for run steps
    #[serde(default)]
    pub run: Option<RunDefaults>,
}

/// Default settings for run steps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunDefaults {
    /// Default shell to use
    #[serde(default)]
    pub shell: Option<String>,

    /// Default working directory
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
}

/// A job within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Display name for the job (may contain expressions)
    #[serde(default)]
    pub name: Option<String>,

    /// Runner label, usually `${{ matrix.os }}`
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<RunsOn>,

    /// Conditional expression for job execution
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    /// Job-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, ScalarString>,

    /// Default settings for steps in this job
    #[serde(default)]
    pub defaults: Option<Defaults>,

    /// Matrix strategy for running multiple job instances
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// The steps that make up this job
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Job timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<f64>,

    /// A failed instance of this job does not fail the workflow
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,
}

/// Runner specification - a label or a list of labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    /// Single runner label: `runs-on: ubuntu-latest` or `runs-on: ${{ matrix.os }}`
    Label(String),

    /// Multiple labels: `runs-on: [self-hosted, linux]`
    Labels(Vec<String>),
}

impl RunsOn {
    pub fn labels(&self) -> Vec<&str> {
        match self {
            RunsOn::Label(label) => vec![label.as_str()],
            RunsOn::Labels(labels) => labels.iter().map(String::as_str).collect(),
        }
    }
}

/// Strategy configuration for matrix builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Matrix configuration
    #[serde(default)]
    pub matrix: Option<Matrix>,

    /// Whether one failed instance cancels its siblings.
    ///
    /// Defaults to false: instances are isolated unless a workflow opts in.
    #[serde(default, rename = "fail-fast")]
    pub fail_fast: bool,

    /// Maximum number of instances of this job running at once
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<usize>,
}

/// Matrix configuration for parallel job execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Matrix {
    /// Matrix axes in declaration order
    #[serde(flatten)]
    pub dimensions: IndexMap<String, Vec<Value>>,

    /// Additional combinations, each appended as its own instance
    #[serde(default)]
    pub include: Vec<IndexMap<String, Value>>,

    /// Base combinations to drop
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,
}

impl Matrix {
    /// Number of combinations in the base product (before excludes)
    pub fn base_size(&self) -> usize {
        if self.dimensions.is_empty() {
            0
        } else {
            self.dimensions.values().map(Vec::len).product()
        }
    }
}

/// A step within a job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Step {
    /// Unique identifier for the step (used in outputs)
    #[serde(default)]
    pub id: Option<String>,

    /// Display name for the step
    #[serde(default)]
    pub name: Option<String>,

    /// Conditional expression for step execution
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    /// Shell command to run
    #[serde(default)]
    pub run: Option<String>,

    /// Shell to use for the run command
    #[serde(default)]
    pub shell: Option<String>,

    /// Working directory for the step
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    /// Action to use (e.g., "actions/checkout@v4")
    #[serde(default)]
    pub uses: Option<String>,

    /// Inputs to pass to the action
    #[serde(default)]
    pub with: IndexMap<String, Value>,

    /// Step-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, ScalarString>,

    /// Whether to continue job if this step fails
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    /// Step timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<f64>,
}

impl Step {
    /// Get a display name for the step.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(uses) = &self.uses {
            format!("Run {}", uses)
        } else if let Some(run) = &self.run {
            let first_line = run.lines().next().unwrap_or(run).trim();
            if first_line.chars().count() > 50 {
                let truncated: String = first_line.chars().take(47).collect();
                format!("Run {}...", truncated)
            } else {
                format!("Run {}", first_line)
            }
        } else {
            "Unnamed step".to_string()
        }
    }

    /// Check if this is a run step.
    pub fn is_run(&self) -> bool {
        self.run.is_some()
    }

    /// Check if this is a uses step.
    pub fn is_uses(&self) -> bool {
        self.uses.is_some()
    }
}

/// A scalar written as a YAML string, number or boolean (`env` values, mostly).
///
/// `PYTHON: 3.8` and `PYTHON: '3.8'` both end up as the text `3.8`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ScalarRepr", into = "String")]
pub struct ScalarString(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarRepr {
    String(String),
    Bool(bool),
    Number(serde_yaml::Number),
    Null(()),
}

impl From<ScalarRepr> for ScalarString {
    fn from(repr: ScalarRepr) -> Self {
        ScalarString(match repr {
            ScalarRepr::String(s) => s,
            ScalarRepr::Bool(b) => b.to_string(),
            ScalarRepr::Number(n) => n.to_string(),
            ScalarRepr::Null(()) => String::new(),
        })
    }
}

impl From<ScalarString> for String {
    fn from(value: ScalarString) -> Self {
        value.0
    }
}

impl From<&str> for ScalarString {
    fn from(s: &str) -> Self {
        ScalarString(s.to_string())
    }
}

impl ScalarString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: echo "Hello, World!"
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.name, Some("CI".to_string()));
        assert!(matches!(workflow.on, Trigger::Single(ref s) if s == "push"));
        assert!(workflow.jobs.contains_key("build"));
    }

    #[test]
    fn test_parse_workflow_with_multiple_triggers() {
        let yaml = r#"
on: [push, pull_request]
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: make ci_tests
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(workflow.on, Trigger::Multiple(ref v) if v.len() == 2));
    }

    #[test]
    fn test_parse_detailed_trigger_with_null_event() {
        let yaml = r#"
on:
  push:
    branches: [master]
  pull_request:
jobs:
  build:
    steps:
      - run: echo hi
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let Trigger::Detailed(events) = &workflow.on else {
            panic!("expected detailed trigger");
        };
        assert_eq!(events["push"].as_ref().unwrap().branches, vec!["master"]);
        assert!(events["pull_request"].is_none());
    }

    #[test]
    fn test_parse_matrix_keeps_axis_order() {
        let yaml = r#"
on: push
jobs:
  test:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: ['ubuntu-latest', 'macos-latest']
        python-version: [3.6, 3.7, 3.8, 3.9]
        install: ['pip']
        check: ['ci_tests']
        pip-flags: ['']
        include:
          - os: ubuntu-latest
            python-version: 3.8
            install: pip
            check: doc
            pip-flags: ''
    steps:
      - run: echo "Testing"
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let job = &workflow.jobs["test"];
        let strategy = job.strategy.as_ref().unwrap();
        let matrix = strategy.matrix.as_ref().unwrap();

        let axes: Vec<_> = matrix.dimensions.keys().map(String::as_str).collect();
        assert_eq!(axes, vec!["os", "python-version", "install", "check", "pip-flags"]);
        assert_eq!(matrix.base_size(), 8);
        assert_eq!(matrix.include.len(), 1);
        assert!(!strategy.fail_fast);
    }

    #[test]
    fn test_parse_step_with_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v2
        with:
          submodules: recursive
          fetch-depth: 0
      - run: python --version
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let job = &workflow.jobs["build"];

        assert!(job.steps[0].is_uses());
        assert_eq!(job.steps[0].with["fetch-depth"], Value::from(0));
        assert!(job.steps[1].is_run());
    }

    #[test]
    fn test_parse_env_scalars() {
        let yaml = r#"
on: push
env:
  PY: 3.8
  FLAG: true
  EMPTY:
jobs:
  build:
    env:
      INSTALL_TYPE: ${{ matrix.install }}
    steps:
      - run: echo "$PY"
        env:
          STEP_VAR: step
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.env["PY"].as_str(), "3.8");
        assert_eq!(workflow.env["FLAG"].as_str(), "true");
        assert_eq!(workflow.env["EMPTY"].as_str(), "");

        let job = &workflow.jobs["build"];
        assert_eq!(job.env["INSTALL_TYPE"].as_str(), "${{ matrix.install }}");
        assert_eq!(job.steps[0].env["STEP_VAR"].as_str(), "step");
    }

    #[test]
    fn test_step_display_name() {
        let named = Step {
            name: Some("Build archive".to_string()),
            run: Some("source tools/ci/build_archive.sh".to_string()),
            ..Default::default()
        };
        assert_eq!(named.display_name(), "Build archive");

        let uses = Step {
            uses: Some("actions/checkout@v2".to_string()),
            ..Default::default()
        };
        assert_eq!(uses.display_name(), "Run actions/checkout@v2");

        let run = Step {
            run: Some("echo hello\necho world".to_string()),
            ..Default::default()
        };
        assert_eq!(run.display_name(), "Run echo hello");
    }

    #[test]
    fn test_runs_on_labels() {
        assert_eq!(RunsOn::Label("ubuntu-latest".into()).labels(), vec!["ubuntu-latest"]);
        assert_eq!(
            RunsOn::Labels(vec!["self-hosted".into(), "linux".into()]).labels(),
            vec!["self-hosted", "linux"]
        );
    }
}
