// Matrix Strategy Expansion
// Expands matrix strategies into concrete job instances

use crate::expression::{ExpressionContext, ExpressionEngine, Value};
use crate::workflow::{Job, Matrix, Workflow};

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// A single matrix instance (one combination of matrix values)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixInstance {
    /// Position in the expanded job set (base product first, then includes)
    pub index: usize,
    /// Display name, the instance's values joined with ", "
    pub name: String,
    /// Axis values (`matrix.<key>`) for this instance
    pub values: IndexMap<String, Value>,
}

impl MatrixInstance {
    fn new(index: usize, values: IndexMap<String, Value>) -> Self {
        let name = values
            .values()
            .map(Value::as_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            index,
            name,
            values,
        }
    }

    /// Whether this instance carries every `key=value` pair (string comparison).
    pub fn matches_filter(&self, filter: &[(String, String)]) -> bool {
        filter.iter().all(|(key, expected)| {
            self.values
                .get(key)
                .map(|v| v.as_string() == *expected)
                .unwrap_or(false)
        })
    }
}

/// Host family a runner label maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    /// Map a runner label (`ubuntu-latest`, `macos-11`, `windows-2022`, `linux`) to a platform
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.starts_with("ubuntu") || label == "linux" {
            Some(Platform::Linux)
        } else if label.starts_with("macos") || label == "macos" {
            Some(Platform::Macos)
        } else if label.starts_with("windows") {
            Some(Platform::Windows)
        } else {
            None
        }
    }

    /// Platform of the machine running gridrun
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Macos
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    /// Value of `RUNNER_OS` / `runner.os`
    pub fn runner_os(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::Macos => "macOS",
            Platform::Windows => "Windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.runner_os())
    }
}

/// One job instance as it will be scheduled
#[derive(Debug, Clone, Serialize)]
pub struct PlannedInstance {
    pub job_id: String,
    /// `<job name> (<values>)`, or the job name alone without a matrix
    pub display_name: String,
    pub instance: MatrixInstance,
    /// Number of instances of the same job
    pub job_total: usize,
    /// `runs-on` labels with matrix values substituted
    pub runs_on: Vec<String>,
    /// Platform of the first recognised label
    pub platform: Option<Platform>,
}

impl PlannedInstance {
    /// Directory-safe name, unique within the job
    pub fn slug(&self) -> String {
        let mut slug = String::new();
        for c in self.instance.name.chars() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            format!("{}", self.instance.index)
        } else {
            format!("{}-{}", self.instance.index, slug)
        }
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix into instances.
    ///
    /// The base set is the Cartesian product of the axes in declaration order
    /// (last axis varies fastest) minus `exclude` matches. Every `include`
    /// entry is then appended as its own instance, overlapping or not.
    pub fn expand(matrix: &Matrix) -> Vec<MatrixInstance> {
        let mut instances = Vec::new();

        let axes: Vec<(&String, Vec<Value>)> = matrix
            .dimensions
            .iter()
            .map(|(key, values)| (key, values.iter().map(Value::from).collect()))
            .collect();

        if !axes.is_empty() && axes.iter().all(|(_, values)| !values.is_empty()) {
            let mut cursor = vec![0usize; axes.len()];
            loop {
                let combination: IndexMap<String, Value> = axes
                    .iter()
                    .zip(&cursor)
                    .map(|((key, values), &i)| ((*key).clone(), values[i].clone()))
                    .collect();

                if !Self::is_excluded(matrix, &combination) {
                    instances.push(MatrixInstance::new(instances.len(), combination));
                }

                if !Self::advance(&mut cursor, &axes) {
                    break;
                }
            }
        }

        for entry in &matrix.include {
            let values = Self::include_values(matrix, entry);
            instances.push(MatrixInstance::new(instances.len(), values));
        }

        instances
    }

    /// Plan every instance of every job, in job declaration order
    pub fn plan(workflow: &Workflow) -> Vec<PlannedInstance> {
        workflow
            .jobs
            .iter()
            .flat_map(|(job_id, job)| Self::plan_job(job_id, job))
            .collect()
    }

    /// Plan the instances of one job; a job without a matrix has exactly one
    pub fn plan_job(job_id: &str, job: &Job) -> Vec<PlannedInstance> {
        let matrix = job.strategy.as_ref().and_then(|s| s.matrix.as_ref());
        let instances = match matrix {
            Some(matrix) => Self::expand(matrix),
            None => vec![MatrixInstance::new(0, IndexMap::new())],
        };

        let total = instances.len();
        instances
            .into_iter()
            .map(|instance| {
                let mut context = ExpressionContext::default();
                context.matrix = instance.values.clone();
                let engine = ExpressionEngine::new(context);

                let base_name = job
                    .name
                    .as_deref()
                    .map(|name| interpolate_or_raw(&engine, name))
                    .unwrap_or_else(|| job_id.to_string());
                // GitHub appends the values only when the name does not already use them
                let display_name = if matrix.is_some()
                    && !job.name.as_deref().is_some_and(|n| n.contains("matrix."))
                {
                    format!("{} ({})", base_name, instance.name)
                } else {
                    base_name
                };

                let runs_on: Vec<String> = job
                    .runs_on
                    .as_ref()
                    .map(|r| {
                        r.labels()
                            .into_iter()
                            .map(|label| interpolate_or_raw(&engine, label))
                            .collect()
                    })
                    .unwrap_or_default();
                let platform = runs_on.iter().find_map(|label| Platform::from_label(label));

                PlannedInstance {
                    job_id: job_id.to_string(),
                    display_name,
                    instance,
                    job_total: total,
                    runs_on,
                    platform,
                }
            })
            .collect()
    }

    /// Odometer step; returns false once every combination was produced
    fn advance(cursor: &mut [usize], axes: &[(&String, Vec<Value>)]) -> bool {
        for pos in (0..cursor.len()).rev() {
            cursor[pos] += 1;
            if cursor[pos] < axes[pos].1.len() {
                return true;
            }
            cursor[pos] = 0;
        }
        false
    }

    fn is_excluded(matrix: &Matrix, combination: &IndexMap<String, Value>) -> bool {
        matrix.exclude.iter().any(|entry| {
            !entry.is_empty()
                && entry.iter().all(|(key, expected)| {
                    combination
                        .get(key)
                        .is_some_and(|actual| values_equal(actual, &Value::from(expected)))
                })
        })
    }

    /// Axis keys first (in axis order), then keys only the include entry has
    fn include_values(
        matrix: &Matrix,
        entry: &IndexMap<String, serde_yaml::Value>,
    ) -> IndexMap<String, Value> {
        let mut values = IndexMap::new();
        for key in matrix.dimensions.keys() {
            if let Some(value) = entry.get(key) {
                values.insert(key.clone(), Value::from(value));
            }
        }
        for (key, value) in entry {
            if !values.contains_key(key) {
                values.insert(key.clone(), Value::from(value));
            }
        }
        values
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => crate::expression::evaluator::loose_equals(a, b),
    }
}

fn interpolate_or_raw(engine: &ExpressionEngine, text: &str) -> String {
    match engine.interpolate(text) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("could not interpolate '{}': {}", text, e);
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowParser;

    fn matrix(yaml: &str) -> Matrix {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_cartesian_product_order() {
        let m = matrix("os: [ubuntu-latest, macos-latest]\npython-version: [3.6, 3.7]\n");
        let instances = MatrixExpander::expand(&m);

        let names: Vec<_> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ubuntu-latest, 3.6",
                "ubuntu-latest, 3.7",
                "macos-latest, 3.6",
                "macos-latest, 3.7",
            ]
        );
        assert_eq!(instances[3].index, 3);
        assert_eq!(instances[1].values["python-version"], Value::Number(3.7));
    }

    #[test]
    fn test_include_appends_even_when_overlapping() {
        let m = matrix(
            r#"
os: [ubuntu-latest]
check: [ci_tests]
include:
  - os: ubuntu-latest
    check: ci_tests
  - os: ubuntu-latest
    check: doc
"#,
        );
        let instances = MatrixExpander::expand(&m);
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].values, instances[1].values);
        assert_eq!(instances[2].values["check"], Value::from("doc"));
        assert_eq!(instances[2].index, 2);
    }

    #[test]
    fn test_include_key_order_and_missing_keys() {
        let m = matrix(
            r#"
os: [ubuntu-latest]
check: [ci_tests]
include:
  - check: doc
    extra: yes-please
"#,
        );
        let instances = MatrixExpander::expand(&m);
        let include = &instances[1];
        let keys: Vec<_> = include.values.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["check", "extra"]);
        assert!(!include.values.contains_key("os"));
    }

    #[test]
    fn test_exclude_filters_base_only() {
        let m = matrix(
            r#"
os: [ubuntu-latest, macos-latest]
python-version: [3.6, 3.7]
exclude:
  - os: macos-latest
    python-version: 3.6
include:
  - os: macos-latest
    python-version: 3.6
"#,
        );
        let instances = MatrixExpander::expand(&m);
        let names: Vec<_> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ubuntu-latest, 3.6",
                "ubuntu-latest, 3.7",
                "macos-latest, 3.7",
                "macos-latest, 3.6",
            ]
        );
    }

    #[test]
    fn test_exclude_string_matches_number() {
        let m = matrix("python-version: [3.6, 3.7]\nexclude:\n  - python-version: '3.6'\n");
        assert_eq!(MatrixExpander::expand(&m).len(), 1);
    }

    #[test]
    fn test_includes_only_matrix() {
        let m = matrix("include:\n  - os: ubuntu-latest\n  - os: windows-latest\n");
        let instances = MatrixExpander::expand(&m);
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].name, "windows-latest");
    }

    #[test]
    fn test_matches_filter() {
        let m = matrix("os: [ubuntu-latest, macos-latest]\npython-version: [3.8]\n");
        let instances = MatrixExpander::expand(&m);
        let filter = vec![
            ("os".to_string(), "macos-latest".to_string()),
            ("python-version".to_string(), "3.8".to_string()),
        ];
        let matching: Vec<_> = instances.iter().filter(|i| i.matches_filter(&filter)).collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].index, 1);
        assert!(!instances[0].matches_filter(&[("missing".into(), "x".into())]));
    }

    #[test]
    fn test_plan_resolves_runs_on_and_names() {
        let yaml = r#"
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: make lint
  test:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [ubuntu-latest, macos-latest]
    steps:
      - run: make test
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let plan = MatrixExpander::plan(&workflow);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].display_name, "lint");
        assert_eq!(plan[0].job_total, 1);
        assert_eq!(plan[0].platform, Some(Platform::Linux));

        assert_eq!(plan[2].display_name, "test (macos-latest)");
        assert_eq!(plan[2].runs_on, vec!["macos-latest"]);
        assert_eq!(plan[2].platform, Some(Platform::Macos));
        assert_eq!(plan[2].job_total, 2);
        assert_eq!(plan[2].slug(), "1-macos-latest");
    }

    #[test]
    fn test_plan_name_with_matrix_expression() {
        let yaml = r#"
on: push
jobs:
  test:
    name: Python ${{ matrix.python-version }}
    strategy:
      matrix:
        python-version: [3.8]
    steps:
      - run: 'true'
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let plan = MatrixExpander::plan(&workflow);
        assert_eq!(plan[0].display_name, "Python 3.8");
        assert_eq!(plan[0].platform, None);
    }

    #[test]
    fn test_slug_of_empty_values() {
        let yaml = "on: push\njobs:\n  a:\n    steps:\n      - run: 'true'\n";
        let workflow = WorkflowParser::parse(yaml).unwrap();
        assert_eq!(MatrixExpander::plan(&workflow)[0].slug(), "0");
    }

    #[test]
    fn test_platform_labels() {
        assert_eq!(Platform::from_label("ubuntu-20.04"), Some(Platform::Linux));
        assert_eq!(Platform::from_label("macos-latest"), Some(Platform::Macos));
        assert_eq!(Platform::from_label("windows-2022"), Some(Platform::Windows));
        assert_eq!(Platform::from_label("self-hosted"), None);
        assert_eq!(Platform::Macos.runner_os(), "macOS");
    }
}
