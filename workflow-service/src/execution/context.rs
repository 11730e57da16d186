// Runtime Execution Context
// Per-instance state: environment layers, step results and job status

use crate::execution::matrix::{PlannedInstance, Platform};
use crate::expression::{
    ExpressionContext, ExpressionEngine, GithubContext, JobStatusContext, RunnerContext,
    StepContext, StrategyContext,
};
use crate::runners::{FileCommandEffects, FileCommands};
use crate::workflow::{ScalarString, TriggerEvent};
use crate::ServiceResult;

use indexmap::IndexMap;
use std::path::{Path, PathBuf};

const PATH_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

/// Everything outside the instance that shapes its context
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub workflow_name: String,
    pub event: TriggerEvent,
    pub run_id: String,
    pub workspace: PathBuf,
    /// Host environment plus `--env` overrides
    pub host_env: IndexMap<String, String>,
}

/// Runtime context of one job instance.
///
/// Nothing in here is shared with other instances; each instance builds its
/// own from the workflow and its matrix values.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub job_id: String,
    pub instance_name: String,

    /// Expression contexts that stay fixed for the instance (github, matrix, runner, strategy)
    base: ExpressionContext,

    /// Host environment plus default CI variables
    default_env: IndexMap<String, String>,

    /// Interpolated workflow `env:`
    workflow_env: IndexMap<String, String>,

    /// Interpolated job `env:`
    job_env: IndexMap<String, String>,

    /// Values written to GITHUB_ENV by earlier steps
    exported_env: IndexMap<String, String>,

    /// GITHUB_PATH entries, most recent first
    path_prepends: Vec<String>,

    /// Steps with an `id`, for `steps.<id>.*`
    steps: IndexMap<String, StepContext>,

    /// Job status seen by `success()` / `failure()` / `cancelled()`
    pub status: JobStatusContext,
}

impl InstanceContext {
    pub fn new(
        settings: &RunSettings,
        planned: &PlannedInstance,
        strategy: Option<StrategyContext>,
        runner_temp: &Path,
    ) -> Self {
        let host = Platform::host();

        let base = ExpressionContext {
            github: GithubContext {
                event_name: settings.event.name.clone(),
                ref_name: settings.event.git_ref.clone(),
                sha: settings.event.sha.clone(),
                workspace: settings.workspace.display().to_string(),
                repository: None,
                workflow: Some(settings.workflow_name.clone()),
                job: Some(planned.job_id.clone()),
                run_id: settings.run_id.clone(),
            },
            matrix: planned.instance.values.clone(),
            runner: RunnerContext {
                os: host.runner_os().to_string(),
                arch: runner_arch().to_string(),
                temp: runner_temp.display().to_string(),
            },
            strategy,
            ..Default::default()
        };

        let mut default_env = settings.host_env.clone();
        let github = &base.github;
        let defaults = [
            ("CI", "true".to_string()),
            ("GITHUB_ACTIONS", "true".to_string()),
            ("GITHUB_WORKSPACE", github.workspace.clone()),
            ("GITHUB_EVENT_NAME", github.event_name.clone()),
            ("GITHUB_REF", github.ref_name.clone()),
            ("GITHUB_REF_NAME", short_ref(&github.ref_name).to_string()),
            ("GITHUB_WORKFLOW", settings.workflow_name.clone()),
            ("GITHUB_RUN_ID", settings.run_id.clone()),
            ("GITHUB_JOB", planned.job_id.clone()),
            ("RUNNER_OS", base.runner.os.clone()),
            ("RUNNER_ARCH", base.runner.arch.clone()),
            ("RUNNER_TEMP", base.runner.temp.clone()),
        ];
        for (name, value) in defaults {
            default_env.insert(name.to_string(), value);
        }
        if let Some(sha) = &github.sha {
            default_env.insert("GITHUB_SHA".to_string(), sha.clone());
        }

        Self {
            job_id: planned.job_id.clone(),
            instance_name: planned.display_name.clone(),
            base,
            default_env,
            workflow_env: IndexMap::new(),
            job_env: IndexMap::new(),
            exported_env: IndexMap::new(),
            path_prepends: Vec::new(),
            steps: IndexMap::new(),
            status: JobStatusContext::default(),
        }
    }

    /// Interpolate and install the workflow and job `env:` blocks.
    ///
    /// Workflow values see only the matrix and github contexts; job values also
    /// see the workflow's.
    pub fn load_env(
        &mut self,
        workflow_env: &IndexMap<String, ScalarString>,
        job_env: &IndexMap<String, ScalarString>,
    ) -> ServiceResult<()> {
        let engine = self.engine(IndexMap::new());
        self.workflow_env = interpolate_env(&engine, workflow_env)?;

        let engine = self.engine(self.workflow_env.clone());
        self.job_env = interpolate_env(&engine, job_env)?;
        Ok(())
    }

    /// Expression engine over this instance's state with the given `env` context
    pub fn engine(&self, env: IndexMap<String, String>) -> ExpressionEngine {
        let mut context = self.base.clone();
        context.env = env;
        context.steps = self.steps.clone();
        context.job = self.status;
        ExpressionEngine::new(context)
    }

    /// The `env` context visible to a step's `if:` (everything but the step's own env)
    pub fn condition_env(&self) -> IndexMap<String, String> {
        let mut env = self.workflow_env.clone();
        env.extend(self.job_env.clone());
        env.extend(self.exported_env.clone());
        env
    }

    /// The `env` context inside a step (`run`, `with`): the layered workflow
    /// variables plus the step's own `env:`, without the host environment
    pub fn expression_env(
        &self,
        step_env: &IndexMap<String, ScalarString>,
    ) -> ServiceResult<IndexMap<String, String>> {
        let mut env = self.condition_env();
        let engine = self.engine(env.clone());
        env.extend(interpolate_env(&engine, step_env)?);
        Ok(env)
    }

    /// Complete process environment for a step: host, defaults, workflow env,
    /// job env, exported values, step env; then GITHUB_PATH entries ahead of PATH.
    pub fn step_env(
        &self,
        step_env: &IndexMap<String, ScalarString>,
        commands: &FileCommands,
    ) -> ServiceResult<IndexMap<String, String>> {
        let mut env = self.default_env.clone();
        env.insert(
            "GITHUB_ENV".to_string(),
            commands.env_file.display().to_string(),
        );
        env.insert(
            "GITHUB_OUTPUT".to_string(),
            commands.output_file.display().to_string(),
        );
        env.insert(
            "GITHUB_PATH".to_string(),
            commands.path_file.display().to_string(),
        );
        env.extend(self.expression_env(step_env)?);

        if !self.path_prepends.is_empty() {
            let mut path = self.path_prepends.join(PATH_SEPARATOR);
            if let Some(existing) = env.get("PATH").filter(|p| !p.is_empty()) {
                path.push_str(PATH_SEPARATOR);
                path.push_str(existing);
            }
            env.insert("PATH".to_string(), path);
        }

        Ok(env)
    }

    /// Apply file-command effects of a finished step; returns newly exported variables.
    pub fn apply_effects(&mut self, effects: &FileCommandEffects) -> Vec<(String, String)> {
        for (name, value) in &effects.env {
            tracing::debug!(instance = %self.instance_name, "export {}={}", name, value);
            self.exported_env.insert(name.clone(), value.clone());
        }
        for entry in &effects.path {
            self.prepend_path(entry.clone());
        }
        effects.env.clone()
    }

    /// Add a directory in front of PATH for later steps
    pub fn prepend_path(&mut self, entry: String) {
        self.path_prepends.retain(|p| p != &entry);
        self.path_prepends.insert(0, entry);
    }

    /// Export a variable for later steps
    pub fn export(&mut self, name: String, value: String) {
        self.exported_env.insert(name, value);
    }

    /// Record a step with an id for `steps.<id>.*`
    pub fn record_step(&mut self, id: &str, step: StepContext) {
        self.steps.insert(id.to_string(), step);
    }

    pub fn exported_env(&self) -> &IndexMap<String, String> {
        &self.exported_env
    }
}

fn interpolate_env(
    engine: &ExpressionEngine,
    values: &IndexMap<String, ScalarString>,
) -> ServiceResult<IndexMap<String, String>> {
    let mut env = IndexMap::new();
    for (name, value) in values {
        env.insert(name.clone(), engine.interpolate(value.as_str())?);
    }
    Ok(env)
}

fn short_ref(full: &str) -> &str {
    full.strip_prefix("refs/heads/")
        .or_else(|| full.strip_prefix("refs/tags/"))
        .unwrap_or(full)
}

fn runner_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "X64",
        "x86" => "X86",
        "aarch64" => "ARM64",
        "arm" => "ARM",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::matrix::MatrixExpander;
    use crate::workflow::WorkflowParser;

    const WORKFLOW: &str = r#"
on: push
env:
  LEVEL: workflow
  SHARED: from-workflow
jobs:
  test:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [ubuntu-latest]
        install: [pip, wheel]
    env:
      INSTALL_TYPE: ${{ matrix.install }}
      SHARED: from-job
      DERIVED: ${{ env.LEVEL }}-job
    steps:
      - run: 'true'
"#;

    fn setup() -> (InstanceContext, tempfile::TempDir) {
        let workflow = WorkflowParser::parse(WORKFLOW).unwrap();
        let plan = MatrixExpander::plan(&workflow);
        let temp = tempfile::tempdir().unwrap();

        let settings = RunSettings {
            workflow_name: "CI".to_string(),
            event: TriggerEvent::push("main").with_sha("abc123"),
            run_id: "42".to_string(),
            workspace: PathBuf::from("/work"),
            host_env: [
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("HOME".to_string(), "/home/ci".to_string()),
            ]
            .into_iter()
            .collect(),
        };

        let mut ctx = InstanceContext::new(&settings, &plan[1], None, temp.path());
        let job = &workflow.jobs["test"];
        ctx.load_env(&workflow.env, &job.env).unwrap();
        (ctx, temp)
    }

    #[test]
    fn test_env_layering() {
        let (ctx, temp) = setup();
        let commands = FileCommands::create(temp.path(), 0).unwrap();
        let mut step_env = IndexMap::new();
        step_env.insert("SHARED".to_string(), ScalarString::from("from-step"));

        let env = ctx.step_env(&step_env, &commands).unwrap();
        assert_eq!(env["HOME"], "/home/ci");
        assert_eq!(env["CI"], "true");
        assert_eq!(env["GITHUB_REF"], "refs/heads/main");
        assert_eq!(env["GITHUB_REF_NAME"], "main");
        assert_eq!(env["GITHUB_SHA"], "abc123");
        assert_eq!(env["GITHUB_JOB"], "test");
        assert_eq!(env["INSTALL_TYPE"], "wheel");
        assert_eq!(env["DERIVED"], "workflow-job");
        assert_eq!(env["SHARED"], "from-step");
        assert_eq!(env["GITHUB_ENV"], commands.env_file.display().to_string());
    }

    #[test]
    fn test_exports_and_path() {
        let (mut ctx, temp) = setup();
        let effects = FileCommandEffects {
            env: vec![("ARCHIVE".to_string(), "dist/pkg.tar.gz".to_string())],
            outputs: vec![],
            path: vec!["/opt/a/bin".to_string(), "/opt/b/bin".to_string()],
        };
        let exported = ctx.apply_effects(&effects);
        assert_eq!(exported.len(), 1);

        let commands = FileCommands::create(temp.path(), 1).unwrap();
        let env = ctx.step_env(&IndexMap::new(), &commands).unwrap();
        assert_eq!(env["ARCHIVE"], "dist/pkg.tar.gz");
        assert_eq!(env["PATH"], "/opt/b/bin:/opt/a/bin:/usr/bin");
        assert_eq!(ctx.exported_env()["ARCHIVE"], "dist/pkg.tar.gz");

        // Exported values override job env
        ctx.export("INSTALL_TYPE".to_string(), "sdist".to_string());
        assert_eq!(ctx.condition_env()["INSTALL_TYPE"], "sdist");
    }

    #[test]
    fn test_engine_sees_steps_and_status() {
        let (mut ctx, _temp) = setup();
        ctx.record_step(
            "archive",
            StepContext {
                outputs: [("path".to_string(), "x.tar.gz".to_string())].into_iter().collect(),
                outcome: "success".to_string(),
                conclusion: "success".to_string(),
            },
        );
        let engine = ctx.engine(ctx.condition_env());
        assert_eq!(
            engine.interpolate("${{ steps.archive.outputs.path }}").unwrap(),
            "x.tar.gz"
        );
        assert_eq!(
            engine.interpolate("${{ matrix.install }}/${{ env.SHARED }}").unwrap(),
            "wheel/from-job"
        );
        assert!(engine.evaluate_condition("matrix.install == 'wheel'").unwrap());

        ctx.status.failed = true;
        let engine = ctx.engine(IndexMap::new());
        assert!(!engine.evaluate_condition("matrix.install == 'wheel'").unwrap());
        assert!(engine.evaluate_condition("always()").unwrap());
        assert!(engine.evaluate_condition("failure()").unwrap());
    }

    #[test]
    fn test_expression_env_hides_host_variables() {
        let (ctx, _temp) = setup();
        let mut step_env = IndexMap::new();
        step_env.insert("CHECK_TYPE".to_string(), ScalarString::from("${{ env.INSTALL_TYPE }}"));
        let visible = ctx.expression_env(&step_env).unwrap();
        assert_eq!(visible["CHECK_TYPE"], "wheel");
        assert!(visible.contains_key("INSTALL_TYPE"));
        assert!(!visible.contains_key("HOME"));
    }
}
