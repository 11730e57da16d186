//! Runs the reference CI matrix end to end with shell stubs in place of the
//! project scripts, the interpreters and `make`.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use workflow_service::{
    ExecutorConfig, InstanceResult, JobStatus, MatrixExpander, StepStatus, TriggerEvent,
    WorkflowExecutor, WorkflowParser, WorkflowResult,
};

const FIXTURE: &str = include_str!("../fixtures/ci-matrix.yml");
const ARCHIVE: &str = "dist/nipy-0.6.1.dev1.tar.gz";

fn script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

struct Sandbox {
    workspace: tempfile::TempDir,
    stubs: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let stubs = tempfile::tempdir().unwrap();

        let ci = workspace.path().join("tools/ci");
        script(&ci.join("create_venv.sh"), "echo \"venv for $INSTALL_TYPE\"");
        script(&ci.join("build_archive.sh"), &format!("ARCHIVE=\"{}\"", ARCHIVE));
        script(
            &ci.join("install.sh"),
            r#"if [ "$FAIL_INSTALL" = "1" ]; then
  echo "pip install failed" >&2
  exit 1
fi
echo "install=$INSTALL_TYPE flags=[$EXTRA_PIP_FLAGS] archive=$ARCHIVE""#,
        );
        script(&ci.join("install_extras.sh"), "echo \"extras archive=$ARCHIVE\"");
        script(&ci.join("activate.sh"), "export VIRTUAL_ENV=\"$RUNNER_TEMP/venv\"");

        for minor in 6..=9 {
            script(
                &stubs.path().join(format!("python3.{}", minor)),
                &format!("echo \"Python 3.{}.0\"", minor),
            );
        }
        // A host `python` of some other version that setup-python must shadow
        script(&stubs.path().join("python"), "echo \"Python 3.9.0\"");
        script(
            &stubs.path().join("make"),
            "echo \"make $* archive=$ARCHIVE\"\necho '<coverage/>' > coverage.xml",
        );

        Self { workspace, stubs }
    }

    async fn run(&self, yaml: &str, extra_env: &[(&str, &str)]) -> WorkflowResult {
        let mut config = ExecutorConfig {
            working_dir: self.workspace.path().to_path_buf(),
            ..Default::default()
        };
        let path = format!(
            "{}:{}",
            self.stubs.path().display(),
            std::env::var("PATH").unwrap_or_default()
        );
        config.extra_env.insert("PATH".to_string(), path);
        for (name, value) in extra_env {
            config.extra_env.insert(name.to_string(), value.to_string());
        }

        let workflow = WorkflowParser::parse_and_validate(yaml).unwrap();
        WorkflowExecutor::new(workflow)
            .with_config(config)
            .execute(&TriggerEvent::push("main"))
            .await
            .unwrap()
    }
}

fn axis(instance: &InstanceResult, key: &str) -> String {
    instance.matrix.get(key).map(|v| v.as_string()).unwrap_or_default()
}

fn stdout<'a>(instance: &'a InstanceResult, step: &str) -> &'a str {
    &instance.step(step).unwrap().stdout
}

#[test]
fn reference_matrix_plans_thirteen_instances() {
    let workflow = WorkflowParser::parse_and_validate(FIXTURE).unwrap();
    let plan = MatrixExpander::plan(&workflow);
    assert_eq!(plan.len(), 13);

    // 2 x 4 base combinations, os slowest
    assert_eq!(plan[0].instance.name, "ubuntu-latest, 3.6, pip, ci_tests, ");
    assert_eq!(plan[7].instance.name, "macos-latest, 3.9, pip, ci_tests, ");

    // Includes are appended in order, even where they overlap the base product
    let checks: Vec<String> = plan[8..]
        .iter()
        .map(|p| p.instance.values["check"].as_string())
        .collect();
    assert_eq!(checks, vec!["doc", "tutorial", "skiptests", "ci_tests", "ci_tests"]);
    assert_eq!(plan[11].instance.values["install"].as_string(), "wheel");
    assert_eq!(plan[12].runs_on, vec!["ubuntu-latest"]);
}

#[test]
fn every_push_and_pull_request_triggers() {
    let workflow = WorkflowParser::parse(FIXTURE).unwrap();
    for git_ref in ["main", "maint/0.6.x", "feature/x", "refs/tags/0.6.0"] {
        assert!(workflow.on.matches(&TriggerEvent::push(git_ref)).unwrap(), "push {}", git_ref);
    }
    for git_ref in ["main", "feature/x"] {
        assert!(
            workflow.on.matches(&TriggerEvent::pull_request(git_ref)).unwrap(),
            "pull_request {}",
            git_ref
        );
    }
    assert!(!workflow
        .on
        .matches(&TriggerEvent::new("workflow_dispatch", "main"))
        .unwrap());
}

#[tokio::test]
async fn reference_matrix_runs_every_instance() {
    let sandbox = Sandbox::new();
    let result = sandbox.run(FIXTURE, &[]).await;

    assert!(result.triggered);
    assert_eq!(result.instances.len(), 13);
    assert!(result.success(), "failed: {:?}", result.failed_instances().collect::<Vec<_>>());

    for instance in &result.instances {
        let version = axis(instance, "python-version");
        let setup = instance
            .steps
            .iter()
            .find(|s| s.name == format!("Set up Python {}", version))
            .unwrap();
        assert_eq!(setup.outputs["python-version"], format!("{}.0", version));
        assert_eq!(
            stdout(instance, "Display Python version"),
            format!("Python {}.0", version),
            "{}",
            instance.display_name
        );
        assert_eq!(instance.step("codecov").unwrap().outcome, StepStatus::Success);
    }

    let doc = &result.instances[8];
    assert_eq!(axis(doc, "check"), "doc");
    assert!(stdout(doc, "tests").starts_with("make -f Makefile doc"));
}

#[tokio::test]
async fn skiptests_skips_only_the_test_step() {
    let sandbox = Sandbox::new();
    let result = sandbox.run(FIXTURE, &[]).await;

    for instance in &result.instances {
        let skipping = axis(instance, "check") == "skiptests";
        assert_eq!(instance.step("tests").unwrap().ran(), !skipping);
        for step in ["archive", "install", "extras", "codecov"] {
            assert!(instance.step(step).unwrap().ran(), "{} did not run", step);
        }
        assert_eq!(instance.status, JobStatus::Success);
    }
    assert_eq!(
        result
            .instances
            .iter()
            .filter(|i| !i.step("tests").unwrap().ran())
            .count(),
        1
    );
}

#[tokio::test]
async fn coverage_upload_runs_after_install_failure() {
    let sandbox = Sandbox::new();
    let result = sandbox.run(FIXTURE, &[("FAIL_INSTALL", "1")]).await;

    assert!(!result.success());
    for instance in &result.instances {
        assert_eq!(instance.status, JobStatus::Failure);
        let install = instance.step("install").unwrap();
        assert_eq!(install.outcome, StepStatus::Failure);
        assert_eq!(install.stderr, "pip install failed");
        assert!(!instance.step("extras").unwrap().ran());
        assert!(!instance.step("tests").unwrap().ran());
        assert!(instance.step("codecov").unwrap().ran());
    }
}

#[tokio::test]
async fn archive_reaches_later_steps_unmodified() {
    let sandbox = Sandbox::new();
    let result = sandbox.run(FIXTURE, &[]).await;
    let expected = format!("archive={}", ARCHIVE);

    for instance in &result.instances {
        assert_eq!(instance.exported_env["ARCHIVE"], ARCHIVE);
        assert!(stdout(instance, "install").ends_with(&expected));
        assert_eq!(stdout(instance, "extras"), expected);
        if instance.step("tests").unwrap().ran() {
            assert!(stdout(instance, "tests").ends_with(&expected));
        }
    }
}

#[tokio::test]
async fn extra_pip_flags_stay_within_their_instance() {
    let sandbox = Sandbox::new();
    let yaml = FIXTURE.replace(
        "install: wheel\n            check: ci_tests\n            pip-flags: ''",
        "install: wheel\n            check: ci_tests\n            pip-flags: '--pre'",
    );
    assert_ne!(yaml, FIXTURE);

    let result = sandbox.run(&yaml, &[]).await;
    assert!(result.success());

    for instance in &result.instances {
        let install = stdout(instance, "install");
        if axis(instance, "install") == "wheel" {
            assert!(install.contains("flags=[--pre]"), "{}", install);
        } else {
            assert!(install.contains("flags=[]"), "{}", install);
        }
    }
}
