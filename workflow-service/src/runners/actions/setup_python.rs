// actions/setup-python
// Selects an interpreter already installed on the host instead of downloading one.

use super::{input_string, run_tool, ActionContext, ActionHandler, ActionInputs, ActionOutcome};
use crate::{ServiceError, ServiceResult};

use std::fs;
use std::io;
use std::path::Path;

pub struct SetupPython;

#[async_trait::async_trait]
impl ActionHandler for SetupPython {
    fn name(&self) -> &'static str {
        "actions/setup-python"
    }

    async fn run(
        &self,
        inputs: &ActionInputs,
        ctx: &ActionContext<'_>,
    ) -> ServiceResult<ActionOutcome> {
        let requested = input_string(inputs, "python-version");
        let search_path = ctx.env.get("PATH");

        let mut rejected = Vec::new();
        for candidate in candidates(requested.as_deref()) {
            let Ok(interpreter) = which::which_in(&candidate, search_path, ctx.workspace) else {
                continue;
            };
            let Some(version) = interpreter_version(&interpreter, ctx).await else {
                continue;
            };

            let accepted = requested
                .as_deref()
                .map_or(true, |wanted| version_matches(wanted, &version));
            if !accepted {
                rejected.push(format!("{} ({})", interpreter.display(), version));
                continue;
            }

            // Shims are symlinks, so they need an absolute target
            let interpreter = if interpreter.is_relative() {
                ctx.workspace.join(interpreter)
            } else {
                interpreter
            };
            return provision(&interpreter, version, ctx.runner_temp);
        }

        let wanted = requested.unwrap_or_else(|| "any".to_string());
        let mut message = format!("no Python {} interpreter found on PATH", wanted);
        if !rejected.is_empty() {
            message.push_str(&format!("; found {}", rejected.join(", ")));
        }
        Err(ServiceError::execution(message))
    }
}

/// Executables to try, most specific first
fn candidates(requested: Option<&str>) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(version) = requested {
        let parts: Vec<&str> = version
            .split('.')
            .take_while(|p| p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty())
            .collect();
        if parts.len() >= 2 {
            names.push(format!("python{}.{}", parts[0], parts[1]));
        }
        if let Some(major) = parts.first() {
            names.push(format!("python{}", major));
        }
    }
    for fallback in ["python3", "python"] {
        if !names.iter().any(|n| n == fallback) {
            names.push(fallback.to_string());
        }
    }
    names
}

/// `3.8` accepts `3.8.10`; `3.x` accepts any 3; `3.1` does not accept `3.10`
fn version_matches(requested: &str, actual: &str) -> bool {
    let actual: Vec<&str> = actual.split('.').collect();
    requested
        .trim()
        .split('.')
        .enumerate()
        .all(|(i, part)| part == "x" || part == "*" || actual.get(i) == Some(&part))
}

/// Version reported by `<interpreter> --version` (python 2 prints it on stderr)
async fn interpreter_version(interpreter: &Path, ctx: &ActionContext<'_>) -> Option<String> {
    let output = run_tool(interpreter, &["--version"], ctx.workspace, ctx.env)
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    text.split_whitespace()
        .skip_while(|word| !word.eq_ignore_ascii_case("python"))
        .nth(1)
        .map(str::to_string)
}

/// Names the selected interpreter answers to: `python`, `python3`, `python3.8`
fn shim_names(version: &str) -> Vec<String> {
    let mut parts = version.split('.');
    let major = parts.next().unwrap_or_default();
    let mut names = vec!["python".to_string(), format!("python{}", major)];
    if let Some(minor) = parts.next() {
        names.push(format!("python{}.{}", major, minor));
    }
    names.dedup();
    names
}

#[cfg(unix)]
fn link(target: &Path, shim: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, shim)
}

#[cfg(not(unix))]
fn link(target: &Path, shim: &Path) -> io::Result<()> {
    fs::copy(target, shim).map(|_| ())
}

/// Put the interpreter on PATH under its generic names.
///
/// The shims live in `<runner temp>/setup-python/<version>` and go ahead of the
/// interpreter's own directory, so a `python` installed there for another
/// version never wins. A `pipX.Y` next to the interpreter is shimmed as
/// `pip`, `pip3` and `pipX.Y`.
fn provision(
    interpreter: &Path,
    version: String,
    runner_temp: &Path,
) -> ServiceResult<ActionOutcome> {
    let bin_dir = interpreter
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let location = if bin_dir.ends_with("bin") {
        bin_dir.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        bin_dir.clone()
    };

    let shims = runner_temp.join("setup-python").join(&version);
    if shims.exists() {
        fs::remove_dir_all(&shims)?;
    }
    fs::create_dir_all(&shims)?;

    let suffix = std::env::consts::EXE_SUFFIX;
    let names = shim_names(&version);
    for name in &names {
        link(interpreter, &shims.join(format!("{}{}", name, suffix)))?;
    }

    let pip_names: Vec<String> = names.iter().map(|n| n.replacen("python", "pip", 1)).collect();
    let pip = pip_names
        .last()
        .map(|name| bin_dir.join(format!("{}{}", name, suffix)))
        .filter(|pip| pip.is_file());
    if let Some(pip) = &pip {
        for name in &pip_names {
            link(pip, &shims.join(format!("{}{}", name, suffix)))?;
        }
    }

    let mut outcome = ActionOutcome::default();
    outcome.log.push(format!(
        "Using Python {} at {}",
        version,
        interpreter.display()
    ));
    if let Some(pip) = &pip {
        outcome.log.push(format!("Using pip at {}", pip.display()));
    }
    outcome
        .outputs
        .insert("python-version".to_string(), version);
    outcome.outputs.insert(
        "python-path".to_string(),
        interpreter.display().to_string(),
    );
    outcome
        .env
        .push(("pythonLocation".to_string(), location.display().to_string()));
    outcome.path.push(shims);
    outcome.path.push(bin_dir);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Value;
    use indexmap::IndexMap;

    #[test]
    fn test_candidates() {
        assert_eq!(
            candidates(Some("3.8")),
            vec!["python3.8", "python3", "python"]
        );
        assert_eq!(candidates(Some("3.x")), vec!["python3", "python"]);
        assert_eq!(candidates(None), vec!["python3", "python"]);
    }

    #[test]
    fn test_shim_names() {
        assert_eq!(shim_names("3.8.12"), vec!["python", "python3", "python3.8"]);
        assert_eq!(shim_names("3"), vec!["python", "python3"]);
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches("3.8", "3.8.10"));
        assert!(version_matches("3", "3.9.1"));
        assert!(version_matches("3.x", "3.11.0"));
        assert!(!version_matches("3.1", "3.10.2"));
        assert!(!version_matches("3.9", "3.8.10"));
    }

    #[cfg(unix)]
    fn fake_interpreter(dir: &Path, name: &str, version: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\necho \"Python {}\"\n", version)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_selects_versioned_interpreter() {
        let bin = tempfile::tempdir().unwrap();
        fake_interpreter(bin.path(), "python3.8", "3.8.12");
        fake_interpreter(bin.path(), "python3", "3.9.1");

        let env: IndexMap<String, String> =
            [("PATH".to_string(), bin.path().display().to_string())].into_iter().collect();
        let temp = tempfile::tempdir().unwrap();
        let ctx = ActionContext {
            workspace: bin.path(),
            env: &env,
            runner_temp: temp.path(),
            artifacts_dir: bin.path(),
        };
        let mut inputs = ActionInputs::new();
        inputs.insert("python-version".into(), Value::Number(3.8));

        let outcome = SetupPython.run(&inputs, &ctx).await.unwrap();
        assert_eq!(outcome.outputs["python-version"], "3.8.12");
        assert!(outcome.outputs["python-path"].ends_with("python3.8"));
        let shims = temp.path().join("setup-python").join("3.8.12");
        assert_eq!(outcome.path, vec![shims.clone(), bin.path().to_path_buf()]);
        for name in ["python", "python3", "python3.8"] {
            assert!(shims.join(name).exists(), "missing shim {}", name);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generic_python_runs_selected_version() {
        let bin = tempfile::tempdir().unwrap();
        fake_interpreter(bin.path(), "python3.6", "3.6.0");
        fake_interpreter(bin.path(), "python", "3.9.0");
        fake_interpreter(bin.path(), "pip3.6", "3.6.0");
        fake_interpreter(bin.path(), "pip", "3.9.0");

        let env: IndexMap<String, String> =
            [("PATH".to_string(), bin.path().display().to_string())].into_iter().collect();
        let temp = tempfile::tempdir().unwrap();
        let ctx = ActionContext {
            workspace: bin.path(),
            env: &env,
            runner_temp: temp.path(),
            artifacts_dir: bin.path(),
        };
        let mut inputs = ActionInputs::new();
        inputs.insert("python-version".into(), Value::from("3.6"));

        let outcome = SetupPython.run(&inputs, &ctx).await.unwrap();
        let path = std::env::join_paths(&outcome.path).unwrap();
        for tool in ["python", "python3", "pip"] {
            let found = which::which_in(tool, Some(&path), bin.path()).unwrap();
            let output = std::process::Command::new(&found)
                .arg("--version")
                .output()
                .unwrap();
            assert_eq!(
                String::from_utf8_lossy(&output.stdout).trim(),
                "Python 3.6.0",
                "{} resolved to {}",
                tool,
                found.display()
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_falls_back_to_python3_with_matching_version() {
        let bin = tempfile::tempdir().unwrap();
        fake_interpreter(bin.path(), "python3", "3.9.1");

        let env: IndexMap<String, String> =
            [("PATH".to_string(), bin.path().display().to_string())].into_iter().collect();
        let temp = tempfile::tempdir().unwrap();
        let ctx = ActionContext {
            workspace: bin.path(),
            env: &env,
            runner_temp: temp.path(),
            artifacts_dir: bin.path(),
        };
        let mut inputs = ActionInputs::new();
        inputs.insert("python-version".into(), Value::from("3.9"));

        let outcome = SetupPython.run(&inputs, &ctx).await.unwrap();
        assert_eq!(outcome.outputs["python-version"], "3.9.1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_matching_interpreter() {
        let bin = tempfile::tempdir().unwrap();
        fake_interpreter(bin.path(), "python3", "3.9.1");

        let env: IndexMap<String, String> =
            [("PATH".to_string(), bin.path().display().to_string())].into_iter().collect();
        let temp = tempfile::tempdir().unwrap();
        let ctx = ActionContext {
            workspace: bin.path(),
            env: &env,
            runner_temp: temp.path(),
            artifacts_dir: bin.path(),
        };
        let mut inputs = ActionInputs::new();
        inputs.insert("python-version".into(), Value::from("3.6"));

        let err = SetupPython.run(&inputs, &ctx).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no Python 3.6 interpreter"));
        assert!(message.contains("3.9.1"));
    }
}
