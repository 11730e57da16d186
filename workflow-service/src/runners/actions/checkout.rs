// actions/checkout
// The workspace already is the checkout; only submodules and history depth are acted on.

use super::{input_string, run_tool, ActionContext, ActionHandler, ActionInputs, ActionOutcome};
use crate::utils::find_repo_root;
use crate::{ServiceError, ServiceResult};

use std::path::Path;

pub struct Checkout;

/// `submodules:` input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submodules {
    None,
    TopLevel,
    Recursive,
}

impl Submodules {
    fn from_inputs(inputs: &ActionInputs) -> Self {
        match input_string(inputs, "submodules")
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Some("true") => Submodules::TopLevel,
            Some("recursive") => Submodules::Recursive,
            _ => Submodules::None,
        }
    }
}

#[async_trait::async_trait]
impl ActionHandler for Checkout {
    fn name(&self) -> &'static str {
        "actions/checkout"
    }

    async fn run(
        &self,
        inputs: &ActionInputs,
        ctx: &ActionContext<'_>,
    ) -> ServiceResult<ActionOutcome> {
        let mut outcome = ActionOutcome::default();

        let Some(repo_root) = find_repo_root(ctx.workspace) else {
            outcome.warnings.push(format!(
                "{} is not inside a git repository; using it as-is",
                ctx.workspace.display()
            ));
            return Ok(outcome);
        };

        let git = which::which_in("git", ctx.env.get("PATH"), &repo_root)
            .map_err(|e| ServiceError::execution(format!("git not found: {}", e)))?;

        let submodules = Submodules::from_inputs(inputs);
        if submodules != Submodules::None && repo_root.join(".gitmodules").exists() {
            let mut args = vec!["submodule", "update", "--init"];
            if submodules == Submodules::Recursive {
                args.push("--recursive");
            }
            git_checked(&git, &args, &repo_root, ctx).await?;
            outcome.log.push(format!("git {}", args.join(" ")));
        }

        // fetch-depth: 0 asks for the full history
        if input_string(inputs, "fetch-depth").as_deref() == Some("0") {
            let shallow =
                git_checked(&git, &["rev-parse", "--is-shallow-repository"], &repo_root, ctx)
                    .await?;
            if shallow.trim() == "true" {
                git_checked(&git, &["fetch", "--unshallow"], &repo_root, ctx).await?;
                outcome.log.push("git fetch --unshallow".to_string());
            }
        }

        // A repository without commits has no HEAD; not an error for a local run
        if let Ok(commit) = git_checked(&git, &["rev-parse", "HEAD"], &repo_root, ctx).await {
            outcome
                .outputs
                .insert("commit".to_string(), commit.trim().to_string());
        }

        Ok(outcome)
    }
}

async fn git_checked(
    git: &Path,
    args: &[&str],
    dir: &Path,
    ctx: &ActionContext<'_>,
) -> ServiceResult<String> {
    let output = run_tool(git, args, dir, ctx.env).await?;
    if !output.status.success() {
        return Err(ServiceError::execution(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Value;
    use indexmap::IndexMap;

    fn host_env() -> IndexMap<String, String> {
        std::env::vars().collect()
    }

    #[test]
    fn test_submodules_input() {
        let mut inputs = ActionInputs::new();
        assert_eq!(Submodules::from_inputs(&inputs), Submodules::None);
        inputs.insert("submodules".into(), Value::Bool(true));
        assert_eq!(Submodules::from_inputs(&inputs), Submodules::TopLevel);
        inputs.insert("submodules".into(), Value::from("recursive"));
        assert_eq!(Submodules::from_inputs(&inputs), Submodules::Recursive);
        inputs.insert("submodules".into(), Value::Bool(false));
        assert_eq!(Submodules::from_inputs(&inputs), Submodules::None);
    }

    #[tokio::test]
    async fn test_checkout_outside_repository_warns() {
        let dir = tempfile::tempdir().unwrap();
        let env = host_env();
        let ctx = ActionContext {
            workspace: dir.path(),
            env: &env,
            runner_temp: dir.path(),
            artifacts_dir: dir.path(),
        };

        let outcome = Checkout.run(&ActionInputs::new(), &ctx).await.unwrap();
        // The temp dir might live inside some repository; only check the no-repo path
        if find_repo_root(dir.path()).is_none() {
            assert_eq!(outcome.warnings.len(), 1);
            assert!(outcome.warnings[0].contains("not inside a git repository"));
        }
    }

    #[tokio::test]
    async fn test_checkout_full_history_in_fresh_repo() {
        if which::which("git").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let env = host_env();
        let init = run_tool(&which::which("git").unwrap(), &["init", "-q"], dir.path(), &env)
            .await
            .unwrap();
        assert!(init.status.success());

        let ctx = ActionContext {
            workspace: dir.path(),
            env: &env,
            runner_temp: dir.path(),
            artifacts_dir: dir.path(),
        };
        let mut inputs = ActionInputs::new();
        inputs.insert("submodules".into(), Value::from("recursive"));
        inputs.insert("fetch-depth".into(), Value::Number(0.0));

        let outcome = Checkout.run(&inputs, &ctx).await.unwrap();
        assert!(outcome.warnings.is_empty());
        // No .gitmodules and not shallow: nothing to do
        assert!(outcome.log.is_empty());
        assert!(!outcome.outputs.contains_key("commit"));
    }
}
