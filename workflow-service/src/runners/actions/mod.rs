// Built-in Actions
// Local stand-ins for the `uses:` actions a matrix workflow typically needs

pub mod checkout;
pub mod setup_python;
pub mod upload;

pub use checkout::Checkout;
pub use setup_python::SetupPython;
pub use upload::{CodecovUpload, UploadArtifact};

use crate::expression::Value;
use crate::{ServiceError, ServiceResult};

use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Interpolated `with:` inputs of a step
pub type ActionInputs = IndexMap<String, Value>;

/// A parsed `uses:` reference such as `actions/checkout@v2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    /// Lowercased `owner/repo[/path]`, or the raw reference for local and docker actions
    pub name: String,
    /// Everything after `@`; ignored when dispatching
    pub version: Option<String>,
}

impl ActionRef {
    pub fn parse(uses: &str) -> ServiceResult<Self> {
        let uses = uses.trim();
        if uses.is_empty() {
            return Err(ServiceError::invalid("empty 'uses' reference"));
        }

        if uses.starts_with("./") || uses.starts_with("docker://") {
            return Ok(Self {
                name: uses.to_string(),
                version: None,
            });
        }

        let (name, version) = match uses.split_once('@') {
            Some((name, version)) => (name, Some(version.to_string())),
            None => (uses, None),
        };
        if !name.contains('/') {
            return Err(ServiceError::invalid(format!(
                "invalid action reference '{}': expected owner/repo@ref",
                uses
            )));
        }

        Ok(Self {
            name: name.to_ascii_lowercase(),
            version,
        })
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// What an action sees of its job instance
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    /// The checkout the instance runs in
    pub workspace: &'a Path,
    /// Effective environment of the step
    pub env: &'a IndexMap<String, String>,
    /// The instance's private temp directory (`RUNNER_TEMP`)
    pub runner_temp: &'a Path,
    /// Per-instance artifact directory (`<artifacts>/<job>/<instance>`)
    pub artifacts_dir: &'a Path,
}

/// What an action hands back to the executor
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    /// Becomes `steps.<id>.outputs.*`
    pub outputs: IndexMap<String, String>,
    /// Exported into the environment of later steps
    pub env: Vec<(String, String)>,
    /// Prepended to `PATH` for later steps, first entry first
    pub path: Vec<PathBuf>,
    /// Informational lines
    pub log: Vec<String>,
    /// Problems that did not fail the step
    pub warnings: Vec<String>,
}

/// A built-in implementation of a `uses:` action
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    /// `owner/repo` this handler answers to
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        inputs: &ActionInputs,
        ctx: &ActionContext<'_>,
    ) -> ServiceResult<ActionOutcome>;
}

/// Dispatches `uses:` references to their handlers, ignoring versions
#[derive(Clone)]
pub struct ActionRegistry {
    handlers: IndexMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// A registry with no actions at all
    pub fn empty() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }

    /// checkout, setup-python, codecov and upload-artifact
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Checkout);
        registry.register(SetupPython);
        registry.register(CodecovUpload);
        registry.register(UploadArtifact);
        registry
    }

    /// Add (or replace) a handler
    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        self.handlers
            .insert(handler.name().to_string(), Arc::new(handler));
    }

    pub fn supports(&self, action: &ActionRef) -> bool {
        self.handlers.contains_key(&action.name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run `action`; unknown actions are an error
    pub async fn run(
        &self,
        action: &ActionRef,
        inputs: &ActionInputs,
        ctx: &ActionContext<'_>,
    ) -> ServiceResult<ActionOutcome> {
        let handler = self.handlers.get(&action.name).ok_or_else(|| {
            ServiceError::execution(format!("unsupported action '{}'", action))
        })?;
        tracing::debug!("running built-in action {}", action);
        handler.run(inputs, ctx).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

/// String form of an input; missing, null and empty inputs are `None`
pub(crate) fn input_string(inputs: &ActionInputs, key: &str) -> Option<String> {
    match inputs.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_string()).filter(|s| !s.is_empty()),
    }
}

/// Boolean input; `true` or the string `true` (any case)
pub(crate) fn input_bool(inputs: &ActionInputs, key: &str) -> bool {
    match inputs.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Run a helper program (git, python) with the step's environment and capture stdout
pub(crate) async fn run_tool(
    program: &Path,
    args: &[&str],
    dir: &Path,
    env: &IndexMap<String, String>,
) -> ServiceResult<std::process::Output> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(dir)
        .env_clear()
        .envs(env)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            ServiceError::execution(format!("failed to run {}: {}", program.display(), e))
        })?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_ref() {
        let action = ActionRef::parse("actions/checkout@v2").unwrap();
        assert_eq!(action.name, "actions/checkout");
        assert_eq!(action.version.as_deref(), Some("v2"));
        assert_eq!(action.to_string(), "actions/checkout@v2");

        let action = ActionRef::parse("Codecov/codecov-action@v1").unwrap();
        assert_eq!(action.name, "codecov/codecov-action");

        let local = ActionRef::parse("./.github/actions/setup").unwrap();
        assert_eq!(local.name, "./.github/actions/setup");

        assert!(ActionRef::parse("checkout").is_err());
        assert!(ActionRef::parse("  ").is_err());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ActionRegistry::builtin();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "actions/checkout",
                "actions/setup-python",
                "codecov/codecov-action",
                "actions/upload-artifact",
            ]
        );
        assert!(registry.supports(&ActionRef::parse("actions/setup-python@v2").unwrap()));
        assert!(!registry.supports(&ActionRef::parse("actions/cache@v3").unwrap()));
    }

    #[tokio::test]
    async fn test_unknown_action_fails() {
        let registry = ActionRegistry::builtin();
        let dir = tempfile::tempdir().unwrap();
        let env = IndexMap::new();
        let ctx = ActionContext {
            workspace: dir.path(),
            env: &env,
            runner_temp: dir.path(),
            artifacts_dir: dir.path(),
        };

        let err = registry
            .run(
                &ActionRef::parse("actions/cache@v3").unwrap(),
                &ActionInputs::new(),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported action 'actions/cache@v3'"));
    }

    #[test]
    fn test_input_helpers() {
        let mut inputs = ActionInputs::new();
        inputs.insert("submodules".into(), Value::from("Recursive"));
        inputs.insert("fail".into(), Value::Bool(true));
        inputs.insert("fetch-depth".into(), Value::Number(0.0));
        inputs.insert("empty".into(), Value::from(""));

        assert_eq!(input_string(&inputs, "submodules").as_deref(), Some("Recursive"));
        assert_eq!(input_string(&inputs, "fetch-depth").as_deref(), Some("0"));
        assert_eq!(input_string(&inputs, "empty"), None);
        assert_eq!(input_string(&inputs, "missing"), None);
        assert!(input_bool(&inputs, "fail"));
        assert!(!input_bool(&inputs, "submodules"));
    }
}
