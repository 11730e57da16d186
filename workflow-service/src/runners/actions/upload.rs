// Coverage and artifact uploads
// Both are collected into the instance's artifact directory instead of a remote service.

use super::{input_bool, input_string, ActionContext, ActionHandler, ActionInputs, ActionOutcome};
use crate::{ServiceError, ServiceResult};

use globset::Glob;
use std::fs;
use std::path::{Path, PathBuf};

/// `codecov/codecov-action`: copies coverage reports into the artifact directory
pub struct CodecovUpload;

/// `actions/upload-artifact`: copies `path` entries into `<artifacts>/<name>/`
pub struct UploadArtifact;

/// Report codecov looks for when no file is named
const DEFAULT_COVERAGE_FILE: &str = "coverage.xml";

#[async_trait::async_trait]
impl ActionHandler for CodecovUpload {
    fn name(&self) -> &'static str {
        "codecov/codecov-action"
    }

    async fn run(
        &self,
        inputs: &ActionInputs,
        ctx: &ActionContext<'_>,
    ) -> ServiceResult<ActionOutcome> {
        let mut files: Vec<String> = Vec::new();
        for key in ["file", "files"] {
            if let Some(list) = input_string(inputs, key) {
                files.extend(
                    list.split([',', '\n'])
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(str::to_string),
                );
            }
        }
        if files.is_empty() {
            files.push(DEFAULT_COVERAGE_FILE.to_string());
        }

        let strict = input_bool(inputs, "fail_ci_if_error");
        let mut outcome = ActionOutcome::default();

        for file in &files {
            let source = ctx.workspace.join(file);
            if !source.is_file() {
                let message = format!("coverage report {} not found", source.display());
                if strict {
                    return Err(ServiceError::execution(message));
                }
                outcome.warnings.push(message);
                continue;
            }
            let target = copy_into(&source, ctx.artifacts_dir)?;
            outcome
                .log
                .push(format!("Collected {} -> {}", file, target.display()));
        }

        Ok(outcome)
    }
}

/// `if-no-files-found:` input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoFilesFound {
    Warn,
    Error,
    Ignore,
}

impl NoFilesFound {
    fn from_inputs(inputs: &ActionInputs) -> Self {
        match input_string(inputs, "if-no-files-found")
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Some("error") => NoFilesFound::Error,
            Some("ignore") => NoFilesFound::Ignore,
            _ => NoFilesFound::Warn,
        }
    }
}

#[async_trait::async_trait]
impl ActionHandler for UploadArtifact {
    fn name(&self) -> &'static str {
        "actions/upload-artifact"
    }

    async fn run(
        &self,
        inputs: &ActionInputs,
        ctx: &ActionContext<'_>,
    ) -> ServiceResult<ActionOutcome> {
        let name = input_string(inputs, "name").unwrap_or_else(|| "artifact".to_string());
        let patterns = input_string(inputs, "path")
            .ok_or_else(|| ServiceError::invalid("actions/upload-artifact requires 'path'"))?;
        let destination = ctx.artifacts_dir.join(&name);

        let mut outcome = ActionOutcome::default();
        let mut copied = 0;

        for pattern in patterns.lines().map(str::trim).filter(|p| !p.is_empty()) {
            for source in resolve_pattern(ctx.workspace, pattern)? {
                let relative = source.strip_prefix(ctx.workspace).unwrap_or(&source);
                let target = destination.join(relative);
                copy_tree(&source, &target)?;
                copied += 1;
            }
        }

        if copied == 0 {
            let message = format!("no files were found with the provided path: {}", patterns);
            match NoFilesFound::from_inputs(inputs) {
                NoFilesFound::Error => return Err(ServiceError::execution(message)),
                NoFilesFound::Warn => outcome.warnings.push(message),
                NoFilesFound::Ignore => {}
            }
        } else {
            outcome.log.push(format!(
                "Collected {} path(s) into {}",
                copied,
                destination.display()
            ));
        }

        outcome
            .outputs
            .insert("artifact-path".to_string(), destination.display().to_string());
        Ok(outcome)
    }
}

/// Literal paths resolve to themselves; anything with glob syntax is matched
/// against every file under the workspace (`.git` excluded).
fn resolve_pattern(workspace: &Path, pattern: &str) -> ServiceResult<Vec<PathBuf>> {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);

    if !pattern.contains(['*', '?', '[', '{']) {
        let path = workspace.join(pattern);
        return Ok(if path.exists() { vec![path] } else { Vec::new() });
    }

    let matcher = Glob::new(pattern)
        .map_err(|e| ServiceError::invalid(format!("invalid path pattern '{}': {}", pattern, e)))?
        .compile_matcher();

    let mut matches = Vec::new();
    let mut pending = vec![workspace.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n != ".git") {
                    pending.push(path);
                }
            } else if path
                .strip_prefix(workspace)
                .is_ok_and(|relative| matcher.is_match(relative))
            {
                matches.push(path);
            }
        }
    }
    matches.sort();
    Ok(matches)
}

/// Copy a single file into `dir`, keeping its file name
fn copy_into(source: &Path, dir: &Path) -> ServiceResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let target = dir.join(source.file_name().unwrap_or(source.as_os_str()));
    fs::copy(source, &target)?;
    Ok(target)
}

fn copy_tree(source: &Path, target: &Path) -> ServiceResult<()> {
    if source.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_tree(&entry.path(), &target.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target)?;
    }
    Ok(())
}
