// Trigger Matching
// Decides whether an incoming event starts a workflow

use crate::workflow::models::{EventConfig, Trigger};
use crate::{ServiceError, ServiceResult};

use globset::{Glob, GlobMatcher};
use serde::Serialize;
use std::fmt;

/// An event delivered to the executor (`push` to a branch, a pull request, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    /// Event name as written under `on:` (push, pull_request, workflow_dispatch)
    pub name: String,
    /// Full git ref, e.g. `refs/heads/main` or `refs/tags/v1.0`
    pub git_ref: String,
    /// Commit being tested, when known
    pub sha: Option<String>,
}

impl TriggerEvent {
    pub fn new(name: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            git_ref: normalize_ref(&git_ref.into()),
            sha: None,
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new("push", git_ref)
    }

    pub fn pull_request(git_ref: impl Into<String>) -> Self {
        Self::new("pull_request", git_ref)
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Branch name if the ref points at a branch
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Tag name if the ref points at a tag
    pub fn tag(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/tags/")
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.git_ref)
    }
}

/// Bare branch names become `refs/heads/<name>`.
fn normalize_ref(git_ref: &str) -> String {
    if git_ref.starts_with("refs/") {
        git_ref.to_string()
    } else {
        format!("refs/heads/{}", git_ref)
    }
}

impl Trigger {
    /// Names of all events the workflow listens to, in declaration order
    pub fn event_names(&self) -> Vec<&str> {
        match self {
            Trigger::Single(name) => vec![name.as_str()],
            Trigger::Multiple(names) => names.iter().map(String::as_str).collect(),
            Trigger::Detailed(events) => events.keys().map(String::as_str).collect(),
        }
    }

    /// Whether `event` starts the workflow, honouring branch and tag filters.
    pub fn matches(&self, event: &TriggerEvent) -> ServiceResult<bool> {
        match self {
            Trigger::Single(name) => Ok(name == &event.name),
            Trigger::Multiple(names) => Ok(names.iter().any(|n| n == &event.name)),
            Trigger::Detailed(events) => match events.get(&event.name) {
                None => Ok(false),
                Some(None) => Ok(true),
                Some(Some(config)) => config.matches(event),
            },
        }
    }
}

impl EventConfig {
    fn matches(&self, event: &TriggerEvent) -> ServiceResult<bool> {
        let has_branch_filter = !self.branches.is_empty() || !self.branches_ignore.is_empty();
        let has_tag_filter = !self.tags.is_empty() || !self.tags_ignore.is_empty();

        if !has_branch_filter && !has_tag_filter {
            return Ok(true);
        }

        if let Some(branch) = event.branch() {
            if !has_branch_filter {
                // Only tag filters declared: branch pushes do not trigger
                return Ok(false);
            }
            return filter_matches(&self.branches, &self.branches_ignore, branch);
        }

        if let Some(tag) = event.tag() {
            if !has_tag_filter {
                return Ok(false);
            }
            return filter_matches(&self.tags, &self.tags_ignore, tag);
        }

        Ok(false)
    }
}

/// Include list first (empty = everything), then the ignore list.
fn filter_matches(include: &[String], ignore: &[String], name: &str) -> ServiceResult<bool> {
    let included = include.is_empty() || any_match(include, name)?;
    Ok(included && !any_match(ignore, name)?)
}

fn any_match(patterns: &[String], name: &str) -> ServiceResult<bool> {
    for pattern in patterns {
        if compile(pattern)?.is_match(name) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn compile(pattern: &str) -> ServiceResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ServiceError::invalid(format!("invalid ref filter '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowParser;

    fn trigger(yaml_on: &str) -> Trigger {
        let yaml = format!("on: {}\njobs:\n  a:\n    steps:\n      - run: 'true'\n", yaml_on);
        WorkflowParser::parse(&yaml).unwrap().on
    }

    #[test]
    fn test_list_trigger_matches_push_and_pull_request() {
        let on = trigger("[push, pull_request]");
        assert!(on.matches(&TriggerEvent::push("main")).unwrap());
        assert!(on.matches(&TriggerEvent::pull_request("feature/x")).unwrap());
        assert!(!on.matches(&TriggerEvent::new("schedule", "main")).unwrap());
    }

    #[test]
    fn test_single_trigger() {
        let on = trigger("push");
        assert!(on.matches(&TriggerEvent::push("any-branch")).unwrap());
        assert!(!on.matches(&TriggerEvent::pull_request("main")).unwrap());
    }

    #[test]
    fn test_branch_filters() {
        let on = trigger("{push: {branches: [master, 'release/**'], branches-ignore: ['release/old*']}}");
        assert!(on.matches(&TriggerEvent::push("master")).unwrap());
        assert!(on.matches(&TriggerEvent::push("release/1.2")).unwrap());
        assert!(!on.matches(&TriggerEvent::push("release/old-1")).unwrap());
        assert!(!on.matches(&TriggerEvent::push("feature")).unwrap());
    }

    #[test]
    fn test_tag_only_filter_ignores_branches() {
        let on = trigger("{push: {tags: ['v*']}}");
        assert!(on.matches(&TriggerEvent::push("refs/tags/v1.0")).unwrap());
        assert!(!on.matches(&TriggerEvent::push("main")).unwrap());
    }

    #[test]
    fn test_event_without_config_matches_everything() {
        let on = trigger("{push: {branches: [main]}, pull_request: null}");
        assert!(on.matches(&TriggerEvent::pull_request("anything")).unwrap());
        assert_eq!(on.event_names(), vec!["push", "pull_request"]);
    }

    #[test]
    fn test_ref_normalization() {
        let event = TriggerEvent::push("main");
        assert_eq!(event.git_ref, "refs/heads/main");
        assert_eq!(event.branch(), Some("main"));
        assert_eq!(TriggerEvent::push("refs/tags/v2").tag(), Some("v2"));
    }
}
