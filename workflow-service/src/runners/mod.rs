// Runners Module
// Provides step execution runners for `run:` and `uses:` steps

pub mod actions;
pub mod file_commands;
pub mod shell;

// Re-export key types
pub use actions::{
    ActionContext, ActionHandler, ActionInputs, ActionOutcome, ActionRef, ActionRegistry,
};
pub use file_commands::{FileCommandEffects, FileCommands};
pub use shell::{OutputCallback, Shell, ShellConfig, ShellOutput, ShellRunner};

/// Flips to `true` when the job instance is cancelled
pub type CancelReceiver = tokio::sync::watch::Receiver<bool>;

/// Runner registry for managing available runners
#[derive(Debug, Clone, Default)]
pub struct RunnerRegistry {
    shell: ShellRunner,
    actions: ActionRegistry,
}

impl RunnerRegistry {
    /// Create a new runner registry with the default shell and built-in actions
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the action registry
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Replace the shell runner
    pub fn with_shell(mut self, shell: ShellRunner) -> Self {
        self.shell = shell;
        self
    }

    /// Get the shell runner
    pub fn shell(&self) -> &ShellRunner {
        &self.shell
    }

    /// Get the action registry
    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }
}
