// Shell Runner
// Executes `run:` steps with bash, sh, pwsh, powershell, cmd or python

use crate::runners::CancelReceiver;

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long to keep draining output after a process was killed
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// `bash -e` when bash is available, `sh -e` otherwise
    Default,
    /// `shell: bash`, fails on errors inside pipelines too
    Bash,
    /// POSIX sh
    Sh,
    /// PowerShell Core (cross-platform)
    Pwsh,
    /// Windows PowerShell (falls back to pwsh off Windows)
    PowerShell,
    /// cmd.exe
    Cmd,
    /// The script is Python source
    Python,
}

impl Shell {
    /// Parse a `shell:` value
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bash" => Some(Shell::Bash),
            "sh" => Some(Shell::Sh),
            "pwsh" => Some(Shell::Pwsh),
            "powershell" => Some(Shell::PowerShell),
            "cmd" => Some(Shell::Cmd),
            "python" => Some(Shell::Python),
            _ => None,
        }
    }

    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("pwsh", &["-NoLogo", "-NoProfile", "-Command"])
                } else if which::which("bash").is_ok() {
                    ("bash", &["-e", "-c"])
                } else {
                    ("sh", &["-e", "-c"])
                }
            }
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-e", "-o", "pipefail", "-c"]),
            Shell::Sh => ("sh", &["-e", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::PowerShell => {
                if cfg!(target_os = "windows") {
                    ("powershell.exe", &["-NoLogo", "-NoProfile", "-Command"])
                } else {
                    ("pwsh", &["-NoLogo", "-NoProfile", "-Command"])
                }
            }
            Shell::Cmd => ("cmd", &["/D", "/E:ON", "/V:OFF", "/S", "/C"]),
            Shell::Python => ("python", &["-c"]),
        }
    }
}

/// Configuration for shell execution
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Working directory for the script, overriding the runner's
    pub working_dir: Option<PathBuf>,
    /// Kill the process after this long (None = no timeout)
    pub timeout: Option<Duration>,
    /// Kill the process when this flips to true
    pub cancel: Option<CancelReceiver>,
}

/// Output collected during script execution
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (None when killed or never started)
    pub exit_code: Option<i32>,
    /// The timeout fired and the process was killed
    pub timed_out: bool,
    /// Cancellation fired and the process was killed
    pub cancelled: bool,
    /// The shell could not be started
    pub spawn_error: Option<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Short description of why the script did not succeed
    pub fn failure_reason(&self, timeout: Option<Duration>) -> Option<String> {
        if let Some(err) = &self.spawn_error {
            Some(err.clone())
        } else if self.timed_out {
            Some(match timeout {
                Some(t) => format!("timed out after {:?}", t),
                None => "timed out".to_string(),
            })
        } else if self.cancelled {
            Some("cancelled".to_string())
        } else {
            match self.exit_code {
                Some(0) => None,
                Some(code) => Some(format!("process exited with code {}", code)),
                None => Some("process terminated by signal".to_string()),
            }
        }
    }
}

/// Callback for handling output lines in real-time (`true` = stderr)
pub type OutputCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Shell runner for executing scripts
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Default shell to use
    default_shell: Shell,
}

enum Wait {
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

impl ShellRunner {
    /// Create a new shell runner with the default shell
    pub fn new() -> Self {
        Self {
            default_shell: Shell::Default,
        }
    }

    /// Create a shell runner with a specific default shell
    pub fn with_default_shell(shell: Shell) -> Self {
        Self {
            default_shell: shell,
        }
    }

    pub fn default_shell(&self) -> Shell {
        self.default_shell
    }

    /// Execute a script using the default shell.
    ///
    /// `env` is the complete environment of the process; nothing is inherited.
    pub async fn run_script(
        &self,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
    ) -> ShellOutput {
        self.run_with_shell(self.default_shell, script, env, working_dir, config, None)
            .await
    }

    /// Execute a script with real-time output streaming
    pub async fn run_script_streaming(
        &self,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
        on_output: OutputCallback,
    ) -> ShellOutput {
        self.run_with_shell(
            self.default_shell,
            script,
            env,
            working_dir,
            config,
            Some(on_output),
        )
        .await
    }

    /// Execute a script with a specific shell, optionally streaming its output
    pub async fn run_with_shell(
        &self,
        shell: Shell,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
        on_output: Option<OutputCallback>,
    ) -> ShellOutput {
        let (shell_cmd, shell_args) = shell.get_command();

        let work_dir = config.working_dir.as_deref().unwrap_or(working_dir);

        // Resolve the shell against the step's own PATH, not gridrun's
        let program = which::which_in(shell_cmd, env.get("PATH"), work_dir)
            .unwrap_or_else(|_| PathBuf::from(shell_cmd));

        let mut cmd = Command::new(&program);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(work_dir);
        cmd.env_clear();
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ShellOutput {
                    spawn_error: Some(format!(
                        "Failed to spawn shell process '{}': {}",
                        shell_cmd, e
                    )),
                    ..Default::default()
                };
            }
        };

        let on_output = on_output.map(Arc::new);
        let stdout_handle = collect_lines(child.stdout.take(), false, on_output.clone());
        let stderr_handle = collect_lines(child.stderr.take(), true, on_output);

        let wait = tokio::select! {
            status = child.wait() => Wait::Exited(status.ok().and_then(|s| s.code())),
            _ = sleep_for(config.timeout) => Wait::TimedOut,
            _ = wait_cancelled(config.cancel.clone()) => Wait::Cancelled,
        };

        let mut output = ShellOutput::default();
        match wait {
            Wait::Exited(code) => {
                output.exit_code = code;
                output.stdout = stdout_handle.await.unwrap_or_default();
                output.stderr = stderr_handle.await.unwrap_or_default();
            }
            Wait::TimedOut | Wait::Cancelled => {
                let _ = child.kill().await;
                output.timed_out = matches!(wait, Wait::TimedOut);
                output.cancelled = matches!(wait, Wait::Cancelled);
                // Grandchildren may still hold the pipes open
                output.stdout = drain(stdout_handle).await;
                output.stderr = drain(stderr_handle).await;
            }
        }

        output
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_lines<R>(
    reader: Option<R>,
    is_stderr: bool,
    on_output: Option<Arc<OutputCallback>>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut output = String::new();
        let Some(reader) = reader else {
            return output;
        };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(callback) = &on_output {
                callback(&line, is_stderr);
            }
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&line);
        }
        output
    })
}

async fn drain(handle: JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(output)) => output,
        _ => String::new(),
    }
}

pub(crate) async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn wait_cancelled(cancel: Option<CancelReceiver>) {
    if let Some(mut rx) = cancel {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending().await
}
