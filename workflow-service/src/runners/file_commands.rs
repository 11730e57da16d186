// Workflow File Commands
// Steps talk back to the runner by appending to the files named by
// GITHUB_ENV, GITHUB_OUTPUT and GITHUB_PATH.

use crate::{ServiceError, ServiceResult};

use std::fs;
use std::path::{Path, PathBuf};

/// The command files handed to one step
#[derive(Debug, Clone)]
pub struct FileCommands {
    pub env_file: PathBuf,
    pub output_file: PathBuf,
    pub path_file: PathBuf,
}

/// Everything a step asked for through its command files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCommandEffects {
    /// `GITHUB_ENV` assignments, in the order written
    pub env: Vec<(String, String)>,
    /// `GITHUB_OUTPUT` assignments, in the order written
    pub outputs: Vec<(String, String)>,
    /// `GITHUB_PATH` entries, in the order written
    pub path: Vec<String>,
}

impl FileCommands {
    /// Create fresh, empty command files for step `step_index` under `dir`.
    pub fn create(dir: &Path, step_index: usize) -> ServiceResult<Self> {
        let commands = Self {
            env_file: dir.join(format!("set_env_{}", step_index)),
            output_file: dir.join(format!("set_output_{}", step_index)),
            path_file: dir.join(format!("add_path_{}", step_index)),
        };
        fs::write(&commands.env_file, "")?;
        fs::write(&commands.output_file, "")?;
        fs::write(&commands.path_file, "")?;
        Ok(commands)
    }

    /// Read back what the step wrote.
    pub fn collect(&self) -> ServiceResult<FileCommandEffects> {
        let env = parse_assignments(&read_or_empty(&self.env_file)?)
            .map_err(|e| ServiceError::execution(format!("GITHUB_ENV: {}", e)))?;
        let outputs = parse_assignments(&read_or_empty(&self.output_file)?)
            .map_err(|e| ServiceError::execution(format!("GITHUB_OUTPUT: {}", e)))?;
        let path = parse_path_entries(&read_or_empty(&self.path_file)?);

        Ok(FileCommandEffects { env, outputs, path })
    }
}

/// A script may delete its command file; treat that as "nothing written".
fn read_or_empty(path: &Path) -> ServiceResult<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Parse `NAME=value` lines and `NAME<<DELIMITER` heredocs.
///
/// Values are kept verbatim; a heredoc value is every line between the
/// opening line and the delimiter, joined with `\n`.
pub fn parse_assignments(content: &str) -> Result<Vec<(String, String)>, String> {
    let mut assignments = Vec::new();
    let mut lines = content.lines().map(|l| l.strip_suffix('\r').unwrap_or(l));
    let mut line_no = 0;

    while let Some(line) = lines.next() {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let eq = line.find('=');
        let heredoc = line.find("<<");

        let (name, value) = match (eq, heredoc) {
            // `=` before any `<<`: plain assignment (the value may contain `<<`)
            (Some(eq), h) if h.map_or(true, |h| eq < h) => {
                (line[..eq].to_string(), line[eq + 1..].to_string())
            }
            (_, Some(h)) => {
                let name = &line[..h];
                let delimiter = &line[h + 2..];
                if delimiter.is_empty() {
                    return Err(format!("line {}: empty heredoc delimiter", line_no));
                }

                let mut body = Vec::new();
                let mut closed = false;
                for body_line in lines.by_ref() {
                    line_no += 1;
                    if body_line == delimiter {
                        closed = true;
                        break;
                    }
                    body.push(body_line);
                }
                if !closed {
                    return Err(format!(
                        "matching delimiter '{}' for '{}' not found",
                        delimiter, name
                    ));
                }
                (name.to_string(), body.join("\n"))
            }
            _ => {
                return Err(format!(
                    "line {}: expected NAME=value or NAME<<DELIMITER, got '{}'",
                    line_no, line
                ))
            }
        };

        if name.is_empty() {
            return Err(format!("line {}: missing variable name", line_no));
        }
        assignments.push((name, value));
    }

    Ok(assignments)
}

/// One directory per non-blank line
pub fn parse_path_entries(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
