//! Asynchronous `git` CLI runner with a per-command time budget.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::GitError;

/// Captured result of a finished `git` invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `git` commands inside one working copy.
#[derive(Debug, Clone)]
pub struct GitRunner {
    repo_path: PathBuf,
    timeout: Duration,
}

impl GitRunner {
    pub fn new(repo_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_path: repo_path.into(),
            timeout,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run `git <args>` and return stdout, failing on a non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_with_timeout(args, self.timeout).await
    }

    /// Like [`run`](Self::run) with an explicit time budget.
    pub async fn run_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, GitError> {
        let output = self.output_with_timeout(args, timeout).await?;
        if !output.success() {
            warn!(exit_code = output.exit_code, stderr = %output.stderr.trim(), "git command failed");
            return Err(GitError::CommandFailed {
                command: command_name(args),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Run `git <args>` and return the captured output whatever the exit
    /// status. Used where a non-zero exit is an expected outcome (conflicts).
    pub async fn output(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        self.output_with_timeout(args, self.timeout).await
    }

    async fn output_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<GitOutput, GitError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_path)
            .args(args)
            // Never block on an editor or a credential prompt.
            .env("GIT_EDITOR", "true")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = ?format!("git {}", args.join(" ")), "running git command");
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound("git".into())
            } else {
                GitError::IoError(e)
            }
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(secs = timeout.as_secs(), "git command timed out");
                return Err(GitError::Timeout {
                    command: command_name(args),
                    secs: timeout.as_secs(),
                });
            }
        };

        Ok(GitOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Subcommand name for error messages, skipping `-c key=value` prefixes.
fn command_name(args: &[&str]) -> String {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        return arg.to_string();
    }
    String::new()
}
