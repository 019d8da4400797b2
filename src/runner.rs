// Scoped execution of privileged external commands

//! Process runner
//!
//! Single choke point for every external tool invocation, so the timeout
//! and elevation policy is enforced in one place. Commands are argument
//! vectors, never concatenated strings. A bounded timeout kills the child
//! and reports a failure distinct from a non-zero exit, so a hung tool can
//! never stall the poll loop.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default timeout when a call site does not need a specific one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure modes of an external tool invocation.
///
/// A non-zero exit is not in this enum: `run` reports it as a normal
/// [`CmdOutput`] and `run_checked` upgrades it to [`RunnerError::Failed`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Binary not found or not executable.
    #[error("'{tool}' is not available: {source}")]
    Unavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The child did not finish within the bound and was killed.
    #[error("'{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    /// Non-zero exit, stderr retained for diagnostics.
    #[error("'{tool}' exited with status {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },
}

/// Structured result of a finished command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout with trailing whitespace stripped, or `None` when empty.
    pub fn stdout_trimmed(&self) -> Option<&str> {
        let s = self.stdout.trim();
        (!s.is_empty()).then_some(s)
    }
}

/// Runs external tools with uniform timeout and elevation handling.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `tool` with `args`, optionally through the privilege-escalation
    /// wrapper (`sudo -n`, so a missing passwordless rule fails fast with a
    /// captured stderr instead of hanging on a prompt).
    ///
    /// # Errors
    ///
    /// [`RunnerError::Unavailable`] when the binary cannot be spawned and
    /// [`RunnerError::Timeout`] when it exceeds `timeout`. A non-zero exit
    /// is a successful `Ok` with its `exit_code` set.
    pub async fn run(
        &self,
        tool: &str,
        args: &[&str],
        elevated: bool,
        timeout: Duration,
    ) -> Result<CmdOutput, RunnerError> {
        let mut cmd = if elevated {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(tool).args(args);
            c
        } else {
            let mut c = Command::new(tool);
            c.args(args);
            c
        };

        // kill_on_drop covers both the timeout path below and daemon
        // shutdown cancelling an in-flight call.
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Unavailable {
                tool: tool.to_string(),
                source: e,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RunnerError::Unavailable {
                    tool: tool.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                log::warn!("Command timed out: {} {:?}", tool, args);
                return Err(RunnerError::Timeout {
                    tool: tool.to_string(),
                    timeout,
                });
            }
        };

        Ok(CmdOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Like [`run`](Self::run) but a non-zero exit becomes
    /// [`RunnerError::Failed`]. For call sites that need the tool to have
    /// actually succeeded.
    pub async fn run_checked(
        &self,
        tool: &str,
        args: &[&str],
        elevated: bool,
        timeout: Duration,
    ) -> Result<CmdOutput, RunnerError> {
        let output = self.run(tool, args, elevated, timeout).await?;
        if !output.success() {
            return Err(RunnerError::Failed {
                tool: tool.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Check whether a tool exists on PATH. Used for the one-time backend
/// capability probe at startup.
pub fn has_tool(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = CommandRunner::new();
        let out = runner
            .run("echo", &["hello"], false, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_trimmed(), Some("hello"));
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_not_an_error() {
        let runner = CommandRunner::new();
        let out = runner
            .run("false", &[], false, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 1);
    }

    #[tokio::test]
    async fn test_run_checked_nonzero_exit_fails() {
        let runner = CommandRunner::new();
        let err = runner
            .run_checked("false", &[], false, DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            RunnerError::Failed { tool, code, .. } => {
                assert_eq!(tool, "false");
                assert_eq!(code, 1);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_missing_tool_is_unavailable() {
        let runner = CommandRunner::new();
        let err = runner
            .run("definitely-not-a-real-tool", &[], false, DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_run_timeout_kills_child() {
        let runner = CommandRunner::new();
        let err = runner
            .run("sleep", &["5"], false, Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            RunnerError::Timeout { tool, timeout } => {
                assert_eq!(tool, "sleep");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_has_tool() {
        // `sh` exists on any POSIX host running these tests.
        assert!(has_tool("sh"));
        assert!(!has_tool("definitely-not-a-real-tool"));
    }

    #[test]
    fn test_stdout_trimmed_empty() {
        let out = CmdOutput {
            exit_code: 0,
            stdout: "  \n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.stdout_trimmed(), None);
    }
}
