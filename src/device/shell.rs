//! Host command execution

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{CommandOutput, CommandRunner};
use crate::common::{truncate, Error, Result};

/// Runs commands through the platform shell with a per-command timeout
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        debug!(command, "exec");

        let mut cmd = if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::CommandTimeout {
                command: command.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| Error::command_failed(command, e.to_string()))?;

        let result = CommandOutput {
            // Killed by a signal: no code, report as failure
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        trace!(
            exit_code = result.exit_code,
            stdout = %truncate(&result.stdout, 200),
            "exec finished"
        );

        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_stdout_and_status() {
        let runner = ShellRunner::default();
        let out = runner.exec("echo hello; echo oops >&2; exit 3").await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let runner = ShellRunner::new(Duration::from_millis(50));
        let err = runner.exec("sleep 5").await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
        assert!(err.is_transient());
    }
}
