//! adb-backed device collaborators
//!
//! All device access is expressed as host commands run through a
//! [`CommandRunner`], so the same code paths are exercised by tests with a
//! recording runner.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CommandOutput, CommandRunner, LogQuery, LogReader, UiDumper};
use crate::common::config::Config;
use crate::common::{truncate, Error, Result};

/// A single Android device reached through adb
#[derive(Clone)]
pub struct AdbDevice {
    adb: PathBuf,
    serial: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl AdbDevice {
    pub fn new(adb: PathBuf, serial: Option<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            adb,
            serial,
            runner,
        }
    }

    /// Build from configuration, resolving the adb executable
    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let adb = config.resolve_adb()?;
        Ok(Self::new(adb, config.device.serial.clone(), runner))
    }

    fn prefix(&self) -> String {
        let mut prefix = quote(&self.adb.to_string_lossy());
        if let Some(serial) = &self.serial {
            prefix.push_str(" -s ");
            prefix.push_str(&quote(serial));
        }
        prefix
    }

    /// Full host command line for an adb invocation
    pub fn command_line(&self, args: &str) -> String {
        format!("{} {}", self.prefix(), args)
    }

    async fn run(&self, args: &str) -> Result<CommandOutput> {
        let command = self.command_line(args);
        self.runner.exec(&command).await
    }

    /// Run an adb invocation, turning a non-zero exit into an error
    async fn run_checked(&self, args: &str) -> Result<String> {
        let out = self.run(args).await?;
        if !out.success() {
            let reason = if out.stderr.trim().is_empty() {
                format!("exit code {}", out.exit_code)
            } else {
                format!("exit code {}: {}", out.exit_code, truncate(out.stderr.trim(), 300))
            };
            return Err(Error::command_failed(&self.command_line(args), reason));
        }
        Ok(out.stdout)
    }

    /// Run a shell command on the device, returning its output as a value
    pub async fn shell(&self, command: &str) -> Result<CommandOutput> {
        self.run(&format!("shell {}", quote(command))).await
    }

    pub async fn tap(&self, x: i32, y: i32) -> Result<()> {
        debug!(x, y, "tap");
        self.run_checked(&format!("shell input tap {x} {y}")).await?;
        Ok(())
    }

    /// Type text into the focused field
    pub async fn input_text(&self, text: &str) -> Result<()> {
        // `input text` treats spaces as argument separators
        let escaped = text.replace(' ', "%s");
        // adb re-joins its arguments into a device shell command line, so the
        // text is quoted once for the device and once for the host
        self.run_checked(&format!("shell input text {}", quote(&quote(&escaped))))
            .await?;
        Ok(())
    }

    pub async fn keyevent(&self, key: &str) -> Result<()> {
        self.run_checked(&format!("shell input keyevent {}", quote(key)))
            .await?;
        Ok(())
    }

    /// Start an activity (`package/.Activity`) and wait for it to launch
    pub async fn launch(&self, component: &str) -> Result<()> {
        let out = self
            .run_checked(&format!("shell am start -W -n {}", quote(component)))
            .await?;
        if out.contains("Error:") {
            return Err(Error::command_failed(
                &format!("am start {component}"),
                truncate(out.trim(), 300),
            ));
        }
        Ok(())
    }

    pub async fn force_stop(&self, package: &str) -> Result<()> {
        self.run_checked(&format!("shell am force-stop {}", quote(package)))
            .await?;
        Ok(())
    }

    pub async fn clear_logs(&self) -> Result<()> {
        self.run_checked("logcat -c").await?;
        Ok(())
    }
}

#[async_trait]
impl UiDumper for AdbDevice {
    async fn dump_ui(&self) -> Result<String> {
        let dump = self.run_checked("exec-out uiautomator dump /dev/tty").await?;
        if dump.trim().is_empty() {
            warn!("uiautomator returned an empty dump");
        }
        Ok(dump)
    }
}

#[async_trait]
impl LogReader for AdbDevice {
    async fn read_logs(&self, query: LogQuery) -> Result<String> {
        let args = match query {
            LogQuery::Since(ms) => {
                format!("logcat -d -v epoch -T '{}.{:03}'", ms / 1000, ms % 1000)
            }
            LogQuery::Tail(lines) => format!("logcat -d -v epoch -t {}", lines.max(1)),
        };
        self.run_checked(&args).await
    }
}

/// Single-quote a value for `sh -c`
fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=%@,+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fakes::RecordingRunner;

    fn device(runner: Arc<RecordingRunner>) -> AdbDevice {
        AdbDevice::new(PathBuf::from("adb"), Some("emulator-5554".into()), runner)
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("app.example/.MainActivity"), "app.example/.MainActivity");
        assert_eq!(quote("hello world"), "'hello world'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[tokio::test]
    async fn test_dump_ui_command() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(CommandOutput::ok("<hierarchy/>"));
        let dev = device(runner.clone());

        let dump = dev.dump_ui().await.unwrap();
        assert_eq!(dump, "<hierarchy/>");
        assert_eq!(
            runner.commands(),
            vec!["adb -s emulator-5554 exec-out uiautomator dump /dev/tty".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_logs_since_formats_epoch() {
        let runner = Arc::new(RecordingRunner::new());
        let dev = device(runner.clone());

        dev.read_logs(LogQuery::Since(1_700_000_000_042)).await.unwrap();
        dev.read_logs(LogQuery::Tail(50)).await.unwrap();

        let commands = runner.commands();
        assert!(commands[0].ends_with("logcat -d -v epoch -T '1700000000.042'"));
        assert!(commands[1].ends_with("logcat -d -v epoch -t 50"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_error() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "error: device offline".into(),
        });
        let dev = device(runner);

        let err = dev.dump_ui().await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert!(err.to_string().contains("device offline"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_input_text_escapes_spaces() {
        let runner = Arc::new(RecordingRunner::new());
        let dev = device(runner.clone());

        dev.input_text("hello world").await.unwrap();
        assert!(runner.commands()[0].ends_with("shell input text hello%sworld"));
    }

    #[tokio::test]
    async fn test_input_text_quotes_for_device_shell() {
        let runner = Arc::new(RecordingRunner::new());
        let dev = device(runner.clone());

        dev.input_text("a&b;c").await.unwrap();
        assert!(runner.commands()[0].ends_with(r"shell input text ''\''a&b;c'\'''"));
    }
}
