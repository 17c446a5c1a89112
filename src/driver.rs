//! Channel backed by an external automation driver program
//!
//! The driver owns the real session (a browser profile, a phone bridge, ...).
//! Each operation is one subprocess invocation:
//!
//! - `open` start or attach to the session
//! - `status` exit 0 when logged in, 3 when logged out
//! - `login --mode <headless|interactive> --timeout <secs>` exit 0 when logged in
//! - `send <destination>` message text on stdin, exit 0 once acknowledged
//! - `close` release the session

use crate::channel::{AuthMode, Channel, ChannelConnector, SendOutcome};
use crate::config::Config;
use crate::diagnostics::{classify_failure, shows_login_prompt, FailureReason};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

/// Exit code the driver uses for "reachable but not logged in"
pub const EXIT_LOGGED_OUT: i32 = 3;

/// Extra time granted to a login call beyond the timeout handed to the driver
const LOGIN_GRACE: Duration = Duration::from_secs(10);

/// Captured result of one driver invocation
#[derive(Debug, Clone, Default)]
pub struct DriverOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl DriverOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

#[derive(Debug, Clone)]
struct DriverCommand {
    program: PathBuf,
}

impl DriverCommand {
    async fn run(&self, args: &[&str], input: Option<&str>, timeout: Duration) -> Result<DriverOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;

        match tokio::time::timeout(timeout, exchange(child, input)).await {
            Ok(output) => {
                let output = output?;
                let result = DriverOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    timed_out: false,
                };
                debug!(args = ?args, code = ?result.code, "driver returned");
                Ok(result)
            }
            Err(_) => {
                debug!(args = ?args, timeout_secs = timeout.as_secs(), "driver timed out");
                Ok(DriverOutput {
                    timed_out: true,
                    ..DriverOutput::default()
                })
            }
        }
    }
}

/// Feed `input` to the driver and collect its output
async fn exchange(mut child: Child, input: Option<&str>) -> std::io::Result<Output> {
    if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
        match stdin.write_all(text.as_bytes()).await {
            // A driver may exit without reading; its status and stderr still count
            Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
            _ => {}
        }
        // Dropping closes the pipe so the driver sees EOF
    }
    child.wait_with_output().await
}

/// Connector that opens a driver session per run
#[derive(Debug, Clone)]
pub struct DriverConnector {
    command: DriverCommand,
    probe_timeout: Duration,
    send_timeout: Duration,
}

impl DriverConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            command: DriverCommand {
                program: config.driver.clone(),
            },
            probe_timeout: config.settings.probe_timeout(),
            send_timeout: config.settings.send_timeout(),
        }
    }
}

#[async_trait]
impl ChannelConnector for DriverConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>> {
        let program = &self.command.program;
        if !program.exists() {
            return Err(Error::ChannelUnavailable(format!(
                "driver not found at {}",
                program.display()
            )));
        }

        let output = self
            .command
            .run(&["open"], None, self.probe_timeout)
            .await
            .map_err(|e| Error::ChannelUnavailable(format!("failed to start driver: {}", e)))?;

        if !output.success() {
            let detail = if output.timed_out {
                "timed out opening session".to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(Error::ChannelUnavailable(detail));
        }

        Ok(Box::new(DriverChannel {
            command: self.command.clone(),
            probe_timeout: self.probe_timeout,
            send_timeout: self.send_timeout,
            closed: false,
        }))
    }
}

/// One open driver session
#[derive(Debug)]
pub struct DriverChannel {
    command: DriverCommand,
    probe_timeout: Duration,
    send_timeout: Duration,
    closed: bool,
}

#[async_trait]
impl Channel for DriverChannel {
    async fn is_authenticated(&mut self) -> Result<bool> {
        let output = self.command.run(&["status"], None, self.probe_timeout).await?;

        if output.success() {
            return Ok(!shows_login_prompt(&output.stdout));
        }
        if output.timed_out || output.code == Some(EXIT_LOGGED_OUT) {
            return Ok(false);
        }
        Err(Error::Driver(format!(
            "status check failed: {}",
            output.stderr.trim()
        )))
    }

    async fn authenticate(&mut self, mode: AuthMode, timeout: Duration) -> Result<bool> {
        let mode_arg = mode.to_string();
        let timeout_arg = timeout.as_secs().to_string();
        let output = self
            .command
            .run(
                &["login", "--mode", &mode_arg, "--timeout", &timeout_arg],
                None,
                timeout + LOGIN_GRACE,
            )
            .await?;
        Ok(output.success())
    }

    async fn send(&mut self, destination: &str, text: &str) -> Result<SendOutcome> {
        let output = self
            .command
            .run(&["send", destination], Some(text), self.send_timeout)
            .await?;

        if output.success() {
            return Ok(SendOutcome::Delivered);
        }
        if output.timed_out {
            return Ok(SendOutcome::Failed(FailureReason::Timeout));
        }
        Ok(SendOutcome::Failed(classify_failure(&output.stderr)))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let output = self.command.run(&["close"], None, self.probe_timeout).await?;
        if !output.success() {
            return Err(Error::Driver(format!(
                "close failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}
