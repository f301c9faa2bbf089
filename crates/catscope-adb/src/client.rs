//! Auxiliary bridge invocations

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::command::{BridgeCommand, LogcatRequest};
use catscope_types::DeviceInfo;

/// Default timeout for short-lived bridge commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from running the bridge executable
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The executable could not be found
    #[error("bridge executable '{}' not found", path.display())]
    NotFound { path: PathBuf },

    /// The command did not finish in time and was killed
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Any other spawn or pipe failure
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// How often and how quickly to retry PID resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Handle on the device bridge executable
#[derive(Clone, Debug)]
pub struct BridgeClient {
    path: PathBuf,
    timeout: Duration,
}

impl BridgeClient {
    /// Create a client for the executable at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The streaming `logcat` command for a request
    pub fn logcat_command(&self, request: &LogcatRequest) -> BridgeCommand {
        request.build(&self.path)
    }

    /// `<bridge> devices`
    pub fn devices_command(&self) -> BridgeCommand {
        BridgeCommand::new(&self.path).arg("devices")
    }

    /// `<bridge> [-s <device>] shell pidof <package>`
    pub fn pidof_command(&self, device: Option<&str>, package: &str) -> BridgeCommand {
        let mut cmd = BridgeCommand::new(&self.path);
        if let Some(device) = device {
            cmd = cmd.args(["-s", device]);
        }
        cmd.args(["shell", "pidof", package])
    }

    /// Run a command to completion and return its stdout
    pub async fn run(&self, command: &BridgeCommand) -> Result<String, BridgeError> {
        let child = command.to_command().output();
        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BridgeError::NotFound {
                    path: command.program().to_path_buf(),
                });
            }
            Ok(Err(source)) => {
                return Err(BridgeError::Io {
                    command: command.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(BridgeError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            debug!(%command, status = %output.status, "bridge command exited unsuccessfully");
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// List attached devices that are online and authorized
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        let stdout = self.run(&self.devices_command()).await?;
        Ok(parse_devices(&stdout))
    }

    /// Look up the PID of a running package, `None` if it is not running
    pub async fn pid_of(
        &self,
        device: Option<&str>,
        package: &str,
    ) -> Result<Option<String>, BridgeError> {
        let stdout = self.run(&self.pidof_command(device, package)).await?;
        Ok(parse_pidof(&stdout))
    }

    /// Resolve a package PID, retrying while the app may still be starting
    pub async fn resolve_pid(
        &self,
        device: Option<&str>,
        package: &str,
        retry: RetryPolicy,
    ) -> Option<String> {
        for attempt in 1..=retry.attempts {
            match self.pid_of(device, package).await {
                Ok(Some(pid)) => return Some(pid),
                Ok(None) => debug!(package, attempt, "package not running yet"),
                Err(e) => debug!(package, attempt, error = %e, "pid lookup failed"),
            }
            if attempt < retry.attempts {
                tokio::time::sleep(retry.delay).await;
            }
        }
        None
    }
}

/// Parse `adb devices` output, keeping only ready devices
pub fn parse_devices(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.trim().split('\t');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(serial), Some(status), None) if !serial.is_empty() => {
                    Some(DeviceInfo::new(serial.to_string(), status.to_string()))
                }
                _ => None,
            }
        })
        .filter(DeviceInfo::is_ready)
        .collect()
}

/// First whitespace-separated token of `pidof` output
pub fn parse_pidof(stdout: &str) -> Option<String> {
    stdout.split_whitespace().next().map(str::to_string)
}
