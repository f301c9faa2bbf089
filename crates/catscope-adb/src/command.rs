use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use catscope_types::LogBufferSelection;

/// A program plus argument list, ready to be spawned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl BridgeCommand {
    /// Create a command with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Build a tokio command with stdout piped and the child killed on drop
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Parameters of one `logcat` streaming session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogcatRequest {
    /// Target device serial (`-s`), default device when absent
    pub device: Option<String>,

    /// Ring buffer selection (`-b`), logcat's default when absent
    pub buffer: Option<LogBufferSelection>,

    /// Only this process (`--pid`)
    pub pid: Option<String>,

    /// `tag:priority` pairs applied at the source
    pub tag_filters: Vec<String>,
}

impl LogcatRequest {
    /// Compose `<bridge> [-s dev] logcat -v threadtime [-b buf] [--pid pid] [tag:prio... *:S]`
    pub fn build(&self, bridge: &Path) -> BridgeCommand {
        let mut cmd = BridgeCommand::new(bridge);
        if let Some(device) = &self.device {
            cmd = cmd.args(["-s", device.as_str()]);
        }
        cmd = cmd.args(["logcat", "-v", "threadtime"]);
        if let Some(buffer) = self.buffer {
            cmd = cmd.args(["-b", buffer.as_arg()]);
        }
        if let Some(pid) = &self.pid {
            cmd = cmd.args(["--pid", pid.as_str()]);
        }
        if !self.tag_filters.is_empty() {
            cmd = cmd.args(self.tag_filters.iter().cloned());
            // Silence every tag not listed above
            cmd = cmd.arg("*:S");
        }
        cmd
    }
}

/// Split a comma-separated `Tag:P,Other:W` list into filter pairs
pub fn parse_tag_filters(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_logcat_command() {
        let cmd = LogcatRequest::default().build(Path::new("adb"));
        assert_eq!(cmd.program(), Path::new("adb"));
        assert_eq!(cmd.get_args(), ["logcat", "-v", "threadtime"]);
    }

    #[test]
    fn test_full_logcat_command() {
        let request = LogcatRequest {
            device: Some("emulator-5554".to_string()),
            buffer: Some(LogBufferSelection::All),
            pid: Some("4321".to_string()),
            tag_filters: vec!["MyTag:D".to_string(), "System:W".to_string()],
        };
        let cmd = request.build(Path::new("/opt/sdk/adb"));
        assert_eq!(
            cmd.get_args(),
            [
                "-s",
                "emulator-5554",
                "logcat",
                "-v",
                "threadtime",
                "-b",
                "main,system,crash",
                "--pid",
                "4321",
                "MyTag:D",
                "System:W",
                "*:S",
            ]
        );
        assert_eq!(
            cmd.to_string(),
            "/opt/sdk/adb -s emulator-5554 logcat -v threadtime -b main,system,crash --pid 4321 MyTag:D System:W *:S"
        );
    }

    #[test]
    fn test_single_buffer_is_passed_verbatim() {
        let request = LogcatRequest {
            buffer: Some(LogBufferSelection::Crash),
            ..Default::default()
        };
        let cmd = request.build(Path::new("adb"));
        assert_eq!(cmd.get_args(), ["logcat", "-v", "threadtime", "-b", "crash"]);
    }

    #[test]
    fn test_parse_tag_filters() {
        assert_eq!(
            parse_tag_filters(" MyTag:D, ,System:W,"),
            vec!["MyTag:D".to_string(), "System:W".to_string()]
        );
        assert!(parse_tag_filters("").is_empty());
    }
}
