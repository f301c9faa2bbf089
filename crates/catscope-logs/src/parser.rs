use regex::Regex;
use std::sync::LazyLock;

use catscope_types::{LogRecord, Priority};

/// `MM-DD HH:MM:SS.mmm  PID  TID LEVEL TAG     : message`
static THREADTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\.\d{3})\s+(\d+)\s+(\d+)\s+([VDIWEFS])\s+(.+?)\s*:\s(.*)$",
    )
    .expect("threadtime pattern is valid")
});

/// Parser for `logcat -v threadtime` output
pub struct LogParser;

impl LogParser {
    /// Parse one line (line terminators already stripped).
    ///
    /// Returns `None` for anything that does not match the threadtime shape:
    /// buffer banners, stderr noise, truncated lines.
    pub fn parse(line: &str) -> Option<LogRecord> {
        let caps = THREADTIME.captures(line)?;
        let priority = caps[4].chars().next().and_then(Priority::from_letter)?;

        Some(LogRecord::new(
            &caps[1],
            &caps[2],
            &caps[3],
            priority,
            caps[5].trim(),
            &caps[6],
        ))
    }

    /// Strip trailing `\r` and `\n` characters
    pub fn strip_terminators(line: &str) -> &str {
        line.trim_end_matches(['\r', '\n'])
    }
}
