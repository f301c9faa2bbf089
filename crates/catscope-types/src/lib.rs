//! Shared types for catscope
//!
//! This crate contains data structures used across multiple catscope crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Log Types
// ============================================================================

/// Logcat priority, ordered from most to least verbose.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    #[default]
    #[serde(rename = "V")]
    Verbose,
    #[serde(rename = "D")]
    Debug,
    #[serde(rename = "I")]
    Info,
    #[serde(rename = "W")]
    Warn,
    #[serde(rename = "E")]
    Error,
    #[serde(rename = "F")]
    Fatal,
    #[serde(rename = "S")]
    Silent,
}

impl Priority {
    /// All priorities in ordinal order
    pub const ALL: [Priority; 7] = [
        Self::Verbose,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
        Self::Silent,
    ];

    /// Parse the single-letter logcat token
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'V' => Some(Self::Verbose),
            'D' => Some(Self::Debug),
            'I' => Some(Self::Info),
            'W' => Some(Self::Warn),
            'E' => Some(Self::Error),
            'F' => Some(Self::Fatal),
            'S' => Some(Self::Silent),
            _ => None,
        }
    }

    /// Single-letter display string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbose => "V",
            Self::Debug => "D",
            Self::Info => "I",
            Self::Warn => "W",
            Self::Error => "E",
            Self::Fatal => "F",
            Self::Silent => "S",
        }
    }

    /// Get ordinal for threshold comparison
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Verbose => 0,
            Self::Debug => 1,
            Self::Info => 2,
            Self::Warn => 3,
            Self::Error => 4,
            Self::Fatal => 5,
            Self::Silent => 6,
        }
    }

    /// Ordinal of an arbitrary token; unknown tokens compare as verbose
    pub fn ordinal_of(token: &str) -> u8 {
        token.parse::<Priority>().map(|p| p.ordinal()).unwrap_or(0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a token does not name a known value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{token}'")]
pub struct ParseTokenError {
    kind: &'static str,
    token: String,
}

impl FromStr for Priority {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_letter(c.to_ascii_uppercase()),
            _ => None,
        }
        .ok_or_else(|| ParseTokenError {
            kind: "priority",
            token: s.to_string(),
        })
    }
}

/// A single parsed logcat line. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Device-local `MM-DD HH:MM:SS.mmm` timestamp, kept verbatim
    pub timestamp: String,

    /// Process id token
    pub pid: String,

    /// Thread id token
    pub tid: String,

    pub priority: Priority,

    /// Tag with surrounding whitespace trimmed
    pub tag: String,

    /// Remainder of the line, verbatim
    pub message: String,
}

impl LogRecord {
    pub fn new(
        timestamp: impl Into<String>,
        pid: impl Into<String>,
        tid: impl Into<String>,
        priority: Priority,
        tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            pid: pid.into(),
            tid: tid.into(),
            priority,
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Column values in display/export order
    pub fn columns(&self) -> [&str; 6] {
        [
            &self.timestamp,
            &self.pid,
            &self.tid,
            self.priority.as_str(),
            &self.tag,
            &self.message,
        ]
    }
}

/// Shared handle to an immutable record
pub type ArcLogRecord = Arc<LogRecord>;

/// Column headers matching [`LogRecord::columns`]
pub const COLUMNS: [&str; 6] = ["Time", "PID", "TID", "Level", "Tag", "Message"];

// ============================================================================
// Source Types
// ============================================================================

/// Which logcat ring buffer(s) to read
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBufferSelection {
    #[default]
    Main,
    System,
    Crash,
    All,
}

impl LogBufferSelection {
    /// Value passed to `logcat -b`
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::System => "system",
            Self::Crash => "crash",
            Self::All => "main,system,crash",
        }
    }
}

impl FromStr for LogBufferSelection {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "system" => Ok(Self::System),
            "crash" => Ok(Self::Crash),
            "all" => Ok(Self::All),
            _ => Err(ParseTokenError {
                kind: "buffer",
                token: s.to_string(),
            }),
        }
    }
}

/// An attached device as reported by `adb devices`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub status: String,
}

impl DeviceInfo {
    pub fn new(serial: String, status: String) -> Self {
        Self { serial, status }
    }

    /// Whether the device is online and authorized
    pub fn is_ready(&self) -> bool {
        self.status == "device"
    }
}
