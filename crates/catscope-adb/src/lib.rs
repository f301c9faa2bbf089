//! Android debug bridge client for catscope
//!
//! This crate builds the `adb logcat` invocation and runs the short-lived
//! auxiliary commands used to enumerate devices and resolve package PIDs.

mod client;
mod command;

pub use client::{
    BridgeClient, BridgeError, DEFAULT_COMMAND_TIMEOUT, RetryPolicy, parse_devices, parse_pidof,
};
pub use command::{BridgeCommand, LogcatRequest, parse_tag_filters};

// Re-export types that are used in our public API
pub use catscope_types::{DeviceInfo, LogBufferSelection};
