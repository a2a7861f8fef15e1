//! Vendor tool execution.
//!
//! The orchestrator never speaks the USB protocol itself. Everything goes
//! through two external binaries shipped with the vendor tool bundle:
//!
//! - `update` - bus scan, identify, register reads, memory and partition writes
//! - `aml_image_v2_packer` - unpacks the upgrade image
//!
//! [`CommandExecutor`] is the seam between the state machine and those
//! binaries. [`ProcessExecutor`] runs them for real; tests substitute a
//! scripted executor.

mod process;

#[cfg(test)]
pub(crate) mod mock;

pub use process::ProcessExecutor;

use std::io;

/// Device/bus tool.
pub const UPDATE_TOOL: &str = "update";

/// Image unpack tool.
pub const PACKER_TOOL: &str = "aml_image_v2_packer";

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The tool reports some failures with exit code 0 and an `ERR` prefix.
    pub fn succeeded(&self) -> bool {
        self.code == 0 && !self.stdout.trim_start().starts_with("ERR")
    }
}

/// Synchronous tool invocation. No retries.
///
/// Implementations must be shareable across engine threads.
pub trait CommandExecutor: Send + Sync {
    /// Run `tool` with `args` and capture its output.
    ///
    /// `Err` is reserved for failures to run the tool at all (missing binary,
    /// spawn failure). A tool that ran and failed is an `Ok` with a non-zero
    /// code.
    fn execute(&self, tool: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Render an invocation for logs.
pub fn command_line(tool: &str, args: &[String]) -> String {
    let mut line = tool.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg.trim());
    }
    line
}
