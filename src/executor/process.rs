use std::io;
use std::path::PathBuf;
use std::process::Command;

use super::{CommandExecutor, CommandOutput};

/// Runs vendor tools from a tool directory as child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    tool_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(tool_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_dir: tool_dir.into(),
        }
    }

    fn tool_path(&self, tool: &str) -> PathBuf {
        self.tool_dir.join(tool)
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, tool: &str, args: &[String]) -> io::Result<CommandOutput> {
        let path = self.tool_path(tool);
        let output = Command::new(&path).args(args).output().map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("running '{}': {}", path.display(), err),
            )
        })?;

        Ok(CommandOutput {
            // Killed by a signal: no exit code, treat as failure.
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
