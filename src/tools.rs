//! Built-in host tools: `echo` and `shell`.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use agent_provider::{ToolCallRequest, ToolError, ToolRegistry, ToolResult};
use agent_provider_mock::{ECHO_TOOL, SHELL_TOOL};
use tracing::debug;
use wait_timeout::ChildExt;

use crate::config::DEFAULT_SHELL_TIMEOUT_SEC;

const DEFAULT_SHELL_MAX_OUTPUT_BYTES: usize = 100 * 1024;

#[derive(Debug, Clone)]
pub struct BuiltinTools {
    shell_timeout_sec: u64,
    shell_max_output_bytes: usize,
    cwd: Option<PathBuf>,
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL_TIMEOUT_SEC)
    }
}

impl BuiltinTools {
    #[must_use]
    pub fn new(shell_timeout_sec: u64) -> Self {
        Self {
            shell_timeout_sec,
            shell_max_output_bytes: DEFAULT_SHELL_MAX_OUTPUT_BYTES,
            cwd: None,
        }
    }

    /// Runs shell commands from `cwd` instead of the process directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, max_bytes: usize) -> Self {
        self.shell_max_output_bytes = max_bytes;
        self
    }

    fn execute_shell(&self, call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        let timeout = self.shell_timeout_sec;
        let mut command_builder = Command::new("bash");
        command_builder
            .arg("-lc")
            .arg(&call.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command_builder.current_dir(cwd);
        }

        let mut child = command_builder.spawn().map_err(|error| ToolError::Spawn {
            tool: SHELL_TOOL.to_string(),
            message: error.to_string(),
        })?;

        // Drain both pipes while waiting so a chatty command cannot fill the
        // pipe buffer and stall until the timeout.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let status = match child.wait_timeout(Duration::from_secs(timeout)) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::TimedOut {
                    tool: SHELL_TOOL.to_string(),
                    seconds: timeout,
                });
            }
            Err(error) => {
                let _ = child.kill();
                return Err(ToolError::Spawn {
                    tool: SHELL_TOOL.to_string(),
                    message: format!("failed waiting for command: {error}"),
                });
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        let content = truncate_to_byte_limit(
            format!(
                "status: {}\nstdout:\n{}\nstderr:\n{}",
                format_exit_status(status),
                String::from_utf8_lossy(&stdout),
                String::from_utf8_lossy(&stderr)
            ),
            self.shell_max_output_bytes,
        );
        debug!(call_id = %call.call_id, success = status.success(), "shell command finished");

        Ok(if status.success() {
            ToolResult::success(&call.call_id, SHELL_TOOL, content)
        } else {
            ToolResult::error(&call.call_id, SHELL_TOOL, content)
        })
    }
}

impl ToolRegistry for BuiltinTools {
    fn execute(&mut self, call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        match call.tool_name.as_str() {
            ECHO_TOOL => Ok(ToolResult::success(
                &call.call_id,
                ECHO_TOOL,
                call.arguments.clone(),
            )),
            SHELL_TOOL => self.execute_shell(call),
            other => Err(ToolError::UnknownTool {
                name: other.to_string(),
            }),
        }
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        bytes
    })
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
