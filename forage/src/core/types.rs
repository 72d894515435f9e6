//! Shared contracts between the loop, the executor, and the model backend.
//!
//! These types define stable shapes for one round of the loop. They carry no
//! behavior beyond construction helpers and must stay deterministic to
//! serialize (transcripts rely on it).

use serde::{Deserialize, Serialize};

/// One command invocation proposed by the model within a round.
///
/// The `id` correlates the eventual [`CommandResult`] with this request.
/// Requests are ephemeral: they exist only for the round that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    /// Shell command (may already contain arguments).
    pub command: String,
    /// Extra arguments appended to `command`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Model-stated reason for the command. Never executed, only logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ToolCallRequest {
    /// Full command line as matched against policy and handed to the shell.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.command.clone();
        }
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Terminal state of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandStatus {
    /// Process ran to completion. A child killed by a signal (other than the
    /// timeout kill) reports code -1.
    Exit { code: i32 },
    /// Process exceeded its wall-clock timeout and was killed.
    TimedOut,
    /// Policy refused the command; no process was spawned.
    Rejected { reason: String },
    /// Process could not be run at all (spawn or wait failure).
    ExecError { message: String },
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandStatus::Exit { code: 0 })
    }
}

/// Captured outcome of one [`ToolCallRequest`].
///
/// Output streams are capped independently; bytes discarded beyond the cap
/// are counted in the `*_truncated` fields so the rendering layer can emit
/// explicit markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Id of the originating request.
    pub call_id: String,
    /// Command line that was (or would have been) executed.
    pub command: String,
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub duration_ms: u64,
}

impl CommandResult {
    /// Result for a command that policy refused. Output is always empty.
    pub fn rejected(call: &ToolCallRequest, reason: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            command: call.command_line(),
            status: CommandStatus::Rejected {
                reason: reason.into(),
            },
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_args() {
        let call = ToolCallRequest {
            id: "call-1".to_string(),
            command: "git log".to_string(),
            args: vec!["--oneline".to_string(), "-5".to_string()],
            reason: None,
        };
        assert_eq!(call.command_line(), "git log --oneline -5");
    }

    #[test]
    fn command_line_without_args_is_the_command() {
        let call = ToolCallRequest {
            id: "call-1".to_string(),
            command: "pwd".to_string(),
            args: Vec::new(),
            reason: None,
        };
        assert_eq!(call.command_line(), "pwd");
    }

    #[test]
    fn rejected_result_has_empty_output() {
        let call = ToolCallRequest {
            id: "call-9".to_string(),
            command: "rm -rf /".to_string(),
            args: Vec::new(),
            reason: Some("cleanup".to_string()),
        };
        let result = CommandResult::rejected(&call, "not allowed");
        assert_eq!(result.call_id, "call-9");
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
        assert!(!result.status.is_ok());
        assert_eq!(
            result.status,
            CommandStatus::Rejected {
                reason: "not allowed".to_string()
            }
        );
    }
}
