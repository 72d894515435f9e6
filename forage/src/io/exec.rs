//! Command execution under policy, with timeout and bounded capture.
//!
//! The executor never fails as a function: every outcome (policy rejection,
//! timeout, non-zero exit, spawn failure) is folded into a [`CommandResult`]
//! so the loop can report it back to the model.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::policy::{ExecutionPolicy, PolicyDecision};
use crate::core::types::{CommandResult, CommandStatus, ToolCallRequest};

/// Execute one requested command under `policy`.
///
/// `timeout` is the effective wall-clock limit for this invocation (the
/// per-command policy timeout, possibly capped by the run budget). A command
/// the policy refuses is never spawned.
#[instrument(skip_all, fields(call_id = %call.id, timeout_secs = timeout.as_secs()))]
pub fn execute(call: &ToolCallRequest, policy: &ExecutionPolicy, timeout: Duration) -> CommandResult {
    let command_line = call.command_line();
    if let PolicyDecision::Denied { reason } = policy.decide(&command_line) {
        warn!(command = %command_line, %reason, "command rejected by policy");
        return CommandResult::rejected(call, reason);
    }
    run_shell(call, &command_line, policy.max_output_bytes, timeout)
}

fn run_shell(
    call: &ToolCallRequest,
    command_line: &str,
    output_limit_bytes: usize,
    timeout: Duration,
) -> CommandResult {
    let started = Instant::now();
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command = %command_line, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return exec_error(call, command_line, format!("spawn failed: {err}"), started);
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return exec_error(
            call,
            command_line,
            "child stdio was not piped".to_string(),
            started,
        );
    };

    // Output is drained concurrently while the child runs to avoid pipe
    // deadlocks; bytes beyond the cap are discarded but still counted.
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let exit = match child.wait_timeout(timeout) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            if let Err(err) = child.kill() {
                error!(err = %err, "failed to kill timed-out command");
            }
            child.wait().ok()
        }
        Err(err) => {
            error!(err = %err, "failed waiting for command");
            let _ = child.kill();
            let _ = child.wait();
            None
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle);
    let (stderr, stderr_truncated) = join_output(stderr_handle);
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let status = if timed_out {
        CommandStatus::TimedOut
    } else {
        match exit {
            // A child killed by a signal has no exit code; report -1.
            Some(status) => CommandStatus::Exit {
                code: status.code().unwrap_or(-1),
            },
            None => CommandStatus::ExecError {
                message: "wait for child process failed".to_string(),
            },
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    debug!(?status, duration_ms, "command finished");
    CommandResult {
        call_id: call.id.clone(),
        command: command_line.to_string(),
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        duration_ms,
    }
}

fn exec_error(
    call: &ToolCallRequest,
    command_line: &str,
    message: String,
    started: Instant,
) -> CommandResult {
    CommandResult {
        call_id: call.id.clone(),
        command: command_line.to_string(),
        status: CommandStatus::ExecError { message },
        stdout: String::new(),
        stderr: String::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> (Vec<u8>, usize) {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(err = %err, "error draining child output");
                break;
            }
        };
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    (buf, truncated)
}

fn join_output(handle: thread::JoinHandle<(Vec<u8>, usize)>) -> (String, usize) {
    match handle.join() {
        Ok((bytes, truncated)) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Err(_) => {
            warn!("output reader thread panicked");
            (String::new(), 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{permissive_policy, restricted_policy, tool_call};

    #[test]
    fn captures_stdout_on_success() {
        let policy = permissive_policy();
        let result = execute(
            &tool_call("c1", "echo hello"),
            &policy,
            Duration::from_secs(5),
        );
        assert_eq!(result.status, CommandStatus::Exit { code: 0 });
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.stderr.is_empty());
        assert_eq!(result.call_id, "c1");
    }

    #[test]
    fn non_zero_exit_is_a_normal_outcome() {
        let policy = permissive_policy();
        let result = execute(
            &tool_call("c1", "echo oops >&2; exit 3"),
            &policy,
            Duration::from_secs(5),
        );
        assert_eq!(result.status, CommandStatus::Exit { code: 3 });
        assert!(result.stderr.contains("oops"));
    }

    #[test]
    fn timeout_kills_the_child() {
        let policy = permissive_policy();
        let started = Instant::now();
        let result = execute(
            &tool_call("c1", "sleep 5"),
            &policy,
            Duration::from_millis(100),
        );
        assert_eq!(result.status, CommandStatus::TimedOut);
        // The child must not have run to completion.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn output_is_capped_with_truncation_count() {
        let mut policy = permissive_policy();
        policy.max_output_bytes = 100;
        let result = execute(
            &tool_call("c1", "head -c 5000 /dev/zero | tr '\\0' a"),
            &policy,
            Duration::from_secs(5),
        );
        assert_eq!(result.status, CommandStatus::Exit { code: 0 });
        assert_eq!(result.stdout.len(), 100);
        assert_eq!(result.stdout_truncated, 4900);
    }

    #[test]
    fn disallowed_command_is_rejected_without_spawning() {
        let policy = restricted_policy(&["ls*"]);
        let result = execute(&tool_call("c1", "rm -rf /"), &policy, Duration::from_secs(5));
        assert!(matches!(result.status, CommandStatus::Rejected { .. }));
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
        assert_eq!(result.duration_ms, 0);
    }
}
