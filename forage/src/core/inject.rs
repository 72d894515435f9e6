//! Rendering of a round's command results into one conversational turn.
//!
//! The rendering is a pure function of the result sequence: same input, same
//! output, issue order preserved. The model relies on this to correlate
//! results with its own requests, and test fixtures rely on it for stable
//! assertions.

use crate::core::types::{CommandResult, CommandStatus};

/// Render all results of one round, in issue order, as a single turn.
pub fn render_round(results: &[CommandResult]) -> String {
    let blocks: Vec<String> = results.iter().map(render_result).collect();
    blocks.join("\n\n")
}

fn render_result(result: &CommandResult) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("--- Command: {} ---\n", result.command));
    buf.push_str(&format!("status: {}\n", status_line(result)));

    if result.stdout.is_empty() && result.stderr.is_empty() {
        buf.push_str("(no output)\n");
    } else {
        if !result.stdout.is_empty() {
            buf.push_str("stdout:\n");
            push_stream(&mut buf, &result.stdout);
        }
        if result.stdout_truncated > 0 {
            buf.push_str(&format!(
                "[stdout truncated {} bytes]\n",
                result.stdout_truncated
            ));
        }
        if !result.stderr.is_empty() {
            buf.push_str("stderr:\n");
            push_stream(&mut buf, &result.stderr);
        }
        if result.stderr_truncated > 0 {
            buf.push_str(&format!(
                "[stderr truncated {} bytes]\n",
                result.stderr_truncated
            ));
        }
    }

    buf.push_str("--- End Command ---");
    buf
}

fn push_stream(buf: &mut String, stream: &str) {
    buf.push_str(stream);
    if !stream.ends_with('\n') {
        buf.push('\n');
    }
}

fn status_line(result: &CommandResult) -> String {
    match &result.status {
        CommandStatus::Exit { code: 0 } => format!("ok ({} ms)", result.duration_ms),
        CommandStatus::Exit { code } => {
            format!("exit code {code} ({} ms)", result.duration_ms)
        }
        CommandStatus::TimedOut => format!("timed out after {} ms", result.duration_ms),
        CommandStatus::Rejected { reason } => format!("rejected: {reason}"),
        CommandStatus::ExecError { message } => format!("could not run: {message}"),
    }
}
