//! Orchestration of one agent run.
//!
//! Drives the loop from initial prompt to final payload: call the model
//! backend, interpret the tagged reply, execute requested commands under
//! policy, fold the results back into the conversation, and validate the
//! final answer against the schema contract when one is supplied.
//!
//! Per-command failures (rejection, timeout, non-zero exit, spawn error) are
//! reported back to the model as context and never abort the run. Run-level
//! failures are the typed [`AgentError`] kinds and terminate immediately.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::convo::{Conversation, Role, Turn};
use crate::core::deadline::RunBudget;
use crate::core::inject::render_round;
use crate::core::policy::ExecutionPolicy;
use crate::core::schema::{SchemaContract, ValidationIssue};
use crate::core::types::{CommandResult, ToolCallRequest};
use crate::io::backend::{BackendError, ModelBackend, ModelReply, ModelRequest};
use crate::io::exec;

/// Inputs for one run. The policy and schema are frozen before the run
/// starts and shared read-only; nothing here is mutated by the loop.
pub struct AgentRequest<'a> {
    pub prompt: &'a str,
    pub system: Option<&'a str>,
    pub policy: &'a ExecutionPolicy,
    pub schema: Option<&'a SchemaContract>,
    pub budget: RunBudget,
    pub commands_enabled: bool,
}

/// Successful final payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentPayload {
    Text(String),
    /// Schema-conformant document (always revalidates against the contract).
    Structured(Value),
}

/// Terminal value of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub payload: AgentPayload,
    /// Command rounds the run consumed.
    pub rounds: u32,
}

/// Observer notification emitted as the run progresses. Used for transcript
/// dumps and verbose output; ignoring events does not change the run.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    Turn(&'a Turn),
    Command(&'a CommandResult),
}

/// Run-level failure. Every kind terminates the run; none are retried here.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("command round {requested} exceeds the configured limit of {max_rounds}")]
    MaxRoundsExceeded { requested: u32, max_rounds: u32 },
    #[error("model reply carried neither final content nor tool calls")]
    MalformedModelResponse,
    #[error("model backend failed: {0}")]
    ModelBackend(BackendError),
    #[error("final output failed schema validation after one correction round")]
    SchemaValidationFailed { issues: Vec<ValidationIssue> },
    #[error("run cancelled: deadline exceeded")]
    Cancelled,
}

enum Candidate {
    Text(String),
    Structured(Value),
}

/// Execute one run to completion.
#[instrument(skip_all, fields(commands_enabled = request.commands_enabled, schema = request.schema.is_some()))]
pub fn run_agent<B, F>(
    request: &AgentRequest<'_>,
    backend: &B,
    mut on_event: F,
) -> Result<AgentOutcome, AgentError>
where
    B: ModelBackend,
    F: FnMut(AgentEvent<'_>),
{
    let mut convo = Conversation::new();
    if let Some(system) = request.system {
        let turn = convo.push(Role::System, system);
        on_event(AgentEvent::Turn(turn));
    }
    let turn = convo.push(Role::User, request.prompt);
    on_event(AgentEvent::Turn(turn));

    let mut correction_used = false;

    loop {
        if request.budget.expired() {
            return Err(AgentError::Cancelled);
        }

        let model_request = ModelRequest {
            turns: convo.turns(),
            schema: request.schema.map(SchemaContract::raw),
            tools_enabled: request.commands_enabled,
            timeout: request.budget.remaining(),
        };
        let reply = match backend.send(&model_request) {
            Ok(reply) => reply,
            Err(err) if request.budget.expired() => {
                warn!(err = %err, "backend failed after the run deadline expired");
                return Err(AgentError::Cancelled);
            }
            Err(BackendError::MalformedReply(detail)) => {
                warn!(%detail, "model reply could not be classified");
                return Err(AgentError::MalformedModelResponse);
            }
            Err(err) => return Err(AgentError::ModelBackend(err)),
        };

        let candidate = match reply {
            ModelReply::ToolCalls(calls) => {
                if calls.is_empty() {
                    return Err(AgentError::MalformedModelResponse);
                }
                if !request.commands_enabled {
                    warn!("model issued tool calls although no tool was declared");
                    return Err(AgentError::MalformedModelResponse);
                }
                let round = convo.begin_round();
                if round > request.policy.max_rounds {
                    // Checked before any of this round's commands run.
                    return Err(AgentError::MaxRoundsExceeded {
                        requested: round,
                        max_rounds: request.policy.max_rounds,
                    });
                }
                debug!(round, commands = calls.len(), "executing command round");
                let turn = convo.push(Role::Assistant, render_tool_requests(&calls));
                on_event(AgentEvent::Turn(turn));
                let results = execute_round(&calls, request, &mut on_event)?;
                let turn = convo.push(Role::User, render_round(&results));
                on_event(AgentEvent::Turn(turn));
                continue;
            }
            ModelReply::FinalText(text) => Candidate::Text(text),
            ModelReply::FinalStructured(value) => Candidate::Structured(value),
        };

        let Some(contract) = request.schema else {
            let payload = match candidate {
                Candidate::Text(text) => AgentPayload::Text(text),
                Candidate::Structured(value) => AgentPayload::Structured(value),
            };
            info!(rounds = convo.round(), "run finished");
            return Ok(AgentOutcome {
                payload,
                rounds: convo.round(),
            });
        };

        let validated = match &candidate {
            Candidate::Text(text) => contract.validate_text(text),
            Candidate::Structured(value) => {
                let issues = contract.validate_value(value);
                if issues.is_empty() {
                    Ok(value.clone())
                } else {
                    Err(issues)
                }
            }
        };
        match validated {
            Ok(value) => {
                info!(rounds = convo.round(), "run finished with validated output");
                return Ok(AgentOutcome {
                    payload: AgentPayload::Structured(value),
                    rounds: convo.round(),
                });
            }
            Err(issues) if correction_used => {
                warn!(
                    issues = issues.len(),
                    "schema validation failed again after the correction round"
                );
                return Err(AgentError::SchemaValidationFailed { issues });
            }
            Err(issues) => {
                correction_used = true;
                info!(
                    issues = issues.len(),
                    "schema validation failed, requesting a corrected answer"
                );
                let turn = convo.push(Role::User, render_correction(&issues));
                on_event(AgentEvent::Turn(turn));
            }
        }
    }
}

/// Run all of a round's commands sequentially, in the order the model
/// emitted them. A repeated tool-call id within the round is folded into a
/// rejection result instead of crashing the run.
fn execute_round<F>(
    calls: &[ToolCallRequest],
    request: &AgentRequest<'_>,
    on_event: &mut F,
) -> Result<Vec<CommandResult>, AgentError>
where
    F: FnMut(AgentEvent<'_>),
{
    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        if request.budget.expired() {
            return Err(AgentError::Cancelled);
        }
        let result = if seen.insert(call.id.clone()) {
            let timeout = request.budget.cap(request.policy.command_timeout);
            exec::execute(call, request.policy, timeout)
        } else {
            CommandResult::rejected(
                call,
                format!("duplicate tool call id '{}' in this round", call.id),
            )
        };
        on_event(AgentEvent::Command(&result));
        results.push(result);
    }
    Ok(results)
}

fn render_tool_requests(calls: &[ToolCallRequest]) -> String {
    let mut buf = String::from("Requested commands:\n");
    for call in calls {
        buf.push_str(&format!("- ({}) {}", call.id, call.command_line()));
        if let Some(reason) = &call.reason {
            buf.push_str(&format!(" (reason: {reason})"));
        }
        buf.push('\n');
    }
    buf
}

fn render_correction(issues: &[ValidationIssue]) -> String {
    let mut buf = String::from("The previous answer did not satisfy the required JSON schema:\n");
    for issue in issues {
        buf.push_str(&format!("- {issue}\n"));
    }
    buf.push_str(
        "\nReply again with a single JSON document that satisfies the schema. \
         Do not include any text outside the JSON.",
    );
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, permissive_policy, tool_call};
    use serde_json::json;
    use std::time::Duration;

    fn request<'a>(
        policy: &'a ExecutionPolicy,
        schema: Option<&'a SchemaContract>,
    ) -> AgentRequest<'a> {
        AgentRequest {
            prompt: "what is in /tmp?",
            system: Some("be brief"),
            policy,
            schema,
            budget: RunBudget::unbounded(),
            commands_enabled: true,
        }
    }

    #[test]
    fn final_text_without_schema_finishes_in_zero_rounds() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![Ok(ModelReply::FinalText("done".to_string()))]);

        let outcome = run_agent(&request(&policy, None), &backend, |_| {}).expect("run");
        assert_eq!(outcome.payload, AgentPayload::Text("done".to_string()));
        assert_eq!(outcome.rounds, 0);
    }

    #[test]
    fn empty_tool_call_set_is_malformed() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![Ok(ModelReply::ToolCalls(Vec::new()))]);

        let err = run_agent(&request(&policy, None), &backend, |_| {}).expect_err("run");
        assert!(matches!(err, AgentError::MalformedModelResponse));
    }

    #[test]
    fn tool_calls_with_commands_disabled_are_malformed() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![Ok(ModelReply::ToolCalls(vec![tool_call(
            "c1", "pwd",
        )]))]);
        let mut req = request(&policy, None);
        req.commands_enabled = false;

        let err = run_agent(&req, &backend, |_| {}).expect_err("run");
        assert!(matches!(err, AgentError::MalformedModelResponse));
    }

    #[test]
    fn duplicate_tool_call_id_is_rejected_not_fatal() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![
            Ok(ModelReply::ToolCalls(vec![
                tool_call("dup", "echo one"),
                tool_call("dup", "echo two"),
            ])),
            Ok(ModelReply::FinalText("recovered".to_string())),
        ]);

        let mut statuses = Vec::new();
        let outcome = run_agent(&request(&policy, None), &backend, |event| {
            if let AgentEvent::Command(result) = event {
                statuses.push(result.status.clone());
            }
        })
        .expect("run");

        assert_eq!(outcome.payload, AgentPayload::Text("recovered".to_string()));
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].is_ok());
        assert!(matches!(
            statuses[1],
            crate::core::types::CommandStatus::Rejected { .. }
        ));
    }

    #[test]
    fn backend_transport_error_aborts_the_run() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![Err(BackendError::Transport(
            "connection refused".to_string(),
        ))]);

        let err = run_agent(&request(&policy, None), &backend, |_| {}).expect_err("run");
        let AgentError::ModelBackend(BackendError::Transport(detail)) = err else {
            panic!("expected a backend error, got {err:?}");
        };
        assert!(detail.contains("connection refused"));
    }

    #[test]
    fn expired_budget_cancels_before_any_backend_call() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![Ok(ModelReply::FinalText("x".to_string()))]);
        let mut req = request(&policy, None);
        req.budget = RunBudget::with_timeout(Duration::ZERO);

        let err = run_agent(&req, &backend, |_| {}).expect_err("run");
        assert!(matches!(err, AgentError::Cancelled));
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn correction_round_resends_the_schema_and_appends_diagnostics() {
        let policy = permissive_policy();
        let contract = SchemaContract::parse(json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        }))
        .expect("schema");
        let backend = ScriptedBackend::new(vec![
            Ok(ModelReply::FinalText("sorry, plain text".to_string())),
            Ok(ModelReply::FinalStructured(json!({"summary": "ok"}))),
        ]);

        let mut turns = Vec::new();
        let outcome = run_agent(&request(&policy, Some(&contract)), &backend, |event| {
            if let AgentEvent::Turn(turn) = event {
                turns.push(turn.content.clone());
            }
        })
        .expect("run");

        assert_eq!(
            outcome.payload,
            AgentPayload::Structured(json!({"summary": "ok"}))
        );
        let sent = backend.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].schema, "correction request must re-send the schema");
        // The second request must carry one extra turn: the diagnostics.
        assert_eq!(sent[1].turns, sent[0].turns + 1);
        let correction = turns.last().expect("correction turn");
        assert!(correction.contains("did not satisfy the required JSON schema"));
        assert!(correction.contains("not valid JSON"));
    }

    #[test]
    fn second_validation_failure_is_terminal() {
        let policy = permissive_policy();
        let contract = SchemaContract::parse(json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        }))
        .expect("schema");
        let backend = ScriptedBackend::new(vec![
            Ok(ModelReply::FinalText("still text".to_string())),
            Ok(ModelReply::FinalStructured(json!({"wrong": true}))),
        ]);

        let err =
            run_agent(&request(&policy, Some(&contract)), &backend, |_| {}).expect_err("run");
        let AgentError::SchemaValidationFailed { issues } = err else {
            panic!("expected schema failure, got {err:?}");
        };
        assert!(!issues.is_empty());
        // Exactly two model calls: the original answer and one correction.
        assert_eq!(backend.sent().len(), 2);
    }

    #[test]
    fn structured_reply_without_schema_passes_through() {
        let policy = permissive_policy();
        let backend = ScriptedBackend::new(vec![Ok(ModelReply::FinalStructured(
            json!({"anything": 1}),
        ))]);

        let outcome = run_agent(&request(&policy, None), &backend, |_| {}).expect("run");
        assert_eq!(
            outcome.payload,
            AgentPayload::Structured(json!({"anything": 1}))
        );
    }

    #[test]
    fn tool_requests_render_ids_commands_and_reasons() {
        let mut call = tool_call("c1", "ls /tmp");
        call.reason = Some("see files".to_string());
        let rendered = render_tool_requests(&[call, tool_call("c2", "pwd")]);
        assert!(rendered.contains("(c1) ls /tmp (reason: see files)"));
        assert!(rendered.contains("(c2) pwd"));
    }
}
