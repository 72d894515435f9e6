//! Test-only helpers: scripted model backend and common fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::core::policy::ExecutionPolicy;
use crate::core::types::ToolCallRequest;
use crate::io::backend::{BackendError, ModelBackend, ModelReply, ModelRequest};

/// Shape of one request a [`ScriptedBackend`] received, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    /// Number of conversation turns in the request.
    pub turns: usize,
    /// Whether a schema contract was attached.
    pub schema: bool,
    /// Whether the command tool was declared.
    pub tools: bool,
}

/// Backend that replays predetermined replies without any network traffic.
pub struct ScriptedBackend {
    replies: RefCell<VecDeque<Result<ModelReply, BackendError>>>,
    sent: RefCell<Vec<SentRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<ModelReply, BackendError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            sent: RefCell::new(Vec::new()),
        }
    }

    /// Requests received so far, in order.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.borrow().clone()
    }
}

impl ModelBackend for ScriptedBackend {
    fn send(&self, request: &ModelRequest<'_>) -> Result<ModelReply, BackendError> {
        self.sent.borrow_mut().push(SentRequest {
            turns: request.turns.len(),
            schema: request.schema.is_some(),
            tools: request.tools_enabled,
        });
        self.replies
            .borrow_mut()
            .pop_front()
            .expect("scripted backend ran out of replies")
    }
}

/// A tool call with no extra args and no reason.
pub fn tool_call(id: &str, command: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        command: command.to_string(),
        args: Vec::new(),
        reason: None,
    }
}

/// Policy that allows everything, with generous limits.
pub fn permissive_policy() -> ExecutionPolicy {
    restricted_policy(&["*"])
}

/// Policy restricted to the given allow patterns.
pub fn restricted_policy(allow: &[&str]) -> ExecutionPolicy {
    let allow: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
    ExecutionPolicy::new(&allow, &[], Duration::from_secs(5), 100_000, 10).expect("test policy")
}
