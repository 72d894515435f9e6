//! Conversation state for one run of the agent loop.
//!
//! The state is append-only: rounds may add turns but never rewrite or drop
//! them, so the transcript order is total and reproducible. Each run owns
//! exactly one `Conversation`; nothing here is persisted.

use serde::{Deserialize, Serialize};

/// Speaker of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Ordered, append-only turn sequence plus the command-round counter.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    round: u32,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return a reference to it.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> &Turn {
        self.turns.push(Turn {
            role,
            content: content.into(),
        });
        let last = self.turns.len() - 1;
        &self.turns[last]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Command rounds completed or in progress so far.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Enter the next command round and return its 1-indexed number.
    pub fn begin_round(&mut self) -> u32 {
        self.round += 1;
        self.round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_preserve_append_order() {
        let mut convo = Conversation::new();
        convo.push(Role::System, "s");
        convo.push(Role::User, "u");
        convo.push(Role::Assistant, "a");

        let roles: Vec<Role> = convo.turns().iter().map(|turn| turn.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn push_returns_the_appended_turn() {
        let mut convo = Conversation::new();
        let turn = convo.push(Role::User, "hello");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "hello");
    }

    #[test]
    fn rounds_increase_monotonically_from_one() {
        let mut convo = Conversation::new();
        assert_eq!(convo.round(), 0);
        assert_eq!(convo.begin_round(), 1);
        assert_eq!(convo.begin_round(), 2);
        assert_eq!(convo.round(), 2);
    }
}
