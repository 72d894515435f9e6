//! Whole-run time budget.
//!
//! A run may carry a single end-to-end deadline. The remaining budget is
//! propagated into every blocking phase (backend call, command execution) so
//! that cancelling a run can never leave a child process running past its
//! capped timeout.

use std::time::{Duration, Instant};

/// Optional deadline for an entire run.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    deadline: Option<Instant>,
}

impl RunBudget {
    /// No deadline: phases use their configured timeouts unchanged.
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// Deadline `limit` from now.
    pub fn with_timeout(limit: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
        }
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| {
            deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO)
        })
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(remaining) if remaining.is_zero())
    }

    /// Cap a phase timeout by the remaining budget.
    pub fn cap(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => timeout.min(remaining),
            None => timeout,
        }
    }
}
