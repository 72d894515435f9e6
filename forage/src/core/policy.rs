//! Execution policy: which commands may run, and under what limits.
//!
//! The policy is built once per run from configuration and is read-only
//! afterwards. Allow/deny lists use shell-style wildcard patterns (`*`, `?`)
//! compiled to anchored regexes. Deny patterns always win; when no explicit
//! allow or deny configuration exists, a built-in list of read-only commands
//! applies.

use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

/// Read-only commands permitted when the caller configures no explicit
/// allow or deny patterns.
pub const SAFE_DEFAULT_PATTERNS: &[&str] = &[
    "git status*",
    "git log*",
    "git diff*",
    "git show*",
    "git branch*",
    "ls*",
    "cat *",
    "head *",
    "tail *",
    "grep *",
    "find *",
    "npm test*",
    "pytest*",
    "make test*",
    "df*",
    "ps*",
    "whoami",
    "pwd",
    "echo *",
];

/// A compiled wildcard pattern retaining its source text for reporting.
#[derive(Debug, Clone)]
pub struct CommandPattern {
    raw: String,
    regex: Regex,
}

impl CommandPattern {
    /// Compile a wildcard pattern: `*` matches any run of characters
    /// (including none), `?` matches exactly one. Everything else is literal.
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push_str("(?s)^");
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                _ => expr.push_str(&regex::escape(&ch.to_string())),
            }
        }
        expr.push('$');
        let regex =
            Regex::new(&expr).with_context(|| format!("compile command pattern '{pattern}'"))?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, command_line: &str) -> bool {
        self.regex.is_match(command_line)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Policy verdict for one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied { reason: String },
}

/// Immutable per-run execution limits and command filtering.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    allow: Vec<CommandPattern>,
    deny: Vec<CommandPattern>,
    safe_defaults: Vec<CommandPattern>,
    /// Wall-clock limit for a single command.
    pub command_timeout: Duration,
    /// Byte cap applied to stdout and stderr independently.
    pub max_output_bytes: usize,
    /// Upper bound on command rounds in one run.
    pub max_rounds: u32,
}

impl ExecutionPolicy {
    pub fn new(
        allow: &[String],
        deny: &[String],
        command_timeout: Duration,
        max_output_bytes: usize,
        max_rounds: u32,
    ) -> Result<Self> {
        let allow = compile_all(allow.iter().map(String::as_str))?;
        let deny = compile_all(deny.iter().map(String::as_str))?;
        // Safe defaults only apply with no explicit allow list; compiling them
        // up front keeps decide() infallible.
        let safe_defaults = if allow.is_empty() {
            compile_all(SAFE_DEFAULT_PATTERNS.iter().copied())?
        } else {
            Vec::new()
        };
        Ok(Self {
            allow,
            deny,
            safe_defaults,
            command_timeout,
            max_output_bytes,
            max_rounds,
        })
    }

    /// Raw allow patterns, for listing in the system prompt.
    pub fn allow_patterns(&self) -> Vec<&str> {
        self.allow.iter().map(CommandPattern::as_str).collect()
    }

    /// Decide whether a command line may be executed.
    ///
    /// Precedence: deny patterns, then the explicit allow list, then (only
    /// when no allow list is configured) the safe defaults.
    pub fn decide(&self, command_line: &str) -> PolicyDecision {
        for pattern in &self.deny {
            if pattern.matches(command_line) {
                return PolicyDecision::Denied {
                    reason: format!(
                        "command '{command_line}' matches deny pattern '{}'",
                        pattern.as_str()
                    ),
                };
            }
        }
        if !self.allow.is_empty() {
            if self.allow.iter().any(|p| p.matches(command_line)) {
                return PolicyDecision::Allowed;
            }
            return PolicyDecision::Denied {
                reason: format!("command '{command_line}' is not in the configured allow list"),
            };
        }
        if self.safe_defaults.iter().any(|p| p.matches(command_line)) {
            return PolicyDecision::Allowed;
        }
        PolicyDecision::Denied {
            reason: format!(
                "command '{command_line}' is not in the safe default command list; \
                 add an allow pattern to permit it"
            ),
        }
    }
}

fn compile_all<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<Vec<CommandPattern>> {
    patterns.map(CommandPattern::compile).collect()
}
