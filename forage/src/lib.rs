//! Agentic command-execution loop.
//!
//! This crate implements a bounded conversational loop: a prompt goes to a
//! language model, the model may request local shell commands, the results
//! are folded back into the conversation, and the loop repeats until the
//! model produces a final answer (optionally validated against a JSON
//! Schema). The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (policy decisions, context
//!   rendering, schema validation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, the HTTP
//!   model backend, config files). Isolated to enable scripted fakes in
//!   tests.
//!
//! The orchestration module ([`agent`]) coordinates core logic with I/O to
//! drive one run from initial prompt to final payload.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod prompt;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
