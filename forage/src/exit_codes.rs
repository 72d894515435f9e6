//! Stable exit codes for the forage CLI.

/// Run succeeded; the final payload was printed to stdout.
pub const OK: i32 = 0;
/// Invalid usage, configuration, or schema input.
pub const INVALID: i32 = 1;
/// The run terminated with an agent-level failure.
pub const RUN_FAILED: i32 = 2;
/// The run was cancelled by its deadline.
pub const CANCELLED: i32 = 3;
