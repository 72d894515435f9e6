//! System prompt rendering.
//!
//! The default system prompt is a template embedded at compile time. The
//! loop itself only ever sees the rendered string; callers can replace it
//! wholesale with their own text.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::policy::ExecutionPolicy;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Render the default system prompt for a run.
///
/// When explicit allow patterns exist they are listed so the model knows
/// what it may request.
pub fn default_system_prompt(policy: &ExecutionPolicy, commands_enabled: bool) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .expect("system template should be valid");
    let template = env.get_template("system")?;
    let rendered = template.render(context! {
        commands_enabled => commands_enabled,
        allow => policy.allow_patterns(),
    })?;
    Ok(rendered.trim().to_string())
}
