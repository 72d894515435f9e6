//! JSON Schema contract for the final answer.
//!
//! The contract is compiled once per run (Draft 2020-12) and validation is a
//! pure function: no side effects, safe to call repeatedly and from
//! independent runs. A candidate that is not valid JSON yields a diagnostic,
//! not an error path distinct from other validation failures.

use std::fmt;

use anyhow::{Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;

/// One schema violation, anchored to a JSON pointer path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON pointer into the candidate document (`/` for the root).
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}: {}", self.path, self.message)
    }
}

/// Caller-supplied schema, compiled for repeated validation.
#[derive(Debug)]
pub struct SchemaContract {
    raw: Value,
    validator: Validator,
}

impl SchemaContract {
    /// Compile a schema document. Fails only on an invalid schema, never on
    /// candidate documents.
    pub fn parse(raw: Value) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&raw)
            .map_err(|err| anyhow!("invalid schema: {err}"))?;
        Ok(Self { raw, validator })
    }

    /// The schema document as supplied, for forwarding to the model backend.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Validate a parsed candidate. Empty result means conformant.
    pub fn validate_value(&self, candidate: &Value) -> Vec<ValidationIssue> {
        self.validator
            .iter_errors(candidate)
            .map(|err| ValidationIssue {
                path: pointer_or_root(&err.instance_path().to_string()),
                message: err.to_string(),
            })
            .collect()
    }

    /// Parse and validate a textual candidate. A parse failure is reported as
    /// a root-level issue.
    pub fn validate_text(&self, candidate: &str) -> std::result::Result<Value, Vec<ValidationIssue>> {
        let value: Value = match serde_json::from_str(candidate) {
            Ok(value) => value,
            Err(err) => {
                return Err(vec![ValidationIssue {
                    path: "/".to_string(),
                    message: format!("output is not valid JSON: {err}"),
                }]);
            }
        };
        let issues = self.validate_value(&value);
        if issues.is_empty() {
            Ok(value)
        } else {
            Err(issues)
        }
    }
}

fn pointer_or_root(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}
