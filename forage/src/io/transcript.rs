//! Opt-in JSONL transcript of a run.
//!
//! By default a run exposes nothing but its final payload. When the caller
//! asks for a transcript, every turn and command result is appended as one
//! JSON line so the run can be audited afterwards.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::convo::Role;
use crate::core::types::CommandResult;

/// One transcript line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptRecord<'a> {
    /// A turn was appended to the conversation.
    Turn { role: Role, content: &'a str },
    /// A requested command finished (or was rejected).
    Command { result: &'a CommandResult },
    /// The run terminated.
    Outcome { status: &'a str, detail: &'a str },
}

/// Line-buffered JSONL writer, flushed after every record.
pub struct TranscriptWriter {
    writer: BufWriter<File>,
}

impl TranscriptWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create transcript dir {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("create transcript {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, record: &TranscriptRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(record).context("serialize transcript record")?;
        writeln!(self.writer, "{line}").context("write transcript record")?;
        self.writer.flush().context("flush transcript")
    }
}
