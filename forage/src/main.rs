//! Command-line entry point.
//!
//! Thin surface over the library: parse flags, load and merge configuration,
//! freeze the execution policy, run the loop, print the final payload.
//! Successful runs emit only the payload on stdout; failures emit a
//! structured message on stderr and a distinct exit code.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::warn;

use forage::agent::{self, AgentError, AgentEvent, AgentPayload, AgentRequest};
use forage::core::deadline::RunBudget;
use forage::core::schema::SchemaContract;
use forage::exit_codes;
use forage::io::backend::HttpBackend;
use forage::io::config::{ForageConfig, load_config};
use forage::io::transcript::{TranscriptRecord, TranscriptWriter};
use forage::logging;
use forage::prompt::default_system_prompt;

#[derive(Parser)]
#[command(
    name = "forage",
    version,
    about = "Ask a model a question and let it gather local context via shell commands"
)]
struct Cli {
    /// Prompt to send (reads stdin when omitted).
    prompt: Option<String>,

    /// Model identifier (overrides config).
    #[arg(short, long)]
    model: Option<String>,

    /// Path to the config file (default: ./forage.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON Schema file the final answer must satisfy.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// System prompt override.
    #[arg(long)]
    system: Option<String>,

    /// Allowed command pattern (repeatable; replaces the config allow list).
    #[arg(long = "allow", value_name = "PATTERN")]
    allow: Vec<String>,

    /// Denied command pattern (repeatable; replaces the config deny list).
    #[arg(long = "deny", value_name = "PATTERN")]
    deny: Vec<String>,

    /// Maximum command rounds for this run.
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Per-command timeout in seconds.
    #[arg(long)]
    command_timeout_secs: Option<u64>,

    /// Byte cap per captured output stream.
    #[arg(long)]
    max_output_bytes: Option<usize>,

    /// Whole-run deadline in seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Write a JSONL transcript of the run to this file.
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Disable command execution entirely.
    #[arg(long)]
    no_commands: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    show_config: bool,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("forage.toml"));
    let mut config = load_config(&config_path)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    if cli.show_config {
        let rendered = toml::to_string_pretty(&config).context("serialize effective config")?;
        print!("{rendered}");
        return Ok(exit_codes::OK);
    }

    let prompt = read_prompt(cli.prompt.as_deref())?;
    let policy = config.policy.to_policy()?;
    let schema = load_schema(cli.schema.as_deref())?;

    let commands_enabled = !cli.no_commands;
    let system = match (&cli.system, &config.system) {
        (Some(text), _) => text.clone(),
        (None, Some(text)) => text.clone(),
        (None, None) => default_system_prompt(&policy, commands_enabled)?,
    };
    let budget = match cli.deadline_secs {
        Some(secs) => RunBudget::with_timeout(Duration::from_secs(secs)),
        None => RunBudget::unbounded(),
    };

    let backend = HttpBackend::from_config(&config)?;
    let mut transcript = match &cli.transcript {
        Some(path) => Some(TranscriptWriter::create(path)?),
        None => None,
    };

    let request = AgentRequest {
        prompt: &prompt,
        system: Some(&system),
        policy: &policy,
        schema: schema.as_ref(),
        budget,
        commands_enabled,
    };
    let result = agent::run_agent(&request, &backend, |event| {
        let Some(writer) = transcript.as_mut() else {
            return;
        };
        let record = match &event {
            AgentEvent::Turn(turn) => TranscriptRecord::Turn {
                role: turn.role,
                content: &turn.content,
            },
            AgentEvent::Command(result) => TranscriptRecord::Command { result },
        };
        if let Err(err) = writer.record(&record) {
            warn!(err = %err, "failed to write transcript record");
        }
    });

    match result {
        Ok(outcome) => {
            record_outcome(transcript.as_mut(), "ok", "");
            print_payload(&outcome.payload)?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            record_outcome(transcript.as_mut(), "failed", &err.to_string());
            report_failure(&err);
            Ok(match err {
                AgentError::Cancelled => exit_codes::CANCELLED,
                _ => exit_codes::RUN_FAILED,
            })
        }
    }
}

fn apply_overrides(config: &mut ForageConfig, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if !cli.allow.is_empty() {
        config.policy.allow = cli.allow.clone();
    }
    if !cli.deny.is_empty() {
        config.policy.deny = cli.deny.clone();
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.policy.max_rounds = max_rounds;
    }
    if let Some(secs) = cli.command_timeout_secs {
        config.policy.command_timeout_secs = secs;
    }
    if let Some(bytes) = cli.max_output_bytes {
        config.policy.max_output_bytes = bytes;
    }
}

fn read_prompt(arg: Option<&str>) -> Result<String> {
    if let Some(prompt) = arg {
        return Ok(prompt.to_string());
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("read prompt from stdin")?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Err(anyhow!(
            "no prompt provided (pass it as an argument or on stdin)"
        ));
    }
    Ok(trimmed.to_string())
}

fn load_schema(path: Option<&std::path::Path>) -> Result<Option<SchemaContract>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let contents =
        fs::read_to_string(path).with_context(|| format!("read schema {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse schema {}", path.display()))?;
    Ok(Some(SchemaContract::parse(raw)?))
}

fn print_payload(payload: &AgentPayload) -> Result<()> {
    match payload {
        AgentPayload::Text(text) => println!("{text}"),
        AgentPayload::Structured(value) => {
            let rendered =
                serde_json::to_string_pretty(value).context("serialize structured payload")?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn report_failure(err: &AgentError) {
    eprintln!("error: {err}");
    if let AgentError::SchemaValidationFailed { issues } = err {
        for issue in issues {
            eprintln!("  - {issue}");
        }
    }
}

fn record_outcome(transcript: Option<&mut TranscriptWriter>, status: &str, detail: &str) {
    let Some(writer) = transcript else {
        return;
    };
    if let Err(err) = writer.record(&TranscriptRecord::Outcome { status, detail }) {
        warn!(err = %err, "failed to write transcript outcome");
    }
}
