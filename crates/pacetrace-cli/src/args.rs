use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pacetrace",
    about = "Host-side telemetry and pacing sidecar for AI coding assistants",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Hook: session started (stdin: session_id, source)
    SessionStart,
    /// Hook: subagent started (stdin: agent_id, agent_type, transcript_path)
    SubagentStart,
    /// Hook: subagent finished (stdin: agent_id, agent_transcript_path)
    SubagentStop,
    /// Hook: user submitted a prompt (stdin: session_id, prompt)
    UserPromptSubmit,
    /// Hook: about to run a tool; may block (stdin: tool_name, tool_input)
    PreToolUse,
    /// Hook: a tool finished; pacing + span export (stdin: tool_response, ...)
    PostToolUse,
    /// Hook: assistant finished its turn; may block (stdin: session_id)
    Stop,
    /// Show 24h metrics, blockage counts and the last pacing decision
    Status,
    /// Manage the secrets vault
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
}

#[derive(Subcommand)]
pub enum SecretsCommand {
    /// List stored secrets (values shown masked)
    List,
    /// Add a text secret
    Add { value: String },
    /// Remove a secret by id
    Remove { id: i64 },
    /// Remove all secrets
    Clear,
    /// Drop duplicate (type, value) rows, keeping the lowest id
    Dedupe,
}
