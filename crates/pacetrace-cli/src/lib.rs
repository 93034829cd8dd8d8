mod admin;
mod args;
mod hooks;

use anyhow::Result;

pub use args::{Cli, Command, SecretsCommand};

/// Dispatch a subcommand; returns the process exit code.
///
/// The host inspects the exit code, not the JSON body: 0 means proceed,
/// 2 means block (the reason is re-presented to the assistant).
pub fn run(cli: Cli) -> Result<i32> {
    let ctx = hooks::HookContext::prepare()?;

    let code = match cli.command {
        Command::SessionStart => hooks::run_session_start(&ctx),
        Command::SubagentStart => hooks::run_subagent_start(&ctx),
        Command::SubagentStop => hooks::run_subagent_stop(&ctx),
        Command::UserPromptSubmit => hooks::run_user_prompt_submit(&ctx),
        Command::PreToolUse => hooks::run_pre_tool_use(&ctx),
        Command::PostToolUse => hooks::run_post_tool_use(&ctx),
        Command::Stop => hooks::run_stop(&ctx),
        Command::Status => admin::run_status(&ctx)?,
        Command::Secrets { command } => admin::run_secrets(&ctx, command)?,
    };

    Ok(code)
}
