use anyhow::Result;

use pacetrace_secrets::{SecretKind, SecretsVault};
use pacetrace_store::{Store, metrics_24h, secrets_masked_24h};

use crate::args::SecretsCommand;
use crate::hooks::HookContext;

/// 24h export metrics, blockage counts and the most recent pacing decision.
pub fn run_status(ctx: &HookContext) -> Result<i32> {
    let store = Store::open(&ctx.paths.db_file())?;

    let metrics = metrics_24h(&store)?;
    println!("Export (24h):");
    println!("  sessions: {}", metrics.sessions);
    println!("  traces:   {}", metrics.traces);
    println!("  spans:    {}", metrics.spans);
    println!("  masked:   {}", secrets_masked_24h(&store)?);

    let blockages = store.blockage_counts(24)?;
    if blockages.is_empty() {
        println!("Blockages (24h): none");
    } else {
        println!("Blockages (24h):");
        for entry in blockages {
            println!("  {:<28} {}", entry.category, entry.count);
        }
    }

    if let Some(snapshot) = store.latest_snapshot()? {
        println!(
            "Usage: 5h {:.1}%  7d {:.1}%",
            snapshot.five_hour_util, snapshot.seven_day_util
        );
        if let Some(decision) = store.last_decision(&snapshot.session_id)? {
            let verdict = if decision.should_throttle {
                format!("throttling {}s", decision.delay_seconds)
            } else {
                "on pace".to_string()
            };
            println!("Last decision: {}", verdict);
        }
    } else {
        println!("Usage: no snapshot yet");
    }

    Ok(0)
}

pub fn run_secrets(ctx: &HookContext, command: SecretsCommand) -> Result<i32> {
    let vault = SecretsVault::open(&ctx.paths.secrets_db_file())?;

    match command {
        SecretsCommand::List => {
            let records = vault.list()?;
            if records.is_empty() {
                println!("No secrets stored");
            }
            for record in records {
                println!(
                    "{:>4}  {:<5}  {}",
                    record.id,
                    record.kind,
                    preview(&record.value)
                );
            }
        }
        SecretsCommand::Add { value } => {
            let id = vault.create(SecretKind::Text, &value)?;
            println!("Stored secret #{id}");
        }
        SecretsCommand::Remove { id } => {
            if vault.remove(id)? {
                println!("Removed secret #{id}");
            } else {
                anyhow::bail!("no secret with id {id}");
            }
        }
        SecretsCommand::Clear => {
            let removed = vault.clear_all()?;
            println!("Removed {removed} secrets");
        }
        SecretsCommand::Dedupe => {
            let removed = vault.dedupe()?;
            println!("Removed {removed} duplicates");
        }
    }

    Ok(0)
}

/// Secrets never print whole: first few characters plus a mask.
fn preview(value: &str) -> String {
    let head: String = value.chars().take(4).collect();
    format!("{head}…***")
}
