//! `vessel ps` — List containers.

use clap::Args;
use vessel_runtime::engine::Engine;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be read.
pub fn execute(args: PsArgs) -> anyhow::Result<()> {
    let engine = Engine::new();
    let containers = engine.list().map_err(|e| anyhow::anyhow!("{e}"))?;

    let filtered: Vec<_> = if args.all {
        containers
    } else {
        containers.into_iter().filter(|c| c.is_running()).collect()
    };

    if filtered.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<14} {:<15} {:<8} {:<20} {:<9} {:<26} {:<26}",
        "CONTAINER ID", "NAME", "PID", "COMMAND", "STATE", "STARTED_AT", "FINISHED_AT"
    );
    for c in &filtered {
        println!(
            "{:<14} {:<15} {:<8} {:<20} {:<9} {:<26} {:<26}",
            crate::output::truncate(&c.id, 12),
            c.name,
            c.pid,
            crate::output::truncate(&c.command, 20),
            c.state,
            c.started_at,
            c.finished_at
        );
    }

    Ok(())
}
