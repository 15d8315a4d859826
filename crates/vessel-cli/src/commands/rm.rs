//! `vessel rm` — Remove a container.

use clap::Args;
use vessel_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name or id.
    pub container: String,

    /// Force removal of a running container (stops it first).
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, or running without
/// `--force`.
pub fn execute(args: RmArgs) -> anyhow::Result<()> {
    let engine = Engine::new();
    engine
        .remove(&args.container, args.force)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", args.container);
    Ok(())
}
