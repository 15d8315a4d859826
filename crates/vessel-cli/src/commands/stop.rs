//! `vessel stop` — Stop a running container.

use clap::Args;
use vessel_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name or id.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, not running, or cannot
/// be signaled.
pub fn execute(args: StopArgs) -> anyhow::Result<()> {
    let engine = Engine::new();
    engine
        .stop(&args.container)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", args.container);
    Ok(())
}
