//! `vessel logs` — View a container's captured output.

use clap::Args;
use vessel_runtime::engine::Engine;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name or id.
    pub container: String,

    /// Follow log output, polling for new lines.
    #[arg(short, long)]
    pub follow: bool,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container or its log file is unknown.
pub fn execute(args: LogsArgs) -> anyhow::Result<()> {
    let engine = Engine::new();

    if args.follow {
        let mut stdout = std::io::stdout();
        engine
            .follow_logs(&args.container, &mut stdout)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        return Ok(());
    }

    let logs = engine
        .logs(&args.container)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print!("{logs}");
    Ok(())
}
