//! `vessel exec` — Execute a command inside a running container.
//!
//! The public command re-execs this binary with the hidden `exec-join`
//! verb; the join half runs in the new process and replaces itself with
//! the requested command inside the target's namespaces.

use clap::Args;
use vessel_runtime::engine::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name or id.
    pub container: String,

    /// Interactive mode (stdio is attached either way).
    #[arg(short, long)]
    pub interactive: bool,

    /// Command (and arguments) to run inside the container.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Arguments for the hidden `exec-join` verb.
#[derive(Args, Debug)]
pub struct ExecJoinArgs {
    /// Command to exec after joining the target namespaces.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or not running; the
/// joined command's exit code is propagated.
pub fn execute(args: ExecArgs) -> anyhow::Result<()> {
    let engine = Engine::new();
    let code = engine
        .exec(&args.container, &args.command)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Executes the hidden `exec-join` verb.
///
/// # Errors
///
/// Only returns on failure; on success the process image is replaced.
pub fn execute_join(args: ExecJoinArgs) -> anyhow::Result<()> {
    match vessel_runtime::exec::run_join(&args.command) {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}
