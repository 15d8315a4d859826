//! `vessel run` — Run a command in a new container.

use clap::Args;
use vessel_runtime::engine::{Engine, RunOptions};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container name (defaults to a short id prefix).
    #[arg(long)]
    pub name: Option<String>,

    /// Image providing the base root filesystem.
    #[arg(long, default_value = "busybox")]
    pub image: String,

    /// Interactive mode: attach this terminal instead of capturing logs.
    #[arg(short, long)]
    pub interactive: bool,

    /// Detached mode: return immediately after starting the container.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory limit, e.g. "128MiB" or "100m".
    #[arg(short, long)]
    pub memory: Option<String>,

    /// Fractional CPU limit, e.g. "1.5".
    #[arg(long)]
    pub cpus: Option<String>,

    /// Bind volume as hostDir:containerDir.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Network to attach the container to.
    #[arg(long)]
    pub network: Option<String>,

    /// Publish a port as hostPort:containerPort (repeatable).
    #[arg(short = 'p', long = "publish")]
    pub ports: Vec<String>,

    /// Command (and arguments) to run inside the container.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if container setup fails.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let engine = Engine::new();
    let options = RunOptions {
        name: args.name,
        image: args.image,
        interactive: args.interactive,
        detach: args.detach,
        memory: args.memory,
        cpus: args.cpus,
        volume: args.volume,
        network: args.network,
        ports: args.ports,
    };

    let detach = options.detach;
    let record = engine
        .run(&args.command, options)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if detach {
        println!("{}", record.id);
    }
    Ok(())
}
