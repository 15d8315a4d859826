//! CLI command definitions and dispatch.

pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use clap::{Parser, Subcommand};

/// vessel — a minimal container runtime.
#[derive(Parser, Debug)]
#[command(name = "vessel", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container.
    Run(run::RunArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a container.
    Rm(rm::RmArgs),
    /// View a container's captured output.
    Logs(logs::LogsArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// Manage networks.
    Network(network::NetworkArgs),
    /// Namespace-entry process (internal).
    #[command(hide = true)]
    Init,
    /// Namespace-join process for exec (internal).
    #[command(hide = true, name = "exec-join")]
    ExecJoin(exec::ExecJoinArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails; the process then
/// exits nonzero.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args),
        Command::Ps(args) => ps::execute(args),
        Command::Stop(args) => stop::execute(args),
        Command::Rm(args) => rm::execute(args),
        Command::Logs(args) => logs::execute(args),
        Command::Exec(args) => exec::execute(args),
        Command::Network(args) => network::execute(args),
        Command::Init => init::execute(),
        Command::ExecJoin(args) => exec::execute_join(args),
    }
}
