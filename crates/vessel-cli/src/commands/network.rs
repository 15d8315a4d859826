//! `vessel network` — Manage networks.

use clap::{Args, Subcommand};
use vessel_runtime::engine::Engine;

/// Arguments for the `network` command group.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network subcommand.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network subcommands.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create(CreateArgs),
    /// List networks.
    Ls,
    /// Remove a network.
    Rm(RmArgs),
}

/// Arguments for `network create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Network name (also the bridge interface name).
    pub name: String,

    /// Subnet in CIDR format, e.g. 192.168.10.0/24.
    #[arg(long, required = true)]
    pub subnet: String,

    /// Network driver.
    #[arg(long, default_value = "bridge")]
    pub driver: String,
}

/// Arguments for `network rm`.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Network name.
    pub name: String,
}

/// Executes the `network` command group.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
pub fn execute(args: NetworkArgs) -> anyhow::Result<()> {
    let engine = Engine::new();
    match args.command {
        NetworkCommand::Create(create) => {
            let network = engine
                .network()
                .create_network(&create.name, &create.driver, &create.subnet)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", network.name);
            Ok(())
        }
        NetworkCommand::Ls => {
            let networks = engine
                .network()
                .list_networks()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{:<15} {:<20} {:<10}", "NAME", "IPRANGE", "DRIVER");
            for network in &networks {
                println!(
                    "{:<15} {:<20} {:<10}",
                    network.name,
                    network.subnet.to_string(),
                    network.driver
                );
            }
            Ok(())
        }
        NetworkCommand::Rm(rm) => {
            engine
                .network()
                .delete_network(&rm.name)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", rm.name);
            Ok(())
        }
    }
}
