//! Linux bridge network driver.
//!
//! A network is one bridge interface named after the network, carrying
//! the subnet's first usable address, with a MASQUERADE rule for egress.
//! Each endpoint is a veth pair: one end enslaved to the bridge, the
//! other handed into the container's network namespace.

use ipnetwork::Ipv4Network;
use vessel_common::error::Result;

use crate::driver::{Endpoint, Network, NetworkDriver};
use crate::nat;
use crate::netlink::{NetlinkHandle, link_index};

/// The bridge driver.
#[derive(Debug, Default)]
pub struct BridgeDriver;

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn create(&self, subnet: Ipv4Network, name: &str) -> Result<Network> {
        let network = Network {
            name: name.to_string(),
            subnet,
            driver: self.name().to_string(),
        };

        if link_index(name).is_ok() {
            tracing::debug!(name, "bridge already exists, skipping creation");
            return Ok(network);
        }

        let mut handle = NetlinkHandle::new()?;
        let index = handle.create_bridge(name)?;
        handle.add_address(index, network.gateway(), subnet.prefix())?;
        handle.set_link_up(index)?;
        nat::setup_masquerade(name, &subnet)?;

        tracing::info!(name, %subnet, gateway = %network.gateway(), "bridge network created");
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        let mut handle = NetlinkHandle::new()?;
        let index = link_index(&network.name)?;
        handle.delete_link(index)?;
        nat::teardown_masquerade(&network.name, &network.subnet);
        tracing::info!(name = %network.name, "bridge network deleted");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        let bridge_index = link_index(&network.name)?;
        let mut handle = NetlinkHandle::new()?;
        handle.create_veth(&endpoint.if_name(), &endpoint.peer_name(), bridge_index)?;

        let host_index = link_index(&endpoint.if_name())?;
        handle.set_link_up(host_index)?;
        tracing::debug!(
            endpoint = %endpoint.id,
            if_name = %endpoint.if_name(),
            "endpoint attached to bridge"
        );
        Ok(())
    }

    fn disconnect(&self, _network: &Network, endpoint: &Endpoint) -> Result<()> {
        let mut handle = NetlinkHandle::new()?;
        let index = link_index(&endpoint.if_name())?;
        // Removing one end of the pair removes both.
        handle.delete_link(index)?;
        tracing::debug!(endpoint = %endpoint.id, "endpoint veth deleted");
        Ok(())
    }
}
