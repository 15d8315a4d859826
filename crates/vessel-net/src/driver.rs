//! Network driver abstraction and shared network/endpoint types.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};

/// Prefix of the container-side veth interface name.
pub const VETH_PEER_PREFIX: &str = "veth-";

/// Length of the endpoint-id fragment used in interface names.
const IF_FRAGMENT_LEN: usize = 5;

/// A persisted virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Unique network name; also the bridge interface name.
    pub name: String,
    /// Subnet in CIDR form, normalized to the network base.
    pub subnet: Ipv4Network,
    /// Name of the driver that owns this network.
    pub driver: String,
}

impl Network {
    /// The bridge's own address: the subnet's first usable address,
    /// claimed from bitmap index 0 at creation time.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet.network()) + 1)
    }
}

/// Ephemeral description of one container's attachment to a network.
///
/// Never persisted: once the veth pair and NAT rules are installed, the
/// container's network namespace holds the durable state. Disconnect
/// rebuilds the same identity from the container ID and network name.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `<containerID>-<networkName>`.
    pub id: String,
    /// Address assigned to the container side.
    pub ip: Ipv4Addr,
    /// `hostPort:containerPort` publication entries.
    pub port_mappings: Vec<String>,
}

impl Endpoint {
    /// Builds the endpoint identity for a container on a network.
    #[must_use]
    pub fn new(
        container_id: &str,
        network_name: &str,
        ip: Ipv4Addr,
        port_mappings: Vec<String>,
    ) -> Self {
        Self {
            id: format!("{container_id}-{network_name}"),
            ip,
            port_mappings,
        }
    }

    /// Name of the bridge-side veth interface, derived from the endpoint
    /// id so disconnect can reconstruct it.
    #[must_use]
    pub fn if_name(&self) -> String {
        self.id.chars().take(IF_FRAGMENT_LEN).collect()
    }

    /// Name of the container-side veth interface.
    #[must_use]
    pub fn peer_name(&self) -> String {
        format!("{VETH_PEER_PREFIX}{}", self.if_name())
    }
}

/// A pluggable network driver.
///
/// Today only the bridge driver exists; additional drivers plug in here
/// without touching the allocator or the lifecycle engine.
pub trait NetworkDriver: Send + Sync {
    /// Driver name used in network records.
    fn name(&self) -> &'static str;

    /// Creates the host-side plumbing for a network and returns its
    /// record.
    fn create(&self, subnet: Ipv4Network, name: &str) -> Result<Network>;

    /// Tears down the host-side plumbing for a network.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the veth pair for an endpoint and attaches the host side
    /// to the network's bridge.
    fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;

    /// Deletes the endpoint's veth pair (removing both ends).
    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;
}

/// Looks up a driver implementation by name.
///
/// # Errors
///
/// Returns a [`VesselError::Config`] for unknown driver names.
pub fn driver_by_name(name: &str) -> Result<Box<dyn NetworkDriver>> {
    match name {
        "bridge" => Ok(Box::new(crate::bridge::BridgeDriver)),
        other => Err(VesselError::config(format!(
            "unsupported network driver: {other}"
        ))),
    }
}
