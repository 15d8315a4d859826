//! Network lifecycle management.
//!
//! Owns the driver, the IP allocator, and the persisted network records.
//! `connect` walks a container from unconnected to connected in one
//! motion (allocate, wire, configure, publish) and rolls back whatever
//! succeeded when a later step fails; there is no partially-connected
//! steady state.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use vessel_common::constants::NETWORK_BUCKET;
use vessel_common::error::{Result, VesselError};
use vessel_common::store::KvStore;

use crate::driver::{Endpoint, Network, driver_by_name};
use crate::ipam::IpAllocator;
use crate::nat;
use crate::netlink::{NetlinkHandle, link_index_retry};
use crate::netns;

/// Attempts made when looking up a just-created veth peer.
const PEER_LOOKUP_ATTEMPTS: u32 = 3;

/// The container-side identity needed to attach it to a network.
#[derive(Debug, Clone)]
pub struct Attachment<'a> {
    /// Container ID (forms the endpoint id together with the network).
    pub container_id: &'a str,
    /// Host-visible PID of the container's init process.
    pub pid: u32,
    /// `hostPort:containerPort` publication entries.
    pub port_mappings: &'a [String],
}

/// Manages virtual networks and container attachments.
pub struct NetworkManager {
    store: Arc<dyn KvStore>,
    allocator: IpAllocator,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager").finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Creates a manager over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let allocator = IpAllocator::new(Arc::clone(&store));
        Self { store, allocator }
    }

    /// Creates a network: validates the name and subnet, reserves the
    /// bridge address, builds the host-side plumbing, and persists the
    /// record.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate names, unparsable or overlapping
    /// subnets, or driver failures (after releasing the reserved
    /// address).
    pub fn create_network(&self, name: &str, driver: &str, subnet: &str) -> Result<Network> {
        if name.is_empty() || name.contains('/') {
            return Err(VesselError::config(format!(
                "invalid network name {name:?}"
            )));
        }
        if self.load_network(name)?.is_some() {
            return Err(VesselError::config(format!(
                "network {name} already exists"
            )));
        }

        if !subnet.contains('/') {
            return Err(VesselError::config(format!(
                "invalid subnet {subnet:?}: expected CIDR notation"
            )));
        }
        let parsed: Ipv4Network = subnet
            .parse()
            .map_err(|e| VesselError::config(format!("invalid subnet {subnet:?}: {e}")))?;
        let subnet = Ipv4Network::new(parsed.network(), parsed.prefix())
            .map_err(|e| VesselError::config(format!("invalid subnet {subnet:?}: {e}")))?;

        // Two bitmaps over overlapping ranges would hand out the same
        // address on one L2 domain.
        for existing in self.list_networks()? {
            if subnets_overlap(subnet, existing.subnet) {
                return Err(VesselError::config(format!(
                    "subnet {subnet} overlaps network {} ({})",
                    existing.name, existing.subnet
                )));
            }
        }

        let driver = driver_by_name(driver)?;

        // Bitmap index 0: the bridge's own address.
        let gateway = self.allocator.allocate(&subnet)?;

        let network = match driver.create(subnet, name) {
            Ok(network) => network,
            Err(e) => {
                if let Err(release_err) = self.allocator.release(&subnet, gateway) {
                    tracing::warn!(error = %release_err, "gateway release failed during rollback");
                }
                return Err(e);
            }
        };

        self.save_network(&network)?;
        Ok(network)
    }

    /// Deletes a network: releases the bridge address, removes the bridge
    /// and its NAT rule, and deletes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the network does not exist or the driver
    /// teardown fails.
    pub fn delete_network(&self, name: &str) -> Result<()> {
        let network = self
            .load_network(name)?
            .ok_or_else(|| VesselError::NotFound {
                kind: "network",
                id: name.to_string(),
            })?;

        self.allocator.release(&network.subnet, network.gateway())?;
        driver_by_name(&network.driver)?.delete(&network)?;
        self.store.delete(NETWORK_BUCKET, name)?;
        tracing::info!(name, "network deleted");
        Ok(())
    }

    /// Lists all persisted networks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read; undecodable records
    /// are skipped with a warning.
    pub fn list_networks(&self) -> Result<Vec<Network>> {
        let mut networks = Vec::new();
        for (key, bytes) in self.store.get_all(NETWORK_BUCKET)? {
            if key == vessel_common::constants::ALLOCATED_IP_KEY {
                continue;
            }
            match serde_json::from_slice::<Network>(&bytes) {
                Ok(network) => networks.push(network),
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping undecodable network record");
                }
            }
        }
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    /// Attaches a container to a network and returns its address.
    ///
    /// Allocates an IP, creates the veth pair on the bridge, moves the
    /// peer into the container's netns, configures address/loopback/
    /// default-route inside that namespace, and installs DNAT rules for
    /// the published ports. A failure partway through rolls back the
    /// completed steps before returning.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error after rollback.
    pub fn connect(&self, name: &str, attachment: &Attachment<'_>) -> Result<Ipv4Addr> {
        let network = self
            .load_network(name)?
            .ok_or_else(|| VesselError::NotFound {
                kind: "network",
                id: name.to_string(),
            })?;

        let ip = self.allocator.allocate(&network.subnet)?;
        let endpoint = Endpoint::new(
            attachment.container_id,
            name,
            ip,
            attachment.port_mappings.to_vec(),
        );

        let driver = driver_by_name(&network.driver)?;
        if let Err(e) = driver.connect(&network, &endpoint) {
            self.release_quietly(&network.subnet, ip);
            return Err(e);
        }

        if let Err(e) = configure_endpoint(&network, &endpoint, attachment.pid) {
            if let Err(disconnect_err) = driver.disconnect(&network, &endpoint) {
                tracing::warn!(error = %disconnect_err, "veth rollback failed");
            }
            self.release_quietly(&network.subnet, ip);
            return Err(e);
        }

        nat::apply_port_mappings(&endpoint.port_mappings, ip);

        tracing::info!(
            container = attachment.container_id,
            network = name,
            %ip,
            "container connected"
        );
        Ok(ip)
    }

    /// Detaches a container from a network: deletes the veth pair,
    /// removes the DNAT rules, and releases the address.
    ///
    /// # Errors
    ///
    /// Returns an error if the network record cannot be loaded; device
    /// and rule removal failures are logged and the address is released
    /// regardless.
    pub fn disconnect(&self, name: &str, attachment: &Attachment<'_>, ip: Ipv4Addr) -> Result<()> {
        let network = self
            .load_network(name)?
            .ok_or_else(|| VesselError::NotFound {
                kind: "network",
                id: name.to_string(),
            })?;

        let endpoint = Endpoint::new(
            attachment.container_id,
            name,
            ip,
            attachment.port_mappings.to_vec(),
        );

        if let Err(e) = driver_by_name(&network.driver)?.disconnect(&network, &endpoint) {
            tracing::warn!(endpoint = %endpoint.id, error = %e, "veth removal failed");
        }
        nat::remove_port_mappings(&endpoint.port_mappings, ip);
        self.allocator.release(&network.subnet, ip)?;

        tracing::info!(container = attachment.container_id, network = name, "container disconnected");
        Ok(())
    }

    fn load_network(&self, name: &str) -> Result<Option<Network>> {
        match self.store.get(NETWORK_BUCKET, name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_network(&self, network: &Network) -> Result<()> {
        let bytes = serde_json::to_vec(network)?;
        self.store.put(NETWORK_BUCKET, &network.name, &bytes)
    }

    fn release_quietly(&self, subnet: &Ipv4Network, ip: Ipv4Addr) {
        if let Err(e) = self.allocator.release(subnet, ip) {
            tracing::warn!(%ip, error = %e, "address release failed during rollback");
        }
    }
}

/// Moves the veth peer into the container's namespace and configures it
/// there: address, link up, loopback up, default route via the bridge.
///
/// The in-namespace work runs on a dedicated pinned thread; a netlink
/// socket is created inside the namespace because netlink sockets are
/// bound to the namespace of the creating thread.
fn configure_endpoint(network: &Network, endpoint: &Endpoint, pid: u32) -> Result<()> {
    use std::os::fd::AsRawFd;

    let peer_name = endpoint.peer_name();
    let peer_index = link_index_retry(&peer_name, PEER_LOOKUP_ATTEMPTS)?;

    let ns_file = netns::open_container_netns(pid)?;
    let mut host_handle = NetlinkHandle::new()?;
    host_handle.set_link_netns(peer_index, ns_file.as_raw_fd())?;

    let prefix = network.subnet.prefix();
    let gateway = network.gateway();
    let ip = endpoint.ip;

    netns::with_netns(&ns_file, move || {
        let mut handle = NetlinkHandle::new()?;
        let peer_index = link_index_retry(&peer_name, PEER_LOOKUP_ATTEMPTS)?;
        handle.add_address(peer_index, ip, prefix)?;
        handle.set_link_up(peer_index)?;

        let lo_index = crate::netlink::link_index("lo")?;
        handle.set_link_up(lo_index)?;

        handle.add_default_route(peer_index, gateway)?;
        Ok(())
    })
}

/// True when the two IPv4 ranges share any addresses.
fn subnets_overlap(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_common::store::MemoryStore;

    fn manager() -> NetworkManager {
        NetworkManager::new(Arc::new(MemoryStore::new()))
    }

    fn save(manager: &NetworkManager, name: &str, subnet: &str) {
        let network = Network {
            name: name.into(),
            subnet: subnet.parse().expect("subnet"),
            driver: "bridge".into(),
        };
        manager.save_network(&network).expect("save");
    }

    #[test]
    fn subnet_overlap_detection() {
        let a: Ipv4Network = "192.168.1.0/24".parse().expect("subnet");
        let b: Ipv4Network = "192.168.1.128/25".parse().expect("subnet");
        let c: Ipv4Network = "192.168.2.0/24".parse().expect("subnet");
        let wide: Ipv4Network = "192.168.0.0/16".parse().expect("subnet");

        assert!(subnets_overlap(a, b));
        assert!(subnets_overlap(b, a));
        assert!(!subnets_overlap(a, c));
        assert!(subnets_overlap(wide, a));
        assert!(subnets_overlap(a, wide));
    }

    #[test]
    fn duplicate_network_name_is_rejected() {
        let manager = manager();
        save(&manager, "apps", "10.40.0.0/24");
        let err = manager
            .create_network("apps", "bridge", "10.50.0.0/24")
            .expect_err("duplicate must fail");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn overlapping_subnet_is_rejected() {
        let manager = manager();
        save(&manager, "apps", "10.40.0.0/16");
        let err = manager
            .create_network("other", "bridge", "10.40.3.0/24")
            .expect_err("overlap must fail");
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn invalid_subnet_is_rejected_before_any_allocation() {
        let manager = manager();
        assert!(manager.create_network("x", "bridge", "not-a-subnet").is_err());
        assert!(manager.create_network("x", "bridge", "10.0.0.0").is_err());
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let manager = manager();
        assert!(manager
            .create_network("x", "macvlan", "10.60.0.0/24")
            .is_err());
    }

    #[test]
    fn network_names_with_slash_are_rejected() {
        let manager = manager();
        assert!(manager.create_network("a/b", "bridge", "10.61.0.0/24").is_err());
        assert!(manager.create_network("", "bridge", "10.61.0.0/24").is_err());
    }

    #[test]
    fn list_skips_the_bitmap_key_and_sorts() {
        let manager = manager();
        save(&manager, "beta", "10.70.0.0/24");
        save(&manager, "alpha", "10.71.0.0/24");
        manager
            .store
            .put(NETWORK_BUCKET, vessel_common::constants::ALLOCATED_IP_KEY, b"{}")
            .expect("bitmap");

        let networks = manager.list_networks().expect("list");
        let names: Vec<_> = networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn delete_unknown_network_is_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.delete_network("ghost"),
            Err(VesselError::NotFound { .. })
        ));
    }

    #[test]
    fn connect_to_unknown_network_is_not_found() {
        let manager = manager();
        let attachment = Attachment {
            container_id: "abc",
            pid: 1,
            port_mappings: &[],
        };
        assert!(matches!(
            manager.connect("ghost", &attachment),
            Err(VesselError::NotFound { .. })
        ));
    }
}
