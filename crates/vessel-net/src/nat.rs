//! iptables NAT rules.
//!
//! Two rule families in the `nat` table: one MASQUERADE POSTROUTING rule
//! per network so container-originated traffic can reach the outside, and
//! one DNAT PREROUTING rule per published port forwarding host traffic to
//! a container address.

use std::net::Ipv4Addr;
use std::process::Command;

use ipnetwork::Ipv4Network;
use vessel_common::error::{Result, VesselError};

/// A parsed `hostPort:containerPort` publication entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port listened on by the host.
    pub host_port: u16,
    /// Port the traffic is forwarded to inside the container.
    pub container_port: u16,
}

impl PortMapping {
    /// Parses a `hostPort:containerPort` string.
    ///
    /// # Errors
    ///
    /// Returns a [`VesselError::Config`] when the entry does not have
    /// exactly two valid port numbers.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let [host, container] = parts.as_slice() else {
            return Err(VesselError::config(format!(
                "invalid port mapping {spec:?}, expected hostPort:containerPort"
            )));
        };
        let host_port = host.parse().map_err(|_| {
            VesselError::config(format!("invalid host port in mapping {spec:?}"))
        })?;
        let container_port = container.parse().map_err(|_| {
            VesselError::config(format!("invalid container port in mapping {spec:?}"))
        })?;
        Ok(Self {
            host_port,
            container_port,
        })
    }
}

/// Installs the MASQUERADE rule for a network: traffic sourced from the
/// subnet and leaving through any interface other than the bridge has its
/// source address rewritten.
///
/// # Errors
///
/// Returns an error if the iptables invocation fails.
pub fn setup_masquerade(bridge: &str, subnet: &Ipv4Network) -> Result<()> {
    run_iptables(&masquerade_args("-A", bridge, subnet))?;
    tracing::info!(bridge, %subnet, "masquerade rule installed");
    Ok(())
}

/// Removes the MASQUERADE rule for a network. Best-effort: failures are
/// logged, not escalated.
pub fn teardown_masquerade(bridge: &str, subnet: &Ipv4Network) {
    if let Err(e) = run_iptables(&masquerade_args("-D", bridge, subnet)) {
        tracing::warn!(bridge, %subnet, error = %e, "masquerade rule removal failed");
    }
}

fn masquerade_args(action: &str, bridge: &str, subnet: &Ipv4Network) -> Vec<String> {
    vec![
        "-t".into(),
        "nat".into(),
        action.into(),
        "POSTROUTING".into(),
        "-s".into(),
        subnet.to_string(),
        "!".into(),
        "-o".into(),
        bridge.into(),
        "-j".into(),
        "MASQUERADE".into(),
    ]
}

/// Installs one DNAT rule per well-formed `hostPort:containerPort` entry.
///
/// Malformed entries and failed installations are logged and skipped;
/// one bad mapping must not take down the rest of the list.
pub fn apply_port_mappings(mappings: &[String], destination: Ipv4Addr) {
    for spec in mappings {
        let mapping = match PortMapping::parse(spec) {
            Ok(mapping) => mapping,
            Err(e) => {
                tracing::warn!(spec, error = %e, "skipping malformed port mapping");
                continue;
            }
        };
        if let Err(e) = run_iptables(&dnat_args("-A", mapping, destination)) {
            tracing::warn!(spec, error = %e, "failed to install port mapping");
            continue;
        }
        tracing::info!(
            host_port = mapping.host_port,
            container_port = mapping.container_port,
            %destination,
            "port mapping installed"
        );
    }
}

/// Removes the DNAT rules for the given mappings. Best-effort.
pub fn remove_port_mappings(mappings: &[String], destination: Ipv4Addr) {
    for spec in mappings {
        let Ok(mapping) = PortMapping::parse(spec) else {
            continue;
        };
        if let Err(e) = run_iptables(&dnat_args("-D", mapping, destination)) {
            tracing::warn!(spec, error = %e, "port mapping removal failed");
        }
    }
}

fn dnat_args(action: &str, mapping: PortMapping, destination: Ipv4Addr) -> Vec<String> {
    vec![
        "-t".into(),
        "nat".into(),
        action.into(),
        "PREROUTING".into(),
        "-p".into(),
        "tcp".into(),
        "-m".into(),
        "tcp".into(),
        "--dport".into(),
        mapping.host_port.to_string(),
        "-j".into(),
        "DNAT".into(),
        "--to-destination".into(),
        format!("{destination}:{}", mapping.container_port),
    ]
}

/// Runs one iptables invocation and checks its exit status.
fn run_iptables(args: &[String]) -> Result<()> {
    tracing::debug!(?args, "iptables");
    let output = Command::new("iptables").args(args).output().map_err(|e| {
        VesselError::io(std::path::PathBuf::from("iptables"), e)
    })?;
    if !output.status.success() {
        return Err(VesselError::config(format!(
            "iptables {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mapping_parses_two_ports() {
        let mapping = PortMapping::parse("8080:80").expect("parse");
        assert_eq!(mapping.host_port, 8080);
        assert_eq!(mapping.container_port, 80);
    }

    #[test]
    fn port_mapping_without_separator_is_rejected() {
        assert!(PortMapping::parse("8080").is_err());
    }

    #[test]
    fn port_mapping_with_garbage_port_is_rejected() {
        assert!(PortMapping::parse("http:80").is_err());
        assert!(PortMapping::parse("8080:http").is_err());
        assert!(PortMapping::parse("8080:80:443").is_err());
    }

    #[test]
    fn port_mapping_out_of_range_is_rejected() {
        assert!(PortMapping::parse("99999:80").is_err());
    }

    #[test]
    fn masquerade_rule_excludes_bridge_interface() {
        let subnet: Ipv4Network = "192.168.7.0/24".parse().expect("subnet");
        let args = masquerade_args("-A", "vessel0", &subnet);
        assert_eq!(
            args.join(" "),
            "-t nat -A POSTROUTING -s 192.168.7.0/24 ! -o vessel0 -j MASQUERADE"
        );
    }

    #[test]
    fn dnat_rule_targets_container_address() {
        let mapping = PortMapping::parse("8080:80").expect("parse");
        let args = dnat_args("-A", mapping, Ipv4Addr::new(192, 168, 7, 2));
        assert_eq!(
            args.join(" "),
            "-t nat -A PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.7.2:80"
        );
    }
}
