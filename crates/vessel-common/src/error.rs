//! Unified error types for the vessel workspace.
//!
//! Variants are grouped by how callers are expected to react: launch-fatal
//! failures (mounts, syscalls, cgroup creation), resource-exhaustion errors
//! that are surfaced to the user without retry, and validation errors that
//! are raised before any kernel resource is touched. Best-effort cleanup
//! paths log failures instead of returning these.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VesselError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A mount, unmount, or pivot syscall failed. Fatal to container start.
    #[error("mount operation on {target} failed: {source}")]
    Mount {
        /// Mount target the syscall was applied to.
        target: PathBuf,
        /// Errno returned by the kernel.
        source: nix::Error,
    },

    /// A non-mount syscall failed (clone, setns, kill, pipe, ...).
    #[error("{op} failed: {source}")]
    Syscall {
        /// Name of the failed operation.
        op: &'static str,
        /// Errno returned by the kernel.
        source: nix::Error,
    },

    /// A netlink request was rejected or could not be delivered.
    #[error("netlink error: {message}")]
    Netlink {
        /// Description of the netlink failure.
        message: String,
    },

    /// User-supplied input is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid input.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A fractional-CPU specification could not be parsed or is not positive.
    #[error("invalid cpus value: {spec}")]
    InvalidCpuSpec {
        /// The rejected specification string.
        spec: String,
    },

    /// The computed CPU quota is non-positive.
    #[error("calculated cpu quota is invalid: {quota}")]
    QuotaOverflow {
        /// The rejected quota value in microseconds.
        quota: i64,
    },

    /// Every address in the subnet is currently assigned.
    #[error("subnet {subnet} is full")]
    SubnetFull {
        /// CIDR of the exhausted subnet.
        subnet: String,
    },

    /// An address does not fall inside the subnet's allocatable range.
    #[error("invalid address {address} for subnet {subnet}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// CIDR of the subnet it was checked against.
        subnet: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VesselError>;

impl VesselError {
    /// Shorthand for an [`VesselError::Io`] variant.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a [`VesselError::Config`] variant.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
