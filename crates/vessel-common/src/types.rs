//! Domain primitive types used across the vessel workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a container instance.
///
/// 128 random bits rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix of the ID, suitable as a default name
    /// or interface-name fragment.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container process is alive.
    Running,
    /// Container process has exited or was stopped.
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resource limits applied to a container's cgroup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// Fractional CPU specification, e.g. "1.5" meaning 1.5 cores.
    pub cpus: Option<String>,
}

impl ResourceLimits {
    /// Returns true when no limit is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory_bytes.is_none() && self.cpus.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_32_hex_chars() {
        let id = ContainerId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }

    #[test]
    fn short_id_is_a_prefix() {
        let id = ContainerId::new("0123456789abcdef0123456789abcdef");
        assert_eq!(id.short(), "0123456789ab");
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerState::Running).expect("serialize");
        assert_eq!(json, "\"running\"");
        let back: ContainerState = serde_json::from_str("\"stopped\"").expect("deserialize");
        assert_eq!(back, ContainerState::Stopped);
    }

    #[test]
    fn default_limits_are_empty() {
        assert!(ResourceLimits::default().is_empty());
    }
}
