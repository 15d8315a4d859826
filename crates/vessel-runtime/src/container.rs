//! The persisted container record.

use serde::{Deserialize, Serialize};
use vessel_common::types::ContainerState;

/// One container's durable state, serialized to
/// `<containers-root>/<id>/config.json`.
///
/// The record is owned exclusively by the `run` invocation that created
/// it for the duration of that call; afterwards it lives solely in the
/// registry, keyed by id and name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Random 128-bit hex identifier.
    pub id: String,
    /// Unique, user-supplied name (defaults to a short id prefix).
    pub name: String,
    /// Host-visible PID of the namespace-entry process.
    pub pid: i32,
    /// The user command, argv joined with spaces.
    pub command: String,
    /// Lifecycle state.
    pub state: ContainerState,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// RFC 3339 finish timestamp; empty while the container runs.
    #[serde(default)]
    pub finished_at: String,
    /// Image reference the root filesystem was built from.
    pub image: String,
    /// Name of the attached network; empty when unattached.
    #[serde(default)]
    pub network: String,
    /// Address assigned on the attached network; empty when unattached.
    #[serde(default)]
    pub ip: String,
    /// `hostPort:containerPort` publication entries.
    #[serde(default)]
    pub port_mapping: Vec<String>,
}

impl ContainerRecord {
    /// True when the record says the container process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContainerRecord {
        ContainerRecord {
            id: "0123456789abcdef0123456789abcdef".into(),
            name: "web".into(),
            pid: 4711,
            command: "sh -c sleep 1".into(),
            state: ContainerState::Running,
            started_at: "2025-11-02T10:30:00+00:00".into(),
            finished_at: String::new(),
            image: "busybox".into(),
            network: "apps".into(),
            ip: "192.168.10.2".into(),
            port_mapping: vec!["8080:80".into()],
        }
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = sample();
        let json = serde_json::to_string(&record).expect("serialize");
        let back: ContainerRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn empty_finished_at_roundtrips() {
        let record = sample();
        let json = serde_json::to_string(&record).expect("serialize");
        let back: ContainerRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.finished_at, "");
    }

    #[test]
    fn json_field_names_are_stable() {
        let json = serde_json::to_value(sample()).expect("serialize");
        for field in [
            "id",
            "name",
            "pid",
            "command",
            "state",
            "started_at",
            "finished_at",
            "image",
            "network",
            "ip",
            "port_mapping",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["state"], "running");
    }

    #[test]
    fn stopped_record_is_not_running() {
        let mut record = sample();
        record.state = ContainerState::Stopped;
        assert!(!record.is_running());
    }
}
