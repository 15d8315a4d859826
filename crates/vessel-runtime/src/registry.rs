//! Container record persistence and listing.
//!
//! Records live at `<containers-root>/<id>/config.json`; the captured log
//! sits next to them. Lookup accepts an exact id first, then falls back
//! to a case-insensitive name scan.

use std::path::PathBuf;

use vessel_common::constants::{CONTAINER_CONFIG_FILE, CONTAINER_LOG_FILE};
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerState;

use crate::container::ContainerRecord;

/// Thin persistence layer over the container records.
#[derive(Debug, Clone)]
pub struct Registry {
    containers_dir: PathBuf,
}

impl Registry {
    /// Creates a registry over the given containers root.
    #[must_use]
    pub fn new(containers_dir: impl Into<PathBuf>) -> Self {
        Self {
            containers_dir: containers_dir.into(),
        }
    }

    /// Directory holding one container's record, log, and layers.
    #[must_use]
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.containers_dir.join(id)
    }

    /// Path of one container's captured log.
    #[must_use]
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.container_dir(id).join(CONTAINER_LOG_FILE)
    }

    fn config_path(&self, id: &str) -> PathBuf {
        self.container_dir(id).join(CONTAINER_CONFIG_FILE)
    }

    /// Writes (or overwrites) a container record.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, record: &ContainerRecord) -> Result<()> {
        let dir = self.container_dir(&record.id);
        std::fs::create_dir_all(&dir).map_err(|e| VesselError::io(&dir, e))?;
        let path = self.config_path(&record.id);
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&path, json).map_err(|e| VesselError::io(path, e))?;
        tracing::debug!(id = %record.id, "container record written");
        Ok(())
    }

    /// Reads the record for an exact container id.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if no record exists for the id,
    /// or a read/parse error.
    pub fn read(&self, id: &str) -> Result<ContainerRecord> {
        let path = self.config_path(id);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VesselError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                }
            } else {
                VesselError::io(&path, e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Finds a record by exact id or case-insensitive name.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails; an unknown name yields
    /// `Ok(None)`.
    pub fn find(&self, name_or_id: &str) -> Result<Option<ContainerRecord>> {
        if self.config_path(name_or_id).exists() {
            return self.read(name_or_id).map(Some);
        }
        Ok(self
            .list()?
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name_or_id)))
    }

    /// Lists every readable container record.
    ///
    /// Unreadable or undecodable entries are skipped with a warning so
    /// one corrupt record cannot hide the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the containers root itself cannot be
    /// enumerated (a missing root means no containers).
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let entries = match std::fs::read_dir(&self.containers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VesselError::io(&self.containers_dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.read(&id) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(id, error = %e, "skipping unreadable container record");
                }
            }
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    /// Updates a container's state, stamping `finished_at` when it stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    pub fn update_state(&self, id: &str, state: ContainerState) -> Result<()> {
        let mut record = self.read(id)?;
        record.state = state;
        if state == ContainerState::Stopped {
            record.finished_at = chrono::Utc::now().to_rfc3339();
        }
        self.write(&record)
    }

    /// Deletes a container's directory with record, log, and layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.container_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VesselError::io(dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            name: name.into(),
            pid: 1,
            command: "sh".into(),
            state: ContainerState::Running,
            started_at: format!("2025-11-02T10:00:0{}+00:00", id.len() % 10),
            finished_at: String::new(),
            image: "busybox".into(),
            network: String::new(),
            ip: String::new(),
            port_mapping: Vec::new(),
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path());
        let rec = record("aaaa", "one");

        registry.write(&rec).expect("write");
        assert_eq!(registry.read("aaaa").expect("read"), rec);
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path());
        assert!(matches!(
            registry.read("ghost"),
            Err(VesselError::NotFound { .. })
        ));
    }

    #[test]
    fn find_matches_id_then_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path());
        registry.write(&record("aaaa", "web")).expect("write");

        assert!(registry.find("aaaa").expect("find").is_some());
        assert!(registry.find("web").expect("find").is_some());
        assert!(registry.find("WEB").expect("find").is_some());
        assert!(registry.find("ghost").expect("find").is_none());
    }

    #[test]
    fn list_returns_all_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path());
        registry.write(&record("aaaa", "one")).expect("write");
        registry.write(&record("bbbb", "two")).expect("write");

        assert_eq!(registry.list().expect("list").len(), 2);
    }

    #[test]
    fn list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path().join("never-created"));
        assert!(registry.list().expect("list").is_empty());
    }

    #[test]
    fn update_state_stamps_finished_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path());
        registry.write(&record("aaaa", "one")).expect("write");

        registry
            .update_state("aaaa", ContainerState::Stopped)
            .expect("update");
        let updated = registry.read("aaaa").expect("read");
        assert_eq!(updated.state, ContainerState::Stopped);
        assert!(!updated.finished_at.is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path());
        registry.write(&record("aaaa", "one")).expect("write");

        registry.delete("aaaa").expect("delete");
        registry.delete("aaaa").expect("delete again");
        assert!(registry.find("aaaa").expect("find").is_none());
    }
}
