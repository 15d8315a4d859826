//! Legacy (cgroups v1) hierarchy backend.
//!
//! Controllers live in separate trees: `<root>/memory/<name>` and
//! `<root>/cpu/<name>`, each with its own `tasks` membership file.

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

use super::{CpuLimit, Hierarchy, remove_group_dir, write_control};

/// Group handle spanning the memory and cpu controller trees.
#[derive(Debug)]
pub struct LegacyHierarchy {
    memory_path: PathBuf,
    cpu_path: PathBuf,
}

impl LegacyHierarchy {
    /// Creates a handle for `name` under the hierarchy root. No directories
    /// are touched until [`Hierarchy::create`] runs.
    #[must_use]
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            memory_path: root.join("memory").join(name),
            cpu_path: root.join("cpu").join(name),
        }
    }
}

impl Hierarchy for LegacyHierarchy {
    fn create(&self) -> Result<()> {
        for path in [&self.memory_path, &self.cpu_path] {
            std::fs::create_dir_all(path).map_err(|e| VesselError::io(path.clone(), e))?;
        }
        tracing::info!(
            memory = %self.memory_path.display(),
            cpu = %self.cpu_path.display(),
            "cgroup created (legacy)"
        );
        Ok(())
    }

    fn set_memory_limit(&self, limit_bytes: u64) -> Result<()> {
        write_control(
            self.memory_path.join("memory.limit_in_bytes"),
            &limit_bytes.to_string(),
        )?;
        // v1 has no per-group swap ceiling we can rely on being enabled;
        // zero swappiness keeps the group's pages from being swapped out.
        write_control(self.memory_path.join("memory.swappiness"), "0")?;
        tracing::debug!(limit_bytes, "memory limit set");
        Ok(())
    }

    fn set_cpu_limit(&self, limit: CpuLimit) -> Result<()> {
        write_control(
            self.cpu_path.join("cpu.cfs_quota_us"),
            &limit.quota_us.to_string(),
        )?;
        write_control(
            self.cpu_path.join("cpu.cfs_period_us"),
            &limit.period_us.to_string(),
        )?;
        tracing::debug!(quota_us = limit.quota_us, period_us = limit.period_us, "cpu limit set");
        Ok(())
    }

    fn apply(&self, pid: u32) -> Result<()> {
        let pid_str = pid.to_string();
        write_control(self.memory_path.join("tasks"), &pid_str)?;
        write_control(self.cpu_path.join("tasks"), &pid_str)?;
        tracing::debug!(pid, "process added to cgroup");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        remove_group_dir(&self.memory_path)?;
        remove_group_dir(&self.cpu_path)?;
        tracing::info!("cgroup removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limit_writes_limit_in_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = LegacyHierarchy::new(dir.path(), "mem-test");
        group.create().expect("create");
        group.set_memory_limit(128 * 1024 * 1024).expect("limit");

        let limit =
            std::fs::read_to_string(dir.path().join("memory/mem-test/memory.limit_in_bytes"))
                .expect("read");
        assert_eq!(limit, "134217728");
        let swappiness =
            std::fs::read_to_string(dir.path().join("memory/mem-test/memory.swappiness"))
                .expect("read");
        assert_eq!(swappiness, "0");
    }

    #[test]
    fn cpu_limit_writes_cfs_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = LegacyHierarchy::new(dir.path(), "cpu-test");
        group.create().expect("create");
        group
            .set_cpu_limit(CpuLimit::parse("0.5").expect("parse"))
            .expect("limit");

        let quota = std::fs::read_to_string(dir.path().join("cpu/cpu-test/cpu.cfs_quota_us"))
            .expect("read");
        assert_eq!(quota, "50000");
        let period = std::fs::read_to_string(dir.path().join("cpu/cpu-test/cpu.cfs_period_us"))
            .expect("read");
        assert_eq!(period, "100000");
    }

    #[test]
    fn apply_writes_pid_to_both_tasks_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = LegacyHierarchy::new(dir.path(), "apply-test");
        group.create().expect("create");
        group.apply(99).expect("apply");

        for controller in ["memory", "cpu"] {
            let tasks =
                std::fs::read_to_string(dir.path().join(controller).join("apply-test/tasks"))
                    .expect("read");
            assert_eq!(tasks, "99");
        }
    }

    #[test]
    fn cleanup_removes_both_trees() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = LegacyHierarchy::new(dir.path(), "gone");
        group.create().expect("create");
        group.cleanup().expect("cleanup");

        assert!(!dir.path().join("memory/gone").exists());
        assert!(!dir.path().join("cpu/gone").exists());
    }
}
