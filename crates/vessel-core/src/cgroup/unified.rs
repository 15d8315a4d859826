//! Unified (cgroups v2) hierarchy backend.
//!
//! One directory per group; `cgroup.procs` holds membership, `memory.max`,
//! `memory.swap.max`, and `cpu.max` hold the limits.

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

use super::{CpuLimit, Hierarchy, remove_group_dir, write_control};

/// Group handle in the unified hierarchy.
#[derive(Debug)]
pub struct UnifiedHierarchy {
    path: PathBuf,
}

impl UnifiedHierarchy {
    /// Creates a handle for `name` under the hierarchy root. No directories
    /// are touched until [`Hierarchy::create`] runs.
    #[must_use]
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            path: root.join(name),
        }
    }
}

impl Hierarchy for UnifiedHierarchy {
    fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .map_err(|e| VesselError::io(self.path.clone(), e))?;
        tracing::info!(path = %self.path.display(), "cgroup created (unified)");
        Ok(())
    }

    fn set_memory_limit(&self, limit_bytes: u64) -> Result<()> {
        write_control(self.path.join("memory.max"), &limit_bytes.to_string())?;
        // Swap would let the workload exceed the ceiling.
        write_control(self.path.join("memory.swap.max"), "0")?;
        tracing::debug!(limit_bytes, "memory limit set");
        Ok(())
    }

    fn set_cpu_limit(&self, limit: CpuLimit) -> Result<()> {
        let value = format!("{} {}", limit.quota_us, limit.period_us);
        write_control(self.path.join("cpu.max"), &value)?;
        tracing::debug!(quota_us = limit.quota_us, period_us = limit.period_us, "cpu limit set");
        Ok(())
    }

    fn apply(&self, pid: u32) -> Result<()> {
        write_control(self.path.join("cgroup.procs"), &pid.to_string())?;
        tracing::debug!(pid, "process added to cgroup");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        remove_group_dir(&self.path)?;
        tracing::info!(path = %self.path.display(), "cgroup removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limit_writes_max_and_disables_swap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = UnifiedHierarchy::new(dir.path(), "mem-test");
        group.create().expect("create");
        group.set_memory_limit(64 * 1024 * 1024).expect("limit");

        let max = std::fs::read_to_string(dir.path().join("mem-test/memory.max")).expect("read");
        assert_eq!(max, "67108864");
        let swap =
            std::fs::read_to_string(dir.path().join("mem-test/memory.swap.max")).expect("read");
        assert_eq!(swap, "0");
    }

    #[test]
    fn cpu_limit_writes_quota_and_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = UnifiedHierarchy::new(dir.path(), "cpu-test");
        group.create().expect("create");
        group
            .set_cpu_limit(CpuLimit::parse("1.5").expect("parse"))
            .expect("limit");

        let max = std::fs::read_to_string(dir.path().join("cpu-test/cpu.max")).expect("read");
        assert_eq!(max, "150000 100000");
    }

    #[test]
    fn apply_writes_pid_to_procs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = UnifiedHierarchy::new(dir.path(), "apply-test");
        group.create().expect("create");
        group.apply(1234).expect("apply");

        let procs =
            std::fs::read_to_string(dir.path().join("apply-test/cgroup.procs")).expect("read");
        assert_eq!(procs, "1234");
    }

    #[test]
    fn cleanup_of_absent_group_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = UnifiedHierarchy::new(dir.path(), "never-created");
        group.cleanup().expect("cleanup");
    }
}
