//! Cgroup resource management.
//!
//! Two hierarchy layouts exist in the wild: the legacy per-controller
//! hierarchy (separate `memory/` and `cpu/` trees with `tasks` files) and
//! the unified hierarchy (one directory with `cgroup.procs`, `memory.max`,
//! `cpu.max`). The layout is probed once when a [`CgroupManager`] is
//! created; callers only ever see the abstract operations.

mod legacy;
mod unified;

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

pub use legacy::LegacyHierarchy;
pub use unified::UnifiedHierarchy;

/// Fixed CFS scheduling period used for fractional CPU limits, in
/// microseconds (100 ms).
pub const CPU_PERIOD_US: u64 = 100_000;

/// A parsed fractional-CPU limit as a quota/period pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLimit {
    /// Maximum CPU time per period, in microseconds.
    pub quota_us: i64,
    /// Scheduling period, in microseconds.
    pub period_us: u64,
}

impl CpuLimit {
    /// Parses a fractional-CPU specification such as `"1.5"` (1.5 cores)
    /// into a quota/period pair with a fixed 100 ms period.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::InvalidCpuSpec`] if the spec is unparsable
    /// or not strictly positive, and [`VesselError::QuotaOverflow`] if the
    /// computed quota is non-positive.
    pub fn parse(spec: &str) -> Result<Self> {
        let cpus: f64 = spec
            .trim()
            .parse()
            .map_err(|_| VesselError::InvalidCpuSpec { spec: spec.into() })?;
        if !cpus.is_finite() || cpus <= 0.0 {
            return Err(VesselError::InvalidCpuSpec { spec: spec.into() });
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let quota_us = (cpus * CPU_PERIOD_US as f64) as i64;
        if quota_us <= 0 {
            return Err(VesselError::QuotaOverflow { quota: quota_us });
        }

        Ok(Self {
            quota_us,
            period_us: CPU_PERIOD_US,
        })
    }
}

/// Abstract operations over one cgroup hierarchy layout.
pub trait Hierarchy: Send + Sync {
    /// Ensures the control-group directories for this group exist.
    fn create(&self) -> Result<()>;

    /// Writes the memory ceiling and disables swap for the group.
    fn set_memory_limit(&self, limit_bytes: u64) -> Result<()>;

    /// Writes the CPU bandwidth limit for the group.
    fn set_cpu_limit(&self, limit: CpuLimit) -> Result<()>;

    /// Adds a process to the group's membership file(s).
    fn apply(&self, pid: u32) -> Result<()>;

    /// Removes the group directories. Must only run after the member
    /// process has exited; removing an already-removed group is a no-op.
    fn cleanup(&self) -> Result<()>;
}

/// Handle to one container's control group.
///
/// Construction probes which layout the host exposes and is fatal to the
/// launch attempt when the group cannot be created — resource control is
/// never bypassed silently.
pub struct CgroupManager {
    backend: Box<dyn Hierarchy>,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupManager").finish_non_exhaustive()
    }
}

impl CgroupManager {
    /// Creates the control group for `name` under the system cgroup root.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directories cannot be created; the
    /// caller must abort the launch.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_root(Path::new(vessel_common::constants::CGROUP_ROOT), name)
    }

    /// Creates the control group under a custom hierarchy root.
    ///
    /// The unified layout is selected when `<root>/cgroup.controllers`
    /// exists, the legacy layout otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directories cannot be created.
    pub fn with_root(root: &Path, name: &str) -> Result<Self> {
        let backend: Box<dyn Hierarchy> = if root.join("cgroup.controllers").exists() {
            Box::new(UnifiedHierarchy::new(root, name))
        } else {
            Box::new(LegacyHierarchy::new(root, name))
        };
        backend.create()?;
        Ok(Self { backend })
    }

    /// Sets the memory ceiling in bytes and disables swap for the group,
    /// so the limit cannot be circumvented by swapping.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the control files fails.
    pub fn set_memory_limit(&self, limit_bytes: u64) -> Result<()> {
        self.backend.set_memory_limit(limit_bytes)
    }

    /// Sets the CPU bandwidth limit from a fractional-CPU spec string.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid or the control files cannot
    /// be written.
    pub fn set_cpu_limit(&self, spec: &str) -> Result<()> {
        self.backend.set_cpu_limit(CpuLimit::parse(spec)?)
    }

    /// Adds a process to the group.
    ///
    /// Must be called after limit configuration: the kernel enforces
    /// limits from the moment of membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the membership file cannot be written.
    pub fn apply(&self, pid: u32) -> Result<()> {
        self.backend.apply(pid)
    }

    /// Removes the group directories.
    ///
    /// Best-effort: failures are logged and swallowed, because cleanup
    /// runs after the workload has already exited and must not block the
    /// remaining teardown steps.
    pub fn cleanup(&self) {
        if let Err(e) = self.backend.cleanup() {
            tracing::warn!(error = %e, "cgroup cleanup failed");
        }
    }
}

/// Writes a value into a cgroup control file.
pub(crate) fn write_control(path: PathBuf, value: &str) -> Result<()> {
    std::fs::write(&path, value).map_err(|e| VesselError::io(path, e))
}

/// Removes a cgroup directory tree.
///
/// Control files inside a cgroupfs directory cannot be unlinked; only
/// `rmdir` works, applied leaf-first over any child groups. Absent
/// directories are tolerated so double-cleanup stays a no-op.
pub(crate) fn remove_group_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                remove_group_dir(&entry.path())?;
            }
        }
    }
    std::fs::remove_dir(path).map_err(|e| VesselError::io(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_spec_converts_with_fixed_period() {
        let limit = CpuLimit::parse("1.5").expect("parse");
        assert_eq!(limit.quota_us, 150_000);
        assert_eq!(limit.period_us, 100_000);
    }

    #[test]
    fn cpu_spec_whole_core() {
        let limit = CpuLimit::parse("2").expect("parse");
        assert_eq!(limit.quota_us, 200_000);
    }

    #[test]
    fn cpu_spec_zero_is_rejected() {
        assert!(matches!(
            CpuLimit::parse("0"),
            Err(VesselError::InvalidCpuSpec { .. })
        ));
    }

    #[test]
    fn cpu_spec_negative_is_rejected() {
        assert!(matches!(
            CpuLimit::parse("-1"),
            Err(VesselError::InvalidCpuSpec { .. })
        ));
    }

    #[test]
    fn cpu_spec_garbage_is_rejected() {
        assert!(matches!(
            CpuLimit::parse("fast"),
            Err(VesselError::InvalidCpuSpec { .. })
        ));
    }

    #[test]
    fn probe_selects_unified_when_marker_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cgroup.controllers"), "cpu memory").expect("marker");

        let manager = CgroupManager::with_root(dir.path(), "probe-test").expect("create");
        manager.apply(42).expect("apply");
        assert!(dir.path().join("probe-test/cgroup.procs").exists());
    }

    #[test]
    fn probe_selects_legacy_without_marker() {
        let dir = tempfile::tempdir().expect("tempdir");

        let manager = CgroupManager::with_root(dir.path(), "probe-test").expect("create");
        manager.apply(42).expect("apply");
        assert!(dir.path().join("memory/probe-test/tasks").exists());
        assert!(dir.path().join("cpu/probe-test/tasks").exists());
    }

    #[test]
    fn double_cleanup_does_not_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cgroup.controllers"), "cpu memory").expect("marker");

        let manager = CgroupManager::with_root(dir.path(), "twice").expect("create");
        manager.cleanup();
        manager.cleanup();
        assert!(!dir.path().join("twice").exists());
    }
}
