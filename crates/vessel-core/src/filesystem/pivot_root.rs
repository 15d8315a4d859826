//! Root filesystem switch executed inside a new mount namespace.
//!
//! The sequence must run in the container's init process, after the mount
//! namespace is created and before the user command is exec'd: a private
//! `/proc` so process listings reflect only the new PID namespace, a
//! recursive self bind-mount of the overlay root (pivot_root demands the
//! new root be a mount point, and the private copy keeps mount events from
//! leaking to the host), the pivot itself with a transient staging
//! directory for the old root, and a tmpfs `/dev` for basic device nodes.

use std::path::Path;

use vessel_common::error::Result;
#[cfg(target_os = "linux")]
use vessel_common::error::VesselError;

/// Name of the transient directory that briefly holds the old root.
pub const PIVOT_STAGING_DIR: &str = ".pivot_root";

/// Performs the full mount setup for a container root.
///
/// Sequence: private `/proc`, recursive self bind of `new_root`,
/// `pivot_root(2)` + staging-dir teardown, tmpfs `/dev`.
///
/// # Errors
///
/// Any failing step is fatal; the caller must exit nonzero.
#[cfg(target_os = "linux")]
pub fn setup_rootfs(new_root: &Path) -> Result<()> {
    mount_proc()?;
    bind_root(new_root)?;
    pivot_into(new_root)?;
    mount_dev()?;
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn setup_rootfs(_new_root: &Path) -> Result<()> {
    Err(vessel_common::error::VesselError::config(
        "Linux required for native container operations",
    ))
}

/// Mounts a private `/proc` with `MS_NODEV | MS_NOEXEC | MS_NOSUID`.
#[cfg(target_os = "linux")]
fn mount_proc() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let target = Path::new("/proc");
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID,
        None::<&str>,
    )
    .map_err(|e| VesselError::Mount {
        target: target.to_path_buf(),
        source: e,
    })
}

/// Bind-mounts the new root onto itself recursively.
///
/// `pivot_root(2)` requires the new root to be a mount point; the
/// recursive bind also gives this namespace a private copy of the subtree
/// so later mounts and unmounts stay invisible to the host.
#[cfg(target_os = "linux")]
fn bind_root(root: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some(root),
        root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| VesselError::Mount {
        target: root.to_path_buf(),
        source: e,
    })
}

/// Pivots into `root`, then detaches and removes the staging directory
/// that briefly holds the old root.
#[cfg(target_os = "linux")]
fn pivot_into(root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};
    use nix::unistd::{chdir, pivot_root};

    let staging = root.join(PIVOT_STAGING_DIR);
    std::fs::create_dir_all(&staging).map_err(|e| VesselError::io(staging.clone(), e))?;

    pivot_root(root, &staging).map_err(|e| VesselError::Syscall {
        op: "pivot_root",
        source: e,
    })?;
    chdir("/").map_err(|e| VesselError::Syscall {
        op: "chdir",
        source: e,
    })?;

    // The old root now hangs off the staging dir inside the new root.
    let old_root = Path::new("/").join(PIVOT_STAGING_DIR);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| VesselError::Mount {
        target: old_root.clone(),
        source: e,
    })?;
    std::fs::remove_dir(&old_root).map_err(|e| VesselError::io(old_root, e))?;

    tracing::debug!(root = %root.display(), "pivoted into container root");
    Ok(())
}

/// Mounts a tmpfs at `/dev` (`MS_NOSUID | MS_STRICTATIME`, mode 0755) so
/// the container can populate basic device nodes.
#[cfg(target_os = "linux")]
fn mount_dev() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let target = Path::new("/dev");
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| VesselError::Mount {
        target: target.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_dir_is_hidden() {
        // A dot-prefixed name keeps the transient directory out of casual
        // listings inside the container.
        assert!(PIVOT_STAGING_DIR.starts_with('.'));
    }
}
