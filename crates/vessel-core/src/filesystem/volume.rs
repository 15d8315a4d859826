//! Host-directory bind volumes.
//!
//! Parses `-v hostDir:containerDir` specifications and bind-mounts the
//! host directory into the container's merged root before the container
//! pivots into it.

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

/// A validated `hostDir:containerDir` volume specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Source directory on the host.
    pub host_dir: PathBuf,
    /// Destination path inside the container root.
    pub container_dir: PathBuf,
}

impl VolumeSpec {
    /// Parses a `hostDir:containerDir` string.
    ///
    /// An empty string means "no volume" and yields `None`; this is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns a [`VesselError::Config`] when the spec does not have
    /// exactly two non-empty `:`-separated parts.
    pub fn parse(spec: &str) -> Result<Option<Self>> {
        if spec.is_empty() {
            return Ok(None);
        }
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, container] if !host.is_empty() && !container.is_empty() => Ok(Some(Self {
                host_dir: PathBuf::from(host),
                container_dir: PathBuf::from(container),
            })),
            _ => Err(VesselError::config(format!(
                "invalid volume format {spec:?}, expected hostDir:containerDir"
            ))),
        }
    }

    /// Resolves the mount destination under the container's merged root.
    ///
    /// The container path is treated as root-relative regardless of a
    /// leading slash.
    #[must_use]
    pub fn destination(&self, mount_root: &Path) -> PathBuf {
        let relative = self
            .container_dir
            .strip_prefix("/")
            .unwrap_or(&self.container_dir);
        mount_root.join(relative)
    }

    /// Bind-mounts the host directory into the container root.
    ///
    /// Validates that the host directory exists, creates the destination,
    /// and mounts with `MS_BIND | MS_REC`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host directory is missing, the destination
    /// cannot be created, or the mount syscall fails.
    #[cfg(target_os = "linux")]
    pub fn mount(&self, mount_root: &Path) -> Result<()> {
        use nix::mount::{MsFlags, mount};

        if !self.host_dir.is_dir() {
            return Err(VesselError::config(format!(
                "host dir {} does not exist",
                self.host_dir.display()
            )));
        }

        let dest = self.destination(mount_root);
        std::fs::create_dir_all(&dest).map_err(|e| VesselError::io(dest.clone(), e))?;

        mount(
            Some(&self.host_dir),
            &dest,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| VesselError::Mount {
            target: dest.clone(),
            source: e,
        })?;

        tracing::debug!(
            host = %self.host_dir.display(),
            dest = %dest.display(),
            "volume mounted"
        );
        Ok(())
    }

    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error — bind mounts require Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn mount(&self, _mount_root: &Path) -> Result<()> {
        Err(VesselError::config(
            "Linux required for native container operations",
        ))
    }

    /// Unmounts the bind volume.
    ///
    /// Best-effort: runs during teardown after the container has exited,
    /// so failures are logged and never escalated.
    pub fn unmount(&self, mount_root: &Path) {
        let dest = self.destination(mount_root);
        #[cfg(target_os = "linux")]
        if let Err(e) = nix::mount::umount2(&dest, nix::mount::MntFlags::MNT_DETACH) {
            tracing::warn!(dest = %dest.display(), error = %e, "volume unmount failed");
        }
        #[cfg(not(target_os = "linux"))]
        tracing::warn!(dest = %dest.display(), "volume unmount skipped (non-Linux)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_is_no_volume() {
        assert_eq!(VolumeSpec::parse("").expect("parse"), None);
    }

    #[test]
    fn valid_spec_splits_host_and_container() {
        let spec = VolumeSpec::parse("/data:/mnt/data")
            .expect("parse")
            .expect("some");
        assert_eq!(spec.host_dir, PathBuf::from("/data"));
        assert_eq!(spec.container_dir, PathBuf::from("/mnt/data"));
    }

    #[test]
    fn spec_without_separator_is_rejected() {
        assert!(VolumeSpec::parse("/data").is_err());
    }

    #[test]
    fn spec_with_empty_part_is_rejected() {
        assert!(VolumeSpec::parse(":/mnt").is_err());
        assert!(VolumeSpec::parse("/data:").is_err());
    }

    #[test]
    fn spec_with_extra_separator_is_rejected() {
        assert!(VolumeSpec::parse("/a:/b:/c").is_err());
    }

    #[test]
    fn destination_is_rooted_in_mount_root() {
        let spec = VolumeSpec::parse("/data:/mnt/data")
            .expect("parse")
            .expect("some");
        assert_eq!(
            spec.destination(Path::new("/var/lib/vessel/containers/x/merged")),
            PathBuf::from("/var/lib/vessel/containers/x/merged/mnt/data")
        );
    }

    #[test]
    fn mount_rejects_missing_host_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = VolumeSpec {
            host_dir: dir.path().join("nope"),
            container_dir: PathBuf::from("/mnt"),
        };
        assert!(spec.mount(dir.path()).is_err());
    }
}
