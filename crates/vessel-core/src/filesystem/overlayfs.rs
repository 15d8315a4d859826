//! Overlay filesystem management for layered container roots.
//!
//! Merges a shared read-only base layer with a per-container writable
//! upper layer, so containers never mutate the base image.

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

/// Layout of one container's overlay mount.
#[derive(Debug, Clone)]
pub struct OverlayFs {
    /// Read-only base layer shared between containers of one image.
    pub lower_dir: PathBuf,
    /// Writable delta layer.
    pub upper_dir: PathBuf,
    /// Scratch directory required by the overlay driver.
    pub work_dir: PathBuf,
    /// Merged mount point the container pivots into.
    pub merged_dir: PathBuf,
}

impl OverlayFs {
    /// Derives the overlay layout for a container: the upper, work, and
    /// merged directories live under the container's own directory, the
    /// lower layer is the image base.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, container_dir: &Path) -> Self {
        Self {
            lower_dir: base_dir.into(),
            upper_dir: container_dir.join("upper"),
            work_dir: container_dir.join("work"),
            merged_dir: container_dir.join("merged"),
        }
    }

    /// Builds and mounts the overlay.
    ///
    /// Extracts `archive` into the lower dir if it has not been extracted
    /// before (subsequent calls skip extraction), creates the upper, work,
    /// and merged directories, then issues the overlay `mount(2)`.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Io`] if extraction or directory creation
    /// fails and [`VesselError::Mount`] if the union mount syscall fails;
    /// both are fatal to container start.
    pub fn create(&self, archive: &Path) -> Result<()> {
        if !self.lower_dir.is_dir() {
            extract_archive(archive, &self.lower_dir)?;
        }

        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            std::fs::create_dir_all(dir).map_err(|e| VesselError::io(dir.clone(), e))?;
        }

        self.mount()
    }

    #[cfg(target_os = "linux")]
    fn mount(&self) -> Result<()> {
        use nix::mount::{MsFlags, mount};

        let opts = format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        );

        mount(
            Some("overlay"),
            &self.merged_dir,
            Some("overlay"),
            MsFlags::empty(),
            Some(opts.as_str()),
        )
        .map_err(|e| VesselError::Mount {
            target: self.merged_dir.clone(),
            source: e,
        })?;

        tracing::info!(merged = %self.merged_dir.display(), "overlay mounted");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn mount(&self) -> Result<()> {
        Err(VesselError::config(
            "Linux required for native container operations",
        ))
    }

    /// Unmounts the overlay and removes the upper and work directories.
    ///
    /// Best-effort: this runs after the container has already exited, so
    /// failures (including unmounting an already-unmounted target) are
    /// logged and never escalated.
    pub fn unmount(&self) {
        #[cfg(target_os = "linux")]
        if let Err(e) = nix::mount::umount2(&self.merged_dir, nix::mount::MntFlags::MNT_DETACH) {
            tracing::warn!(
                target = %self.merged_dir.display(),
                error = %e,
                "overlay unmount failed"
            );
        }

        for dir in [&self.upper_dir, &self.work_dir] {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "layer removal failed");
                }
            }
        }
        tracing::debug!(merged = %self.merged_dir.display(), "overlay torn down");
    }
}

/// Extracts a `.tar` or gzip-compressed `.tar.gz`/`.tgz` archive into
/// `target`.
fn extract_archive(archive: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        archive = %archive.display(),
        target = %target.display(),
        "extracting base layer"
    );

    std::fs::create_dir_all(target).map_err(|e| VesselError::io(target.to_path_buf(), e))?;

    let file =
        std::fs::File::open(archive).map_err(|e| VesselError::io(archive.to_path_buf(), e))?;

    if is_gzip_archive(archive) {
        let decoder = flate2::read::GzDecoder::new(file);
        tar::Archive::new(decoder)
            .unpack(target)
            .map_err(|e| VesselError::io(target.to_path_buf(), e))
    } else {
        tar::Archive::new(file)
            .unpack(target)
            .map_err(|e| VesselError::io(target.to_path_buf(), e))
    }
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tar(dir: &Path) -> PathBuf {
        let tar_path = dir.join("base.tar");
        let file = std::fs::File::create(&tar_path).expect("create tar");
        let mut builder = tar::Builder::new(file);
        let data = b"#!/bin/sh\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/sh", &data[..])
            .expect("append");
        builder.finish().expect("finish");
        tar_path
    }

    #[test]
    fn layout_nests_layers_under_container_dir() {
        let fs = OverlayFs::new("/images/busybox", Path::new("/containers/abc"));
        assert_eq!(fs.lower_dir, PathBuf::from("/images/busybox"));
        assert_eq!(fs.upper_dir, PathBuf::from("/containers/abc/upper"));
        assert_eq!(fs.work_dir, PathBuf::from("/containers/abc/work"));
        assert_eq!(fs.merged_dir, PathBuf::from("/containers/abc/merged"));
    }

    #[test]
    fn extraction_skipped_when_base_already_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_path = create_test_tar(dir.path());
        let lower = dir.path().join("base");

        extract_archive(&tar_path, &lower).expect("extract");
        assert!(lower.join("bin/sh").exists());

        // Plant a marker; a second create must not re-extract over it.
        std::fs::write(lower.join("marker"), b"kept").expect("marker");
        let fs = OverlayFs::new(&lower, &dir.path().join("c1"));
        // The mount itself needs privileges; only verify the extraction
        // guard by checking the marker survives the lower-dir check.
        let _ = fs.create(&tar_path);
        fs.unmount();
        let marker = std::fs::read_to_string(lower.join("marker")).expect("read marker");
        assert_eq!(marker, "kept");
    }

    #[test]
    fn extract_missing_archive_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = extract_archive(&dir.path().join("missing.tar"), &dir.path().join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn unmount_of_unmounted_overlay_does_not_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = OverlayFs::new(dir.path().join("base"), &dir.path().join("c1"));
        fs.unmount();
        fs.unmount();
    }

    #[test]
    fn gzip_detection_by_extension() {
        assert!(is_gzip_archive(Path::new("busybox.tar.gz")));
        assert!(is_gzip_archive(Path::new("busybox.tgz")));
        assert!(!is_gzip_archive(Path::new("busybox.tar")));
    }
}
