//! Resolved filesystem layout for a runtime instance.
//!
//! Constructed once at process start and passed by reference to every
//! component that needs it, so tests can point the whole runtime at a
//! temporary directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Derived locations for all on-disk runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimePaths {
    /// Base directory for all vessel data.
    pub data_dir: PathBuf,
}

impl RuntimePaths {
    /// Creates a layout rooted at the given data directory.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root of the per-container record directories.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join("containers")
    }

    /// Directory of one container's record, log, and overlay layers.
    #[must_use]
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.containers_dir().join(id)
    }

    /// Root of the image archives and extracted base layers.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Extracted read-only base layer for an image.
    #[must_use]
    pub fn image_base_dir(&self, image: &str) -> PathBuf {
        self.images_dir().join(image)
    }

    /// Archive the base layer is extracted from.
    ///
    /// Prefers `<image>.tar.gz`, falling back to `<image>.tar` when the
    /// compressed form does not exist.
    #[must_use]
    pub fn image_archive(&self, image: &str) -> PathBuf {
        let gz = self.images_dir().join(format!("{image}.tar.gz"));
        if gz.exists() {
            gz
        } else {
            self.images_dir().join(format!("{image}.tar"))
        }
    }

    /// Root directory of the file-backed KV store.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self::new(crate::constants::data_dir().as_path())
    }
}

impl AsRef<Path> for RuntimePaths {
    fn as_ref(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_nest_under_data_dir() {
        let paths = RuntimePaths::new("/tmp/vessel-test");
        assert_eq!(
            paths.container_dir("abc"),
            PathBuf::from("/tmp/vessel-test/containers/abc")
        );
        assert_eq!(
            paths.image_base_dir("busybox"),
            PathBuf::from("/tmp/vessel-test/images/busybox")
        );
        assert_eq!(paths.store_dir(), PathBuf::from("/tmp/vessel-test/db"));
    }

    #[test]
    fn image_archive_falls_back_to_plain_tar() {
        let paths = RuntimePaths::new("/nonexistent");
        let archive = paths.image_archive("busybox");
        assert_eq!(
            archive,
            PathBuf::from("/nonexistent/images/busybox.tar")
        );
    }
}
