//! Container filesystem management.
//!
//! An overlay mount provides each container with a private copy-on-write
//! root built from a shared read-only base layer; bind volumes map host
//! directories into that root; the pivot sequence swaps the container's
//! root inside its new mount namespace.

pub mod overlayfs;
pub mod pivot_root;
pub mod volume;

pub use overlayfs::OverlayFs;
pub use volume::VolumeSpec;
