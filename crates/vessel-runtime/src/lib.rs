//! # vessel-runtime
//!
//! Container lifecycle management for vessel.
//!
//! The [`engine::Engine`] sequences the isolation primitives from
//! `vessel-core` and the networking from `vessel-net` into container
//! operations: run (with the clone + re-exec init handoff in
//! [`launcher`] and [`init`]), stop, remove, exec-into ([`exec`]),
//! listing, and log access ([`logs`]). Container records live as JSON
//! files managed by the [`registry`].

pub mod container;
pub mod engine;
pub mod exec;
pub mod init;
pub mod launcher;
pub mod logs;
pub mod registry;
