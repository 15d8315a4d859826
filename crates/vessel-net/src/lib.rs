//! # vessel-net
//!
//! Bridge networking for the vessel runtime.
//!
//! A [`manager::NetworkManager`] owns a pluggable [`driver::NetworkDriver`]
//! (today: the Linux bridge), a subnet-scoped bitmap [`ipam::IpAllocator`],
//! raw-rtnetlink link/address/route plumbing, and iptables NAT rules for
//! egress masquerading and published ports. Network-namespace-sensitive
//! configuration runs on a dedicated pinned thread via [`netns`].

pub mod bridge;
pub mod driver;
pub mod ipam;
pub mod manager;
pub mod nat;
pub mod netlink;
pub mod netns;

pub use driver::{Endpoint, Network, NetworkDriver};
pub use ipam::IpAllocator;
pub use manager::{Attachment, NetworkManager};
