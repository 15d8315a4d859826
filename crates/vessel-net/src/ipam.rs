//! Bitmap-based IP address allocation.
//!
//! One '0'/'1' string per subnet, one character per host offset, with
//! index 0 reserved for the bridge address. The whole map is persisted to
//! the KV store after every mutation and loaded lazily once per process;
//! a single mutex serializes all allocations so two requests can never
//! claim the same bit.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use ipnetwork::Ipv4Network;
use vessel_common::constants::{ALLOCATED_IP_KEY, NETWORK_BUCKET};
use vessel_common::error::{Result, VesselError};
use vessel_common::store::KvStore;

/// Smallest prefix length accepted for allocation.
///
/// The bitmap holds one character per host address; below /8 that is
/// more than 16 MiB per subnet.
pub const MIN_PREFIX_LEN: u8 = 8;

#[derive(Debug, Default)]
struct State {
    loaded: bool,
    bitmaps: HashMap<String, String>,
}

/// Subnet-scoped IP allocator backed by the KV store.
///
/// Constructed once at process start and shared by reference; the
/// persisted copy is the source of truth across restarts.
pub struct IpAllocator {
    store: Arc<dyn KvStore>,
    state: Mutex<State>,
}

impl std::fmt::Debug for IpAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpAllocator").finish_non_exhaustive()
    }
}

/// Canonical map key for a subnet: the network base plus prefix.
fn subnet_key(subnet: &Ipv4Network) -> String {
    format!("{}/{}", subnet.network(), subnet.prefix())
}

impl IpAllocator {
    /// Creates an allocator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            state: Mutex::new(State::default()),
        }
    }

    /// Allocates the lowest free address in `subnet`.
    ///
    /// The returned address is the subnet base plus the bit index plus
    /// one, skipping the reserved network address.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::SubnetFull`] when every bit is set, or a
    /// store/serialization error from persisting the updated map.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        if subnet.prefix() < MIN_PREFIX_LEN {
            return Err(VesselError::config(format!(
                "subnet {subnet} is too large to track (minimum prefix /{MIN_PREFIX_LEN})"
            )));
        }

        let key = subnet_key(subnet);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.ensure_loaded(&mut state)?;

        let host_bits = 32 - u32::from(subnet.prefix());
        let size = 1_usize << host_bits;
        let bitmap = state
            .bitmaps
            .entry(key.clone())
            .or_insert_with(|| "0".repeat(size));

        let Some(index) = bitmap.find('0') else {
            return Err(VesselError::SubnetFull { subnet: key });
        };
        bitmap.replace_range(index..=index, "1");

        #[allow(clippy::cast_possible_truncation)]
        let ip = Ipv4Addr::from(u32::from(subnet.network()) + index as u32 + 1);

        self.persist(&state)?;
        tracing::info!(subnet = %key, %ip, "address allocated");
        Ok(ip)
    }

    /// Releases a previously allocated address in `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if the subnet has no bitmap and
    /// [`VesselError::InvalidAddress`] if the address does not map to a
    /// bit inside the subnet's range.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let key = subnet_key(subnet);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.ensure_loaded(&mut state)?;

        let bitmap = state
            .bitmaps
            .get_mut(&key)
            .ok_or_else(|| VesselError::NotFound {
                kind: "subnet",
                id: key.clone(),
            })?;

        // Undo the +1 reserved-address offset applied on allocation.
        let offset = i64::from(u32::from(ip)) - i64::from(u32::from(subnet.network())) - 1;
        if offset < 0 || offset >= bitmap.len() as i64 {
            return Err(VesselError::InvalidAddress {
                address: ip.to_string(),
                subnet: key,
            });
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = offset as usize;
        bitmap.replace_range(index..=index, "0");

        self.persist(&state)?;
        tracing::info!(subnet = %key, %ip, "address released");
        Ok(())
    }

    /// Loads the persisted bitmap map on first use.
    fn ensure_loaded(&self, state: &mut State) -> Result<()> {
        if state.loaded {
            return Ok(());
        }
        if let Some(bytes) = self.store.get(NETWORK_BUCKET, ALLOCATED_IP_KEY)? {
            state.bitmaps = serde_json::from_slice(&bytes)?;
        }
        state.loaded = true;
        Ok(())
    }

    /// Writes the bitmap map back to the store.
    fn persist(&self, state: &State) -> Result<()> {
        let bytes = serde_json::to_vec(&state.bitmaps)?;
        self.store.put(NETWORK_BUCKET, ALLOCATED_IP_KEY, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_common::store::MemoryStore;

    fn allocator() -> IpAllocator {
        IpAllocator::new(Arc::new(MemoryStore::new()))
    }

    fn subnet(s: &str) -> Ipv4Network {
        s.parse().expect("subnet")
    }

    #[test]
    fn first_allocation_is_base_plus_one() {
        let alloc = allocator();
        let ip = alloc.allocate(&subnet("192.168.1.0/24")).expect("allocate");
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn allocation_after_reserved_base_is_dot_two() {
        let alloc = allocator();
        let net = subnet("192.168.1.0/24");
        // The bridge claims index 0 at network creation.
        let bridge = alloc.allocate(&net).expect("bridge address");
        assert_eq!(bridge, Ipv4Addr::new(192, 168, 1, 1));

        let first = alloc.allocate(&net).expect("first container");
        assert_eq!(first, Ipv4Addr::new(192, 168, 1, 2));
    }

    #[test]
    fn allocations_are_distinct_until_full() {
        let alloc = allocator();
        let net = subnet("10.0.0.0/30");

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let ip = alloc.allocate(&net).expect("allocate");
            assert!(seen.insert(ip), "duplicate address {ip}");
        }

        assert!(matches!(
            alloc.allocate(&net),
            Err(VesselError::SubnetFull { .. })
        ));
    }

    #[test]
    fn released_address_is_reusable() {
        let alloc = allocator();
        let net = subnet("10.1.0.0/30");

        for _ in 0..4 {
            let _ = alloc.allocate(&net).expect("allocate");
        }
        alloc
            .release(&net, Ipv4Addr::new(10, 1, 0, 2))
            .expect("release");

        let reused = alloc.allocate(&net).expect("reallocate");
        assert_eq!(reused, Ipv4Addr::new(10, 1, 0, 2));
    }

    #[test]
    fn release_outside_subnet_is_invalid() {
        let alloc = allocator();
        let net = subnet("192.168.5.0/24");
        let _ = alloc.allocate(&net).expect("allocate");

        assert!(matches!(
            alloc.release(&net, Ipv4Addr::new(10, 0, 0, 1)),
            Err(VesselError::InvalidAddress { .. })
        ));
        assert!(matches!(
            alloc.release(&net, Ipv4Addr::new(192, 168, 5, 0)),
            Err(VesselError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn release_on_unknown_subnet_is_not_found() {
        let alloc = allocator();
        assert!(matches!(
            alloc.release(&subnet("172.16.0.0/24"), Ipv4Addr::new(172, 16, 0, 2)),
            Err(VesselError::NotFound { .. })
        ));
    }

    #[test]
    fn huge_subnets_are_rejected() {
        let alloc = allocator();
        assert!(alloc.allocate(&subnet("10.0.0.0/7")).is_err());
    }

    #[test]
    fn state_survives_via_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let net = subnet("192.168.9.0/24");

        let first = IpAllocator::new(Arc::clone(&store));
        let a = first.allocate(&net).expect("allocate");
        let b = first.allocate(&net).expect("allocate");

        // A fresh allocator over the same store must not hand the same
        // addresses out again.
        let second = IpAllocator::new(store);
        let c = second.allocate(&net).expect("allocate");
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn non_base_subnet_notation_normalizes() {
        let alloc = allocator();
        // The same subnet written from a host address maps to one bitmap.
        let a = alloc.allocate(&subnet("192.168.3.0/24")).expect("allocate");
        let b = alloc.allocate(&subnet("192.168.3.7/24")).expect("allocate");
        assert_ne!(a, b);
        assert_eq!(b, Ipv4Addr::new(192, 168, 3, 2));
    }

    #[test]
    fn release_then_exhaust_has_no_false_exhaustion() {
        let alloc = allocator();
        let net = subnet("10.2.0.0/30");
        let ips: Vec<_> = (0..4).map(|_| alloc.allocate(&net).expect("allocate")).collect();
        for ip in &ips {
            alloc.release(&net, *ip).expect("release");
        }
        for _ in 0..4 {
            let _ = alloc.allocate(&net).expect("reallocate after release");
        }
    }
}
