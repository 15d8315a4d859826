//! Raw rtnetlink plumbing for link, address, and route configuration.
//!
//! Speaks the `NETLINK_ROUTE` protocol over a raw netlink socket: create
//! bridge and veth-pair links, attach a link to a bridge, bring links up,
//! assign addresses, install routes, move a link into another network
//! namespace, and delete links. Messages are built with a small
//! byte-level encoder; every request carries `NLM_F_ACK` and the kernel's
//! acknowledgement is checked before returning.

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use vessel_common::error::{Result, VesselError};

// Message types.
const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_NEWROUTE: u16 = 24;
const NLMSG_ERROR: u16 = 2;

// Request flags.
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;

// Link attributes.
const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;
const NLA_F_NESTED: u16 = 1 << 15;

// Address attributes.
const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

// Route attributes and rtmsg constants.
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;
const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

const IFF_UP: u32 = 0x1;

const NLMSG_HDR_LEN: usize = 16;
const IFINFOMSG_LEN: usize = 16;

/// Incremental encoder for one netlink request.
///
/// The 16-byte `nlmsghdr` is reserved up front and patched in
/// [`MsgBuilder::finish`] once the total length is known. Attributes are
/// aligned to 4 bytes as the protocol requires; nested attributes record
/// their start offset and patch their own length when closed.
struct MsgBuilder {
    buf: Vec<u8>,
    msg_type: u16,
    flags: u16,
}

impl MsgBuilder {
    fn new(msg_type: u16, flags: u16) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.resize(NLMSG_HDR_LEN, 0);
        Self {
            buf,
            msg_type,
            flags,
        }
    }

    /// Appends an `ifinfomsg` body (family AF_UNSPEC) for the given
    /// interface index and flags.
    fn ifinfomsg(mut self, index: i32, if_flags: u32, change: u32) -> Self {
        self.buf.push(libc::AF_UNSPEC as u8);
        self.buf.push(0); // padding
        self.buf.extend_from_slice(&0u16.to_ne_bytes()); // ifi_type
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self.buf.extend_from_slice(&if_flags.to_ne_bytes());
        self.buf.extend_from_slice(&change.to_ne_bytes());
        self
    }

    /// Appends an `ifaddrmsg` body for an IPv4 address.
    fn ifaddrmsg(mut self, prefix_len: u8, index: u32) -> Self {
        self.buf.push(libc::AF_INET as u8);
        self.buf.push(prefix_len);
        self.buf.push(0); // ifa_flags
        self.buf.push(0); // ifa_scope
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self
    }

    /// Appends an IPv4 `rtmsg` body with the given destination prefix.
    fn rtmsg(mut self, dst_len: u8) -> Self {
        self.buf.extend_from_slice(&[
            libc::AF_INET as u8,
            dst_len,
            0, // rtm_src_len
            0, // rtm_tos
            RT_TABLE_MAIN,
            RTPROT_BOOT,
            RT_SCOPE_UNIVERSE,
            RTN_UNICAST,
        ]);
        self.buf.extend_from_slice(&0u32.to_ne_bytes()); // rtm_flags
        self
    }

    fn attr_header(&mut self, attr_type: u16, payload_len: usize) {
        let len = (4 + payload_len) as u16;
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
    }

    fn pad(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    /// Appends a NUL-terminated string attribute.
    fn attr_str(mut self, attr_type: u16, value: &str) -> Self {
        self.attr_header(attr_type, value.len() + 1);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        self.pad();
        self
    }

    /// Appends a u32 attribute.
    fn attr_u32(mut self, attr_type: u16, value: u32) -> Self {
        self.attr_header(attr_type, 4);
        self.buf.extend_from_slice(&value.to_ne_bytes());
        self
    }

    /// Appends a raw-bytes attribute.
    fn attr_bytes(mut self, attr_type: u16, value: &[u8]) -> Self {
        self.attr_header(attr_type, value.len());
        self.buf.extend_from_slice(value);
        self.pad();
        self
    }

    /// Opens a nested attribute, returning the offset to patch on close.
    fn nested_start(&mut self, attr_type: u16) -> usize {
        let start = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf
            .extend_from_slice(&(attr_type | NLA_F_NESTED).to_ne_bytes());
        start
    }

    /// Closes a nested attribute by patching its length field.
    fn nested_end(&mut self, start: usize) {
        let len = (self.buf.len() - start) as u16;
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// Patches the `nlmsghdr` and returns the wire bytes.
    fn finish(mut self, seq: u32) -> Vec<u8> {
        let total = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&total.to_ne_bytes());
        self.buf[4..6].copy_from_slice(&self.msg_type.to_ne_bytes());
        self.buf[6..8].copy_from_slice(&self.flags.to_ne_bytes());
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
        self.buf[12..16].copy_from_slice(&0u32.to_ne_bytes()); // nlmsg_pid
        self.buf
    }
}

/// Handle to a `NETLINK_ROUTE` socket.
///
/// Sockets are bound to the network namespace of the thread that created
/// them, so configuration inside a container namespace needs a handle
/// created inside that namespace.
pub struct NetlinkHandle {
    fd: OwnedFd,
    seq: u32,
}

impl NetlinkHandle {
    /// Creates and binds a new netlink socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    pub fn new() -> Result<Self> {
        use nix::sys::socket::{
            AddressFamily, NetlinkAddr, SockFlag, SockProtocol, SockType, bind, socket,
        };

        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkRoute,
        )
        .map_err(|e| VesselError::Syscall {
            op: "socket(AF_NETLINK)",
            source: e,
        })?;

        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, 0)).map_err(|e| VesselError::Syscall {
            op: "bind(AF_NETLINK)",
            source: e,
        })?;

        Ok(Self { fd, seq: 0 })
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Sends a request and checks the kernel's acknowledgement.
    fn request(&mut self, builder: MsgBuilder) -> Result<()> {
        use nix::sys::socket::{MsgFlags, recv, send};

        let msg = builder.finish(self.next_seq());
        let _ = send(self.fd.as_raw_fd(), &msg, MsgFlags::empty()).map_err(|e| {
            VesselError::Syscall {
                op: "send(AF_NETLINK)",
                source: e,
            }
        })?;

        let mut buf = [0u8; 8192];
        let len = recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::empty()).map_err(|e| {
            VesselError::Syscall {
                op: "recv(AF_NETLINK)",
                source: e,
            }
        })?;

        if len < NLMSG_HDR_LEN + 4 {
            return Err(VesselError::Netlink {
                message: format!("short response ({len} bytes)"),
            });
        }
        let msg_type = u16::from_ne_bytes([buf[4], buf[5]]);
        if msg_type == NLMSG_ERROR {
            // nlmsgerr starts with the (negated) errno.
            let code = i32::from_ne_bytes([buf[16], buf[17], buf[18], buf[19]]);
            if code != 0 {
                return Err(VesselError::Netlink {
                    message: std::io::Error::from_raw_os_error(-code).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Creates a bridge link and returns its interface index.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn create_bridge(&mut self, name: &str) -> Result<u32> {
        let mut builder = MsgBuilder::new(
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        )
        .ifinfomsg(0, 0, 0)
        .attr_str(IFLA_IFNAME, name);
        let info = builder.nested_start(IFLA_LINKINFO);
        builder = builder.attr_str(IFLA_INFO_KIND, "bridge");
        builder.nested_end(info);

        self.request(builder)?;
        tracing::info!(name, "bridge link created");
        link_index(name)
    }

    /// Creates a veth pair with `name` attached to the bridge at
    /// `master_index` and `peer` as the other end.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn create_veth(&mut self, name: &str, peer: &str, master_index: u32) -> Result<()> {
        let mut builder = MsgBuilder::new(
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        )
        .ifinfomsg(0, 0, 0)
        .attr_str(IFLA_IFNAME, name)
        .attr_u32(IFLA_MASTER, master_index);

        let info = builder.nested_start(IFLA_LINKINFO);
        builder = builder.attr_str(IFLA_INFO_KIND, "veth");
        let data = builder.nested_start(IFLA_INFO_DATA);
        let peer_attr = builder.nested_start(VETH_INFO_PEER);
        // The peer is described by its own ifinfomsg followed by attributes.
        builder = builder.ifinfomsg(0, 0, 0).attr_str(IFLA_IFNAME, peer);
        builder.nested_end(peer_attr);
        builder.nested_end(data);
        builder.nested_end(info);

        self.request(builder)?;
        tracing::info!(name, peer, master_index, "veth pair created");
        Ok(())
    }

    /// Brings a link up.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn set_link_up(&mut self, index: u32) -> Result<()> {
        #[allow(clippy::cast_possible_wrap)]
        let builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK).ifinfomsg(
            index as i32,
            IFF_UP,
            IFF_UP,
        );
        self.request(builder)
    }

    /// Moves a link into the network namespace referred to by `ns_fd`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn set_link_netns(&mut self, index: u32, ns_fd: RawFd) -> Result<()> {
        #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
        let builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK)
            .ifinfomsg(index as i32, 0, 0)
            .attr_u32(IFLA_NET_NS_FD, ns_fd as u32);
        self.request(builder)
    }

    /// Assigns an IPv4 address with the given prefix length to a link.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_address(&mut self, index: u32, addr: Ipv4Addr, prefix_len: u8) -> Result<()> {
        let octets = addr.octets();
        let builder = MsgBuilder::new(
            RTM_NEWADDR,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        )
        .ifaddrmsg(prefix_len, index)
        .attr_bytes(IFA_LOCAL, &octets)
        .attr_bytes(IFA_ADDRESS, &octets);
        self.request(builder)?;
        tracing::debug!(index, %addr, prefix_len, "address assigned");
        Ok(())
    }

    /// Installs a default route (`0.0.0.0/0`) via `gateway` on the link.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_default_route(&mut self, index: u32, gateway: Ipv4Addr) -> Result<()> {
        let builder = MsgBuilder::new(RTM_NEWROUTE, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE)
            .rtmsg(0)
            .attr_bytes(RTA_GATEWAY, &gateway.octets())
            .attr_u32(RTA_OIF, index);
        self.request(builder)?;
        tracing::debug!(index, %gateway, "default route installed");
        Ok(())
    }

    /// Deletes a link. Deleting one end of a veth pair removes both.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn delete_link(&mut self, index: u32) -> Result<()> {
        #[allow(clippy::cast_possible_wrap)]
        let builder =
            MsgBuilder::new(RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK).ifinfomsg(index as i32, 0, 0);
        self.request(builder)
    }
}

/// Resolves an interface name to its index.
///
/// # Errors
///
/// Returns [`VesselError::NotFound`] if no interface has that name.
pub fn link_index(name: &str) -> Result<u32> {
    nix::net::if_::if_nametoindex(name).map_err(|_| VesselError::NotFound {
        kind: "interface",
        id: name.to_string(),
    })
}

/// Resolves an interface name to its index, retrying a bounded number of
/// times with a short backoff.
///
/// Newly created or just-moved links can take a moment to become visible;
/// the retry covers that window without hiding real failures.
pub fn link_index_retry(name: &str, attempts: u32) -> Result<u32> {
    let mut last = VesselError::NotFound {
        kind: "interface",
        id: name.to_string(),
    };
    for attempt in 0..attempts {
        match link_index(name) {
            Ok(index) => return Ok(index),
            Err(e) => last = e,
        }
        if attempt + 1 < attempts {
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_padded_to_four_bytes() {
        let builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST).attr_str(IFLA_IFNAME, "br0");
        // 16-byte header + 4-byte attr header + "br0\0" = 24, already aligned.
        assert_eq!(builder.buf.len() % 4, 0);

        let builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST).attr_str(IFLA_IFNAME, "veth0");
        // "veth0\0" is 6 bytes; padding must restore alignment.
        assert_eq!(builder.buf.len() % 4, 0);
    }

    #[test]
    fn attr_length_excludes_padding() {
        let builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST).attr_str(IFLA_IFNAME, "veth0");
        let attr_len = u16::from_ne_bytes([builder.buf[16], builder.buf[17]]);
        // 4-byte attr header + 5 chars + NUL.
        assert_eq!(attr_len, 10);
    }

    #[test]
    fn finish_patches_header_fields() {
        let msg = MsgBuilder::new(RTM_NEWADDR, NLM_F_REQUEST | NLM_F_ACK)
            .ifaddrmsg(24, 7)
            .finish(42);
        assert_eq!(u32::from_ne_bytes([msg[0], msg[1], msg[2], msg[3]]), msg.len() as u32);
        assert_eq!(u16::from_ne_bytes([msg[4], msg[5]]), RTM_NEWADDR);
        assert_eq!(
            u16::from_ne_bytes([msg[6], msg[7]]),
            NLM_F_REQUEST | NLM_F_ACK
        );
        assert_eq!(u32::from_ne_bytes([msg[8], msg[9], msg[10], msg[11]]), 42);
    }

    #[test]
    fn nested_attribute_length_spans_contents() {
        let mut builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST).ifinfomsg(0, 0, 0);
        let start = builder.nested_start(IFLA_LINKINFO);
        builder = builder.attr_str(IFLA_INFO_KIND, "bridge");
        builder.nested_end(start);

        let nla_len = u16::from_ne_bytes([builder.buf[start], builder.buf[start + 1]]);
        let nla_type = u16::from_ne_bytes([builder.buf[start + 2], builder.buf[start + 3]]);
        assert_eq!(nla_type, IFLA_LINKINFO | NLA_F_NESTED);
        // Nested header (4) + kind attr header (4) + "bridge\0" (7) + pad (1).
        assert_eq!(nla_len, 16);
    }

    #[test]
    fn ifinfomsg_is_sixteen_bytes() {
        let builder = MsgBuilder::new(RTM_NEWLINK, NLM_F_REQUEST).ifinfomsg(3, IFF_UP, IFF_UP);
        assert_eq!(builder.buf.len(), NLMSG_HDR_LEN + IFINFOMSG_LEN);
        assert_eq!(
            i32::from_ne_bytes([
                builder.buf[20],
                builder.buf[21],
                builder.buf[22],
                builder.buf[23]
            ]),
            3
        );
    }

    #[test]
    fn loopback_index_resolves() {
        if !cfg!(target_os = "linux") {
            return;
        }
        let index = link_index("lo").expect("lo exists");
        assert!(index > 0);
    }
}
