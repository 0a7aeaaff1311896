//! Resolution of the device's current local IPv4 address.

use core::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use std::net::UdpSocket;

use thiserror::Error as ThisError;
use tracing::debug;

/// Rendered in place of an address while the device has no network.
pub const PLACEHOLDER_ADDRESS: &str = "0.0.0.0";

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no network address available")]
    NoNetwork,
}

/// An IPv4 address as shown in the title bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DottedQuad(Ipv4Addr);

impl DottedQuad {
    /// Interprets a little-endian packed address: the low byte is the first octet.
    #[must_use]
    pub const fn from_packed(packed: u32) -> Self {
        let [a, b, c, d] = packed.to_le_bytes();
        Self(Ipv4Addr::new(a, b, c, d))
    }

    /// Inverse of [`Self::from_packed`].
    #[must_use]
    pub const fn pack(addr: Ipv4Addr) -> u32 {
        u32::from_le_bytes(addr.octets())
    }

    #[must_use]
    pub const fn addr(self) -> Ipv4Addr {
        self.0
    }
}

impl fmt::Display for DottedQuad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0.octets();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// The host networking stack.
///
/// Implementations may block; they are only ever called from a blocking worker.
pub trait AddressSource: Send + Sync {
    /// Address of the active interface, little-endian packed, if any.
    fn packed_ipv4(&self) -> Option<u32>;
}

/// Resolves the current address.
///
/// # Errors
///
/// Returns [`IdentityError::NoNetwork`] when the source has no address, or reports `0`.
pub fn current_ipv4(source: &dyn AddressSource) -> Result<DottedQuad, IdentityError> {
    match source.packed_ipv4() {
        None | Some(0) => Err(IdentityError::NoNetwork),
        Some(packed) => Ok(DottedQuad::from_packed(packed)),
    }
}

/// Renders an address result for display, substituting [`PLACEHOLDER_ADDRESS`].
#[must_use]
pub fn display_address(result: Result<DottedQuad, IdentityError>) -> String {
    result.map_or_else(|_| PLACEHOLDER_ADDRESS.to_string(), |quad| quad.to_string())
}

/// Finds the outbound interface address by routing an unconnected UDP socket.
///
/// `connect` on a UDP socket only performs the route lookup; nothing is sent.
/// Targets are tried in order and the first routable one wins. The defaults
/// are a documentation address, which needs a default route, followed by the
/// mDNS group, which only needs a multicast route on the LAN interface. A
/// device with neither reports no address even if an interface is configured.
#[derive(Debug, Clone)]
pub struct RoutedAddressSource {
    pub route_targets: Vec<SocketAddr>,
}

impl Default for RoutedAddressSource {
    fn default() -> Self {
        Self {
            route_targets: vec![
                SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 9)),
                SocketAddr::from((Ipv4Addr::new(224, 0, 0, 251), 5353)),
            ],
        }
    }
}

impl RoutedAddressSource {
    fn local_address_towards(target: SocketAddr) -> Option<u32> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .inspect_err(|e| debug!("Failed to bind address lookup socket: {e}"))
            .ok()?;
        socket
            .connect(target)
            .inspect_err(|e| debug!("No route to {target}: {e}"))
            .ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(addr) if !addr.is_unspecified() => Some(DottedQuad::pack(addr)),
            _ => None,
        }
    }
}

impl AddressSource for RoutedAddressSource {
    fn packed_ipv4(&self) -> Option<u32> {
        self.route_targets
            .iter()
            .find_map(|&target| Self::local_address_towards(target))
    }
}
