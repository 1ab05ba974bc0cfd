#[cfg(test)]
mod addr_test;

use std::net::{IpAddr, SocketAddr};

/// True when both addresses carry the same IP, ignoring the port. Used by
/// foundation assignment, where two candidates from the same base share a
/// foundation whatever ports they were bound to.
pub fn equal_no_port(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.ip() == b.ip()
}

/// RFC 1918 private ranges, IPv6 unique-local, and link-local space.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            // fc00::/7 unique-local
            (seg[0] & 0xfe00) == 0xfc00 || is_link_local(ip)
        }
    }
}

/// 169.254.0.0/16 or fe80::/10.
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// 4 or 6.
pub fn ip_version(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 6,
    }
}
