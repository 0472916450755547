//! LAN address detection for the startup banner.
//!
//! Connecting a UDP socket sends nothing; it only asks the kernel which
//! local interface would route to the target.  That interface's address is
//! the one other machines on the LAN should use.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Any routable address works; no packet is ever sent to it.
const PROBE_TARGET: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

/// Returns the machine's LAN IPv4 address, or `127.0.0.1` if there is no
/// route off the host.
pub fn detect_lan_ip() -> IpAddr {
    match route_source(PROBE_TARGET) {
        Ok(ip) => ip,
        Err(e) => {
            debug!("LAN address detection failed: {e}; falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Local address the kernel would use to reach `target`.
fn route_source(target: SocketAddr) -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(target)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no interface routes to the probe target",
        ));
    }
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_lan_ip_returns_a_usable_ipv4_address() {
        let ip = detect_lan_ip();

        assert!(ip.is_ipv4());
        assert!(!ip.is_unspecified());
    }

    #[test]
    fn test_route_to_loopback_uses_loopback() {
        let target = SocketAddr::from(([127, 0, 0, 1], 9));

        let ip = route_source(target).expect("loopback is always routable");

        assert!(ip.is_loopback());
    }
}
