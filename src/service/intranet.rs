//! Intranet address lookup.

use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// True for RFC 1918 addresses, which is what "intranet" means here.
pub fn is_intranet(ip: Ipv4Addr) -> bool {
    ip.is_private() && !ip.is_loopback()
}

/// First private IPv4 address of this machine's network interfaces.
#[cfg(unix)]
pub fn intranet_ip() -> io::Result<IpAddr> {
    use std::net::SocketAddrV4;

    let interfaces = nix::ifaddrs::getifaddrs().map_err(io::Error::from)?;
    first_intranet(interfaces.filter_map(|ifaddr| {
        let addr = ifaddr.address?;
        let sin = addr.as_sockaddr_in()?;
        Some(*SocketAddrV4::from(*sin).ip())
    }))
    .map(IpAddr::V4)
    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no intranet ipv4 address found"))
}

#[cfg(not(unix))]
pub fn intranet_ip() -> io::Result<IpAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "intranet address lookup is only supported on unix",
    ))
}

fn first_intranet(candidates: impl Iterator<Item = Ipv4Addr>) -> Option<Ipv4Addr> {
    candidates.into_iter().find(|ip| is_intranet(*ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_private_non_loopback_counts() {
        assert!(is_intranet(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(is_intranet(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_intranet(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(!is_intranet(Ipv4Addr::LOCALHOST));
        assert!(!is_intranet(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn picks_first_intranet_candidate() {
        let candidates = vec![
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::new(203, 0, 113, 9),
            Ipv4Addr::new(192, 168, 0, 7),
            Ipv4Addr::new(10, 0, 0, 1),
        ];
        assert_eq!(
            first_intranet(candidates.into_iter()),
            Some(Ipv4Addr::new(192, 168, 0, 7))
        );
        assert_eq!(first_intranet(std::iter::once(Ipv4Addr::LOCALHOST)), None);
    }
}
