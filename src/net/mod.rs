use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use self::error::Error;

pub mod error;
pub mod link;
pub mod wire;

pub const DEFAULT_PORT: u16 = 1337;

/// Converts an IP address and port to a socket address.
pub fn ip_addr_to_socket_addr(ip: IpAddr, port: u16) -> SocketAddr {
    match ip {
        IpAddr::V4(ip) => SocketAddr::from((ip, port)),
        IpAddr::V6(ip) => SocketAddr::from((ip, port)),
    }
}

/// Resolves a host name or literal address. IPv4 results are preferred, the
/// first IPv6 result is used only when the host has no IPv4 address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip_addr_to_socket_addr(ip, port));
    }
    let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| Error::Unresolvable(format!("{host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_literals_without_lookup() {
        let addr = resolve("127.0.0.1", 9).await.unwrap();
        assert_eq!(addr, "127.0.0.1:9".parse().unwrap());
        let addr = resolve("::1", 9).await.unwrap();
        assert_eq!(addr, "[::1]:9".parse().unwrap());
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let addr = resolve("localhost", DEFAULT_PORT).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), DEFAULT_PORT);
    }
}
