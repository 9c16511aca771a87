// Local address discovery for ICE candidates

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::IceConfig;
use crate::error::NegotiationError;

const DEFAULT_STUN_PORT: u16 = 3478;
const STUN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pick the interface address to bind the media socket to
///
/// IPv4 only, loopback excluded. When a VPN (10.x) and a home network
/// (192.168.x) are both up, the VPN wins so STUN sees a routable mapping;
/// otherwise the home network is preferred for LAN peers.
pub fn discover_local_ip() -> Option<IpAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!("Failed to list network interfaces: {}", e);
            return None;
        }
    };

    let mut candidates: Vec<(String, Ipv4Addr)> = interfaces
        .into_iter()
        .filter_map(|iface| match iface.addr.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some((iface.name, ip)),
            _ => None,
        })
        .collect();

    debug!(
        "IPv4 interfaces: {:?}",
        candidates
            .iter()
            .map(|(name, ip)| format!("{}={}", name, ip))
            .collect::<Vec<_>>()
    );

    let has_vpn = candidates.iter().any(|(_, ip)| ip.octets()[0] == 10);
    let has_home = candidates
        .iter()
        .any(|(_, ip)| ip.octets()[0] == 192 && ip.octets()[1] == 168);

    candidates.sort_by_key(|(_, ip)| interface_score(*ip, has_vpn, has_home));

    let (name, ip) = candidates.into_iter().next()?;
    info!("Using interface {} ({}) for media", name, ip);
    Some(IpAddr::V4(ip))
}

fn interface_score(ip: Ipv4Addr, has_vpn: bool, has_home: bool) -> u8 {
    let octets = ip.octets();
    match octets {
        [10, ..] => {
            if has_home {
                0
            } else {
                2
            }
        }
        [192, 168, ..] => {
            if has_vpn {
                1
            } else {
                0
            }
        }
        [172, b, ..] if (16..=31).contains(&b) => 1,
        _ => 3,
    }
}

/// `host:port` of the first STUN entry in the ICE configuration
pub fn stun_server(ice: &IceConfig) -> Option<String> {
    ice.servers
        .iter()
        .flat_map(|server| server.urls.iter())
        .find_map(|url| parse_stun_url(url))
}

/// TURN entries the configuration carries
pub fn turn_servers(ice: &IceConfig) -> Vec<&str> {
    ice.servers
        .iter()
        .flat_map(|server| server.urls.iter())
        .filter(|url| url.starts_with("turn:") || url.starts_with("turns:"))
        .map(String::as_str)
        .collect()
}

fn parse_stun_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("stun:")?;
    // Drop any `?transport=` suffix
    let host_port = rest.split('?').next()?.trim();
    if host_port.is_empty() {
        return None;
    }
    if host_port.rsplit_once(':').map_or(false, |(_, port)| port.parse::<u16>().is_ok()) {
        Some(host_port.to_string())
    } else {
        Some(format!("{}:{}", host_port, DEFAULT_STUN_PORT))
    }
}

/// Ask a STUN server for our public mapping, blocking
///
/// Must run on the same socket ICE uses, or the NAT mapping differs.
pub fn query_stun(socket: &UdpSocket, server: &str) -> Result<SocketAddr, NegotiationError> {
    let stun_addr = server
        .to_socket_addrs()
        .map_err(|e| NegotiationError::Ice(format!("resolve {}: {}", server, e)))?
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| NegotiationError::Ice(format!("{} has no IPv4 address", server)))?;
    debug!("STUN server {} resolved to {}", server, stun_addr);

    socket
        .set_read_timeout(Some(STUN_TIMEOUT))
        .map_err(|e| NegotiationError::Transport(e.to_string()))?;

    let client = stunclient::StunClient::new(stun_addr);
    let public = client
        .query_external_address(socket)
        .map_err(|e| NegotiationError::Ice(format!("stun query failed: {}", e)))?;
    info!("Public address from STUN: {}", public);
    Ok(public)
}
