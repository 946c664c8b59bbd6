//! Hue bridge discovery over SSDP
//!
//! The bridge periodically multicasts SSDP NOTIFY datagrams carrying a
//! `hue-bridgeid` header. We join the SSDP group, wait for such an
//! announcement and pull the bridge's IPv4 address out of its text.

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// SSDP multicast group
pub const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// SSDP port
pub const SSDP_PORT: u16 = 1900;
/// Header only Hue bridges put in their announcements
pub const BRIDGE_MARKER: &str = "hue-bridgeid";

const RECV_BUFFER_SIZE: usize = 10240;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to set up discovery socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to receive discovery datagram: {0}")]
    Receive(#[source] std::io::Error),

    #[error("no Hue bridge announced itself ({attempts} attempt(s), {timeout:?} each)")]
    NotFound { attempts: u32, timeout: Duration },
}

/// Where to listen and how long to wait
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Wait per attempt. `None` waits forever.
    pub timeout: Option<Duration>,
    pub attempts: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            group: SSDP_GROUP,
            port: SSDP_PORT,
            timeout: Some(Duration::from_secs(30)),
            attempts: 3,
        }
    }
}

/// Listens for a single Hue bridge announcement.
pub struct BridgeLocator {
    socket: UdpSocket,
    group: Ipv4Addr,
    timeout: Option<Duration>,
    attempts: u32,
}

impl BridgeLocator {
    /// Bind the SSDP port (with address reuse) and join the multicast group.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(settings: &DiscoverySettings) -> Result<Self, DiscoveryError> {
        let socket = bind_reusable(settings.port).map_err(DiscoveryError::Socket)?;
        socket
            .join_multicast_v4(&settings.group, &Ipv4Addr::UNSPECIFIED)
            .map_err(DiscoveryError::Socket)?;
        socket
            .set_nonblocking(true)
            .map_err(DiscoveryError::Socket)?;

        let socket =
            UdpSocket::from_std(std::net::UdpSocket::from(socket)).map_err(DiscoveryError::Socket)?;
        debug!(group = %settings.group, port = settings.port, "Joined SSDP group");

        Ok(Self::from_socket(socket, settings))
    }

    /// Use an already bound socket (no group membership is set up).
    pub fn from_socket(socket: UdpSocket, settings: &DiscoverySettings) -> Self {
        Self {
            socket,
            group: settings.group,
            timeout: settings.timeout,
            attempts: settings.attempts.max(1),
        }
    }

    /// Wait until a bridge announces itself and return its address.
    pub async fn locate(&self) -> Result<Ipv4Addr, DiscoveryError> {
        let Some(timeout) = self.timeout.filter(|t| !t.is_zero()) else {
            return self.listen().await;
        };

        for attempt in 1..=self.attempts {
            match tokio::time::timeout(timeout, self.listen()).await {
                Ok(result) => return result,
                Err(_) => warn!(
                    "No bridge announcement within {:?} (attempt {}/{})",
                    timeout, attempt, self.attempts
                ),
            }
        }

        Err(DiscoveryError::NotFound {
            attempts: self.attempts,
            timeout,
        })
    }

    async fn listen(&self) -> Result<Ipv4Addr, DiscoveryError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(DiscoveryError::Receive)?;

            if let Some(address) = parse_announcement(&buf[..len], self.group) {
                info!(%address, %from, "Found Hue bridge");
                return Ok(address);
            }
        }
    }
}

/// UDP socket on `0.0.0.0:port` that other listeners (a media server, a
/// second huetv) can share.
fn bind_reusable(port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket)
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9]+(?:\.[0-9]+){3}").expect("valid IPv4 pattern"))
}

/// Extract the bridge address from one SSDP datagram.
///
/// Returns `Some` only when the payload carries the bridge marker and
/// exactly one distinct IPv4 address other than `group`.
pub fn parse_announcement(payload: &[u8], group: Ipv4Addr) -> Option<Ipv4Addr> {
    let text = String::from_utf8_lossy(payload);
    if !text.contains(BRIDGE_MARKER) {
        return None;
    }

    let candidates: BTreeSet<Ipv4Addr> = ipv4_pattern()
        .find_iter(&text)
        .filter_map(|m| m.as_str().parse().ok())
        .filter(|addr| *addr != group)
        .collect();

    if candidates.len() == 1 {
        candidates.into_iter().next()
    } else {
        debug!(
            candidates = candidates.len(),
            "Ignoring bridge announcement without a unique address"
        );
        None
    }
}
