use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use crate::error::Result;
use log::debug;

/// Socket marking applied to outbound dials so tunnel traffic does not loop
/// back into the virtual interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficMarkConfig {
    /// Linux SO_MARK value
    pub routing_mark: Option<u32>,
    /// Interface to bind outgoing sockets to (SO_BINDTODEVICE)
    pub bind_interface: Option<String>,
}

impl TrafficMarkConfig {
    pub fn new(routing_mark: Option<u32>, bind_interface: Option<String>) -> Self {
        Self {
            routing_mark,
            bind_interface,
        }
    }

    /// Create config with Linux SO_MARK only
    pub fn with_routing_mark(mark: u32) -> Self {
        Self {
            routing_mark: Some(mark),
            bind_interface: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routing_mark.is_none() && self.bind_interface.is_none()
    }
}

/// Apply traffic marking to a socket
pub fn apply_traffic_mark(socket: &Socket, config: &TrafficMarkConfig) -> Result<()> {
    if let Some(mark) = config.routing_mark {
        platform::apply_routing_mark(socket, mark)?;
    }

    if let Some(interface) = &config.bind_interface {
        platform::bind_interface(socket, interface)?;
    }

    Ok(())
}

fn new_socket(addr: &SocketAddr, ty: Type, protocol: Protocol) -> Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    Ok(Socket::new(domain, ty, Some(protocol))?)
}

/// Open a TCP connection with traffic marking applied before connecting
pub async fn connect_marked_tcp(
    target_addr: SocketAddr,
    config: &TrafficMarkConfig,
) -> Result<TcpStream> {
    if config.is_empty() {
        return Ok(TcpStream::connect(target_addr).await?);
    }

    let socket = new_socket(&target_addr, Type::STREAM, Protocol::TCP)?;
    apply_traffic_mark(&socket, config)?;
    socket.set_nonblocking(true)?;

    let socket = TcpSocket::from_std_stream(socket.into());
    let stream = socket.connect(target_addr).await?;

    debug!("Created marked TCP stream to {}", target_addr);
    Ok(stream)
}

/// Bind a UDP socket with traffic marking applied and connect it to `peer`
pub async fn connect_marked_udp(
    peer: SocketAddr,
    config: &TrafficMarkConfig,
) -> Result<UdpSocket> {
    let local: SocketAddr = match peer {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = new_socket(&peer, Type::DGRAM, Protocol::UDP)?;
    apply_traffic_mark(&socket, config)?;
    socket.bind(&local.into())?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    socket.connect(peer).await?;

    debug!("Created UDP socket to {}", peer);
    Ok(socket)
}

/// Platform-specific traffic marking utilities
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod platform {
    use super::*;

    /// Apply SO_MARK to a socket
    pub fn apply_routing_mark(socket: &Socket, mark: u32) -> Result<()> {
        socket.set_mark(mark)?;
        debug!("Applied SO_MARK {} to socket", mark);
        Ok(())
    }

    /// Bind a socket to a named interface
    pub fn bind_interface(socket: &Socket, interface: &str) -> Result<()> {
        socket.bind_device(Some(interface.as_bytes()))?;
        debug!("Bound socket to interface {}", interface);
        Ok(())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub mod platform {
    use super::*;
    use log::warn;

    /// No-op implementation for unsupported platforms
    pub fn apply_routing_mark(_socket: &Socket, mark: u32) -> Result<()> {
        warn!("SO_MARK not supported on this platform, ignoring mark {}", mark);
        Ok(())
    }

    /// No-op implementation for unsupported platforms
    pub fn bind_interface(_socket: &Socket, interface: &str) -> Result<()> {
        warn!("Interface binding not supported on this platform, ignoring {}", interface);
        Ok(())
    }
}
