use super::Outbound;
use crate::address::{Address, Destination, Network};
use crate::conn::{Connection, UdpConn};
use crate::dns::DnsResolver;
use crate::error::{ProxyError, Result};
use crate::traffic_mark::{connect_marked_tcp, connect_marked_udp, TrafficMarkConfig};
use async_trait::async_trait;
use log::debug;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Dials destinations directly from this host
pub struct DirectOutbound {
    tag: String,
    resolver: Arc<DnsResolver>,
    traffic_mark: TrafficMarkConfig,
    connect_timeout: Duration,
}

impl DirectOutbound {
    pub fn new(tag: impl Into<String>, resolver: Arc<DnsResolver>) -> Self {
        Self {
            tag: tag.into(),
            resolver,
            traffic_mark: TrafficMarkConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_traffic_mark(mut self, traffic_mark: TrafficMarkConfig) -> Self {
        self.traffic_mark = traffic_mark;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Resolve the destination into candidate addresses usable for `network`
    async fn resolve(&self, network: Network, destination: &Destination) -> Result<Vec<SocketAddr>> {
        let ips: Vec<IpAddr> = match &destination.address {
            Address::Domain(domain) => self.resolver.lookup(domain).await?,
            other => other.ip().into_iter().collect(),
        };

        let addrs: Vec<SocketAddr> = ips
            .into_iter()
            .filter(|ip| network.allows(ip))
            .map(|ip| SocketAddr::new(ip, destination.port))
            .collect();

        if addrs.is_empty() {
            return Err(match destination.address {
                Address::Domain(_) => ProxyError::DnsResolution(format!(
                    "No {} address for {}",
                    network, destination
                )),
                _ => ProxyError::InvalidAddress(format!(
                    "{} is not reachable over {}",
                    destination, network
                )),
            });
        }
        Ok(addrs)
    }

    async fn connect(&self, network: Network, addr: SocketAddr) -> Result<Connection> {
        if network.is_stream() {
            let stream = connect_marked_tcp(addr, &self.traffic_mark).await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("[{}] failed to set TCP_NODELAY: {}", self.tag, e);
            }
            Ok(Box::new(stream))
        } else {
            let socket = connect_marked_udp(addr, &self.traffic_mark).await?;
            Ok(Box::new(UdpConn::new(socket, addr)))
        }
    }
}

#[async_trait]
impl Outbound for DirectOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "direct"
    }

    async fn dial(&self, network: Network, destination: &Destination) -> Result<Connection> {
        let addrs = self.resolve(network, destination).await?;

        let mut last_error = None;
        for addr in addrs {
            debug!("[{}] connecting {} {}", self.tag, network, addr);
            match timeout(self.connect_timeout, self.connect(network, addr)).await {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(e)) => {
                    debug!("[{}] connect to {} failed: {}", self.tag, addr, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!("[{}] connect to {} timed out", self.tag, addr);
                    last_error = Some(ProxyError::Timeout);
                }
            }
        }

        // resolve() never returns an empty list
        Err(last_error.unwrap_or(ProxyError::Timeout))
    }
}
