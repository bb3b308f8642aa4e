use crate::error::{ProxyError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(String),
}

impl Address {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::V4(ip) => Some(IpAddr::V4(*ip)),
            Address::V6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Address::Domain(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::V4(ip) => write!(f, "{}", ip),
            Address::V6(ip) => write!(f, "[{}]", ip),
            Address::Domain(domain) => f.write_str(domain),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Address::V4(ip),
            IpAddr::V6(ip) => Address::V6(ip),
        }
    }
}

/// A dial target: host plus port, with domain names left unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub address: Address,
    pub port: u16,
}

impl Destination {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    /// Parse `host:port`. IPv6 hosts must be bracketed (`[::1]:443`).
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || ProxyError::InvalidAddress(input.to_string());

        let (host, port) = input.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let address = if let Some(inner) = host.strip_prefix('[') {
            let inner = inner.strip_suffix(']').ok_or_else(invalid)?;
            let ip: Ipv6Addr = inner.parse().map_err(|_| invalid())?;
            Address::V6(ip)
        } else if host.contains(':') {
            // unbracketed IPv6 is ambiguous with the port separator
            return Err(invalid());
        } else if let Ok(ip) = host.parse::<Ipv4Addr>() {
            Address::V4(ip)
        } else {
            // a fully-qualified name keeps meaning the same host without its root dot
            let domain = host.trim_end_matches('.');
            if domain.is_empty() || domain.contains(char::is_whitespace) {
                return Err(invalid());
            }
            Address::Domain(domain.to_string())
        };

        Ok(Self { address, port })
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address.ip().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Destination {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().into(), addr.port())
    }
}

/// Transport requested by the caller, with an optional address family pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    pub fn is_stream(&self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    /// Whether a resolved address is usable for this network.
    pub fn allows(&self, ip: &IpAddr) -> bool {
        match self {
            Network::Tcp4 | Network::Udp4 => ip.is_ipv4(),
            Network::Tcp6 | Network::Udp6 => ip.is_ipv6(),
            Network::Tcp | Network::Udp => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            _ => Err(ProxyError::UnsupportedNetwork(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_destination() {
        let dest = Destination::parse("127.0.0.1:8080").unwrap();
        assert_eq!(dest.address, Address::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(dest.port, 8080);
        assert_eq!(dest.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_bracketed_ipv6_destination() {
        let dest = Destination::parse("[::1]:443").unwrap();
        assert_eq!(dest.address, Address::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(dest.to_string(), "[::1]:443");
    }

    #[test]
    fn test_domain_stays_unresolved() {
        let dest = Destination::parse("example.com.:443").unwrap();
        assert_eq!(dest.address, Address::Domain("example.com".to_string()));
        assert!(dest.socket_addr().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "example.com",
            ":80",
            ".:80",
            "..:80",
            "host:http",
            "::1:80",
            "[::1:80",
            "host:70000",
        ] {
            assert!(Destination::parse(input).is_err(), "accepted {}", input);
        }
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("TCP".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("udp6".parse::<Network>().unwrap(), Network::Udp6);
        assert!(matches!(
            "sctp".parse::<Network>(),
            Err(ProxyError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn test_network_family_filter() {
        let v4: IpAddr = Ipv4Addr::LOCALHOST.into();
        let v6: IpAddr = Ipv6Addr::LOCALHOST.into();
        assert!(Network::Tcp4.allows(&v4));
        assert!(!Network::Tcp4.allows(&v6));
        assert!(Network::Udp.allows(&v6));
    }
}
