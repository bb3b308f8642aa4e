use crate::config::DnsConfig;
use crate::error::{ProxyError, Result};
use log::{debug, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use trust_dns_resolver::{
    config::{LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

/// DNS resolver used by outbounds to resolve destinations lazily
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Create a new DNS resolver with default configuration
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        );

        Self { resolver }
    }

    /// Create a resolver from the `[dns]` section of the configuration.
    /// An empty server list falls back to the built-in upstreams.
    pub fn from_config(config: &DnsConfig) -> Result<Self> {
        let resolver_config = if config.servers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut group = NameServerConfigGroup::new();
            for server in &config.servers {
                let addr: SocketAddr = server.parse().map_err(|e| {
                    ProxyError::Config(format!("Invalid DNS server {}: {}", server, e))
                })?;
                group.merge(NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true));
            }
            ResolverConfig::from_parts(None, Vec::new(), group)
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        opts.ip_strategy = if config.enable_ipv6 {
            LookupIpStrategy::Ipv4AndIpv6
        } else {
            LookupIpStrategy::Ipv4Only
        };

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
        })
    }

    /// Resolve a domain name to every address the upstream returned
    pub async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>> {
        debug!("Resolving domain: {}", domain);

        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => {
                let ips: Vec<IpAddr> = lookup.iter().collect();
                if ips.is_empty() {
                    return Err(ProxyError::DnsResolution(format!(
                        "No IP addresses found for {}",
                        domain
                    )));
                }
                debug!("Resolved {} to {:?}", domain, ips);
                Ok(ips)
            }
            Err(e) => {
                warn!("DNS resolution failed for {}: {}", domain, e);
                Err(ProxyError::DnsResolution(e.to_string()))
            }
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_ip_literal_lookup() {
        let resolver = DnsResolver::new();
        let ips = resolver.lookup("127.0.0.1").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn test_from_config_rejects_bad_server() {
        let config = DnsConfig {
            servers: vec!["not-an-address".to_string()],
            ..DnsConfig::default()
        };
        assert!(matches!(
            DnsResolver::from_config(&config),
            Err(ProxyError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_custom_servers() {
        let config = DnsConfig {
            servers: vec!["127.0.0.1:5353".to_string(), "[::1]:53".to_string()],
            timeout_secs: 2,
            enable_ipv6: false,
        };
        assert!(DnsResolver::from_config(&config).is_ok());
    }
}
