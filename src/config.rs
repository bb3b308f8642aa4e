use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use crate::error::{ProxyError, Result};
use crate::stack::StackBackend;
use crate::traffic_mark::TrafficMarkConfig;
use log::info;

/// Configuration for the tunnel client core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// DNS configuration used for lazy destination resolution
    #[serde(default)]
    pub dns: DnsConfig,
    /// Tag of the outbound used when no route decides otherwise.
    /// Falls back to the first outbound when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_outbound: Option<String>,
    /// Outbound configurations, in registration order
    pub outbounds: Vec<OutboundConfig>,
    /// Tunnel interface configuration
    #[serde(default)]
    pub tun: TunConfig,
    /// Connection statistics configuration
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

/// DNS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS servers to use (`ip:port`); empty uses the resolver defaults
    pub servers: Vec<String>,
    /// DNS timeout
    pub timeout_secs: u64,
    /// Enable IPv6 resolution
    pub enable_ipv6: bool,
}

/// Tunnel interface configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunConfig {
    /// Packet-processing backend behind the virtual interface
    #[serde(default)]
    pub stack: StackBackend,
}

/// Connection statistics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Track dialed connections and per-outbound traffic
    #[serde(default)]
    pub enabled: bool,
    /// Serve Prometheus metrics on this address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_listen: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            dns: DnsConfig::default(),
            default_outbound: None,
            outbounds: vec![OutboundConfig::direct("direct")],
            tun: TunConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            timeout_secs: 5,
            enable_ipv6: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundType {
    Direct {
        /// SO_MARK applied to outgoing sockets
        #[serde(default, skip_serializing_if = "Option::is_none")]
        routing_mark: Option<u32>,
        /// Interface outgoing sockets are bound to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bind_interface: Option<String>,
        /// Per-address connect timeout
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
    },
    Block,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundConfig {
    pub tag: String,
    #[serde(flatten)]
    pub kind: OutboundType,
}

impl OutboundConfig {
    pub fn direct(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            kind: OutboundType::Direct {
                routing_mark: None,
                bind_interface: None,
                connect_timeout_secs: default_connect_timeout_secs(),
            },
        }
    }

    pub fn block(tag: &str) -> Self {
        Self { tag: tag.to_string(), kind: OutboundType::Block }
    }

    /// Socket marking for direct outbounds
    pub fn traffic_mark(&self) -> TrafficMarkConfig {
        match &self.kind {
            OutboundType::Direct { routing_mark, bind_interface, .. } => {
                TrafficMarkConfig::new(*routing_mark, bind_interface.clone())
            }
            OutboundType::Block => TrafficMarkConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Configuration loaded from file");
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ProxyError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)?;

        info!("Configuration saved to file");
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ProxyError::Config(format!("Invalid log level: {}", other)));
            }
        }

        if self.outbounds.is_empty() {
            return Err(ProxyError::Config(
                "At least one outbound must be configured".to_string(),
            ));
        }

        if self.dns.timeout_secs == 0 {
            return Err(ProxyError::Config("DNS timeout must be positive".to_string()));
        }

        let mut tags = HashSet::new();
        for outbound in &self.outbounds {
            if outbound.tag.is_empty() {
                return Err(ProxyError::Config("Outbound tag must not be empty".to_string()));
            }
            if let OutboundType::Direct { connect_timeout_secs: 0, .. } = outbound.kind {
                return Err(ProxyError::Config(format!(
                    "Connect timeout of outbound {} must be positive",
                    outbound.tag
                )));
            }
            if !tags.insert(outbound.tag.as_str()) {
                return Err(ProxyError::Config(format!(
                    "Duplicate outbound tag: {}",
                    outbound.tag
                )));
            }
        }

        if let Some(default) = &self.default_outbound {
            if !tags.contains(default.as_str()) {
                return Err(ProxyError::Config(format!(
                    "Default outbound {} is not configured",
                    default
                )));
            }
        }

        Ok(())
    }
}
