use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Outbound not found: {0}")]
    OutboundNotFound(String),

    #[error("No default outbound available")]
    NoDefaultOutbound,

    #[error("Connection blocked by outbound {0}")]
    Blocked(String),

    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    #[error("Dial cancelled")]
    Cancelled,

    #[error("Dial timed out")]
    Timeout,

    #[error("Stack shutdown failed: {0}")]
    Shutdown(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
