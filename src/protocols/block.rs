use super::Outbound;
use crate::address::{Destination, Network};
use crate::conn::Connection;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use log::debug;

pub struct BlockOutbound {
    tag: String,
}

impl BlockOutbound {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

#[async_trait]
impl Outbound for BlockOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "block"
    }

    async fn dial(&self, network: Network, destination: &Destination) -> Result<Connection> {
        debug!("[{}] blocked {} connection to {}", self.tag, network, destination);
        Err(ProxyError::Blocked(self.tag.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_refuses() {
        let outbound = BlockOutbound::new("block");
        let dest = Destination::parse("127.0.0.1:80").unwrap();
        let result = outbound.dial(Network::Tcp, &dest).await;
        assert!(matches!(result, Err(ProxyError::Blocked(tag)) if tag == "block"));
    }
}
