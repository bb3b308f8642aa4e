use crate::address::{Destination, Network};
use crate::conn::Connection;
use crate::error::{ProxyError, Result};
use crate::outbound::OutboundManager;
use log::debug;
use std::sync::Arc;

/// Dialer bound to an outbound tag rather than to an outbound instance.
///
/// The tag is looked up on every dial, so an outbound replaced in the
/// registry is picked up by the next dial.
#[derive(Clone)]
pub struct DetourDialer {
    outbounds: Arc<OutboundManager>,
    tag: String,
}

impl DetourDialer {
    pub fn new(outbounds: Arc<OutboundManager>, tag: impl Into<String>) -> Self {
        Self {
            outbounds,
            tag: tag.into(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn dial(&self, network: Network, destination: &Destination) -> Result<Connection> {
        let outbound = self
            .outbounds
            .get(&self.tag)
            .ok_or_else(|| ProxyError::OutboundNotFound(self.tag.clone()))?;

        debug!("Dialing {} {} via outbound {}", network, destination, self.tag);
        outbound.dial(network, destination).await
    }
}
