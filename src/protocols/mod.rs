// Outbound transports: every protocol able to carry a dialed connection
use async_trait::async_trait;
use crate::address::{Destination, Network};
use crate::conn::Connection;
use crate::error::Result;

/// Outbound transport trait
///
/// Implementations own their dial policy (resolution, timeouts, retries).
/// Callers only see the connection or the error.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Unique tag of this outbound in the registry
    fn tag(&self) -> &str;

    /// Protocol name, for logging
    fn outbound_type(&self) -> &str;

    /// Open a connection to `destination` over `network`
    async fn dial(&self, network: Network, destination: &Destination) -> Result<Connection>;
}

pub mod block;
pub mod direct;

pub use block::BlockOutbound;
pub use direct::DirectOutbound;
