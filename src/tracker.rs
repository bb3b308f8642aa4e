//! Connection tracking collaborators.
//!
//! A tracker is handed to the dispatcher as a plain `ConnectionTracker`.
//! Whether it can actually account for routed connections is probed per
//! call through [`ConnectionTracker::routed`]; a tracker that returns `None`
//! leaves connections untouched.

use crate::conn::Connection;
use serde::{Deserialize, Serialize};

/// Routing labels attached to a tracked connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Inbound that accepted the connection; empty for API dials
    pub inbound: String,
    /// Outbound that carries the connection
    pub outbound: String,
    /// Route rule that selected the outbound, if any
    pub rule: Option<String>,
    /// Whether the connection belongs to the client itself rather than a user
    pub system: bool,
}

impl ConnectionMetadata {
    /// Labels for a connection dialed outside any inbound or route rule
    pub fn outbound_only(outbound: impl Into<String>) -> Self {
        Self {
            inbound: String::new(),
            outbound: outbound.into(),
            rule: None,
            system: false,
        }
    }
}

/// Capability: take ownership of a raw connection and return a tracked one.
pub trait RoutedConnectionTracker: Send + Sync {
    fn routed_connection(&self, metadata: ConnectionMetadata, conn: Connection) -> Connection;
}

/// A collaborator interested in dialed connections.
pub trait ConnectionTracker: Send + Sync {
    /// Routed-connection capability, when this tracker has one.
    fn routed(&self) -> Option<&dyn RoutedConnectionTracker> {
        None
    }
}
