pub mod address;
pub mod config;
pub mod conn;
pub mod detour;
pub mod dispatcher;
pub mod dns;
pub mod engine;
pub mod error;
pub mod outbound;
pub mod protocols;
pub mod stack;
pub mod stats;
pub mod tracker;
pub mod traffic_mark;

pub use address::{Address, Destination, Network};
pub use config::{Config, OutboundConfig, OutboundType};
pub use conn::{Connection, ProxyStream, UdpConn};
pub use detour::DetourDialer;
pub use dispatcher::OutboundDispatcher;
pub use engine::Engine;
pub use error::{ProxyError, Result};
pub use outbound::OutboundManager;
pub use protocols::{BlockOutbound, DirectOutbound, Outbound};
pub use stack::{
    lifecycle_for, FlowHandle, LinkEndpoint, NetworkDispatcher, NetworkStack, StackBackend,
    StackLifecycle, StackState, SystemStackLifecycle, UserspaceStackAdapter,
};
pub use stats::{ConnectionInfo, StatsTracker, TrackedConnection, TrafficSnapshot};
pub use tracker::{ConnectionMetadata, ConnectionTracker, RoutedConnectionTracker};
