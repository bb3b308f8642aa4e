//! Lifecycle of the packet-processing stack behind the tunnel interface.
//!
//! The stack itself is an external collaborator reached through
//! [`NetworkStack`], [`LinkEndpoint`] and [`FlowHandle`]. Each backend gets a
//! [`StackLifecycle`] implementation chosen at startup by [`lifecycle_for`].

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod system;
pub mod userspace;

pub use system::SystemStackLifecycle;
pub use userspace::UserspaceStackAdapter;

/// Packet-processing backend behind the virtual interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackBackend {
    /// Host kernel stack; no embedded engine to tear down
    #[default]
    System,
    /// Embedded user-space stack for all traffic
    Userspace,
    /// Kernel stack for TCP, embedded user-space stack for everything else
    Mixed,
}

impl StackBackend {
    /// Whether this backend embeds the user-space stack
    pub fn embeds_userspace_stack(&self) -> bool {
        matches!(self, StackBackend::Userspace | StackBackend::Mixed)
    }
}

impl fmt::Display for StackBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackBackend::System => write!(f, "system"),
            StackBackend::Userspace => write!(f, "userspace"),
            StackBackend::Mixed => write!(f, "mixed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Running,
    Closing,
    Closed,
}

/// Receiver of inbound packets from a link endpoint
pub trait NetworkDispatcher: Send + Sync {
    fn deliver_packet(&self, packet: &[u8]);
}

/// Link-layer attachment point of the stack (the endpoint under the filter).
pub trait LinkEndpoint: Send + Sync {
    /// Attach a dispatcher, or detach with `None`. Once detached, no further
    /// packets reach the stack; a detach must wait for in-progress deliveries.
    fn attach(&self, dispatcher: Option<Arc<dyn NetworkDispatcher>>);

    fn is_attached(&self) -> bool;
}

/// Cleanup handle of one flow (transport endpoint) still owned by the stack
pub trait FlowHandle: Send {
    /// Forcibly terminate the flow, releasing its resources
    fn abort(&self);
}

/// The running packet-processing engine
pub trait NetworkStack: Send + Sync {
    /// Stop the stack's processing routines and timers
    fn close(&self) -> Result<()>;

    /// Flows whose cleanup is still pending
    fn cleanup_endpoints(&self) -> Vec<Box<dyn FlowHandle>>;
}

/// Shutdown contract every stack backend satisfies.
///
/// `close` is idempotent and may run concurrently with packet delivery and
/// with other `close` callers; teardown happens at most once.
pub trait StackLifecycle: Send + Sync {
    fn backend(&self) -> StackBackend;

    fn state(&self) -> StackState;

    /// Tear the stack down. Only the call that performs the teardown can
    /// return an error; later calls return `Ok(())`.
    fn close(&self) -> Result<()>;
}

/// Pick the lifecycle implementation for `backend`.
///
/// Backends embedding the user-space stack require its link endpoint.
pub fn lifecycle_for(
    backend: StackBackend,
    stack: Box<dyn NetworkStack>,
    endpoint: Option<Arc<dyn LinkEndpoint>>,
) -> Result<Box<dyn StackLifecycle>> {
    if !backend.embeds_userspace_stack() {
        return Ok(Box::new(SystemStackLifecycle::new(stack)));
    }

    let endpoint = endpoint.ok_or_else(|| {
        ProxyError::Config(format!("{} stack requires a link endpoint", backend))
    })?;
    Ok(Box::new(UserspaceStackAdapter::new(backend, stack, endpoint)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleStack;

    impl NetworkStack for IdleStack {
        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn cleanup_endpoints(&self) -> Vec<Box<dyn FlowHandle>> {
            Vec::new()
        }
    }

    struct IdleEndpoint;

    impl LinkEndpoint for IdleEndpoint {
        fn attach(&self, _dispatcher: Option<Arc<dyn NetworkDispatcher>>) {}

        fn is_attached(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_backend_selection() {
        let system = lifecycle_for(StackBackend::System, Box::new(IdleStack), None).unwrap();
        assert_eq!(system.backend(), StackBackend::System);

        let mixed = lifecycle_for(
            StackBackend::Mixed,
            Box::new(IdleStack),
            Some(Arc::new(IdleEndpoint)),
        )
        .unwrap();
        assert_eq!(mixed.backend(), StackBackend::Mixed);
        assert_eq!(mixed.state(), StackState::Running);
    }

    #[test]
    fn test_userspace_requires_endpoint() {
        let result = lifecycle_for(StackBackend::Userspace, Box::new(IdleStack), None);
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_backend_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            stack: StackBackend,
        }
        let parsed: Wrapper = toml::from_str("stack = \"mixed\"").unwrap();
        assert_eq!(parsed.stack, StackBackend::Mixed);
        assert_eq!(StackBackend::Userspace.to_string(), "userspace");
    }
}
