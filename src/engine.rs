use crate::config::Config;
use crate::conn::Connection;
use crate::dispatcher::OutboundDispatcher;
use crate::dns::DnsResolver;
use crate::error::{ProxyError, Result};
use crate::outbound::OutboundManager;
use crate::stack::{lifecycle_for, LinkEndpoint, NetworkStack, StackBackend, StackLifecycle, StackState};
use crate::stats::StatsTracker;
use crate::tracker::ConnectionTracker;
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// One client instance: the outbound registry, the dispatcher dialing through
/// it and the lifecycle of the tunnel stack, if one is attached.
pub struct Engine {
    backend: StackBackend,
    outbounds: Arc<OutboundManager>,
    dispatcher: OutboundDispatcher,
    stats: Option<Arc<StatsTracker>>,
    stack: Mutex<Option<Box<dyn StackLifecycle>>>,
}

impl Engine {
    /// Build an engine from configuration.
    ///
    /// An explicit `tracker` wins; otherwise a [`StatsTracker`] is created
    /// when `stats.enabled` is set.
    pub fn new(config: &Config, tracker: Option<Arc<dyn ConnectionTracker>>) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(DnsResolver::from_config(&config.dns)?);
        let outbounds = Arc::new(OutboundManager::from_configs(
            &config.outbounds,
            config.default_outbound.as_deref(),
            resolver,
        )?);

        let mut stats = None;
        let tracker = match tracker {
            Some(tracker) => Some(tracker),
            None if config.stats.enabled => {
                let tracker = Arc::new(StatsTracker::new());
                stats = Some(tracker.clone());
                Some(tracker as Arc<dyn ConnectionTracker>)
            }
            None => None,
        };

        info!(
            "Engine ready: {} outbounds, default {}, {} stack",
            outbounds.len(),
            outbounds.default_tag()?,
            config.tun.stack
        );

        Ok(Self {
            backend: config.tun.stack,
            dispatcher: OutboundDispatcher::new(outbounds.clone(), tracker),
            outbounds,
            stats,
            stack: Mutex::new(None),
        })
    }

    pub fn outbounds(&self) -> &Arc<OutboundManager> {
        &self.outbounds
    }

    pub fn dispatcher(&self) -> &OutboundDispatcher {
        &self.dispatcher
    }

    /// The built-in stats tracker, when statistics are enabled by configuration
    pub fn stats(&self) -> Option<&Arc<StatsTracker>> {
        self.stats.as_ref()
    }

    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection> {
        self.dispatcher.dial(network, address).await
    }

    pub async fn dial_with_cancel(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<Connection> {
        self.dispatcher.dial_with_cancel(cancel, network, address).await
    }

    fn lock_stack(&self) -> MutexGuard<'_, Option<Box<dyn StackLifecycle>>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand the running tunnel stack to the engine. The configured backend
    /// decides which lifecycle owns its teardown.
    pub fn attach_stack(
        &self,
        stack: Box<dyn NetworkStack>,
        endpoint: Option<Arc<dyn LinkEndpoint>>,
    ) -> Result<()> {
        let mut current = self.lock_stack();
        if let Some(lifecycle) = current.as_ref() {
            if lifecycle.state() != StackState::Closed {
                return Err(ProxyError::Config(format!(
                    "A {} stack is already attached",
                    lifecycle.backend()
                )));
            }
        }

        *current = Some(lifecycle_for(self.backend, stack, endpoint)?);
        info!("Attached {} stack", self.backend);
        Ok(())
    }

    pub fn stack_state(&self) -> Option<StackState> {
        self.lock_stack().as_ref().map(|l| l.state())
    }

    /// Tear down the attached stack. Safe to call repeatedly, and with no
    /// stack attached.
    pub fn close_stack(&self) -> Result<()> {
        match self.lock_stack().as_ref() {
            Some(lifecycle) => lifecycle.close(),
            None => Ok(()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close_stack() {
            warn!("Failed to close stack on shutdown: {}", e);
        }
    }
}
