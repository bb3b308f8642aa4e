use crate::config::{OutboundConfig, OutboundType};
use crate::dns::DnsResolver;
use crate::error::{ProxyError, Result};
use crate::protocols::{BlockOutbound, DirectOutbound, Outbound};
use log::{debug, info};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Default)]
struct Registry {
    /// Outbounds in registration order; tags are unique
    outbounds: Vec<Arc<dyn Outbound>>,
    /// Explicit default tag, if any
    default_tag: Option<String>,
}

impl Registry {
    fn position(&self, tag: &str) -> Option<usize> {
        self.outbounds.iter().position(|o| o.tag() == tag)
    }

    fn default(&self) -> Option<&Arc<dyn Outbound>> {
        match &self.default_tag {
            Some(tag) => self.position(tag).map(|i| &self.outbounds[i]),
            None => self.outbounds.first(),
        }
    }
}

/// Ordered registry of outbounds with one default
///
/// The lock is only held for lookups; dials run on a cloned `Arc`.
#[derive(Default)]
pub struct OutboundManager {
    registry: RwLock<Registry>,
}

impl OutboundManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(
        configs: &[OutboundConfig],
        default_tag: Option<&str>,
        resolver: Arc<DnsResolver>,
    ) -> Result<Self> {
        let manager = Self::new();
        for cfg in configs {
            if manager.contains(&cfg.tag) {
                return Err(ProxyError::Config(format!("Duplicate outbound tag: {}", cfg.tag)));
            }
            let outbound: Arc<dyn Outbound> = match &cfg.kind {
                OutboundType::Direct { connect_timeout_secs, .. } => Arc::new(
                    DirectOutbound::new(cfg.tag.clone(), resolver.clone())
                        .with_traffic_mark(cfg.traffic_mark())
                        .with_connect_timeout(Duration::from_secs(*connect_timeout_secs)),
                ),
                OutboundType::Block => Arc::new(BlockOutbound::new(cfg.tag.clone())),
            };
            manager.register(outbound);
        }
        if let Some(tag) = default_tag {
            manager.set_default(tag)?;
        }
        Ok(manager)
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an outbound. An existing outbound with the same tag is replaced in place.
    pub fn register(&self, outbound: Arc<dyn Outbound>) {
        let mut registry = self.write();
        match registry.position(outbound.tag()) {
            Some(i) => {
                info!("Replacing outbound: {} (type: {})", outbound.tag(), outbound.outbound_type());
                registry.outbounds[i] = outbound;
            }
            None => {
                info!("Adding outbound: {} (type: {})", outbound.tag(), outbound.outbound_type());
                registry.outbounds.push(outbound);
            }
        }
    }

    /// Remove an outbound by tag. Removing the explicit default clears it.
    pub fn remove(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        let mut registry = self.write();
        let index = registry.position(tag)?;
        if registry.default_tag.as_deref() == Some(tag) {
            debug!("Default outbound {} removed, falling back to first", tag);
            registry.default_tag = None;
        }
        info!("Removing outbound: {}", tag);
        Some(registry.outbounds.remove(index))
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        let registry = self.read();
        registry.position(tag).map(|i| registry.outbounds[i].clone())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.read().position(tag).is_some()
    }

    /// Mark an existing outbound as the default
    pub fn set_default(&self, tag: &str) -> Result<()> {
        let mut registry = self.write();
        if registry.position(tag).is_none() {
            return Err(ProxyError::OutboundNotFound(tag.to_string()));
        }
        info!("Default outbound: {}", tag);
        registry.default_tag = Some(tag.to_string());
        Ok(())
    }

    /// The default outbound: the explicit default, else the first registered
    pub fn default_outbound(&self) -> Result<Arc<dyn Outbound>> {
        self.read().default().cloned().ok_or(ProxyError::NoDefaultOutbound)
    }

    pub fn default_tag(&self) -> Result<String> {
        self.read()
            .default()
            .map(|o| o.tag().to_string())
            .ok_or(ProxyError::NoDefaultOutbound)
    }

    /// All tags in registration order
    pub fn tags(&self) -> Vec<String> {
        self.read().outbounds.iter().map(|o| o.tag().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().outbounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().outbounds.is_empty()
    }
}
