use crate::address::{Destination, Network};
use crate::conn::Connection;
use crate::detour::DetourDialer;
use crate::error::{ProxyError, Result};
use crate::outbound::OutboundManager;
use crate::tracker::{ConnectionMetadata, ConnectionTracker};
use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Dials new connections through the default outbound.
///
/// The default tag is resolved once per dial; a default changed while the
/// dial is in flight does not affect it.
#[derive(Clone)]
pub struct OutboundDispatcher {
    outbounds: Arc<OutboundManager>,
    tracker: Option<Arc<dyn ConnectionTracker>>,
}

impl OutboundDispatcher {
    pub fn new(outbounds: Arc<OutboundManager>, tracker: Option<Arc<dyn ConnectionTracker>>) -> Self {
        Self { outbounds, tracker }
    }

    pub fn outbounds(&self) -> &Arc<OutboundManager> {
        &self.outbounds
    }

    /// Open a connection to `address` (`host:port`) over `network`.
    ///
    /// Dropping the returned future aborts the dial.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection> {
        let network: Network = network.parse()?;
        let destination = Destination::parse(address)?;

        let tag = self.outbounds.default_tag()?;
        let conn = DetourDialer::new(self.outbounds.clone(), tag.as_str())
            .dial(network, &destination)
            .await
            .map_err(|e| {
                debug!("Dial {} {} via {} failed: {}", network, destination, tag, e);
                e
            })?;

        let routed = self.tracker.as_deref().and_then(|t| t.routed());
        match routed {
            Some(routed) => {
                debug!("Tracking {} connection to {} via {}", network, destination, tag);
                Ok(routed.routed_connection(ConnectionMetadata::outbound_only(tag), conn))
            }
            None => Ok(conn),
        }
    }

    /// Like [`dial`](Self::dial), giving up with `Cancelled` once `cancel` fires.
    pub async fn dial_with_cancel(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<Connection> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Dial {} {} cancelled", network, address);
                Err(ProxyError::Cancelled)
            }
            result = self.dial(network, address) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutboundConfig;
    use crate::dns::DnsResolver;
    use crate::protocols::Outbound;
    use crate::stats::StatsTracker;
    use crate::tracker::RoutedConnectionTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    fn outbounds(configs: &[OutboundConfig]) -> Arc<OutboundManager> {
        Arc::new(OutboundManager::from_configs(configs, None, Arc::new(DnsResolver::new())).unwrap())
    }

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut rd, mut wr) = stream.split();
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                });
            }
        });
        addr.to_string()
    }

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    /// Tracker without the routed-connection capability
    struct PlainTracker;

    impl ConnectionTracker for PlainTracker {}

    /// Tracker recording every routed connection it is given
    #[derive(Default)]
    struct RecordingTracker {
        calls: AtomicUsize,
        seen: Mutex<Vec<ConnectionMetadata>>,
    }

    impl RoutedConnectionTracker for RecordingTracker {
        fn routed_connection(&self, metadata: ConnectionMetadata, conn: Connection) -> Connection {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(metadata);
            conn
        }
    }

    impl ConnectionTracker for RecordingTracker {
        fn routed(&self) -> Option<&dyn RoutedConnectionTracker> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn test_dial_reachable() {
        let addr = echo_server().await;
        let dispatcher = OutboundDispatcher::new(outbounds(&[OutboundConfig::direct("direct")]), None);

        let mut conn = dispatcher.dial("tcp", &addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_dial_unreachable() {
        let addr = closed_port().await;
        let dispatcher = OutboundDispatcher::new(outbounds(&[OutboundConfig::direct("direct")]), None);
        assert!(matches!(dispatcher.dial("tcp", &addr).await, Err(ProxyError::Io(_))));
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_input() {
        let dispatcher = OutboundDispatcher::new(outbounds(&[OutboundConfig::direct("direct")]), None);
        assert!(matches!(
            dispatcher.dial("icmp", "127.0.0.1:1").await,
            Err(ProxyError::UnsupportedNetwork(_))
        ));
        assert!(matches!(
            dispatcher.dial("tcp", "127.0.0.1").await,
            Err(ProxyError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_without_outbounds() {
        let dispatcher = OutboundDispatcher::new(Arc::new(OutboundManager::new()), None);
        assert!(matches!(
            dispatcher.dial("tcp", "127.0.0.1:1").await,
            Err(ProxyError::NoDefaultOutbound)
        ));
    }

    #[tokio::test]
    async fn test_dial_uses_default_outbound() {
        let outbounds = outbounds(&[OutboundConfig::direct("direct"), OutboundConfig::block("block")]);
        outbounds.set_default("block").unwrap();
        let dispatcher = OutboundDispatcher::new(outbounds, None);

        let addr = echo_server().await;
        assert!(matches!(
            dispatcher.dial("tcp", &addr).await,
            Err(ProxyError::Blocked(tag)) if tag == "block"
        ));
    }

    #[tokio::test]
    async fn test_tracker_without_capability() {
        let addr = echo_server().await;
        let dispatcher = OutboundDispatcher::new(
            outbounds(&[OutboundConfig::direct("direct")]),
            Some(Arc::new(PlainTracker)),
        );

        let mut conn = dispatcher.dial("tcp", &addr).await.unwrap();
        conn.write_all(b"raw").await.unwrap();
        let mut buf = [0u8; 3];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raw");
    }

    #[tokio::test]
    async fn test_tracker_registers_once() {
        let addr = echo_server().await;
        let tracker = Arc::new(RecordingTracker::default());
        let dispatcher = OutboundDispatcher::new(
            outbounds(&[OutboundConfig::direct("out")]),
            Some(tracker.clone()),
        );

        let _conn = dispatcher.dial("tcp", &addr).await.unwrap();

        assert_eq!(tracker.calls.load(Ordering::SeqCst), 1);
        let seen = tracker.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            ConnectionMetadata {
                inbound: String::new(),
                outbound: "out".to_string(),
                rule: None,
                system: false,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_dial_is_not_tracked() {
        let addr = closed_port().await;
        let tracker = Arc::new(RecordingTracker::default());
        let dispatcher = OutboundDispatcher::new(
            outbounds(&[OutboundConfig::direct("direct")]),
            Some(tracker.clone()),
        );

        assert!(dispatcher.dial("tcp", &addr).await.is_err());
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_tracker_accounts_traffic() {
        let addr = echo_server().await;
        let tracker = Arc::new(StatsTracker::new());
        let dispatcher = OutboundDispatcher::new(
            outbounds(&[OutboundConfig::direct("direct")]),
            Some(tracker.clone()),
        );

        let mut conn = dispatcher.dial("tcp", &addr).await.unwrap();
        assert_eq!(tracker.active_count(), 1);

        conn.write_all(b"12345").await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        drop(conn);

        assert_eq!(tracker.active_count(), 0);
        let traffic = tracker.traffic("direct");
        assert_eq!(traffic.upload, 5);
        assert_eq!(traffic.download, 5);
    }

    /// Outbound that never finishes dialing
    struct StallOutbound;

    #[async_trait]
    impl Outbound for StallOutbound {
        fn tag(&self) -> &str {
            "stall"
        }

        fn outbound_type(&self) -> &str {
            "stall"
        }

        async fn dial(&self, _network: Network, _destination: &Destination) -> Result<Connection> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dial_cancelled() {
        let outbounds = Arc::new(OutboundManager::new());
        outbounds.register(Arc::new(StallOutbound));
        let dispatcher = OutboundDispatcher::new(outbounds, None);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = dispatcher.dial_with_cancel(&cancel, "tcp", "127.0.0.1:80").await;
        assert!(matches!(result, Err(ProxyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_concurrent_dials() {
        let addr = echo_server().await;
        let tracker = Arc::new(StatsTracker::new());
        let dispatcher = OutboundDispatcher::new(
            outbounds(&[OutboundConfig::direct("direct")]),
            Some(tracker.clone()),
        );

        let dials = (0..8).map(|_| dispatcher.dial("tcp", &addr));
        let conns = futures::future::join_all(dials).await;
        assert!(conns.iter().all(|c| c.is_ok()));
        assert_eq!(tracker.active_count(), 8);

        drop(conns);
        assert_eq!(tracker.active_count(), 0);
    }

    /// Outbound that signals `entered` and then holds the dial until `release`
    struct GatedOutbound {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Outbound for GatedOutbound {
        fn tag(&self) -> &str {
            "gated"
        }

        fn outbound_type(&self) -> &str {
            "gated"
        }

        async fn dial(&self, _network: Network, _destination: &Destination) -> Result<Connection> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Box::new(tokio::io::duplex(64).0))
        }
    }

    #[tokio::test]
    async fn test_default_change_mid_dial() {
        let outbounds = outbounds(&[OutboundConfig::block("block")]);
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        outbounds.register(Arc::new(GatedOutbound {
            entered: entered.clone(),
            release: release.clone(),
        }));
        outbounds.set_default("gated").unwrap();

        let tracker = Arc::new(RecordingTracker::default());
        let dispatcher = OutboundDispatcher::new(outbounds.clone(), Some(tracker.clone()));
        let in_flight = dispatcher.clone();
        let dial = tokio::spawn(async move { in_flight.dial("tcp", "127.0.0.1:80").await });

        entered.notified().await;
        outbounds.set_default("block").unwrap();
        assert!(outbounds.remove("gated").is_some());
        release.notify_one();

        assert!(dial.await.unwrap().is_ok());
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.seen.lock().unwrap()[0].outbound, "gated");

        // the next dial sees the new default
        assert!(matches!(
            dispatcher.dial("tcp", "127.0.0.1:80").await,
            Err(ProxyError::Blocked(tag)) if tag == "block"
        ));
    }
}
