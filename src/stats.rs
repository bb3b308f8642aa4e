//! Per-outbound traffic accounting and active connection listing.

use crate::conn::Connection;
use crate::tracker::{ConnectionMetadata, ConnectionTracker, RoutedConnectionTracker};
use log::debug;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[derive(Debug, Default)]
struct TrafficCounter {
    upload: AtomicU64,
    download: AtomicU64,
}

impl TrafficCounter {
    fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            upload: self.upload.load(Ordering::Relaxed),
            download: self.download.load(Ordering::Relaxed),
        }
    }

    fn take(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            upload: self.upload.swap(0, Ordering::Relaxed),
            download: self.download.swap(0, Ordering::Relaxed),
        }
    }
}

/// Byte totals in both directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub upload: u64,
    pub download: u64,
}

/// One active tracked connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    #[serde(flatten)]
    pub metadata: ConnectionMetadata,
    /// Unix timestamp (seconds) of when tracking started
    pub created_at: u64,
    #[serde(flatten)]
    pub traffic: TrafficSnapshot,
}

struct ActiveEntry {
    metadata: ConnectionMetadata,
    counter: Arc<TrafficCounter>,
    created_at: u64,
}

#[derive(Default)]
struct StatsInner {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, ActiveEntry>>,
    outbound_traffic: Mutex<HashMap<String, Arc<TrafficCounter>>>,
}

impl StatsInner {
    fn active(&self) -> MutexGuard<'_, HashMap<u64, ActiveEntry>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbound_traffic(&self) -> MutexGuard<'_, HashMap<String, Arc<TrafficCounter>>> {
        self.outbound_traffic.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbound_counter(&self, tag: &str) -> Arc<TrafficCounter> {
        self.outbound_traffic()
            .entry(tag.to_string())
            .or_default()
            .clone()
    }
}

/// Connection tracker keeping per-outbound traffic totals and the list of
/// live connections.
#[derive(Clone, Default)]
pub struct StatsTracker {
    inner: Arc<StatsInner>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `conn` and start accounting for it
    pub fn track(&self, metadata: ConnectionMetadata, conn: Connection) -> TrackedConnection {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let counter = Arc::new(TrafficCounter::default());
        let outbound_counter = self.inner.outbound_counter(&metadata.outbound);
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let active = {
            let mut active = self.inner.active();
            active.insert(
                id,
                ActiveEntry {
                    metadata: metadata.clone(),
                    counter: counter.clone(),
                    created_at,
                },
            );
            active.len()
        };

        debug!(
            "Tracking connection #{} (inbound: {:?}, outbound: {})",
            id, metadata.inbound, metadata.outbound
        );
        counter!("tunbox_connections_total", 1, "outbound" => metadata.outbound.clone());
        gauge!("tunbox_active_connections", active as f64);

        TrackedConnection {
            id,
            inner: conn,
            metadata,
            counter,
            outbound_counter,
            stats: self.inner.clone(),
        }
    }

    /// Snapshot of every live tracked connection, ordered by id
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .inner
            .active()
            .iter()
            .map(|(id, entry)| ConnectionInfo {
                id: *id,
                metadata: entry.metadata.clone(),
                created_at: entry.created_at,
                traffic: entry.counter.snapshot(),
            })
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }

    /// Traffic carried by an outbound since start (or the last reset)
    pub fn traffic(&self, outbound: &str) -> TrafficSnapshot {
        self.inner
            .outbound_traffic()
            .get(outbound)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Return an outbound's traffic and reset its counters
    pub fn take_traffic(&self, outbound: &str) -> TrafficSnapshot {
        self.inner
            .outbound_traffic()
            .get(outbound)
            .map(|c| c.take())
            .unwrap_or_default()
    }

    /// Traffic for every outbound seen so far
    pub fn traffic_summary(&self) -> HashMap<String, TrafficSnapshot> {
        self.inner
            .outbound_traffic()
            .iter()
            .map(|(tag, c)| (tag.clone(), c.snapshot()))
            .collect()
    }
}

impl RoutedConnectionTracker for StatsTracker {
    fn routed_connection(&self, metadata: ConnectionMetadata, conn: Connection) -> Connection {
        Box::new(self.track(metadata, conn))
    }
}

impl ConnectionTracker for StatsTracker {
    fn routed(&self) -> Option<&dyn RoutedConnectionTracker> {
        Some(self)
    }
}

/// A connection whose traffic is accounted to its outbound.
/// Unregisters itself from the tracker when dropped.
pub struct TrackedConnection {
    id: u64,
    inner: Connection,
    metadata: ConnectionMetadata,
    counter: Arc<TrafficCounter>,
    outbound_counter: Arc<TrafficCounter>,
    stats: Arc<StatsInner>,
}

impl TrackedConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.counter.snapshot()
    }

    pub fn into_inner(mut self) -> Connection {
        // leave an empty stream behind so Drop still unregisters
        std::mem::replace(&mut self.inner, Box::new(tokio::io::duplex(1).0))
    }

    fn record_upload(&self, n: usize) {
        let n = n as u64;
        self.counter.upload.fetch_add(n, Ordering::Relaxed);
        self.outbound_counter.upload.fetch_add(n, Ordering::Relaxed);
    }

    fn record_download(&self, n: usize) {
        let n = n as u64;
        self.counter.download.fetch_add(n, Ordering::Relaxed);
        self.outbound_counter.download.fetch_add(n, Ordering::Relaxed);
    }
}

impl AsyncRead for TrackedConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            self.record_download(buf.filled().len() - before);
        }
        poll
    }
}

impl AsyncWrite for TrackedConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.record_upload(n);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        let active = {
            let mut active = self.stats.active();
            active.remove(&self.id);
            active.len()
        };

        let traffic = self.counter.snapshot();
        debug!(
            "Connection #{} via {} closed (up {} bytes, down {} bytes)",
            self.id, self.metadata.outbound, traffic.upload, traffic.download
        );
        counter!("tunbox_upload_bytes_total", traffic.upload, "outbound" => self.metadata.outbound.clone());
        counter!("tunbox_download_bytes_total", traffic.download, "outbound" => self.metadata.outbound.clone());
        gauge!("tunbox_active_connections", active as f64);
    }
}
