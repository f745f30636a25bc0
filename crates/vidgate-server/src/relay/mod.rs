//! Fan-out engine: one ingest, many peers.
//!
//! The media plane is the process-wide hub threaded into the ingest
//! task and every signaling handler. It owns the parameter-set cache
//! and the session table; per-session RTP state stays inside each
//! [`PeerSession`].

mod session;
mod sink;

pub use session::{ConnectionDetail, PeerSession};
pub use sink::{RtpSink, TrackSink};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

use vidgate_media::{NalType, NalUnit, ParameterSetCache};

use crate::config::RtpConfig;

/// Process-wide relay state.
pub struct MediaPlane {
    rtp: RtpConfig,
    params: ParameterSetCache,
    sessions: RwLock<HashMap<Uuid, Arc<PeerSession>>>,
    total_connections: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    started_at: Instant,
}

/// Ingest-side counters for the stats surface.
#[derive(Debug, Clone, Copy)]
pub struct IngestStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub uptime_secs: u64,
    pub has_sps: bool,
    pub has_pps: bool,
}

impl MediaPlane {
    pub fn new(rtp: RtpConfig) -> Self {
        Self {
            rtp,
            params: ParameterSetCache::new(),
            sessions: RwLock::new(HashMap::new()),
            total_connections: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn rtp(&self) -> RtpConfig {
        self.rtp
    }

    pub fn params(&self) -> &ParameterSetCache {
        &self.params
    }

    /// Enter a session into the fan-out set.
    pub async fn register(&self, session: Arc<PeerSession>) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.sessions.write().await.insert(session.id, session);
    }

    /// Deactivate, close, and drop a session. Idempotent: later calls
    /// for the same id are no-ops.
    pub async fn remove_session(&self, id: Uuid) {
        let removed = self.sessions.write().await.remove(&id);
        if let Some(session) = removed {
            session.close().await;
            tracing::info!(%id, "peer session removed");
        }
    }

    /// Close every session; used on shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (id, session) in sessions {
            session.close().await;
            tracing::info!(%id, "peer session closed on shutdown");
        }
    }

    pub async fn active_connections(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Account one ingest datagram.
    pub fn record_datagram(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Route one framed NAL unit.
    ///
    /// Parameter sets refresh the cache and are not forwarded; the
    /// cache update is visible to every subsequent fan-out decision.
    /// Everything else goes to each active session with at least one
    /// sender, against one cache snapshot taken here so all sessions
    /// prime with the same parameter sets.
    pub async fn forward_nal(&self, nal: &NalUnit) {
        match nal.nal_type() {
            NalType::Sps => {
                self.params.set_sps(nal.clone().into_bytes());
                return;
            }
            NalType::Pps => {
                self.params.set_pps(nal.clone().into_bytes());
                return;
            }
            _ => {}
        }

        // Snapshot under the read guard; teardown may shrink the table
        // while we iterate.
        let sessions: Vec<Arc<PeerSession>> = {
            let table = self.sessions.read().await;
            table.values().cloned().collect()
        };
        if sessions.is_empty() {
            return;
        }

        let (sps, pps) = self.params.snapshot();
        for session in sessions {
            if session.is_active() && session.has_sinks() {
                session.forward(nal, sps.as_ref(), pps.as_ref()).await;
            }
        }
    }

    pub async fn stats(&self) -> (IngestStats, Vec<ConnectionDetail>) {
        let sessions: Vec<Arc<PeerSession>> = {
            let table = self.sessions.read().await;
            table.values().cloned().collect()
        };
        let mut details = Vec::with_capacity(sessions.len());
        for session in &sessions {
            details.push(session.detail().await);
        }

        let stats = IngestStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: sessions.len(),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
            has_sps: self.params.has_sps(),
            has_pps: self.params.has_pps(),
        };
        (stats, details)
    }
}
