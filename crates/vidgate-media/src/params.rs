//! SPS/PPS parameter-set cache.
//!
//! The ingest may start long before the first peer joins, and peers may
//! join between two keyframes. Remembering the most recent SPS and PPS
//! lets every session prime its first IDR with decoder configuration,
//! and lets the SDP answer advertise `sprop-parameter-sets`.

use std::sync::RwLock;

use bytes::Bytes;

#[derive(Debug, Default)]
struct ParamSets {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

/// Last-wins cache of the two H.264 parameter sets.
///
/// Writes replace the prior value; reads are atomic with respect to
/// writes. A snapshot observing a fresh SPS need not observe the
/// matching fresh PPS; fan-out emits whatever is available and the
/// downstream decoder re-syncs on the next IDR after a matching pair.
#[derive(Debug, Default)]
pub struct ParameterSetCache {
    inner: RwLock<ParamSets>,
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sps(&self, sps: Bytes) {
        let mut inner = self.inner.write().expect("parameter-set lock poisoned");
        tracing::debug!(len = sps.len(), "cached SPS");
        inner.sps = Some(sps);
    }

    pub fn set_pps(&self, pps: Bytes) {
        let mut inner = self.inner.write().expect("parameter-set lock poisoned");
        tracing::debug!(len = pps.len(), "cached PPS");
        inner.pps = Some(pps);
    }

    /// Cheap copies ([`Bytes`] clones) safe to hand to a packetizer.
    pub fn snapshot(&self) -> (Option<Bytes>, Option<Bytes>) {
        let inner = self.inner.read().expect("parameter-set lock poisoned");
        (inner.sps.clone(), inner.pps.clone())
    }

    pub fn has_sps(&self) -> bool {
        self.inner.read().expect("parameter-set lock poisoned").sps.is_some()
    }

    pub fn has_pps(&self) -> bool {
        self.inner.read().expect("parameter-set lock poisoned").pps.is_some()
    }
}
