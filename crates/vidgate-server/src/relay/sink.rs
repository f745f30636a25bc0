//! Sender seam between the fan-out engine and the WebRTC stack.

use std::sync::Arc;

use async_trait::async_trait;
use rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

/// Anything that accepts finished RTP packets for one peer.
///
/// In production this is the session's negotiated video track; tests
/// substitute an in-process capture.
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn send_rtp(&self, packet: &Packet) -> anyhow::Result<()>;
}

/// The real sink: writes into the SRTP path through the session's
/// [`TrackLocalStaticRTP`].
pub struct TrackSink {
    track: Arc<TrackLocalStaticRTP>,
}

impl TrackSink {
    pub fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl RtpSink for TrackSink {
    async fn send_rtp(&self, packet: &Packet) -> anyhow::Result<()> {
        self.track.write_rtp(packet).await?;
        Ok(())
    }
}
