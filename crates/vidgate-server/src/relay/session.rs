//! Per-peer session state and WebRTC plumbing.
//!
//! A session owns everything that must stay private to one peer: the
//! packetizer (and with it the RTP sequence counter), the frame
//! timestamp, the sent-parameter-sets latch, and the handles into the
//! WebRTC stack. Media counters live behind one per-session mutex so a
//! whole access unit (priming SPS/PPS included) is emitted under a
//! single consistent timestamp.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use uuid::Uuid;

use vidgate_media::{H264Packetizer, NalUnit};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpTransceiverInit};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::config::{Config, RtpConfig};
use crate::error::{AppError, Result};
use crate::relay::sink::{RtpSink, TrackSink};
use crate::relay::MediaPlane;
use crate::sdp;

/// Grace window after a transient ICE `disconnected` before the
/// session is reclaimed.
const ICE_CLEANUP_GRACE: Duration = Duration::from_secs(3);

const H264_FMTP: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Media-plane counters mutated only by the fan-out path.
struct SessionMedia {
    packetizer: H264Packetizer,
    /// Current RTP timestamp; advances by clock_rate/fps per frame.
    timestamp: u32,
    /// Latched once the first IDR has been preceded by SPS+PPS.
    sent_parameter_sets: bool,
    frame_count: u64,
}

/// One connected WebRTC viewer.
pub struct PeerSession {
    pub id: Uuid,
    ssrc: u32,
    rtp: RtpConfig,
    media: Mutex<SessionMedia>,
    active: AtomicBool,
    cleanup_scheduled: AtomicBool,
    sinks: Vec<Arc<dyn RtpSink>>,
    conn: Option<Arc<RTCPeerConnection>>,
    ice_state: StdMutex<String>,
    conn_state: StdMutex<String>,
}

/// Stats-surface view of one session.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    pub id: Uuid,
    pub frame_count: u64,
    #[serde(rename = "sentSPSPPS")]
    pub sent_sps_pps: bool,
    pub ice_state: String,
    pub connection_state: String,
}

impl PeerSession {
    /// Assemble a session around existing sinks with a random starting
    /// timestamp, per RTP convention.
    pub fn new(ssrc: u32, rtp: RtpConfig, sinks: Vec<Arc<dyn RtpSink>>) -> Self {
        Self::with_initial_timestamp(ssrc, rtp, sinks, rand::random::<u32>())
    }

    /// Deterministic variant: tests seed the starting timestamp.
    pub fn with_initial_timestamp(
        ssrc: u32,
        rtp: RtpConfig,
        sinks: Vec<Arc<dyn RtpSink>>,
        timestamp: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ssrc,
            rtp,
            media: Mutex::new(SessionMedia {
                packetizer: H264Packetizer::new(rtp.payload_type, ssrc, rtp.mtu),
                timestamp,
                sent_parameter_sets: false,
                frame_count: 0,
            }),
            active: AtomicBool::new(true),
            cleanup_scheduled: AtomicBool::new(false),
            sinks,
            conn: None,
            ice_state: StdMutex::new("new".to_string()),
            conn_state: StdMutex::new("new".to_string()),
        }
    }

    /// Negotiate a new peer from an SDP offer and register it with the
    /// media plane. Returns the session and the answer SDP for the
    /// signaling response.
    pub async fn connect(
        plane: Arc<MediaPlane>,
        config: &Config,
        offer_sdp: String,
    ) -> Result<(Arc<PeerSession>, String)> {
        let api = build_api(&config.rtp)?;
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            bundle_policy: RTCBundlePolicy::MaxBundle,
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        // Send-only H.264 track the fan-out engine writes into.
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: config.rtp.clock_rate,
                channels: 0,
                sdp_fmtp_line: H264_FMTP.to_owned(),
                rtcp_feedback: video_feedback(),
            },
            "video".to_owned(),
            "vidgate".to_owned(),
        ));
        pc.add_transceiver_from_track(
            Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        let offer = RTCSessionDescription::offer(offer_sdp)?;
        pc.set_remote_description(offer).await?;
        let answer = pc.create_answer(None).await?;

        // Advertise the cached parameter sets before the answer is
        // applied, so the client's decoder can initialize from SDP.
        let (sps, pps) = plane.params().snapshot();
        let rewritten = sdp::inject_parameter_sets(
            &answer.sdp,
            config.rtp.payload_type,
            config.rtp.clock_rate,
            sps.as_ref(),
            pps.as_ref(),
        );

        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(RTCSessionDescription::answer(rewritten)?)
            .await?;
        // Non-trickle: the answer handed back carries the gathered
        // candidates in-line.
        let _ = gather_complete.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("no local description after answer")))?;
        let ssrc = sdp::extract_ssrc(&local.sdp).ok_or(AppError::NoSsrc)?;

        let sinks: Vec<Arc<dyn RtpSink>> = vec![Arc::new(TrackSink::new(track))];
        let mut session = PeerSession::new(ssrc, config.rtp, sinks);
        session.conn = Some(Arc::clone(&pc));
        let session = Arc::new(session);

        register_state_handlers(&pc, &session, Arc::downgrade(&plane));
        plane.register(Arc::clone(&session)).await;

        tracing::info!(id = %session.id, ssrc, "peer session created");
        Ok((session, local.sdp))
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn has_sinks(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Take the session out of the fan-out set. Safe to call repeatedly.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Close the underlying peer connection, if any.
    pub async fn close(&self) {
        self.deactivate();
        if let Some(conn) = &self.conn {
            if let Err(e) = conn.close().await {
                tracing::warn!(id = %self.id, error = %e, "error closing peer connection");
            }
        }
    }

    /// Deliver one NAL unit to this peer.
    ///
    /// The first IDR is primed with the supplied parameter-set snapshot
    /// at the same timestamp, so the whole burst forms one access unit.
    /// Sink errors are logged and swallowed; only ICE/connection state
    /// invalidates a session.
    pub async fn forward(&self, nal: &NalUnit, sps: Option<&Bytes>, pps: Option<&Bytes>) {
        let mut media = self.media.lock().await;
        let timestamp = media.timestamp;

        if nal.is_idr() && !media.sent_parameter_sets {
            match (sps, pps) {
                (Some(sps), Some(pps)) => {
                    let packets = media.packetizer.packetize(sps, false, timestamp);
                    self.emit(&packets).await;
                    let packets = media.packetizer.packetize(pps, false, timestamp);
                    self.emit(&packets).await;
                    media.sent_parameter_sets = true;
                    tracing::debug!(id = %self.id, "primed session with SPS/PPS");
                }
                _ => {
                    // Forward the IDR anyway; the peer recovers at the
                    // next keyframe after the cache warms up.
                    tracing::warn!(id = %self.id, "IDR before parameter sets are cached");
                }
            }
        }

        let marker = nal.is_video_frame();
        let packets = media.packetizer.packetize(nal.as_bytes(), marker, timestamp);
        self.emit(&packets).await;

        if nal.is_video_frame() {
            media.timestamp = timestamp.wrapping_add(self.rtp.timestamp_step());
            media.frame_count += 1;
        }
    }

    async fn emit(&self, packets: &[rtp::packet::Packet]) {
        for packet in packets {
            for sink in &self.sinks {
                if let Err(e) = sink.send_rtp(packet).await {
                    tracing::warn!(
                        id = %self.id,
                        seq = packet.header.sequence_number,
                        error = %e,
                        "failed to send RTP packet"
                    );
                }
            }
        }
    }

    pub async fn detail(&self) -> ConnectionDetail {
        let media = self.media.lock().await;
        ConnectionDetail {
            id: self.id,
            frame_count: media.frame_count,
            sent_sps_pps: media.sent_parameter_sets,
            ice_state: self.ice_state.lock().expect("state lock").clone(),
            connection_state: self.conn_state.lock().expect("state lock").clone(),
        }
    }

    fn set_ice_state(&self, state: &RTCIceConnectionState) {
        *self.ice_state.lock().expect("state lock") = state.to_string();
    }

    fn set_conn_state(&self, state: &RTCPeerConnectionState) {
        *self.conn_state.lock().expect("state lock") = state.to_string();
    }
}

fn ice_servers(config: &Config) -> Vec<RTCIceServer> {
    let mut servers = vec![RTCIceServer {
        urls: config.stun_servers.clone(),
        ..Default::default()
    }];
    if let Some(turn) = &config.turn_server {
        servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }
    servers
}

fn video_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
    ]
}

/// Media engine restricted to a single H.264 entry at 90 kHz.
fn build_api(rtp: &RtpConfig) -> Result<webrtc::api::API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: rtp.clock_rate,
                channels: 0,
                sdp_fmtp_line: H264_FMTP.to_owned(),
                rtcp_feedback: video_feedback(),
            },
            payload_type: rtp.payload_type,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Wire the ICE / peer-connection state callbacks that drive teardown.
///
/// ICE `failed`/`closed`/`disconnected` schedules cleanup after a fixed
/// grace window; the timer is armed once and never cancelled, even if
/// the connection recovers; see DESIGN.md for why this is kept. Peer-connection `failed`/`closed` cleans up immediately.
fn register_state_handlers(
    pc: &Arc<RTCPeerConnection>,
    session: &Arc<PeerSession>,
    plane: Weak<MediaPlane>,
) {
    let id = session.id;

    let weak_session = Arc::downgrade(session);
    let ice_plane = plane.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        tracing::info!(%id, %state, "ICE connection state changed");
        let Some(session) = weak_session.upgrade() else {
            return Box::pin(async {});
        };
        session.set_ice_state(&state);

        let terminal = matches!(
            state,
            RTCIceConnectionState::Failed
                | RTCIceConnectionState::Closed
                | RTCIceConnectionState::Disconnected
        );
        if terminal && !session.cleanup_scheduled.swap(true, Ordering::SeqCst) {
            let plane = ice_plane.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ICE_CLEANUP_GRACE).await;
                if let Some(plane) = plane.upgrade() {
                    plane.remove_session(id).await;
                }
            });
        }
        Box::pin(async {})
    }));

    let weak_session = Arc::downgrade(session);
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        tracing::info!(%id, %state, "peer connection state changed");
        if let Some(session) = weak_session.upgrade() {
            session.set_conn_state(&state);
        }
        let plane = plane.clone();
        Box::pin(async move {
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                if let Some(plane) = plane.upgrade() {
                    plane.remove_session(id).await;
                }
            }
        })
    }));
}
