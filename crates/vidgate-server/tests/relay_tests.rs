//! Fan-out engine tests.
//!
//! These drive the media plane end to end, Annex-B framing through
//! packetization to the per-session sinks, with an in-process capture
//! in place of the WebRTC stack. No sockets, no ICE.
//!
//! Run with: cargo test -p vidgate-server --test relay_tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rtp::packet::Packet;

use vidgate_media::AnnexBFramer;
use vidgate_server::config::RtpConfig;
use vidgate_server::relay::{MediaPlane, PeerSession, RtpSink};

/// Captures every packet a session emits.
#[derive(Default)]
struct CaptureSink {
    packets: Mutex<Vec<Packet>>,
}

impl CaptureSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn packets(&self) -> Vec<Packet> {
        self.packets.lock().unwrap().clone()
    }
}

#[async_trait]
impl RtpSink for CaptureSink {
    async fn send_rtp(&self, packet: &Packet) -> anyhow::Result<()> {
        self.packets.lock().unwrap().push(packet.clone());
        Ok(())
    }
}

/// A sink that always fails; fan-out must shrug it off.
struct BrokenSink;

#[async_trait]
impl RtpSink for BrokenSink {
    async fn send_rtp(&self, _packet: &Packet) -> anyhow::Result<()> {
        anyhow::bail!("transport gone")
    }
}

const SPS: &[u8] = &[0x67, 0x42, 0xE0, 0x1F, 0x96];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
const T0: u32 = 100_000;

fn annexb(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    // Trailing start code releases the last NAL from the framer.
    out.extend_from_slice(&[0, 0, 0, 1]);
    out
}

async fn feed(plane: &MediaPlane, framer: &mut AnnexBFramer, bytes: &[u8]) {
    for nal in framer.feed(bytes) {
        plane.forward_nal(&nal).await;
    }
}

async fn session_with_sink(
    plane: &Arc<MediaPlane>,
    ssrc: u32,
    timestamp: u32,
) -> Arc<CaptureSink> {
    let sink = CaptureSink::new();
    let session = Arc::new(PeerSession::with_initial_timestamp(
        ssrc,
        plane.rtp(),
        vec![sink.clone()],
        timestamp,
    ));
    plane.register(session).await;
    sink
}

#[tokio::test]
async fn idr_is_primed_with_sps_pps_in_one_access_unit() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sink = session_with_sink(&plane, 0x1111, T0).await;

    let idr = [0x65, 0x88, 0x80, 0x10];
    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &idr])).await;

    let packets = sink.packets();
    assert_eq!(packets.len(), 3, "SPS, PPS, IDR");
    assert_eq!(&packets[0].payload[..], SPS);
    assert_eq!(&packets[1].payload[..], PPS);
    assert_eq!(&packets[2].payload[..], &idr);

    // One access unit: identical timestamps, marker only on the frame.
    assert!(packets.iter().all(|p| p.header.timestamp == T0));
    assert!(!packets[0].header.marker);
    assert!(!packets[1].header.marker);
    assert!(packets[2].header.marker);

    // Sequence numbers are gapless.
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(p.header.sequence_number, i as u16);
    }

    // The timestamp advanced by clock_rate / fps after the frame.
    let slice = [0x41, 0x9A, 0x02];
    feed(&plane, &mut framer, &annexb(&[&slice])).await;
    let packets = sink.packets();
    assert_eq!(packets[3].header.timestamp, T0.wrapping_add(3000));
}

#[tokio::test]
async fn per_byte_delivery_produces_identical_rtp() {
    let idr = [0x65, 0x88, 0x80, 0x10];
    let stream = annexb(&[SPS, PPS, &idr]);

    let bulk_plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let bulk_sink = session_with_sink(&bulk_plane, 0x2222, T0).await;
    let mut framer = AnnexBFramer::new();
    feed(&bulk_plane, &mut framer, &stream).await;

    let trickle_plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let trickle_sink = session_with_sink(&trickle_plane, 0x2222, T0).await;
    let mut framer = AnnexBFramer::new();
    for b in &stream {
        feed(&trickle_plane, &mut framer, std::slice::from_ref(b)).await;
    }

    assert_eq!(bulk_sink.packets(), trickle_sink.packets());
}

#[tokio::test]
async fn large_non_idr_slice_fragments_without_priming() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    // Cache is warm; a non-IDR slice must still not trigger priming.
    plane.params().set_sps(SPS.to_vec().into());
    plane.params().set_pps(PPS.to_vec().into());
    let sink = session_with_sink(&plane, 0x3333, T0).await;

    let mut slice = vec![0x41];
    slice.extend(std::iter::repeat(0x5A).take(4999));
    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[&slice])).await;

    let packets = sink.packets();
    // mtu 1200: ceil(4999 / 1186) = 5 FU-A fragments, nothing else.
    assert_eq!(packets.len(), 5);
    assert_eq!(packets[0].payload[1] & 0x80, 0x80, "S bit on first");
    assert_eq!(packets[4].payload[1] & 0x40, 0x40, "E bit on last");
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(p.header.marker, i == 4, "marker on final fragment only");
        assert_eq!(p.payload[0] & 0x1f, 28, "FU-A type");
    }
}

#[tokio::test]
async fn two_sessions_get_independent_streams() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sink_a = session_with_sink(&plane, 0xAAAA, 5_000).await;
    let sink_b = session_with_sink(&plane, 0xBBBB, 9_000_000).await;

    let idr = [0x65, 0x11, 0x22];
    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &idr])).await;

    for (sink, ssrc, t0) in [(&sink_a, 0xAAAA_u32, 5_000_u32), (&sink_b, 0xBBBB, 9_000_000)] {
        let packets = sink.packets();
        assert_eq!(packets.len(), 3, "each session gets its own triple");
        assert!(packets.iter().all(|p| p.header.ssrc == ssrc));
        assert!(packets.iter().all(|p| p.header.timestamp == t0));
    }
}

#[tokio::test]
async fn late_joiner_receives_the_replacement_sps() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sps2: &[u8] = &[0x67, 0x42, 0xE0, 0x20, 0x77];

    let mut framer = AnnexBFramer::new();
    // SPS1 cached, then replaced, before anyone joins.
    feed(&plane, &mut framer, &annexb(&[SPS, PPS])).await;
    feed(&plane, &mut framer, &annexb(&[sps2])).await;

    let sink = session_with_sink(&plane, 0x4444, T0).await;
    feed(&plane, &mut framer, &annexb(&[&[0x65, 0x01]])).await;

    let packets = sink.packets();
    assert_eq!(&packets[0].payload[..], sps2, "primed with the latest SPS");
    assert_eq!(&packets[1].payload[..], PPS);
}

#[tokio::test]
async fn priming_happens_exactly_once() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sink = session_with_sink(&plane, 0x5555, T0).await;

    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &[0x65, 0x01]])).await;
    feed(&plane, &mut framer, &annexb(&[&[0x65, 0x02]])).await;

    let packets = sink.packets();
    // SPS + PPS + IDR1 + IDR2: the second IDR is not re-primed.
    assert_eq!(packets.len(), 4);
    assert_eq!(&packets[3].payload[..], &[0x65, 0x02]);
}

#[tokio::test]
async fn idr_without_cached_parameters_is_still_forwarded() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sink = session_with_sink(&plane, 0x6666, T0).await;

    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[&[0x65, 0x0F]])).await;

    let packets = sink.packets();
    assert_eq!(packets.len(), 1, "no priming possible, IDR goes out alone");
    assert_eq!(&packets[0].payload[..], &[0x65, 0x0F]);

    // The latch is still unset: the next IDR after warm-up is primed.
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &[0x65, 0x10]])).await;
    let packets = sink.packets();
    assert_eq!(packets.len(), 4);
    assert_eq!(&packets[1].payload[..], SPS);
}

#[tokio::test]
async fn sei_forwarded_without_marker_or_timestamp_advance() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sink = session_with_sink(&plane, 0x7777, T0).await;

    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[&[0x06, 0x05, 0x01], &[0x41, 0x9A]])).await;

    let packets = sink.packets();
    assert_eq!(packets.len(), 2);
    assert!(!packets[0].header.marker, "SEI never carries the marker");
    assert_eq!(
        packets[0].header.timestamp, T0,
        "SEI does not advance the clock"
    );
    assert_eq!(
        packets[1].header.timestamp, T0,
        "the following slice is the same access unit"
    );
    assert!(packets[1].header.marker);
}

#[tokio::test]
async fn broken_sink_does_not_stall_other_sessions() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));

    let broken = Arc::new(PeerSession::with_initial_timestamp(
        0x8888,
        plane.rtp(),
        vec![Arc::new(BrokenSink)],
        T0,
    ));
    plane.register(broken).await;
    let sink = session_with_sink(&plane, 0x9999, T0).await;

    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &[0x65, 0x01]])).await;

    assert_eq!(sink.packets().len(), 3, "healthy session unaffected");
}

#[tokio::test]
async fn removed_session_stops_receiving() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let sink = CaptureSink::new();
    let session = Arc::new(PeerSession::with_initial_timestamp(
        0xCCCC,
        plane.rtp(),
        vec![sink.clone()],
        T0,
    ));
    let id = session.id;
    plane.register(session).await;

    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &[0x65, 0x01]])).await;
    assert_eq!(sink.packets().len(), 3);

    plane.remove_session(id).await;
    // Removal is idempotent.
    plane.remove_session(id).await;
    assert_eq!(plane.active_connections().await, 0);

    feed(&plane, &mut framer, &annexb(&[&[0x65, 0x02]])).await;
    assert_eq!(sink.packets().len(), 3, "no packets after removal");
}

#[tokio::test]
async fn stats_reflect_ingest_and_sessions() {
    let plane = Arc::new(MediaPlane::new(RtpConfig::default()));
    let _sink = session_with_sink(&plane, 0xDDDD, T0).await;

    plane.record_datagram(1400);
    plane.record_datagram(600);

    let mut framer = AnnexBFramer::new();
    feed(&plane, &mut framer, &annexb(&[SPS, PPS, &[0x65, 0x01]])).await;

    let (stats, details) = plane.stats().await;
    assert_eq!(stats.packets_received, 2);
    assert_eq!(stats.bytes_received, 2000);
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_connections, 1);
    assert!(stats.has_sps);
    assert!(stats.has_pps);

    assert_eq!(details.len(), 1);
    assert_eq!(details[0].frame_count, 1);
    assert!(details[0].sent_sps_pps);
}
