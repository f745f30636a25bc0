//! RFC 6184 H.264 RTP packetizer.
//!
//! One packetizer per peer session; it owns the RTP sequence counter so
//! sequence numbers stay strictly monotonic per SSRC no matter how NALs
//! are fragmented. Timestamps are owned by the session (they advance
//! per frame, not per packet) and passed in on every call.

use bytes::Bytes;
use rtp::header::Header;
use rtp::packet::Packet;

/// RTP fixed header size (no CSRCs, no extensions).
const RTP_HEADER_SIZE: usize = 12;
/// FU indicator + FU header.
const FU_OVERHEAD: usize = 2;
/// FU-A NAL type (RFC 6184 §5.8).
const FU_A_TYPE: u8 = 28;

/// Packetizes single NAL units into RTP packets, fragmenting with FU-A
/// when a NAL exceeds the MTU budget.
///
/// All packets of one `packetize` call share the caller's timestamp;
/// the sequence number advances once per emitted packet, wrapping
/// mod 2^16.
#[derive(Debug)]
pub struct H264Packetizer {
    payload_type: u8,
    ssrc: u32,
    mtu: usize,
    seq: u16,
}

impl H264Packetizer {
    /// `mtu` is the maximum size of a whole RTP packet including its
    /// 12-byte header.
    pub fn new(payload_type: u8, ssrc: u32, mtu: usize) -> Self {
        debug_assert!(mtu > RTP_HEADER_SIZE + FU_OVERHEAD);
        Self {
            payload_type,
            ssrc,
            mtu,
            seq: 0,
        }
    }

    /// Random SSRC per RFC 3550 §8.1, for callers that do not inherit
    /// one from SDP negotiation.
    pub fn with_random_ssrc(payload_type: u8, mtu: usize) -> Self {
        Self::new(payload_type, rand::random::<u32>(), mtu)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next emitted packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.seq
    }

    fn next_header(&mut self, marker: bool, timestamp: u32) -> Header {
        let header = Header {
            version: 2,
            marker,
            payload_type: self.payload_type,
            sequence_number: self.seq,
            timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        };
        self.seq = self.seq.wrapping_add(1);
        header
    }

    /// Wrap one NAL unit (header byte included, start code stripped)
    /// into RTP packets.
    ///
    /// `marker` is honored on the single packet, or on the final FU-A
    /// fragment only; non-final fragments never carry it.
    pub fn packetize(&mut self, nal: &[u8], marker: bool, timestamp: u32) -> Vec<Packet> {
        if nal.is_empty() {
            return Vec::new();
        }

        if nal.len() <= self.mtu - RTP_HEADER_SIZE {
            return vec![Packet {
                header: self.next_header(marker, timestamp),
                payload: Bytes::copy_from_slice(nal),
            }];
        }

        // FU-A fragmentation (RFC 6184 §5.8): the NAL header byte is
        // decomposed into the FU indicator (nri + type 28) and the FU
        // header (S/E bits + original type); the payload follows
        // without it.
        let nal_header = nal[0];
        let fu_indicator = (nal_header & 0x60) | FU_A_TYPE;
        let nal_type = nal_header & 0x1f;
        let max_fragment = self.mtu - RTP_HEADER_SIZE - FU_OVERHEAD;

        let body = &nal[1..];
        let fragments = body.chunks(max_fragment).count();
        let mut packets = Vec::with_capacity(fragments);
        for (i, chunk) in body.chunks(max_fragment).enumerate() {
            let first = i == 0;
            let last = i == fragments - 1;
            let fu_header = ((first as u8) << 7) | ((last as u8) << 6) | nal_type;

            let mut payload = Vec::with_capacity(FU_OVERHEAD + chunk.len());
            payload.push(fu_indicator);
            payload.push(fu_header);
            payload.extend_from_slice(chunk);

            packets.push(Packet {
                header: self.next_header(marker && last, timestamp),
                payload: payload.into(),
            });
        }

        tracing::trace!(
            nal_type,
            nal_len = nal.len(),
            fragments,
            "FU-A fragmented NAL unit"
        );
        packets
    }
}
