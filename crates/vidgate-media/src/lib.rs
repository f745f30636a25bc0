//! H.264 media plane for vidgate
//!
//! This crate carries the codec-level machinery of the relay:
//! - Annex-B elementary-stream framing into NAL units
//! - SPS/PPS parameter-set caching for late joiners
//! - RFC 6184 RTP packetization (single NAL and FU-A)
//!
//! Nothing here touches the network or the WebRTC stack; everything is
//! driven by the gateway in `vidgate-server`.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Header fields, sequence/timestamp semantics |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | Single NAL packets, FU-A fragmentation |
//! | ITU-T H.264 Annex B | Byte-stream format | Start-code delimited NAL unit framing |

pub mod annexb;
pub mod nal;
pub mod packetizer;
pub mod params;

pub use annexb::AnnexBFramer;
pub use nal::{NalType, NalUnit};
pub use packetizer::H264Packetizer;
pub use params::ParameterSetCache;

/// RTP clock rate for H.264, fixed by RFC 6184.
pub const H264_CLOCK_RATE: u32 = 90_000;
