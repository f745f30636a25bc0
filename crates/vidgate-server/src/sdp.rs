//! SDP answer munging.
//!
//! The generated answer advertises H.264 but carries no
//! `sprop-parameter-sets`, so a decoder that joins before requesting a
//! keyframe has nothing to initialize from. Injecting the cached
//! SPS/PPS into the fmtp line makes the first primed IDR decodable
//! without a round trip.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;

/// Replace the first `a=rtpmap:<pt> <name>/<clock>` line with an H264
/// rtpmap plus an fmtp carrying `sprop-parameter-sets`.
///
/// Returns the SDP unchanged when either parameter set is missing from
/// the cache. Exactly one substitution is performed; line endings are
/// preserved as produced by the WebRTC stack.
pub fn inject_parameter_sets(
    sdp: &str,
    payload_type: u8,
    clock_rate: u32,
    sps: Option<&Bytes>,
    pps: Option<&Bytes>,
) -> String {
    let (Some(sps), Some(pps)) = (sps, pps) else {
        tracing::debug!("parameter sets not cached yet, leaving answer SDP untouched");
        return sdp.to_string();
    };

    let prefix = format!("a=rtpmap:{payload_type} ");
    let clock_suffix = format!("/{clock_rate}");

    let mut out = String::with_capacity(sdp.len() + 160);
    let mut replaced = false;
    for line in sdp.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        // An rtpmap as the final unterminated line still needs a
        // separator between the two replacement lines.
        let eol = match &line[body.len()..] {
            "" => "\r\n",
            eol => eol,
        };

        if !replaced && body.starts_with(&prefix) && body.ends_with(&clock_suffix) {
            let fmtp = format!(
                "a=fmtp:{payload_type} level-asymmetry-allowed=1;packetization-mode=1;\
profile-level-id=42e01f;sprop-parameter-sets={},{}",
                BASE64_STANDARD.encode(sps),
                BASE64_STANDARD.encode(pps),
            );
            out.push_str(&format!("a=rtpmap:{payload_type} H264{clock_suffix}"));
            out.push_str(eol);
            out.push_str(&fmtp);
            out.push_str(eol);
            replaced = true;
        } else {
            out.push_str(line);
        }
    }

    if !replaced {
        tracing::warn!(payload_type, clock_rate, "no matching rtpmap line in answer SDP");
    }
    out
}

/// Read the SSRC the WebRTC stack assigned to the outbound video
/// stream: the numeric token of the first `a=ssrc:` line.
///
/// The session negotiates a single send-only video m-line, so the
/// first line is always the right one.
pub fn extract_ssrc(sdp: &str) -> Option<u32> {
    for line in sdp.lines() {
        if let Some(rest) = line.strip_prefix("a=ssrc:") {
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    None
}
