//! UDP ingest task.
//!
//! One socket, one framer, one loop: datagram payloads are raw H.264
//! Annex-B bytes with no framing handshake, so boundaries carry no
//! meaning and every payload goes straight into the carry buffer.
//! Nothing here can fail the stream; bad bytes simply delay the next
//! NAL.

use std::sync::Arc;

use tokio::net::UdpSocket;

use vidgate_media::AnnexBFramer;

use crate::relay::MediaPlane;

/// Datagram receive buffer; comfortably above any sane ingest MTU.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Drive the ingest socket until the task is aborted at shutdown.
pub async fn run(socket: UdpSocket, plane: Arc<MediaPlane>) {
    let mut framer = AnnexBFramer::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _peer)) => {
                plane.record_datagram(len);
                for nal in framer.feed(&buf[..len]) {
                    tracing::trace!(
                        nal_type = ?nal.nal_type(),
                        len = nal.len(),
                        "framed NAL unit"
                    );
                    plane.forward_nal(&nal).await;
                }
            }
            Err(e) => {
                // Transient socket errors must not kill the relay.
                tracing::warn!(error = %e, "UDP ingest receive error");
            }
        }
    }
}
