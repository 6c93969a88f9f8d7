//! Inbound response router.
//!
//! After the handshake the router task owns the read half of the socket.
//! It feeds raw chunks through the incremental frame decoder and hands
//! each frame to the sink registered for its token. Frames for unknown
//! tokens are logged and dropped; a query cancelled mid round-trip makes
//! that an expected event, not a fault.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use super::codec::FrameBuffer;
use super::connection::ConnState;

/// Socket read chunk size.
const READ_CHUNK: usize = 64 * 1024;

/// Drive the read half until EOF, read error, or framing violation,
/// then fail every in-flight query.
pub(crate) async fn run(state: Arc<ConnState>, mut reader: OwnedReadHalf) {
    let mut decoder = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    'read: loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("server closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                if !state.is_closed() {
                    tracing::warn!(error = %e, "socket read failed");
                }
                break;
            }
        };

        let frames = match decoder.push(&chunk[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                // A bad length prefix desynchronizes the stream; nothing
                // after it can be trusted.
                tracing::warn!(error = %e, "unrecoverable framing error");
                break;
            }
        };

        for frame in frames {
            let token = frame.token;
            match state.sink_for(token) {
                Some(sink) => {
                    // A full sink back-pressures this loop, and with it
                    // the socket. That is intended.
                    if sink.send(frame).await.is_err() {
                        tracing::debug!(token, "sink dropped before delivery");
                    }
                    if state.is_closed() {
                        break 'read;
                    }
                }
                None => {
                    tracing::warn!(token, "response for unknown token");
                }
            }
        }
    }

    state.fail_all();
}
