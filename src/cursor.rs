//! Lazy paged results.
//!
//! A [`Cursor`] is the single consumer of one token's response stream.
//! It buffers the batch delivered with each partial response and issues
//! CONTINUE only when the buffer runs dry, so consumption drives the
//! wire traffic. Abandoning the cursor, by `close()` or by drop, always
//! settles the token: either a terminal response was already observed or
//! exactly one STOP goes out.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::network::codec::Frame;
use crate::network::connection::ConnState;
use crate::network::dispatch::server_error;
use crate::network::protocol::parse_response;
use crate::reql::datum::decode_batch;
use crate::reql::{Datum, ResponseType};

/// A lazy stream over successive partial-sequence responses.
///
/// Values arrive in server order, within and across batches. The cursor
/// is exhausted once the server answers a CONTINUE with a complete
/// sequence; after that (or after [`close`](Cursor::close)) every
/// [`next`](Cursor::next) returns `Ok(None)`.
pub struct Cursor {
    state: Arc<ConnState>,
    token: u64,
    rx: mpsc::Receiver<Frame>,
    buffered: VecDeque<Datum>,
    /// More batches may follow; the token is still registered.
    pending: bool,
    closed: bool,
}

impl Cursor {
    pub(crate) fn new(
        state: Arc<ConnState>,
        token: u64,
        rx: mpsc::Receiver<Frame>,
        first_batch: Vec<Datum>,
    ) -> Self {
        Self {
            state,
            token,
            rx,
            buffered: first_batch.into(),
            pending: true,
            closed: false,
        }
    }

    /// Correlation token this cursor consumes.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Fetch the next value, requesting another batch from the server
    /// when the buffer is empty and more data is possible.
    pub async fn next(&mut self) -> Result<Option<Datum>> {
        loop {
            if let Some(value) = self.buffered.pop_front() {
                return Ok(Some(value));
            }
            if self.closed || !self.pending {
                return Ok(None);
            }

            let frame = match self.state.continue_query(self.token, &mut self.rx).await {
                Ok(frame) => frame,
                Err(Error::ConnectionClosed) => {
                    self.pending = false;
                    return Err(Error::ConnectionClosed);
                }
                Err(e) => return Err(e),
            };
            let resp = parse_response(&frame.payload)?;

            match ResponseType::from_code(resp.t) {
                Some(ResponseType::SuccessPartial) | Some(ResponseType::SuccessFeed) => {
                    // May legitimately be empty; loop and ask again.
                    self.buffered.extend(decode_batch(resp.r));
                }
                Some(ResponseType::SuccessSequence) => {
                    self.pending = false;
                    self.state.unregister(self.token);
                    self.buffered.extend(decode_batch(resp.r));
                }
                Some(rtype) if rtype.is_error() => {
                    self.pending = false;
                    self.state.unregister(self.token);
                    return Err(server_error(
                        rtype,
                        resp,
                        serde_json::json!([2]),
                    ));
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "unexpected response type {} for cursor",
                        resp.t
                    )));
                }
            }
        }
    }

    /// Consume the rest of the cursor into a vector.
    pub async fn drain(&mut self) -> Result<Vec<Datum>> {
        let mut values = Vec::with_capacity(self.buffered.len());
        while let Some(value) = self.next().await? {
            values.push(value);
        }
        Ok(values)
    }

    /// Abandon the cursor. Sends STOP once if the server still owes
    /// batches; afterwards [`next`](Cursor::next) reports end-of-stream.
    /// Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.pending {
            self.pending = false;
            let _ = self.state.stop_query(self.token).await;
        }
    }

    /// Whether the cursor can yield no further values.
    pub fn is_done(&self) -> bool {
        self.buffered.is_empty() && (self.closed || !self.pending)
    }
}

impl Drop for Cursor {
    // Drop is equivalent to close(): the write happens on a spawned
    // task because Drop cannot await.
    fn drop(&mut self) {
        if !self.closed && self.pending && self.state.unregister(self.token) {
            self.state.spawn_stop(self.token);
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("token", &self.token)
            .field("buffered", &self.buffered.len())
            .field("pending", &self.pending)
            .field("closed", &self.closed)
            .finish()
    }
}
