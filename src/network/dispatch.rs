//! Query dispatch: token allocation, envelope assembly, and adaptation
//! of first responses into caller-visible results.
//!
//! Every logical query follows the same path: allocate a token, register
//! a bounded per-token sink, write the frame, await the first response
//! frame from the router. What happens next depends on the response
//! type: atoms and sequences resolve immediately, partial responses
//! become a [`Cursor`] that keeps the token registered, error responses
//! turn into typed failures carrying the originating envelope.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::codec::Frame;
use super::connection::ConnState;
use super::protocol::{parse_response, Response};
use crate::cursor::Cursor;
use crate::error::{Error, Result, ServerErrorKind};
use crate::reql::datum::decode_batch;
use crate::reql::{Datum, QueryType, ResponseType, TERM_DB};

/// Serialized control envelopes. CONTINUE and STOP reuse the query's
/// token; they carry no term.
pub(crate) const CONTINUE_PAYLOAD: &[u8] = b"[2]";
pub(crate) const STOP_PAYLOAD: &[u8] = b"[3]";
pub(crate) const NOREPLY_WAIT_PAYLOAD: &[u8] = b"[4]";
pub(crate) const SERVER_INFO_PAYLOAD: &[u8] = b"[5]";

/// Frames buffered per token before the router is back-pressured.
pub(crate) const SINK_CAPACITY: usize = 10;

/// Outcome of a successfully started query.
pub enum RunResult {
    /// A single value (`SUCCESS_ATOM`).
    Atom(Datum),
    /// A complete, eagerly delivered sequence (`SUCCESS_SEQUENCE`).
    Sequence(Vec<Datum>),
    /// A lazy paged stream (`SUCCESS_PARTIAL` / `SUCCESS_FEED`).
    Cursor(Cursor),
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunResult::Atom(value) => f.debug_tuple("Atom").field(value).finish(),
            RunResult::Sequence(values) => f.debug_tuple("Sequence").field(values).finish(),
            RunResult::Cursor(cursor) => f.debug_tuple("Cursor").field(&cursor.token()).finish(),
        }
    }
}

/// Build the START envelope `[1, term, opts?]`.
///
/// Explicit global options pass through verbatim. Without them, a
/// configured default database is appended as `{"db": [14, [name]]}`;
/// the resulting envelope is the only place the default is applied, so
/// a three-element envelope is never rewritten.
pub(crate) fn start_envelope(term: Value, opts: Option<Value>, default_db: Option<&str>) -> Value {
    let mut envelope = vec![Value::from(QueryType::Start.code()), term];
    match (opts, default_db) {
        (Some(opts), _) => envelope.push(opts),
        (None, Some(db)) => envelope.push(json!({ "db": [TERM_DB, [db]] })),
        (None, None) => {}
    }
    Value::Array(envelope)
}

/// Convert an error response into [`Error::Server`].
pub(crate) fn server_error(rtype: ResponseType, resp: Response, query: Value) -> Error {
    let kind = match rtype {
        ResponseType::ClientError => ServerErrorKind::Client,
        ResponseType::CompileError => ServerErrorKind::Compile,
        _ => ServerErrorKind::Runtime,
    };
    let message = resp
        .r
        .into_iter()
        .next()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unknown server error".to_string());
    Error::Server {
        kind,
        message,
        backtrace: resp.b,
        query,
    }
}

/// Unregisters its token on drop and fires a STOP, covering callers that
/// vanish while a response is still owed. Terminal paths defuse it
/// first.
struct InflightGuard {
    state: Arc<ConnState>,
    token: u64,
    armed: bool,
}

impl InflightGuard {
    fn new(state: &Arc<ConnState>, token: u64) -> Self {
        Self {
            state: Arc::clone(state),
            token,
            armed: true,
        }
    }

    /// The token reached a terminal state: unregister, no STOP.
    fn finish(&mut self) {
        if self.armed {
            self.armed = false;
            self.state.unregister(self.token);
        }
    }

    /// Responsibility for the token moved to a cursor; the registration
    /// stays live.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.armed && self.state.unregister(self.token) {
            self.state.spawn_stop(self.token);
        }
    }
}

impl ConnState {
    /// START a query and interpret its first response.
    pub(crate) async fn start_query(
        self: &Arc<Self>,
        term: Value,
        opts: Option<Value>,
    ) -> Result<RunResult> {
        let token = self.allocate_token();
        let envelope = start_envelope(term, opts, self.default_db.as_deref());
        let payload = serde_json::to_vec(&envelope)?;

        let (sink, mut rx) = mpsc::channel(SINK_CAPACITY);
        self.register(token, sink)?;
        let mut guard = InflightGuard::new(self, token);

        tracing::debug!(token, "START");
        if let Err(e) = self.send_frame(token, &payload).await {
            guard.finish();
            return Err(e);
        }

        let frame = match rx.recv().await {
            Some(frame) => frame,
            None => {
                guard.finish();
                return Err(Error::ConnectionClosed);
            }
        };
        let resp = match parse_response(&frame.payload) {
            Ok(resp) => resp,
            Err(e) => {
                guard.finish();
                return Err(e);
            }
        };

        match ResponseType::from_code(resp.t) {
            Some(ResponseType::SuccessAtom) => {
                guard.finish();
                let value = decode_batch(resp.r)
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Protocol("empty r in atom response".into()))?;
                Ok(RunResult::Atom(value))
            }
            Some(ResponseType::SuccessSequence) => {
                guard.finish();
                Ok(RunResult::Sequence(decode_batch(resp.r)))
            }
            Some(ResponseType::SuccessPartial) | Some(ResponseType::SuccessFeed) => {
                // The cursor takes over the token and the sink.
                guard.disarm();
                Ok(RunResult::Cursor(Cursor::new(
                    Arc::clone(self),
                    token,
                    rx,
                    decode_batch(resp.r),
                )))
            }
            Some(rtype) if rtype.is_error() => {
                guard.finish();
                tracing::debug!(token, t = resp.t, "query failed on the server");
                Err(server_error(rtype, resp, envelope))
            }
            _ => {
                guard.finish();
                Err(Error::Protocol(format!(
                    "unexpected response type {} for START",
                    resp.t
                )))
            }
        }
    }

    /// CONTINUE a partial query and return the next response frame.
    ///
    /// A frame already delivered to the sink (for example after a
    /// cancelled await) is drained before a new CONTINUE goes out, and a
    /// token past its terminal response errors instead of hanging.
    pub(crate) async fn continue_query(
        &self,
        token: u64,
        rx: &mut mpsc::Receiver<Frame>,
    ) -> Result<Frame> {
        match rx.try_recv() {
            Ok(frame) => return Ok(frame),
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => return Err(Error::ConnectionClosed),
        }
        if !self.is_registered(token) {
            return Err(Error::CursorExhausted);
        }

        tracing::trace!(token, "CONTINUE");
        self.send_frame(token, CONTINUE_PAYLOAD).await?;
        rx.recv().await.ok_or(Error::ConnectionClosed)
    }

    /// STOP a query. Fire-and-forget: the token is unregistered first so
    /// the server's acknowledgement becomes an expected router miss.
    pub(crate) async fn stop_query(&self, token: u64) -> Result<()> {
        if !self.unregister(token) {
            return Ok(());
        }
        tracing::debug!(token, "STOP");
        self.send_frame(token, STOP_PAYLOAD).await
    }

    pub(crate) async fn noreply_wait(self: &Arc<Self>) -> Result<()> {
        let resp = self.control_query(NOREPLY_WAIT_PAYLOAD).await?;
        match ResponseType::from_code(resp.t) {
            Some(ResponseType::WaitComplete) => Ok(()),
            Some(rtype) if rtype.is_error() => {
                Err(server_error(rtype, resp, json!([QueryType::NoreplyWait.code()])))
            }
            _ => Err(Error::Protocol(format!(
                "unexpected response type {} for NOREPLY_WAIT",
                resp.t
            ))),
        }
    }

    pub(crate) async fn server_info(self: &Arc<Self>) -> Result<Datum> {
        let resp = self.control_query(SERVER_INFO_PAYLOAD).await?;
        match ResponseType::from_code(resp.t) {
            Some(ResponseType::ServerInfo) => decode_batch(resp.r)
                .into_iter()
                .next()
                .ok_or_else(|| Error::Protocol("empty r in server-info response".into())),
            Some(rtype) if rtype.is_error() => {
                Err(server_error(rtype, resp, json!([QueryType::ServerInfo.code()])))
            }
            _ => Err(Error::Protocol(format!(
                "unexpected response type {} for SERVER_INFO",
                resp.t
            ))),
        }
    }

    /// One-frame control round trip on a fresh token.
    async fn control_query(self: &Arc<Self>, payload: &[u8]) -> Result<Response> {
        let token = self.allocate_token();
        let (sink, mut rx) = mpsc::channel(SINK_CAPACITY);
        self.register(token, sink)?;
        let mut guard = InflightGuard::new(self, token);

        if let Err(e) = self.send_frame(token, payload).await {
            guard.finish();
            return Err(e);
        }
        let frame = match rx.recv().await {
            Some(frame) => frame,
            None => {
                guard.finish();
                return Err(Error::ConnectionClosed);
            }
        };
        guard.finish();
        parse_response(&frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_payloads_are_bare_opcode_arrays() {
        assert_eq!(CONTINUE_PAYLOAD, b"[2]");
        assert_eq!(STOP_PAYLOAD, b"[3]");
        assert_eq!(NOREPLY_WAIT_PAYLOAD, b"[4]");
        assert_eq!(SERVER_INFO_PAYLOAD, b"[5]");
    }

    #[test]
    fn envelope_without_opts_or_default_db_has_two_elements() {
        let envelope = start_envelope(json!([15, [["users"]]]), None, None);
        assert_eq!(envelope, json!([1, [15, [["users"]]]]));
    }

    #[test]
    fn default_db_appends_third_element() {
        let envelope = start_envelope(json!([15, [["users"]]]), None, Some("app"));
        assert_eq!(envelope, json!([1, [15, [["users"]]], { "db": [14, ["app"]] }]));
        assert_eq!(envelope.as_array().unwrap().len(), 3);
    }

    #[test]
    fn explicit_opts_suppress_default_db() {
        let opts = json!({ "db": [14, ["other"]], "durability": "soft" });
        let envelope = start_envelope(json!([15, []]), Some(opts.clone()), Some("app"));
        assert_eq!(envelope.as_array().unwrap().len(), 3);
        assert_eq!(envelope.as_array().unwrap()[2], opts);
    }

    #[test]
    fn empty_opts_pass_through_verbatim() {
        let envelope = start_envelope(json!([1, ["foo"]]), Some(json!({})), Some("app"));
        assert_eq!(envelope, json!([1, [1, ["foo"]], {}]));
    }

    #[tokio::test]
    async fn continue_on_unregistered_token_errors_instead_of_hanging() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        let (_read_half, write_half) = client.into_split();

        let state = ConnState::for_tests(write_half);
        // Keep the sender alive so the drained-channel path stays out of
        // the way; the token itself was never registered.
        let (_sink, mut rx) = mpsc::channel(SINK_CAPACITY);

        let err = state.continue_query(42, &mut rx).await.unwrap_err();
        assert!(matches!(err, Error::CursorExhausted), "got {err:?}");
    }

    #[test]
    fn server_error_extracts_message_and_backtrace() {
        let resp = parse_response(br#"{"t":18,"r":["No such table"],"b":[0]}"#).unwrap();
        let err = server_error(ResponseType::RuntimeError, resp, json!([1, [15, []]]));
        match err {
            Error::Server {
                kind,
                message,
                backtrace,
                query,
            } => {
                assert_eq!(kind, ServerErrorKind::Runtime);
                assert_eq!(message, "No such table");
                assert_eq!(backtrace, Some(json!([0])));
                assert_eq!(query, json!([1, [15, []]]));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }
}
