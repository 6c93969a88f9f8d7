//! TCP connection lifecycle for the client core.
//!
//! `connect` establishes the socket, performs the handshake, and splits
//! the stream: the write half goes behind an async mutex so concurrent
//! queries produce intact frames, the read half is handed to the router
//! task. All per-connection bookkeeping lives in [`ConnState`], shared
//! between the public handle, the router, and any live cursors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::codec::{encode_frame, Frame};
use super::dispatch::{RunResult, STOP_PAYLOAD};
use super::protocol::{self, Version, WireProtocol};
use super::router;
use crate::error::{Error, Result};
use crate::reql::Datum;

/// Connection configuration.
///
/// ```no_run
/// # use reql_client::ConnectOptions;
/// let options = ConnectOptions::new()
///     .host("db1.internal")
///     .default_db("app")
///     .auth_key("hunter2");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub auth_key: String,
    pub default_db: Option<String>,
    pub version: Version,
    pub protocol: WireProtocol,
    pub token_seed: u64,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 28015,
            auth_key: String::new(),
            default_db: None,
            version: Version::default(),
            protocol: WireProtocol::default(),
            token_seed: 0,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn auth_key(mut self, auth_key: impl Into<String>) -> Self {
        self.auth_key = auth_key.into();
        self
    }

    pub fn default_db(mut self, db: impl Into<String>) -> Self {
        self.default_db = Some(db.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn protocol(mut self, protocol: WireProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn token_seed(mut self, seed: u64) -> Self {
        self.token_seed = seed;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Shared per-connection state.
///
/// The inflight map is guarded by a std mutex and never held across an
/// await; the write half has its own async mutex so a slow write cannot
/// block token bookkeeping.
pub(crate) struct ConnState {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    inflight: Mutex<HashMap<u64, mpsc::Sender<Frame>>>,
    next_token: AtomicU64,
    closed: AtomicBool,
    pub(crate) default_db: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    version: Version,
    protocol: WireProtocol,
}

impl ConnState {
    /// Bare state over an already-connected write half, for exercising
    /// dispatch paths without a full `connect`.
    #[cfg(test)]
    pub(crate) fn for_tests(writer: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            writer: tokio::sync::Mutex::new(writer),
            inflight: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            default_db: None,
            host: "127.0.0.1".to_string(),
            port: 0,
            version: Version::default(),
            protocol: WireProtocol::default(),
        })
    }

    pub(crate) fn allocate_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register a sink for a fresh token. Tokens are monotonic, so a
    /// collision means the counter was reused across connections.
    pub(crate) fn register(&self, token: u64, sink: mpsc::Sender<Frame>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let mut inflight = self.inflight.lock().unwrap();
        if inflight.insert(token, sink).is_some() {
            tracing::warn!(token, "token registered twice");
        }
        Ok(())
    }

    pub(crate) fn unregister(&self, token: u64) -> bool {
        self.inflight.lock().unwrap().remove(&token).is_some()
    }

    pub(crate) fn is_registered(&self, token: u64) -> bool {
        self.inflight.lock().unwrap().contains_key(&token)
    }

    pub(crate) fn sink_for(&self, token: u64) -> Option<mpsc::Sender<Frame>> {
        self.inflight.lock().unwrap().get(&token).cloned()
    }

    pub(crate) fn inflight_len(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }

    /// Write one frame. A failed write is fatal: the connection is
    /// marked closed and every waiting caller is unblocked.
    pub(crate) async fn send_frame(&self, token: u64, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let wire = encode_frame(token, payload);
        let mut writer = self.writer.lock().await;
        let outcome = async {
            writer.write_all(&wire).await?;
            writer.flush().await
        }
        .await;
        drop(writer);

        if let Err(e) = outcome {
            tracing::warn!(token, error = %e, "write failed, closing connection");
            self.fail_all();
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Terminal cascade: mark closed and drop every sink so blocked
    /// callers observe the closed channel.
    pub(crate) fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut inflight = self.inflight.lock().unwrap();
        let abandoned = inflight.len();
        inflight.clear();
        if abandoned > 0 {
            tracing::debug!(queries = abandoned, "dropped in-flight queries");
        }
    }

    /// Fire-and-forget STOP from a non-async context (cursor drop).
    pub(crate) fn spawn_stop(self: &Arc<Self>, token: u64) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let state = Arc::clone(self);
                handle.spawn(async move {
                    let _ = state.send_frame(token, STOP_PAYLOAD).await;
                });
            }
            Err(_) => {
                tracing::debug!(token, "no runtime at cursor drop, STOP not sent");
            }
        }
    }

    /// Orderly close: best-effort STOP for every outstanding token,
    /// socket shutdown, then the sink cascade. Idempotent.
    pub(crate) async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tokens: Vec<u64> = self.inflight.lock().unwrap().keys().copied().collect();

        let mut writer = self.writer.lock().await;
        for token in tokens {
            let wire = encode_frame(token, STOP_PAYLOAD);
            if writer.write_all(&wire).await.is_err() {
                break;
            }
        }
        let _ = writer.flush().await;
        let _ = writer.shutdown().await;
        drop(writer);

        self.fail_all();
        tracing::info!(host = %self.host, port = self.port, "connection closed");
    }
}

/// A live connection to the server.
///
/// Cheap to clone; all clones share the same socket and token space.
#[derive(Clone)]
pub struct Connection {
    pub(crate) state: Arc<ConnState>,
}

/// Open a connection: TCP establishment and handshake, both bounded by
/// `connect_timeout`.
pub async fn connect(options: ConnectOptions) -> Result<Connection> {
    if options.protocol != WireProtocol::Json {
        return Err(Error::Protocol(
            "only the JSON wire protocol is supported".into(),
        ));
    }

    let ConnectOptions {
        host,
        port,
        auth_key,
        default_db,
        version,
        protocol,
        token_seed,
        connect_timeout,
    } = options;

    let stream = tokio::time::timeout(connect_timeout, async {
        let mut stream = TcpStream::connect((host.as_str(), port)).await?;
        protocol::handshake(&mut stream, version, &auth_key, protocol, &host, port).await?;
        Ok::<_, Error>(stream)
    })
    .await
    .map_err(|_| Error::ConnectTimeout {
        host: host.clone(),
        port,
    })??;

    let (read_half, write_half) = stream.into_split();

    let state = Arc::new(ConnState {
        writer: tokio::sync::Mutex::new(write_half),
        inflight: Mutex::new(HashMap::new()),
        next_token: AtomicU64::new(token_seed),
        closed: AtomicBool::new(false),
        default_db,
        host,
        port,
        version,
        protocol,
    });

    tokio::spawn(router::run(Arc::clone(&state), read_half));

    tracing::info!(host = %state.host, port = state.port, "connection established");
    Ok(Connection { state })
}

impl Connection {
    /// Run a query and adapt its first response into a value, a complete
    /// sequence, or a cursor. The default database, when configured, is
    /// spliced into queries that carry no global options.
    pub async fn run(&self, term: serde_json::Value) -> Result<RunResult> {
        self.state.start_query(term, None).await
    }

    /// Run a query with explicit global options. The options pass
    /// through verbatim; `default_db` is never applied over them.
    pub async fn run_with_opts(
        &self,
        term: serde_json::Value,
        opts: serde_json::Value,
    ) -> Result<RunResult> {
        self.state.start_query(term, Some(opts)).await
    }

    /// Wait until the server has finished every noreply write on this
    /// connection.
    pub async fn noreply_wait(&self) -> Result<()> {
        self.state.noreply_wait().await
    }

    /// Ask the server to describe itself.
    pub async fn server_info(&self) -> Result<Datum> {
        self.state.server_info().await
    }

    /// Close the connection: best-effort STOP for each outstanding
    /// query, then socket shutdown. Idempotent; any caller still waiting
    /// fails with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        self.state.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Number of queries currently awaiting server frames.
    pub fn inflight_len(&self) -> usize {
        self.state.inflight_len()
    }

    /// Handshake version negotiated at open; immutable afterwards.
    pub fn version(&self) -> Version {
        self.state.version
    }

    /// Wire protocol negotiated at open; always JSON.
    pub fn protocol(&self) -> WireProtocol {
        self.state.protocol
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.state.host)
            .field("port", &self.state.port)
            .field("closed", &self.is_closed())
            .field("inflight", &self.inflight_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let options = ConnectOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 28015);
        assert_eq!(options.auth_key, "");
        assert_eq!(options.default_db, None);
        assert_eq!(options.version, Version::V4);
        assert_eq!(options.protocol, WireProtocol::Json);
        assert_eq!(options.token_seed, 0);
        assert_eq!(options.connect_timeout, Duration::from_secs(20));
    }

    #[test]
    fn options_setters_chain() {
        let options = ConnectOptions::new()
            .host("db1")
            .port(29015)
            .auth_key("k")
            .default_db("app")
            .token_seed(100)
            .connect_timeout(Duration::from_secs(2));
        assert_eq!(options.host, "db1");
        assert_eq!(options.port, 29015);
        assert_eq!(options.auth_key, "k");
        assert_eq!(options.default_db.as_deref(), Some("app"));
        assert_eq!(options.token_seed, 100);
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn protobuf_is_refused_before_io() {
        let options = ConnectOptions::new().protocol(WireProtocol::Protobuf);
        match connect(options).await {
            Err(Error::Protocol(msg)) => assert!(msg.contains("JSON")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
}
