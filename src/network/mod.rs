//! Networking and query multiplexing.
//!
//! One TCP socket carries many concurrent logical queries, correlated by
//! a 64-bit token. The pieces, leaves first:
//!
//! 1. **Codec** (`codec.rs`): length-prefixed frame encode/decode.
//! 2. **Protocol** (`protocol.rs`): handshake magics, banner exchange,
//!    and the response envelope.
//! 3. **Connection** (`connection.rs`): socket ownership, handshake,
//!    shared per-connection state.
//! 4. **Router** (`router.rs`): demultiplexes inbound frames by token.
//! 5. **Dispatch** (`dispatch.rs`): allocates tokens, sends
//!    START/CONTINUE/STOP, adapts first responses into results.
//!
//! Data flow: caller → dispatch → codec → socket → server → socket →
//! codec → router → per-token sink → caller (or its cursor).

pub mod codec;
pub mod connection;
pub(crate) mod dispatch;
pub mod protocol;
pub(crate) mod router;

pub use codec::{Frame, FrameBuffer};
pub use connection::{connect, ConnectOptions, Connection};
pub use dispatch::RunResult;
pub use protocol::{Response, Version, WireProtocol};
