//! # reql-client
//!
//! Connection core for a RethinkDB-style document database speaking the
//! length-prefixed, token-multiplexed JSON wire protocol.
//!
//! The crate covers the session layer: version/auth handshake, frame
//! codec, response routing by token, query dispatch, and lazy cursors
//! over paged results. Query construction is deliberately out of scope;
//! callers hand `run` an already-built JSON AST.
//!
//! ## Example
//!
//! ```ignore
//! use reql_client::{connect, ConnectOptions, RunResult};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> reql_client::Result<()> {
//!     let conn = connect(ConnectOptions::new().default_db("app")).await?;
//!
//!     // r.table("users"), built elsewhere
//!     match conn.run(json!([15, [["users"]]])).await? {
//!         RunResult::Atom(value) => println!("{value:?}"),
//!         RunResult::Sequence(values) => println!("{} rows", values.len()),
//!         RunResult::Cursor(mut cursor) => {
//!             while let Some(row) = cursor.next().await? {
//!                 println!("{row:?}");
//!             }
//!         }
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod cursor;
pub mod error;
pub mod network;
pub mod reql;

pub use cursor::Cursor;
pub use error::{Error, Result, ServerErrorKind};
pub use network::{connect, ConnectOptions, Connection, RunResult, Version, WireProtocol};
pub use reql::Datum;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
