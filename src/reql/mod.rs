//! ReQL wire vocabulary.
//!
//! The driver core does not build queries; callers hand it already-built
//! JSON ASTs. What lives here is the part of ReQL the core itself needs:
//!
//! - **Types** (`types.rs`): query-type and response-type opcodes.
//! - **Datum** (`datum.rs`): the JSON-like value handed back to callers.

pub mod datum;
pub mod types;

pub use datum::Datum;
pub use types::{QueryType, ResponseType, TERM_DB};
