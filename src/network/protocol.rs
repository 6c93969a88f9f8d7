//! Wire protocol constants, handshake, and the response envelope.
//!
//! The pre-session handshake is four little-endian fields (version
//! magic, auth-key length, auth-key bytes, protocol magic) answered by a
//! NUL-terminated ASCII banner. A connection is admitted only when the
//! banner reads exactly `SUCCESS`.

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec::{handshake_frame, trim_banner, MAX_BANNER_LEN};
use crate::error::{Error, Result};

/// Protocol version magics.
pub const VERSION_V1: u32 = 0x3F61BA36;
pub const VERSION_V2: u32 = 0x723081E1;
pub const VERSION_V3: u32 = 0x5F75E83E;
pub const VERSION_V4: u32 = 0x400C2D20;

/// Wire protocol magics.
pub const PROTOCOL_PROTOBUF: u32 = 0x271FFC41;
pub const PROTOCOL_JSON: u32 = 0x7E6970C7;

/// Handshake protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    V1,
    V2,
    V3,
    #[default]
    V4,
}

impl Version {
    pub fn magic(self) -> u32 {
        match self {
            Version::V1 => VERSION_V1,
            Version::V2 => VERSION_V2,
            Version::V3 => VERSION_V3,
            Version::V4 => VERSION_V4,
        }
    }

    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            VERSION_V1 => Some(Version::V1),
            VERSION_V2 => Some(Version::V2),
            VERSION_V3 => Some(Version::V3),
            VERSION_V4 => Some(Version::V4),
            _ => None,
        }
    }
}

/// Post-handshake encoding of queries and responses.
///
/// Protobuf is part of the magic vocabulary for compatibility, but this
/// core only ever negotiates JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireProtocol {
    #[default]
    Json,
    Protobuf,
}

impl WireProtocol {
    pub fn magic(self) -> u32 {
        match self {
            WireProtocol::Json => PROTOCOL_JSON,
            WireProtocol::Protobuf => PROTOCOL_PROTOBUF,
        }
    }

    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            PROTOCOL_JSON => Some(WireProtocol::Json),
            PROTOCOL_PROTOBUF => Some(WireProtocol::Protobuf),
            _ => None,
        }
    }
}

/// Parsed server reply.
///
/// `t` is the response type, `r` the result payload. The optional
/// fields: `b` backtrace, `e` runtime-error subtype, `n` notes, `p`
/// profile.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub t: i32,
    #[serde(default)]
    pub r: Vec<serde_json::Value>,
    #[serde(default)]
    pub b: Option<serde_json::Value>,
    #[serde(default)]
    pub e: Option<i64>,
    #[serde(default)]
    pub n: Option<serde_json::Value>,
    #[serde(default)]
    pub p: Option<serde_json::Value>,
}

/// Parse a response payload. A body the server cannot have produced in
/// the JSON protocol is a wire violation, not an I/O failure.
pub fn parse_response(payload: &[u8]) -> Result<Response> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::Protocol(format!("malformed response payload: {e}")))
}

/// Read the NUL-terminated handshake banner.
pub(crate) async fn read_banner<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == 0 {
            break;
        }
        raw.push(byte);
        if raw.len() > MAX_BANNER_LEN {
            return Err(Error::Protocol("handshake banner too long".into()));
        }
    }
    let banner = String::from_utf8(raw)
        .map_err(|e| Error::Protocol(format!("handshake banner is not UTF-8: {e}")))?;
    Ok(trim_banner(&banner).to_string())
}

/// Perform the client side of the pre-session handshake.
pub(crate) async fn handshake<S>(
    stream: &mut S,
    version: Version,
    auth_key: &str,
    protocol: WireProtocol,
    host: &str,
    port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = handshake_frame(version.magic(), auth_key, protocol.magic());
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let banner = read_banner(stream).await?;
    if banner != "SUCCESS" {
        return Err(Error::Handshake {
            banner,
            host: host.to_string(),
            port,
        });
    }

    tracing::debug!(?version, ?protocol, "handshake complete");
    Ok(())
}
