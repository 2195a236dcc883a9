//! Frame codec for the two supported wire encodings.
//!
//! A session's encoding is chosen once, when the WebSocket handshake
//! negotiates a sub-protocol, and never changes afterwards:
//!
//! | Encoding  | Sub-protocol        | WebSocket frame |
//! |-----------|---------------------|-----------------|
//! | `Json`    | `hostlink.json`     | text            |
//! | `MsgPack` | `hostlink.msgpack`  | binary          |
//!
//! Both encodings carry the same logical `{op, d}` document.  MessagePack maps
//! are written with field names (`to_vec_named`) so a decoded document has
//! exactly the keys a JSON client would have sent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::opcodes::CloseCode;

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// A text frame arrived on a MessagePack session or vice versa.
    #[error("session encoding is {expected:?}, but a {received} frame was received")]
    EncodingMismatch {
        expected: WireEncoding,
        received: &'static str,
    },

    /// The frame bytes are not a valid document in the session's encoding.
    #[error("unable to decode {encoding:?} frame: {message}")]
    Malformed {
        encoding: WireEncoding,
        message: String,
    },

    /// The decoded document has no `op` key.
    #[error("frame is missing an `op`")]
    MissingOpCode,

    /// The `op` key is present but not an unsigned integer.
    #[error("frame `op` is not an unsigned number")]
    InvalidOpCodeType,

    /// Serialising an outbound frame failed.
    #[error("unable to encode {encoding:?} frame: {message}")]
    Encode {
        encoding: WireEncoding,
        message: String,
    },
}

impl ProtocolError {
    /// Close code the transport should use when this error ends a session.
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::EncodingMismatch { .. } | ProtocolError::Malformed { .. } => {
                CloseCode::MessageDecodeError
            }
            ProtocolError::MissingOpCode => CloseCode::MissingDataKey,
            ProtocolError::InvalidOpCodeType => CloseCode::InvalidDataKeyType,
            ProtocolError::Encode { .. } => CloseCode::UnknownReason,
        }
    }
}

// ── Encodings ─────────────────────────────────────────────────────────────────

/// Document encoding used for every frame of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireEncoding {
    #[default]
    Json,
    MsgPack,
}

impl WireEncoding {
    /// WebSocket sub-protocol token that selects this encoding.
    pub fn subprotocol(self) -> &'static str {
        match self {
            WireEncoding::Json => "hostlink.json",
            WireEncoding::MsgPack => "hostlink.msgpack",
        }
    }

    /// Picks the encoding from a `Sec-WebSocket-Protocol` header value.
    ///
    /// The header may list several comma-separated tokens; the first one we
    /// recognise wins.  Returns `None` when no token matches.
    pub fn from_subprotocols(header: &str) -> Option<Self> {
        header.split(',').map(str::trim).find_map(|token| match token {
            "hostlink.json" => Some(WireEncoding::Json),
            "hostlink.msgpack" => Some(WireEncoding::MsgPack),
            _ => None,
        })
    }
}

/// One encoded WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        match self {
            EncodedFrame::Text(s) => s.len(),
            EncodedFrame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            EncodedFrame::Text(_) => "text",
            EncodedFrame::Binary(_) => "binary",
        }
    }
}

/// A decoded inbound frame whose `op` has been checked to be unsigned.
///
/// `d` is [`Value::Null`] when the frame carried no `d` key; the processor
/// decides what that means.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingFrame {
    pub op: u64,
    pub d: Value,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes any serialisable frame in `encoding`.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails (for example a map
/// with non-string keys in JSON).
///
/// # Examples
///
/// ```rust
/// use hostlink_core::protocol::{encode_frame, EncodedFrame, WireEncoding};
/// use serde_json::json;
///
/// let frame = encode_frame(&json!({"op": 2, "d": {"negotiatedRpcVersion": 1}}), WireEncoding::Json).unwrap();
/// assert!(matches!(frame, EncodedFrame::Text(_)));
/// ```
pub fn encode_frame<T: Serialize + ?Sized>(
    frame: &T,
    encoding: WireEncoding,
) -> Result<EncodedFrame, ProtocolError> {
    match encoding {
        WireEncoding::Json => serde_json::to_string(frame)
            .map(EncodedFrame::Text)
            .map_err(|e| ProtocolError::Encode {
                encoding,
                message: e.to_string(),
            }),
        WireEncoding::MsgPack => rmp_serde::to_vec_named(frame)
            .map(EncodedFrame::Binary)
            .map_err(|e| ProtocolError::Encode {
                encoding,
                message: e.to_string(),
            }),
    }
}

/// Decodes an inbound frame and validates its `op` field.
///
/// # Errors
///
/// - [`ProtocolError::EncodingMismatch`] if the frame kind does not match the
///   session encoding.
/// - [`ProtocolError::Malformed`] if the bytes are not a valid document.
/// - [`ProtocolError::MissingOpCode`] / [`ProtocolError::InvalidOpCodeType`]
///   if `op` is absent or not an unsigned integer.
///
/// # Examples
///
/// ```rust
/// use hostlink_core::protocol::{decode_frame, EncodedFrame, WireEncoding};
///
/// let frame = EncodedFrame::Text(r#"{"op":1,"d":{"rpcVersion":1}}"#.to_string());
/// let incoming = decode_frame(&frame, WireEncoding::Json).unwrap();
/// assert_eq!(incoming.op, 1);
/// ```
pub fn decode_frame(
    frame: &EncodedFrame,
    encoding: WireEncoding,
) -> Result<IncomingFrame, ProtocolError> {
    let mut document: Value = decode_as(frame, encoding)?;

    let op = match document.get("op") {
        None | Some(Value::Null) => return Err(ProtocolError::MissingOpCode),
        Some(op) => op.as_u64().ok_or(ProtocolError::InvalidOpCodeType)?,
    };
    let d = document
        .as_object_mut()
        .and_then(|map| map.remove("d"))
        .unwrap_or(Value::Null);

    Ok(IncomingFrame { op, d })
}

/// Decodes a frame straight into a typed value.
///
/// Used by clients and tests that know which payload shape to expect.
///
/// # Errors
///
/// Same mismatch and malformed-data errors as [`decode_frame`].
pub fn decode_as<T: DeserializeOwned>(
    frame: &EncodedFrame,
    encoding: WireEncoding,
) -> Result<T, ProtocolError> {
    let malformed = |message: String| ProtocolError::Malformed { encoding, message };
    match (encoding, frame) {
        (WireEncoding::Json, EncodedFrame::Text(text)) => {
            serde_json::from_str(text).map_err(|e| malformed(e.to_string()))
        }
        (WireEncoding::MsgPack, EncodedFrame::Binary(bytes)) => {
            rmp_serde::from_slice(bytes).map_err(|e| malformed(e.to_string()))
        }
        _ => Err(ProtocolError::EncodingMismatch {
            expected: encoding,
            received: frame.kind(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
