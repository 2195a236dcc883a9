//! Payload shapes for every frame the server sends.
//!
//! Inbound payloads (`Identify`, `Request`, ...) are deliberately kept as
//! untyped [`serde_json::Value`] documents: the processor must tell a missing
//! key apart from a key of the wrong type to pick the right close code, which a
//! derived `Deserialize` would collapse into one error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::request::RequestResult;
use crate::protocol::opcodes::OpCode;

// ── Protocol constants ────────────────────────────────────────────────────────

/// RPC version announced in Hello and negotiated by default.
pub const CURRENT_RPC_VERSION: u8 = 1;

/// Every RPC version an Identify may request.
pub const SUPPORTED_RPC_VERSIONS: &[u8] = &[1];

/// Returns `true` when `version` is one of [`SUPPORTED_RPC_VERSIONS`].
pub fn is_supported_rpc_version(version: u64) -> bool {
    u8::try_from(version).map_or(false, |v| SUPPORTED_RPC_VERSIONS.contains(&v))
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// The `{op, d}` envelope shared by every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame<T> {
    pub op: u8,
    pub d: T,
}

impl<T> Frame<T> {
    pub fn new(op: OpCode, d: T) -> Self {
        Self { op: op as u8, d }
    }
}

// ── Server → client payloads ──────────────────────────────────────────────────

/// `op: 0` – sent as soon as the transport accepts the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub server_version: String,
    pub rpc_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<HelloAuthentication>,
}

/// Challenge material a client needs to build its authentication string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAuthentication {
    pub challenge: String,
    pub salt: String,
}

/// `op: 2` – reply to Identify and Reidentify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedPayload {
    pub negotiated_rpc_version: u8,
}

/// `op: 5` – a host event delivered to subscribed sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event_type: String,
    pub event_intent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
}

/// The `requestStatus` object nested in every request result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatusObject {
    pub result: bool,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// `op: 7` payload, and the shape of each entry in a batch's `results`.
///
/// `request_type` and `request_id` echo whatever the client sent, so they are
/// kept as raw values rather than strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponsePayload {
    pub request_type: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub request_status: RequestStatusObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

impl RequestResponsePayload {
    /// Builds a response from an executor result.
    ///
    /// `responseData` is only carried when the executor produced a structured
    /// object; scalars and `null` are dropped.
    pub fn from_result(request_type: Value, request_id: Option<Value>, result: RequestResult) -> Self {
        let RequestResult {
            status,
            comment,
            response_data,
        } = result;
        Self {
            request_type,
            request_id,
            request_status: RequestStatusObject {
                result: status.is_success(),
                code: status.code(),
                comment,
            },
            response_data: response_data.filter(Value::is_object),
        }
    }
}

/// `op: 9` – the ordered results of a RequestBatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBatchResponsePayload {
    pub request_id: Value,
    pub results: Vec<RequestResponsePayload>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
