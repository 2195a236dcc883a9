//! Numeric opcodes and WebSocket close codes.
//!
//! Both sets are part of the stable wire contract: clients hard-code these
//! numbers, so existing values must never be renumbered.

use serde::{Deserialize, Serialize};

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Structural purpose of a frame, carried in its `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    /// Server → client, sent once right after the connection is accepted.
    Hello = 0,
    /// Client → server, completes the handshake.
    Identify = 1,
    /// Server → client, acknowledges Identify and Reidentify.
    Identified = 2,
    /// Client → server, updates session parameters after Identify.
    Reidentify = 3,
    /// Server → client, a broadcast host event.
    Event = 5,
    /// Client → server, a single command.
    Request = 6,
    /// Server → client, the result of a single command.
    RequestResponse = 7,
    /// Client → server, an ordered list of commands.
    RequestBatch = 8,
    /// Server → client, the ordered results of a batch.
    RequestBatchResponse = 9,
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(OpCode::Hello),
            1 => Ok(OpCode::Identify),
            2 => Ok(OpCode::Identified),
            3 => Ok(OpCode::Reidentify),
            5 => Ok(OpCode::Event),
            6 => Ok(OpCode::Request),
            7 => Ok(OpCode::RequestResponse),
            8 => Ok(OpCode::RequestBatch),
            9 => Ok(OpCode::RequestBatchResponse),
            _ => Err(()),
        }
    }
}

impl TryFrom<u64> for OpCode {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, ()> {
        u8::try_from(value).map_err(|_| ())?.try_into()
    }
}

// ── Close codes ───────────────────────────────────────────────────────────────

/// Reason the server is closing a connection, sent in the WebSocket close frame.
///
/// `DontClose` is never sent; it exists so that "no close decision" has a
/// representation when a code must be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    DontClose = 0,
    UnknownReason = 4000,
    MessageDecodeError = 4002,
    MissingDataKey = 4003,
    InvalidDataKeyType = 4004,
    InvalidDataKeyValue = 4005,
    UnknownOpCode = 4006,
    NotIdentified = 4007,
    AlreadyIdentified = 4008,
    AuthenticationFailed = 4009,
    UnsupportedRpcVersion = 4010,
    SessionInvalidated = 4011,
    UnsupportedFeature = 4012,
}

impl CloseCode {
    /// The integer placed in the WebSocket close frame.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0 => Ok(CloseCode::DontClose),
            4000 => Ok(CloseCode::UnknownReason),
            4002 => Ok(CloseCode::MessageDecodeError),
            4003 => Ok(CloseCode::MissingDataKey),
            4004 => Ok(CloseCode::InvalidDataKeyType),
            4005 => Ok(CloseCode::InvalidDataKeyValue),
            4006 => Ok(CloseCode::UnknownOpCode),
            4007 => Ok(CloseCode::NotIdentified),
            4008 => Ok(CloseCode::AlreadyIdentified),
            4009 => Ok(CloseCode::AuthenticationFailed),
            4010 => Ok(CloseCode::UnsupportedRpcVersion),
            4011 => Ok(CloseCode::SessionInvalidated),
            4012 => Ok(CloseCode::UnsupportedFeature),
            _ => Err(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_try_from_accepts_every_defined_value() {
        for op in [
            OpCode::Hello,
            OpCode::Identify,
            OpCode::Identified,
            OpCode::Reidentify,
            OpCode::Event,
            OpCode::Request,
            OpCode::RequestResponse,
            OpCode::RequestBatch,
            OpCode::RequestBatchResponse,
        ] {
            assert_eq!(OpCode::try_from(op as u8), Ok(op));
        }
    }

    #[test]
    fn test_opcode_four_is_unassigned() {
        assert_eq!(OpCode::try_from(4u8), Err(()));
    }

    #[test]
    fn test_opcode_from_u64_rejects_values_above_u8() {
        assert_eq!(OpCode::try_from(256u64 + 6), Err(()));
        assert_eq!(OpCode::try_from(6u64), Ok(OpCode::Request));
    }

    #[test]
    fn test_close_code_numbers_match_wire_contract() {
        assert_eq!(CloseCode::MissingDataKey.code(), 4003);
        assert_eq!(CloseCode::NotIdentified.code(), 4007);
        assert_eq!(CloseCode::AuthenticationFailed.code(), 4009);
        assert_eq!(CloseCode::UnsupportedFeature.code(), 4012);
    }

    #[test]
    fn test_close_code_try_from_round_trips() {
        // Arrange
        let code = CloseCode::UnsupportedRpcVersion;

        // Act
        let parsed = CloseCode::try_from(code.code());

        // Assert
        assert_eq!(parsed, Ok(code));
        assert_eq!(CloseCode::try_from(4001), Err(()));
    }
}
