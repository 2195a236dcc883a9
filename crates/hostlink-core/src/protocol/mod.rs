//! Wire protocol: opcodes, close codes, payload shapes and the frame codec.

pub mod codec;
pub mod messages;
pub mod opcodes;

pub use codec::{decode_frame, encode_frame, EncodedFrame, IncomingFrame, ProtocolError, WireEncoding};
pub use messages::{CURRENT_RPC_VERSION, SUPPORTED_RPC_VERSIONS};
pub use opcodes::{CloseCode, OpCode};
