//! Request executor used when the server runs without a host application.
//!
//! It answers `GetVersion` so clients can probe the server, and reports every
//! other request type as unknown.

use hostlink_core::protocol::messages::{CURRENT_RPC_VERSION, SUPPORTED_RPC_VERSIONS};
use hostlink_core::{Request, RequestResult, RequestStatus};
use serde_json::json;

use crate::application::executor::RequestExecutor;

/// Request types this executor understands.
pub const AVAILABLE_REQUESTS: &[&str] = &["GetVersion"];

#[derive(Debug, Clone, Default)]
pub struct StandaloneExecutor;

impl StandaloneExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl RequestExecutor for StandaloneExecutor {
    fn process(&self, request: &Request) -> RequestResult {
        match request.request_type.as_str() {
            "GetVersion" => RequestResult::success(Some(json!({
                "serverVersion": env!("CARGO_PKG_VERSION"),
                "rpcVersion": CURRENT_RPC_VERSION,
                "supportedRpcVersions": SUPPORTED_RPC_VERSIONS,
                "availableRequests": AVAILABLE_REQUESTS,
            }))),
            other => RequestResult::error(
                RequestStatus::UnknownRequestType,
                format!("Your request type ({other}) is not valid."),
            ),
        }
    }
}
