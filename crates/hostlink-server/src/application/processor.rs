//! Protocol message processor: validates and dispatches one inbound frame.
//!
//! The transport decodes a frame, checks its `op` is an unsigned number, and
//! calls [`ProtocolProcessor::process`] with the owning [`Session`].  The
//! processor answers with exactly one [`ProcessOutcome`]:
//!
//! - `Reply(frame)` – encode and send `frame` to the session;
//! - `Close { code, reason }` – close the connection;
//! - `Ignore` – do nothing (the session asked to ignore invalid messages).
//!
//! # Validation order
//!
//! Before any opcode-specific logic:
//!
//! 1. `d` must be an object.  A missing `d` closes with `MissingDataKey`, a
//!    non-object closes with `InvalidDataKeyType`.
//! 2. A session that has not identified may only send Identify.  Anything else
//!    closes with `NotIdentified`.
//!
//! # Leniency
//!
//! When a session sets `ignoreInvalidMessages`, recoverable protocol
//! violations (a missing `requestId`, a bad batch field, an unknown opcode, a
//! repeated Identify) are dropped instead of closing.  Handshake failures
//! (authentication, RPC version, malformed session parameters) always close.
//!
//! # Locking
//!
//! Identify and Reidentify take the session's operation lock for the whole
//! state transition.  The lock is released before the reply is built and
//! before the security sink is notified.  Requests never take it.

use std::sync::Arc;

use hostlink_core::auth::check_authentication_string;
use hostlink_core::domain::session::SessionParameters;
use hostlink_core::protocol::messages::{
    is_supported_rpc_version, Frame, IdentifiedPayload, RequestBatchResponsePayload,
    RequestResponsePayload,
};
use hostlink_core::{
    BatchExecutionType, CloseCode, OpCode, Request, RequestResult, RequestStatus, Session,
    SubscriptionCounter,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::application::batch::BatchEngine;
use crate::application::executor::{execute_guarded, RequestExecutor};

// ── Collaborator interfaces ───────────────────────────────────────────────────

/// Receives security-relevant events so the host can alert its operator.
pub trait SecurityEventSink: Send + Sync {
    /// A client failed the authentication challenge.
    fn authentication_failed(&self, remote_address: &str);

    /// A client completed Identify.
    fn client_identified(&self, remote_address: &str);
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// The single result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Reply(Value),
    Close { code: CloseCode, reason: String },
    Ignore,
}

impl ProcessOutcome {
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        ProcessOutcome::Close {
            code,
            reason: reason.into(),
        }
    }

    fn reply<T: Serialize>(op: OpCode, payload: T) -> Self {
        match serde_json::to_value(Frame::new(op, payload)) {
            Ok(frame) => ProcessOutcome::Reply(frame),
            Err(e) => {
                error!("failed to build {op:?} reply: {e}");
                ProcessOutcome::close(CloseCode::UnknownReason, "Internal error while building a reply.")
            }
        }
    }
}

/// Close, unless the session ignores invalid messages.
fn reject(session: &Session, code: CloseCode, reason: impl Into<String>) -> ProcessOutcome {
    if session.ignore_invalid_messages() {
        ProcessOutcome::Ignore
    } else {
        ProcessOutcome::close(code, reason)
    }
}

/// Reads the optional session parameters shared by Identify and Reidentify.
fn parse_session_parameters(d: &Map<String, Value>) -> Result<SessionParameters, ProcessOutcome> {
    let mut params = SessionParameters::default();

    if let Some(value) = d.get("ignoreInvalidMessages") {
        params.ignore_invalid_messages = Some(value.as_bool().ok_or_else(|| {
            ProcessOutcome::close(
                CloseCode::InvalidDataKeyType,
                "Your `ignoreInvalidMessages` is not a boolean.",
            )
        })?);
    }

    if let Some(value) = d.get("eventSubscriptions") {
        params.event_subscriptions = Some(value.as_u64().ok_or_else(|| {
            ProcessOutcome::close(
                CloseCode::InvalidDataKeyType,
                "Your `eventSubscriptions` is not an unsigned number.",
            )
        })?);
    }

    Ok(params)
}

/// Result of the locked part of Identify.
enum IdentifyStep {
    Identified { rpc_version: u8 },
    AuthenticationFailed(ProcessOutcome),
    Rejected(ProcessOutcome),
}

// ── Processor ─────────────────────────────────────────────────────────────────

/// Validates and dispatches inbound frames.
pub struct ProtocolProcessor {
    executor: Arc<dyn RequestExecutor>,
    batches: BatchEngine,
    subscriptions: Arc<SubscriptionCounter>,
    security: Option<Arc<dyn SecurityEventSink>>,
}

impl ProtocolProcessor {
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        batches: BatchEngine,
        subscriptions: Arc<SubscriptionCounter>,
        security: Option<Arc<dyn SecurityEventSink>>,
    ) -> Self {
        Self {
            executor,
            batches,
            subscriptions,
            security,
        }
    }

    /// Processes one decoded frame for `session`.
    pub async fn process(&self, session: &Session, op: u64, d: Value) -> ProcessOutcome {
        let d = match d {
            Value::Object(map) => map,
            Value::Null => {
                return ProcessOutcome::close(
                    CloseCode::MissingDataKey,
                    "Your payload is missing data (`d`).",
                )
            }
            _ => {
                return ProcessOutcome::close(
                    CloseCode::InvalidDataKeyType,
                    "Your payload's data (`d`) is not an object.",
                )
            }
        };

        let op_code = OpCode::try_from(op).ok();
        if !session.is_identified() && op_code != Some(OpCode::Identify) {
            return ProcessOutcome::close(
                CloseCode::NotIdentified,
                "You attempted to send a non-Identify message while not identified.",
            );
        }

        match op_code {
            Some(OpCode::Identify) => self.identify(session, &d).await,
            Some(OpCode::Reidentify) => self.reidentify(session, &d).await,
            Some(OpCode::Request) => self.request(session, d),
            Some(OpCode::RequestBatch) => self.request_batch(session, d).await,
            _ => reject(session, CloseCode::UnknownOpCode, format!("Unknown OpCode: {op}")),
        }
    }

    // ── Identify / Reidentify ─────────────────────────────────────────────────

    async fn identify(&self, session: &Session, d: &Map<String, Value>) -> ProcessOutcome {
        let step = {
            let _guard = session.lock_operations().await;
            self.identify_locked(session, d)
        };

        match step {
            IdentifyStep::Identified { rpc_version } => {
                info!(
                    "session {} identified with RPC version {rpc_version}, subscriptions {:#x}",
                    session.remote_address(),
                    session.event_subscriptions()
                );
                if let Some(sink) = &self.security {
                    sink.client_identified(session.remote_address());
                }
                ProcessOutcome::reply(
                    OpCode::Identified,
                    IdentifiedPayload {
                        negotiated_rpc_version: rpc_version,
                    },
                )
            }
            IdentifyStep::AuthenticationFailed(outcome) => {
                warn!("session {} failed authentication", session.remote_address());
                if let Some(sink) = &self.security {
                    sink.authentication_failed(session.remote_address());
                }
                outcome
            }
            IdentifyStep::Rejected(outcome) => outcome,
        }
    }

    /// The state transition of Identify.  Caller holds the operation lock.
    fn identify_locked(&self, session: &Session, d: &Map<String, Value>) -> IdentifyStep {
        if session.is_identified() {
            return IdentifyStep::Rejected(reject(
                session,
                CloseCode::AlreadyIdentified,
                "You are already Identified with the server.",
            ));
        }

        if let Some(pending) = session.pending_authentication() {
            let Some(provided) = d.get("authentication") else {
                return IdentifyStep::AuthenticationFailed(ProcessOutcome::close(
                    CloseCode::AuthenticationFailed,
                    "Your payload's data is missing an `authentication` string, however authentication is required.",
                ));
            };
            let accepted = provided
                .as_str()
                .map_or(false, |s| check_authentication_string(&pending.secret, &pending.challenge, s));
            if !accepted {
                return IdentifyStep::AuthenticationFailed(ProcessOutcome::close(
                    CloseCode::AuthenticationFailed,
                    "Authentication failed.",
                ));
            }
        }

        let rpc_version = match d.get("rpcVersion") {
            None => {
                return IdentifyStep::Rejected(ProcessOutcome::close(
                    CloseCode::MissingDataKey,
                    "Your payload's data is missing an `rpcVersion`.",
                ))
            }
            Some(value) => match value.as_u64() {
                None => {
                    return IdentifyStep::Rejected(ProcessOutcome::close(
                        CloseCode::InvalidDataKeyType,
                        "Your `rpcVersion` is not an unsigned number.",
                    ))
                }
                Some(v) if !is_supported_rpc_version(v) => {
                    return IdentifyStep::Rejected(ProcessOutcome::close(
                        CloseCode::UnsupportedRpcVersion,
                        "Your requested RPC version is not supported by this server.",
                    ))
                }
                Some(v) => v as u8,
            },
        };

        let params = match parse_session_parameters(d) {
            Ok(params) => params,
            Err(outcome) => return IdentifyStep::Rejected(outcome),
        };

        session.set_rpc_version(rpc_version);
        session.apply_parameters(params);
        session.clear_authentication();
        self.subscriptions.add_refs(session.event_subscriptions());
        session.set_identified(true);

        IdentifyStep::Identified { rpc_version }
    }

    async fn reidentify(&self, session: &Session, d: &Map<String, Value>) -> ProcessOutcome {
        {
            let _guard = session.lock_operations().await;

            // Parameters are validated before the refs move, so a rejected
            // Reidentify leaves the counts untouched.
            let params = match parse_session_parameters(d) {
                Ok(params) => params,
                Err(outcome) => return outcome,
            };

            self.subscriptions.remove_refs(session.event_subscriptions());
            session.apply_parameters(params);
            self.subscriptions.add_refs(session.event_subscriptions());
        }

        info!(
            "session {} reidentified, subscriptions {:#x}",
            session.remote_address(),
            session.event_subscriptions()
        );
        ProcessOutcome::reply(
            OpCode::Identified,
            IdentifiedPayload {
                negotiated_rpc_version: session.rpc_version(),
            },
        )
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    fn request(&self, session: &Session, mut d: Map<String, Value>) -> ProcessOutcome {
        let Some(request_id) = d.remove("requestId").filter(|id| !id.is_null()) else {
            return reject(
                session,
                CloseCode::MissingDataKey,
                "Your payload's data is missing a `requestId`.",
            );
        };

        let request_type = d.remove("requestType").unwrap_or(Value::Null);
        let result = match request_type.as_str() {
            Some(name) => {
                let request = Request::new(name, d.remove("requestData").unwrap_or(Value::Null))
                    .with_request_id(Some(request_id.clone()));
                execute_guarded(&*self.executor, &request)
            }
            None => RequestResult::error(
                RequestStatus::MissingRequestType,
                "Your request's `requestType` is missing or not a string.",
            ),
        };

        ProcessOutcome::reply(
            OpCode::RequestResponse,
            RequestResponsePayload::from_result(request_type, Some(request_id), result),
        )
    }

    async fn request_batch(&self, session: &Session, mut d: Map<String, Value>) -> ProcessOutcome {
        let Some(request_id) = d.remove("requestId").filter(|id| !id.is_null()) else {
            return reject(
                session,
                CloseCode::MissingDataKey,
                "Your payload's data is missing a `requestId`.",
            );
        };

        let requests = match d.remove("requests") {
            None | Some(Value::Null) => {
                return reject(
                    session,
                    CloseCode::MissingDataKey,
                    "Your payload's data is missing an array of `requests`.",
                )
            }
            Some(Value::Array(requests)) => requests,
            Some(_) => {
                return reject(
                    session,
                    CloseCode::InvalidDataKeyType,
                    "Your `requests` is not an array.",
                )
            }
        };

        let execution_type = match d.remove("executionType") {
            None | Some(Value::Null) => BatchExecutionType::default(),
            Some(Value::String(name)) => match BatchExecutionType::from_wire(&name) {
                Some(kind) => kind,
                None => {
                    return reject(
                        session,
                        CloseCode::InvalidDataKeyValue,
                        format!("Your `executionType` ({name}) is not a recognised execution type."),
                    )
                }
            },
            Some(_) => {
                return reject(
                    session,
                    CloseCode::InvalidDataKeyType,
                    "Your `executionType` is not a string.",
                )
            }
        };

        if execution_type == BatchExecutionType::Parallel && self.batches.max_workers() < 2 {
            return reject(
                session,
                CloseCode::UnsupportedFeature,
                "Parallel request batch processing is not available on this system due to limited worker threads.",
            );
        }

        let variables = match d.remove("variables") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(_)) if execution_type == BatchExecutionType::Parallel => {
                return reject(
                    session,
                    CloseCode::UnsupportedFeature,
                    "Variables are not supported in PARALLEL mode.",
                )
            }
            Some(Value::Object(variables)) => variables,
            Some(_) => {
                return reject(
                    session,
                    CloseCode::InvalidDataKeyType,
                    "Your `variables` is not an object.",
                )
            }
        };

        let results = self
            .batches
            .run(session, execution_type, requests, variables)
            .await;

        ProcessOutcome::reply(
            OpCode::RequestBatchResponse,
            RequestBatchResponsePayload {
                request_id,
                results,
            },
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
