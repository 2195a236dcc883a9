//! Values exchanged with the host's command executor.

use serde_json::Value;

// ── Status codes ──────────────────────────────────────────────────────────────

/// Outcome code of a single request, reported in `requestStatus.code`.
///
/// Request-level failures never close the connection; they travel back to the
/// client as one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestStatus {
    Unknown = 0,
    /// For internal use: "no error so far".
    NoError = 10,
    Success = 100,
    MissingRequestType = 203,
    UnknownRequestType = 204,
    GenericError = 205,
    UnsupportedRequestBatchExecutionType = 206,
    NotReady = 207,
    MissingRequestField = 300,
    MissingRequestData = 301,
    InvalidRequestField = 400,
    InvalidRequestFieldType = 401,
    RequestFieldOutOfRange = 402,
    RequestFieldEmpty = 403,
    TooManyRequestFields = 404,
    OutputRunning = 500,
    ResourceNotFound = 600,
    ResourceAlreadyExists = 601,
    RequestProcessingFailed = 700,
    CannotAct = 703,
}

impl RequestStatus {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// `requestStatus.result` is true only for [`RequestStatus::Success`].
    pub fn is_success(self) -> bool {
        self == RequestStatus::Success
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// How a batch is scheduled.
///
/// The wire names are the strings accepted in a RequestBatch's
/// `executionType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BatchExecutionType {
    /// Run every sub-request in order, immediately.
    #[default]
    SerialRealtime,
    /// Same ordering as `SerialRealtime`, but wait for the host's next frame.
    SerialFrame,
    /// Spread sub-requests across the worker pool; no shared variables.
    Parallel,
}

impl BatchExecutionType {
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "SERIAL_REALTIME" => Some(BatchExecutionType::SerialRealtime),
            "SERIAL_FRAME" => Some(BatchExecutionType::SerialFrame),
            "PARALLEL" => Some(BatchExecutionType::Parallel),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            BatchExecutionType::SerialRealtime => "SERIAL_REALTIME",
            BatchExecutionType::SerialFrame => "SERIAL_FRAME",
            BatchExecutionType::Parallel => "PARALLEL",
        }
    }

    pub fn is_serial(self) -> bool {
        !matches!(self, BatchExecutionType::Parallel)
    }
}

/// One command handed to the executor.
///
/// `request_data` is always an object or [`Value::Null`]; non-object
/// `requestData` from the wire is normalised to `Null` before a `Request` is
/// built.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_type: String,
    pub request_data: Value,
    /// The client's correlation id, echoed in the reply.
    pub request_id: Option<Value>,
    /// Set only for sub-requests of a batch.
    pub execution_type: Option<BatchExecutionType>,
}

impl Request {
    pub fn new(request_type: impl Into<String>, request_data: Value) -> Self {
        Self {
            request_type: request_type.into(),
            request_data: normalise_data(request_data),
            request_id: None,
            execution_type: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<Value>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_execution_type(mut self, execution_type: BatchExecutionType) -> Self {
        self.execution_type = Some(execution_type);
        self
    }
}

fn normalise_data(data: Value) -> Value {
    if data.is_object() {
        data
    } else {
        Value::Null
    }
}

// ── Result ────────────────────────────────────────────────────────────────────

/// What the executor returns for one [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    pub status: RequestStatus,
    pub comment: Option<String>,
    pub response_data: Option<Value>,
}

impl RequestResult {
    /// A successful result, with or without a response object.
    pub fn success(response_data: Option<Value>) -> Self {
        Self {
            status: RequestStatus::Success,
            comment: None,
            response_data,
        }
    }

    /// A failed result carrying a human-readable comment.
    pub fn error(status: RequestStatus, comment: impl Into<String>) -> Self {
        Self {
            status,
            comment: Some(comment.into()),
            response_data: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
