//! The seam between the protocol layer and the host's command implementation.

use std::panic::{catch_unwind, AssertUnwindSafe};

use hostlink_core::{Request, RequestResult, RequestStatus};
use tracing::error;

/// Turns one named request into a result.
///
/// Implementations are supplied by the host application.  `process` is
/// synchronous and may block; it is called from the session's own task for
/// single requests and serial batches, and from the worker pool for parallel
/// batches, so it must be callable from several threads at once.
///
/// Request-level failures are reported through [`RequestResult::status`], never
/// by panicking.
#[cfg_attr(test, mockall::automock)]
pub trait RequestExecutor: Send + Sync {
    fn process(&self, request: &Request) -> RequestResult;
}

/// Any `Fn(&Request) -> RequestResult` closure is an executor.
impl<F> RequestExecutor for F
where
    F: Fn(&Request) -> RequestResult + Send + Sync,
{
    fn process(&self, request: &Request) -> RequestResult {
        self(request)
    }
}

/// Calls `executor`, turning a panic into `RequestProcessingFailed`.
///
/// A misbehaving executor must not unwind through the session task or a pool
/// worker; the caller always gets a result it can send back.
pub fn execute_guarded(executor: &dyn RequestExecutor, request: &Request) -> RequestResult {
    match catch_unwind(AssertUnwindSafe(|| executor.process(request))) {
        Ok(result) => result,
        Err(_) => {
            error!("executor panicked while processing {}", request.request_type);
            RequestResult::error(
                RequestStatus::RequestProcessingFailed,
                "The request failed to complete.",
            )
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
