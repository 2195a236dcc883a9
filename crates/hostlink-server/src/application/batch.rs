//! Batch execution: one RequestBatch, many executor calls.
//!
//! # Execution types
//!
//! | Type              | When it runs            | Order      | Variables |
//! |-------------------|-------------------------|------------|-----------|
//! | `SERIAL_REALTIME` | immediately             | array      | shared    |
//! | `SERIAL_FRAME`    | after the next host tick| array      | shared    |
//! | `PARALLEL`        | on the worker pool      | none       | none      |
//!
//! Whatever the type, the results come back in the order of the `requests`
//! array, one result per entry.
//!
//! # Variables
//!
//! Serial batches carry a variable map seeded from the batch's `variables`
//! object.  A sub-request may declare:
//!
//! - `inputVariables: {"field": "var"}` – before the call, copy variable
//!   `var` into `requestData.field`;
//! - `outputVariables: {"var": "field"}` – after the call, copy
//!   `responseData.field` into variable `var`.
//!
//! Unknown variables and missing response fields are skipped.

use std::sync::Arc;

use hostlink_core::protocol::messages::RequestResponsePayload;
use hostlink_core::{BatchExecutionType, Request, RequestResult, RequestStatus, Session};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::application::executor::{execute_guarded, RequestExecutor};
use crate::application::frame_clock::FrameWaiter;
use crate::application::worker_pool::WorkerPool;

/// Variable context of one batch invocation.
pub type BatchVariables = Map<String, Value>;

/// One parsed entry of a batch's `requests` array.
#[derive(Debug, Clone)]
struct BatchStep {
    request: Request,
    request_type: Value,
    input_variables: Map<String, Value>,
    output_variables: Map<String, Value>,
}

impl BatchStep {
    /// Parses a sub-request.  Entries that cannot be executed become their
    /// final result straight away.
    fn parse(entry: Value, execution_type: BatchExecutionType) -> Result<Self, RequestResponsePayload> {
        let Value::Object(mut fields) = entry else {
            return Err(RequestResponsePayload::from_result(
                Value::Null,
                None,
                RequestResult::error(RequestStatus::MissingRequestType, "Your request is not an object."),
            ));
        };

        let request_type = fields.remove("requestType").unwrap_or(Value::Null);
        let request_id = fields.remove("requestId").filter(|id| !id.is_null());
        let Some(name) = request_type.as_str() else {
            return Err(RequestResponsePayload::from_result(
                request_type,
                request_id,
                RequestResult::error(
                    RequestStatus::MissingRequestType,
                    "Your request's `requestType` is missing or not a string.",
                ),
            ));
        };

        let request = Request::new(name, fields.remove("requestData").unwrap_or(Value::Null))
            .with_request_id(request_id)
            .with_execution_type(execution_type);

        Ok(Self {
            request,
            request_type,
            input_variables: take_object(&mut fields, "inputVariables"),
            output_variables: take_object(&mut fields, "outputVariables"),
        })
    }

    fn into_response(self, result: RequestResult) -> RequestResponsePayload {
        RequestResponsePayload::from_result(self.request_type, self.request.request_id, result)
    }
}

fn take_object(fields: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match fields.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Copies `inputVariables` from the context into the request data.
fn substitute_inputs(step: &mut BatchStep, variables: &BatchVariables) {
    for (field, name) in &step.input_variables {
        let Some(value) = name.as_str().and_then(|name| variables.get(name)) else {
            debug!("batch input variable for `{field}` is not set; skipping");
            continue;
        };
        let data = &mut step.request.request_data;
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Value::Object(map) = data {
            map.insert(field.clone(), value.clone());
        }
    }
}

/// Copies declared response fields into the context.
fn capture_outputs(step: &BatchStep, result: &RequestResult, variables: &mut BatchVariables) {
    let Some(Value::Object(response)) = &result.response_data else {
        return;
    };
    for (name, field) in &step.output_variables {
        if let Some(value) = field.as_str().and_then(|field| response.get(field)) {
            variables.insert(name.clone(), value.clone());
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Runs batches against one executor.
#[derive(Clone)]
pub struct BatchEngine {
    executor: Arc<dyn RequestExecutor>,
    pool: WorkerPool,
    frames: FrameWaiter,
}

impl BatchEngine {
    pub fn new(executor: Arc<dyn RequestExecutor>, pool: WorkerPool, frames: FrameWaiter) -> Self {
        Self {
            executor,
            pool,
            frames,
        }
    }

    /// Workers available to `PARALLEL` batches.
    pub fn max_workers(&self) -> usize {
        self.pool.max_workers()
    }

    /// Executes `requests` and returns one result per entry, in input order.
    ///
    /// `variables` is ignored for `PARALLEL`; callers reject that combination
    /// before getting here.
    pub async fn run(
        &self,
        session: &Session,
        execution_type: BatchExecutionType,
        requests: Vec<Value>,
        variables: BatchVariables,
    ) -> Vec<RequestResponsePayload> {
        debug!(
            "session {}: running {} batch of {} request(s)",
            session.remote_address(),
            execution_type.wire_name(),
            requests.len()
        );
        match execution_type {
            BatchExecutionType::SerialRealtime => self.run_serial(requests, execution_type, variables),
            BatchExecutionType::SerialFrame => {
                self.frames.next_frame().await;
                self.run_serial(requests, execution_type, variables)
            }
            BatchExecutionType::Parallel => self.run_parallel(requests).await,
        }
    }

    fn run_serial(
        &self,
        requests: Vec<Value>,
        execution_type: BatchExecutionType,
        mut variables: BatchVariables,
    ) -> Vec<RequestResponsePayload> {
        requests
            .into_iter()
            .map(|entry| match BatchStep::parse(entry, execution_type) {
                Err(rejected) => rejected,
                Ok(mut step) => {
                    substitute_inputs(&mut step, &variables);
                    let result = execute_guarded(&*self.executor, &step.request);
                    capture_outputs(&step, &result, &mut variables);
                    step.into_response(result)
                }
            })
            .collect()
    }

    async fn run_parallel(&self, requests: Vec<Value>) -> Vec<RequestResponsePayload> {
        let mut results: Vec<Option<RequestResponsePayload>> = Vec::with_capacity(requests.len());
        let mut pending = Vec::new();

        for (index, entry) in requests.into_iter().enumerate() {
            match BatchStep::parse(entry, BatchExecutionType::Parallel) {
                Err(rejected) => results.push(Some(rejected)),
                Ok(step) => {
                    results.push(None);
                    let executor = Arc::clone(&self.executor);
                    let fallback = (step.request_type.clone(), step.request.request_id.clone());
                    let job = self.pool.spawn_blocking(move || {
                        let result = execute_guarded(&*executor, &step.request);
                        step.into_response(result)
                    });
                    pending.push((index, fallback, job));
                }
            }
        }

        // Each job writes back into the slot of the entry it came from, so
        // completion order never leaks into the response.
        for (index, (request_type, request_id), job) in pending {
            let response = match job.await {
                Ok(Some(response)) => response,
                _ => {
                    warn!("parallel batch request #{index} did not complete");
                    RequestResponsePayload::from_result(
                        request_type,
                        request_id,
                        RequestResult::error(
                            RequestStatus::RequestProcessingFailed,
                            "The request failed to complete.",
                        ),
                    )
                }
            };
            results[index] = Some(response);
        }

        results.into_iter().flatten().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::frame_clock::FrameClock;
    use hostlink_core::{EventSubscription, WireEncoding};
    use serde_json::json;
    use tokio::runtime::Handle;
    use tokio_test::{assert_pending, assert_ready, task};

    /// `SetValue` echoes `value`; `ReadValue` echoes `observed`; `Boom` panics.
    fn executor() -> Arc<dyn RequestExecutor> {
        Arc::new(|request: &Request| match request.request_type.as_str() {
            "SetValue" => RequestResult::success(Some(json!({"value": request.request_data["value"]}))),
            "ReadValue" => RequestResult::success(Some(json!({"observed": request.request_data["observed"]}))),
            "Boom" => panic!("executor failure"),
            other => RequestResult::error(RequestStatus::UnknownRequestType, format!("unknown {other}")),
        })
    }

    fn session() -> Session {
        Session::new("127.0.0.1:1", WireEncoding::Json, EventSubscription::ALL)
    }

    fn engine(clock: &FrameClock) -> BatchEngine {
        BatchEngine::new(executor(), WorkerPool::new(4, Handle::current()), clock.waiter())
    }

    fn set_then_read(n: usize) -> Vec<Value> {
        (0..n)
            .flat_map(|i| {
                [
                    json!({"requestType": "SetValue", "requestData": {"value": i}, "outputVariables": {"v": "value"}}),
                    json!({"requestType": "ReadValue", "inputVariables": {"observed": "v"}}),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_serial_batch_reads_previous_step_variable() {
        // Arrange
        let clock = FrameClock::new();
        let engine = engine(&clock);

        // Act
        let results = engine
            .run(&session(), BatchExecutionType::SerialRealtime, set_then_read(5), Map::new())
            .await;

        // Assert
        assert_eq!(results.len(), 10);
        for i in 0..5 {
            assert_eq!(results[2 * i + 1].response_data, Some(json!({"observed": i})));
        }
    }

    #[tokio::test]
    async fn test_seeded_variables_are_visible_to_first_step() {
        let clock = FrameClock::new();
        let mut seed = Map::new();
        seed.insert("v".to_string(), json!("seeded"));
        let results = engine(&clock)
            .run(
                &session(),
                BatchExecutionType::SerialRealtime,
                vec![json!({"requestType": "ReadValue", "inputVariables": {"observed": "v"}})],
                seed,
            )
            .await;
        assert_eq!(results[0].response_data, Some(json!({"observed": "seeded"})));
    }

    #[tokio::test]
    async fn test_invalid_entries_keep_their_slot() {
        // Arrange
        let clock = FrameClock::new();
        let requests = vec![
            json!("not an object"),
            json!({"requestId": "no-type"}),
            json!({"requestType": "SetValue", "requestId": "ok", "requestData": {"value": 1}}),
        ];

        // Act
        let results = engine(&clock)
            .run(&session(), BatchExecutionType::SerialRealtime, requests, Map::new())
            .await;

        // Assert
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].request_status.code, RequestStatus::MissingRequestType.code());
        assert_eq!(results[1].request_id, Some(json!("no-type")));
        assert_eq!(results[1].request_status.code, RequestStatus::MissingRequestType.code());
        assert!(results[2].request_status.result);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_results_follow_input_order() {
        // Arrange
        let clock = FrameClock::new();
        let requests: Vec<Value> = (0..16)
            .map(|i| json!({"requestType": "SetValue", "requestId": i, "requestData": {"value": i}}))
            .collect();

        // Act
        let results = engine(&clock)
            .run(&session(), BatchExecutionType::Parallel, requests, Map::new())
            .await;

        // Assert
        let ids: Vec<Value> = results.iter().map(|r| r.request_id.clone().unwrap()).collect();
        let expected: Vec<Value> = (0..16).map(|i| json!(i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_batch_with_variable_steps_completes() {
        let clock = FrameClock::new();
        let results = engine(&clock)
            .run(&session(), BatchExecutionType::Parallel, set_then_read(4), Map::new())
            .await;
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.request_status.result));
    }

    #[tokio::test]
    async fn test_parallel_panic_becomes_processing_failure() {
        // Arrange
        let clock = FrameClock::new();
        let requests = vec![
            json!({"requestType": "Boom", "requestId": "a"}),
            json!({"requestType": "SetValue", "requestId": "b", "requestData": {"value": 2}}),
        ];

        // Act
        let results = engine(&clock)
            .run(&session(), BatchExecutionType::Parallel, requests, Map::new())
            .await;

        // Assert
        assert_eq!(results[0].request_id, Some(json!("a")));
        assert_eq!(results[0].request_status.code, RequestStatus::RequestProcessingFailed.code());
        assert!(results[1].request_status.result);
    }

    #[tokio::test]
    async fn test_serial_panic_becomes_processing_failure_and_batch_continues() {
        // Arrange
        let clock = FrameClock::new();
        let requests = vec![
            json!({"requestType": "SetValue", "requestData": {"value": 1}, "outputVariables": {"v": "value"}}),
            json!({"requestType": "Boom", "requestId": "a"}),
            json!({"requestType": "ReadValue", "inputVariables": {"observed": "v"}}),
        ];

        // Act
        let results = engine(&clock)
            .run(&session(), BatchExecutionType::SerialRealtime, requests, Map::new())
            .await;

        // Assert
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].request_id, Some(json!("a")));
        assert_eq!(results[1].request_status.code, RequestStatus::RequestProcessingFailed.code());
        assert_eq!(results[2].response_data, Some(json!({"observed": 1})));
    }

    #[test]
    fn test_serial_frame_batch_waits_for_tick() {
        // Arrange
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = runtime.enter();
        let clock = FrameClock::new();
        let engine = engine(&clock);
        let session = session();
        let mut batch = task::spawn(engine.run(
            &session,
            BatchExecutionType::SerialFrame,
            set_then_read(1),
            Map::new(),
        ));

        // Act / Assert
        assert_pending!(batch.poll());
        clock.tick();
        let results = assert_ready!(batch.poll());
        assert_eq!(results[1].response_data, Some(json!({"observed": 0})));
    }
}
