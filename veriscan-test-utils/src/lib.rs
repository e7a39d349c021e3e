//! VERISCAN Test Utilities
//!
//! Shared test infrastructure for the VERISCAN workspace:
//! - A scripted [`Transport`] that records every attempt
//! - A notifier that records bridge calls
//! - SSE and configuration fixtures
//! - Proptest generators for request descriptors and progress events

pub use veriscan_client::transport::{ApiResponse, ByteStream, Transport};
pub use veriscan_core::{
    AnalysisCompletion, ApiError, FailureReason, Method, ProgressEvent, RequestDescriptor,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use veriscan_client::notifications::NotificationBridge;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

enum StreamScript {
    Items { items: Vec<Result<Bytes, ApiError>>, stall: bool },
    Fail(ApiError),
}

/// Transport that replays queued outcomes in order.
///
/// `send` pops the next scripted response; once the queue is empty it either
/// fails with a network error or, after [`ScriptedTransport::hang_when_exhausted`],
/// never resolves. `open_stream` pops the next scripted stream the same way.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<(Result<ApiResponse, ApiError>, Duration)>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<RequestDescriptor>>,
    stream_requests: Mutex<Vec<RequestDescriptor>>,
    hang: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hang_when_exhausted(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn push_response(&self, response: Result<ApiResponse, ApiError>) -> &Self {
        self.push_delayed(response, Duration::ZERO)
    }

    /// Queue a response that resolves only after `delay` (tokio time).
    pub fn push_delayed(&self, response: Result<ApiResponse, ApiError>, delay: Duration) -> &Self {
        locked(&self.responses).push_back((response, delay));
        self
    }

    pub fn push_json(&self, value: serde_json::Value) -> &Self {
        self.push_response(Ok(ApiResponse::ok(value.to_string())))
    }

    /// Queue a non-2xx status as the transport would report it.
    pub fn push_status(&self, status: u16, body: &str) -> &Self {
        self.push_response(Err(ApiError::from_status(status, body.as_bytes())))
    }

    pub fn push_network_error(&self, message: &str) -> &Self {
        self.push_response(Err(ApiError::network(message)))
    }

    /// Queue a stream that yields `items` and then ends.
    pub fn push_stream(&self, items: Vec<Result<Bytes, ApiError>>) -> &Self {
        locked(&self.streams).push_back(StreamScript::Items { items, stall: false });
        self
    }

    /// Queue a stream that yields `items` and then goes silent forever.
    pub fn push_stalled_stream(&self, items: Vec<Result<Bytes, ApiError>>) -> &Self {
        locked(&self.streams).push_back(StreamScript::Items { items, stall: true });
        self
    }

    /// Queue a failure to open the stream at all.
    pub fn push_stream_error(&self, error: ApiError) -> &Self {
        locked(&self.streams).push_back(StreamScript::Fail(error));
        self
    }

    /// Number of `send` calls observed.
    pub fn attempts(&self) -> usize {
        locked(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        locked(&self.requests).clone()
    }

    pub fn streams_opened(&self) -> usize {
        locked(&self.stream_requests).len()
    }

    pub fn stream_requests(&self) -> Vec<RequestDescriptor> {
        locked(&self.stream_requests).clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<ApiResponse, ApiError> {
        locked(&self.requests).push(request.clone());
        let next = locked(&self.responses).pop_front();
        match next {
            Some((response, delay)) if delay.is_zero() => response,
            Some((response, delay)) => {
                tokio::time::sleep(delay).await;
                response
            }
            None if self.hang.load(Ordering::SeqCst) => std::future::pending().await,
            None => Err(ApiError::network("no scripted response")),
        }
    }

    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream, ApiError> {
        locked(&self.stream_requests).push(request.clone());
        let next = locked(&self.streams).pop_front();
        match next {
            Some(StreamScript::Items { items, stall: false }) => Ok(stream::iter(items).boxed()),
            Some(StreamScript::Items { items, stall: true }) => {
                Ok(stream::iter(items).chain(stream::pending()).boxed())
            }
            Some(StreamScript::Fail(error)) => Err(error),
            None => Err(ApiError::stream("no scripted stream")),
        }
    }
}

// ============================================================================
// RECORDING NOTIFIER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Notified {
    Completion(AnalysisCompletion),
    Failure(FailureReason),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<Notified>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Notified> {
        locked(&self.calls).clone()
    }

    pub fn completions(&self) -> Vec<AnalysisCompletion> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Notified::Completion(completion) => Some(completion),
                Notified::Failure(_) => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<FailureReason> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Notified::Failure(reason) => Some(reason),
                Notified::Completion(_) => None,
            })
            .collect()
    }
}

impl NotificationBridge for RecordingNotifier {
    fn on_completion(&self, completion: &AnalysisCompletion) {
        locked(&self.calls).push(Notified::Completion(completion.clone()));
    }

    fn on_failure(&self, reason: &FailureReason) {
        locked(&self.calls).push(Notified::Failure(reason.clone()));
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use serde_json::json;

    /// One SSE event carrying a progress payload.
    pub fn sse_frame(progress: u32, message: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({ "progress": progress, "message": message })
        )
    }

    /// A full event-stream body for the given progress values.
    pub fn sse_body(progress: &[u32]) -> String {
        progress
            .iter()
            .map(|value| sse_frame(*value, &format!("step {value}")))
            .collect()
    }

    /// One chunk per progress value, ready for [`ScriptedTransport::push_stream`].
    pub fn progress_chunks(progress: &[u32]) -> Vec<Result<Bytes, ApiError>> {
        progress
            .iter()
            .map(|value| Ok(Bytes::from(sse_frame(*value, &format!("step {value}")))))
            .collect()
    }

    pub fn raw_chunk(text: &str) -> Result<Bytes, ApiError> {
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// A complete, valid configuration file pointing at `api_base_url`.
    pub fn config_toml(api_base_url: &str, credentials_path: &str) -> String {
        format!(
            r#"
api_base_url = "{api_base_url}"
request_timeout_ms = 600000
credentials_path = "{credentials_path}"
sign_in_path = "/signin"

[retry]
max_retries = 3
base_delay_ms = 1000
max_delay_ms = 5000

[stream]
connect_timeout_ms = 10000
idle_timeout_ms = 300000

[upload]
max_size_mb = 500
allowed_types = ["image/*", "video/*"]

[rate_limit]
analysis_max_requests = 5
analysis_window_ms = 60000

[notifications]
analysis = true
security = true

[logging]
filter = "veriscan_client=debug,info"
json = false
"#
        )
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_method() -> impl Strategy<Value = Method> {
        prop_oneof![
            Just(Method::Get),
            Just(Method::Post),
            Just(Method::Put),
            Just(Method::Patch),
            Just(Method::Delete),
        ]
    }

    pub fn arb_path() -> impl Strategy<Value = String> {
        "/api/[a-z]{1,12}(/[a-z0-9]{1,8}){0,2}"
    }

    /// Query parameters with distinct keys.
    pub fn arb_params() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::btree_map("[a-z_]{1,8}", "[a-zA-Z0-9 ]{0,12}", 0..6)
            .prop_map(|params| params.into_iter().collect())
    }

    pub fn arb_progress_event() -> impl Strategy<Value = ProgressEvent> {
        (0u32..=120, "[a-zA-Z ]{0,24}", proptest::option::of(0.0f64..=1.0)).prop_map(
            |(progress, message, confidence)| {
                let event = ProgressEvent::new(progress, message);
                match confidence {
                    Some(confidence) => event.with_confidence(confidence),
                    None => event,
                }
            },
        )
    }

    /// Progress values that stay below the terminal threshold.
    pub fn arb_partial_progress() -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(0u32..100, 0..12)
    }
}
