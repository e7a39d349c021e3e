//! Progress session state machine and SSE framing.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──event──▶ Streaming ──event <100──▶ Streaming
//!                         │                    │
//!                         ├──event ≥100────────┴──────────────▶ Completed
//!                         ├──transport error ──────────────────▶ Errored
//!   any non-terminal ─────┴──cancel────────────────────────────▶ Cancelled
//! ```
//!
//! Malformed events never cause a transition. Once a terminal state is
//! reached every further input is ignored, so completion is reported once.

use chrono::Utc;
use tracing::{debug, warn};
use veriscan_core::{
    AnalysisCompletion, ApiError, ProgressEvent, ProgressFrame, ProgressSnapshot, SessionId,
    SessionStatus, Stage,
};

/// What a single input did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Connecting,
    Updated(ProgressSnapshot),
    Completed(AnalysisCompletion),
    Errored(String),
    Cancelled,
    /// A malformed frame was dropped; state is unchanged.
    Dropped { reason: String },
    /// Input arrived in a state that does not accept it.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ProgressSession {
    session_id: SessionId,
    status: SessionStatus,
    progress: u32,
    message: String,
    confidence: Option<f64>,
    last_event: Option<ProgressEvent>,
}

impl ProgressSession {
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Idle,
            progress: 0,
            message: String::new(),
            confidence: None,
            last_event: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn stage(&self) -> Stage {
        Stage::from_progress(self.progress)
    }

    pub fn last_event(&self) -> Option<&ProgressEvent> {
        self.last_event.as_ref()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id: self.session_id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            confidence: self.confidence,
            stage: self.stage(),
            updated_at: Utc::now(),
        }
    }

    /// Idle → Connecting, once the stream is being opened.
    pub fn connect(&mut self) -> Transition {
        if self.status != SessionStatus::Idle {
            return Transition::Ignored;
        }
        self.status = SessionStatus::Connecting;
        Transition::Connecting
    }

    pub fn apply(&mut self, frame: ProgressFrame) -> Transition {
        if !self.status.accepts_events() {
            debug!(session_id = %self.session_id, status = %self.status, "Ignoring event");
            return Transition::Ignored;
        }

        let event = match frame {
            ProgressFrame::Update(event) => event,
            ProgressFrame::Malformed { raw, reason } => {
                warn!(
                    session_id = %self.session_id,
                    %reason,
                    raw = %truncate(&raw, 200),
                    "Dropping malformed progress event"
                );
                return Transition::Dropped { reason };
            }
        };

        self.progress = event.progress;
        self.message = event.message.clone();
        self.confidence = event.confidence;

        if event.is_terminal() {
            self.status = SessionStatus::Completed;
            let completion = AnalysisCompletion::streamed(self.session_id.clone(), &event);
            self.last_event = Some(event);
            debug!(session_id = %self.session_id, "Session completed");
            return Transition::Completed(completion);
        }

        self.status = SessionStatus::Streaming;
        self.last_event = Some(event);
        Transition::Updated(self.snapshot())
    }

    /// Transport-level failure while the stream is open.
    pub fn fail(&mut self, reason: impl Into<String>) -> Transition {
        if !self.status.accepts_events() {
            return Transition::Ignored;
        }
        let reason = reason.into();
        warn!(session_id = %self.session_id, %reason, "Session errored");
        self.status = SessionStatus::Errored;
        Transition::Errored(reason)
    }

    /// Caller-initiated. A no-op on a session that already ended.
    pub fn cancel(&mut self) -> Transition {
        if self.status.is_terminal() {
            return Transition::Ignored;
        }
        debug!(session_id = %self.session_id, "Session cancelled");
        self.status = SessionStatus::Cancelled;
        Transition::Cancelled
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Longest event, in bytes, the decoder buffers before giving up on a stream.
pub const MAX_PENDING_EVENT_BYTES: usize = 1024 * 1024;

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines and even UTF-8 sequences. Lines end with `\n`,
/// `\r\n` or a lone `\r`, and a blank line ends the event. Comment lines
/// and fields other than `data` are skipped. Multiple `data` lines are
/// joined with `\n`. An unterminated event at end of stream is discarded.
///
/// Every input byte is scanned once. An event that grows past `max_pending`
/// bytes without terminating is an error.
#[derive(Debug)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
    pending: usize,
    after_cr: bool,
    max_pending: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            line: Vec::new(),
            data: Vec::new(),
            pending: 0,
            after_cr: false,
            max_pending,
        }
    }

    /// Feed a chunk; returns the `data` payload of every completed event.
    pub fn push(&mut self, mut chunk: &[u8]) -> Result<Vec<String>, ApiError> {
        let mut payloads = Vec::new();

        if self.after_cr {
            self.after_cr = false;
            if let Some(rest) = chunk.strip_prefix(b"\n") {
                chunk = rest;
            }
        }

        while let Some(at) = chunk.iter().position(|byte| *byte == b'\n' || *byte == b'\r') {
            self.extend_line(&chunk[..at])?;
            let line = std::mem::take(&mut self.line);
            if let Some(payload) = self.end_line(&line) {
                payloads.push(payload);
            }

            let mut next = at + 1;
            if chunk[at] == b'\r' {
                match chunk.get(next) {
                    Some(b'\n') => next += 1,
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            chunk = &chunk[next..];
        }
        self.extend_line(chunk)?;
        Ok(payloads)
    }

    pub fn has_pending(&self) -> bool {
        !self.line.is_empty() || !self.data.is_empty()
    }

    fn extend_line(&mut self, bytes: &[u8]) -> Result<(), ApiError> {
        self.pending += bytes.len();
        if self.pending > self.max_pending {
            return Err(ApiError::stream(format!(
                "event exceeds {} bytes without terminating",
                self.max_pending
            )));
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    fn end_line(&mut self, line: &[u8]) -> Option<String> {
        if line.is_empty() {
            self.pending = 0;
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}
