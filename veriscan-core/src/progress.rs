//! Progress events, session status, and analysis completion shapes.

use crate::{SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// PROGRESS EVENTS
// ============================================================================

/// One event from `GET /api/progress/{session_id}`.
///
/// The server does not guarantee monotonic or unique progress values.
/// Fields beyond `progress`, `message` and `confidence` are preserved in
/// `extra` so the terminal event can carry a result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressEvent {
    pub fn new(progress: u32, message: impl Into<String>) -> Self {
        Self {
            progress,
            message: message.into(),
            confidence: None,
            extra: Map::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// An event at or beyond 100% ends the session.
    pub fn is_terminal(&self) -> bool {
        self.progress >= 100
    }

    /// Parse one `data:` payload. Failures become [`ProgressFrame::Malformed`].
    pub fn parse(data: &str) -> ProgressFrame {
        match serde_json::from_str::<ProgressEvent>(data) {
            Ok(event) => ProgressFrame::Update(event),
            Err(err) => ProgressFrame::Malformed {
                raw: data.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Validated stream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressFrame {
    Update(ProgressEvent),
    Malformed { raw: String, reason: String },
}

// ============================================================================
// SESSION STATE
// ============================================================================

/// Lifecycle of a progress session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    /// States in which the stream is open and events are accepted.
    pub fn accepts_events(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UI-facing label derived from a progress percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Uploading,
    DeepLearning,
    ForensicAnalysis,
    FinalDecision,
}

impl Stage {
    pub fn from_progress(progress: u32) -> Self {
        match progress {
            0..=9 => Self::Initializing,
            10..=39 => Self::Uploading,
            40..=69 => Self::DeepLearning,
            70..=99 => Self::ForensicAnalysis,
            _ => Self::FinalDecision,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Uploading => "Uploading",
            Self::DeepLearning => "Deep Learning",
            Self::ForensicAnalysis => "Forensic Analysis",
            Self::FinalDecision => "Final Decision",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only view of a session published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub progress: u32,
    pub message: String,
    pub confidence: Option<f64>,
    pub stage: Stage,
    pub updated_at: Timestamp,
}

// ============================================================================
// ANALYSIS RESPONSES
// ============================================================================

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeResponse {
    /// Long-running job; progress is streamed under this id.
    Session(SessionId),
    /// The server already finished; the body is the result.
    Inline(Value),
}

impl AnalyzeResponse {
    /// A non-empty string `session_id` selects the streamed path; anything
    /// else is treated as the terminal result.
    pub fn from_value(value: Value) -> Self {
        let session_id = value
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        match session_id {
            Some(id) => Self::Session(id),
            None => Self::Inline(value),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Session(id) => Some(id),
            Self::Inline(_) => None,
        }
    }
}

/// Unified completion payload for both the inline and the streamed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCompletion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub result: Value,
}

impl AnalysisCompletion {
    pub fn inline(result: Value) -> Self {
        Self {
            session_id: None,
            result,
        }
    }

    pub fn streamed(session_id: impl Into<SessionId>, terminal: &ProgressEvent) -> Self {
        Self {
            session_id: Some(session_id.into()),
            result: serde_json::to_value(terminal).unwrap_or(Value::Null),
        }
    }

    /// `authenticity_score` as reported by the backend, when present.
    pub fn authenticity_score(&self) -> Option<f64> {
        self.result.get("authenticity_score").and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_event() {
        let frame =
            ProgressEvent::parse(r#"{"progress":55,"message":"Running models","confidence":0.8}"#);
        match frame {
            ProgressFrame::Update(event) => {
                assert_eq!(event.progress, 55);
                assert_eq!(event.message, "Running models");
                assert_eq!(event.confidence, Some(0.8));
                assert!(!event.is_terminal());
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_keeps_extra_fields() {
        let frame =
            ProgressEvent::parse(r#"{"progress":100,"message":"done","authenticity_score":91.5}"#);
        let ProgressFrame::Update(event) = frame else {
            panic!("expected update");
        };
        assert!(event.is_terminal());
        assert_eq!(event.extra.get("authenticity_score"), Some(&json!(91.5)));
    }

    #[test]
    fn test_parse_missing_message_defaults_empty() {
        let ProgressFrame::Update(event) = ProgressEvent::parse(r#"{"progress":5}"#) else {
            panic!("expected update");
        };
        assert_eq!(event.message, "");
    }

    #[test]
    fn test_parse_malformed_payloads() {
        for raw in [
            "not json",
            r#"{"message":"no progress"}"#,
            r#"{"progress":-3}"#,
            r#"{"progress":"ten"}"#,
        ] {
            match ProgressEvent::parse(raw) {
                ProgressFrame::Malformed { raw: kept, .. } => assert_eq!(kept, raw),
                other => panic!("expected malformed for {raw}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_over_100_is_terminal() {
        assert!(ProgressEvent::new(120, "").is_terminal());
    }

    #[test]
    fn test_stage_thresholds() {
        assert_eq!(Stage::from_progress(0), Stage::Initializing);
        assert_eq!(Stage::from_progress(10), Stage::Uploading);
        assert_eq!(Stage::from_progress(39), Stage::Uploading);
        assert_eq!(Stage::from_progress(40), Stage::DeepLearning);
        assert_eq!(Stage::from_progress(70), Stage::ForensicAnalysis);
        assert_eq!(Stage::from_progress(99), Stage::ForensicAnalysis);
        assert_eq!(Stage::from_progress(100), Stage::FinalDecision);
        assert_eq!(Stage::DeepLearning.to_string(), "Deep Learning");
    }

    #[test]
    fn test_status_classification() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Errored.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Streaming.is_terminal());
        assert!(SessionStatus::Connecting.accepts_events());
        assert!(!SessionStatus::Idle.accepts_events());
    }

    #[test]
    fn test_analyze_response_detection() {
        assert_eq!(
            AnalyzeResponse::from_value(json!({"session_id": "abc"})),
            AnalyzeResponse::Session("abc".to_string())
        );

        let inline = json!({"authenticity_score": 87.0, "verdict": "authentic"});
        assert_eq!(
            AnalyzeResponse::from_value(inline.clone()),
            AnalyzeResponse::Inline(inline)
        );

        let empty_id = json!({"session_id": ""});
        assert_eq!(AnalyzeResponse::from_value(empty_id.clone()).session_id(), None);

        let numeric_id = json!({"session_id": 42});
        assert_eq!(
            AnalyzeResponse::from_value(numeric_id.clone()),
            AnalyzeResponse::Inline(numeric_id)
        );
    }

    #[test]
    fn test_completion_shapes_match() {
        let inline = AnalysisCompletion::inline(json!({"authenticity_score": 40.0}));
        assert_eq!(inline.session_id, None);
        assert_eq!(inline.authenticity_score(), Some(40.0));

        let mut terminal = ProgressEvent::new(100, "Analysis complete");
        terminal.extra.insert("authenticity_score".into(), json!(73.0));
        let streamed = AnalysisCompletion::streamed("s-1", &terminal);
        assert_eq!(streamed.session_id.as_deref(), Some("s-1"));
        assert_eq!(streamed.result["progress"], json!(100));
        assert_eq!(streamed.authenticity_score(), Some(73.0));
    }
}
