//! VERISCAN Core - Client Wire Types
//!
//! Plain data structures shared by the client crates: request descriptors and
//! their cache fingerprints, progress events streamed by the analysis backend,
//! upload validation, and the error taxonomy surfaced to callers.
//! This crate performs no I/O.

pub mod error;
pub mod progress;
pub mod request;
pub mod validation;

use chrono::{DateTime, Utc};

pub use error::{ApiError, FailureReason};
pub use progress::{
    AnalysisCompletion, AnalyzeResponse, ProgressEvent, ProgressFrame, ProgressSnapshot,
    SessionStatus, Stage,
};
pub use request::{Fingerprint, Method, RequestBody, RequestDescriptor, UploadFile};
pub use validation::{UploadPolicy, ValidationError};

// ============================================================================
// SHARED ALIASES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Backend-issued identifier correlating an analysis job to its event stream.
pub type SessionId = String;

/// Retry budget applied when a descriptor does not set its own.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Header used to carry the bearer credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";
