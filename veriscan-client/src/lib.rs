//! VERISCAN client library.
//!
//! Resilient access to the content-authenticity analysis service: cached
//! reads, bounded retries, bearer credentials, and live progress tracking for
//! analysis jobs.

pub mod api_client;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod inflight;
pub mod notifications;
pub mod persistence;
pub mod progress;
pub mod rate_limit;
pub mod realtime;
pub mod retry;
pub mod sessions;
pub mod transport;

pub use api_client::{ApiClient, ClientOptions};
pub use auth::AuthGuard;
pub use cache::{MemoryRequestCache, RequestCache};
pub use config::ClientConfig;
pub use error::ClientError;
pub use notifications::NotificationBridge;
pub use realtime::SessionOutcome;
pub use transport::{ApiResponse, HttpTransport, Transport};
