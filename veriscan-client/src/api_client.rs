//! Composition of credentials, caching, retries, and progress tracking.
//!
//! Request pipeline for [`ApiClient::execute`]:
//!
//! ```text
//!   authorize ─▶ cache lookup ─hit─▶ cached ApiResponse
//!                     │miss
//!                     ▼
//!              in-flight claim ─follower─▶ leader's result
//!                     │leader
//!                     ▼
//!              RetryingTransport ─▶ AuthGuard::observe ─▶ cache store (2xx)
//! ```
//!
//! A 401 that tears down credentials also clears the response cache, as do
//! [`ApiClient::sign_in`] and [`ApiClient::sign_out`]; cache keys do not
//! include the token.
//!
//! Analysis submissions add upload validation and client-side rate limiting
//! in front of the pipeline and a progress stream behind it.

use crate::auth::AuthGuard;
use crate::cache::RequestCache;
use crate::config::ClientConfig;
use crate::inflight::{Claim, InFlightRequests};
use crate::notifications::NotificationBridge;
use crate::persistence::PersistenceError;
use crate::progress::ProgressSession;
use crate::rate_limit::RateLimiter;
use crate::realtime::{offer, SessionOutcome, SessionRunner, DEFAULT_IDLE_TIMEOUT};
use crate::retry::{RetryPolicy, RetryingTransport};
use crate::sessions::{Registration, SessionRegistry};
use crate::transport::{ApiResponse, HttpTransport, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veriscan_core::validation::content_type_for;
use veriscan_core::{
    AnalysisCompletion, AnalyzeResponse, ApiError, Method, ProgressSnapshot, RequestBody,
    RequestDescriptor, UploadFile, UploadPolicy, DEFAULT_MAX_RETRIES,
};

pub const ANALYZE_PATH: &str = "/api/analyze";
pub const PROGRESS_PATH: &str = "/api/progress";
pub const HISTORY_PATH: &str = "/api/history";
pub const STATS_PATH: &str = "/api/stats";
pub const UPLOAD_FIELD: &str = "file";

/// Tunables for an [`ApiClient`] independent of how requests are transmitted.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub max_retries: u32,
    pub retry: RetryPolicy,
    pub idle_timeout: Duration,
    pub upload_policy: UploadPolicy,
    /// `(max_requests, window)` for analysis submissions; `None` disables the limit.
    pub analysis_rate_limit: Option<(usize, Duration)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry: RetryPolicy::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            upload_policy: UploadPolicy::default(),
            analysis_rate_limit: None,
        }
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            retry: RetryPolicy::from(&config.retry),
            idle_timeout: config.stream.idle_timeout(),
            upload_policy: config.upload_policy(),
            analysis_rate_limit: Some((
                config.rate_limit.analysis_max_requests,
                config.rate_limit.analysis_window(),
            )),
        }
    }
}

pub struct ApiClient<T = HttpTransport> {
    transport: RetryingTransport<T>,
    cache: Arc<dyn RequestCache>,
    auth: Arc<AuthGuard>,
    sessions: SessionRegistry,
    runner: SessionRunner,
    upload_policy: UploadPolicy,
    analysis_limiter: Option<RateLimiter>,
    in_flight: InFlightRequests,
    max_retries: u32,
}

impl ApiClient<HttpTransport> {
    pub fn from_config(
        config: &ClientConfig,
        cache: Arc<dyn RequestCache>,
        auth: Arc<AuthGuard>,
    ) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(transport, cache, auth, ClientOptions::from(config)))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(
        transport: T,
        cache: Arc<dyn RequestCache>,
        auth: Arc<AuthGuard>,
        options: ClientOptions,
    ) -> Self {
        let analysis_limiter = options
            .analysis_rate_limit
            .map(|(max_requests, window)| RateLimiter::new(max_requests, window));
        Self {
            transport: RetryingTransport::new(transport, options.retry),
            cache,
            auth,
            sessions: SessionRegistry::new(),
            runner: SessionRunner::new(options.idle_timeout),
            upload_policy: options.upload_policy,
            analysis_limiter,
            in_flight: InFlightRequests::new(),
            max_retries: options.max_retries,
        }
    }

    pub fn auth(&self) -> &Arc<AuthGuard> {
        &self.auth
    }

    pub fn cache(&self) -> &Arc<dyn RequestCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn transport(&self) -> &T {
        self.transport.inner()
    }

    /// A descriptor carrying this client's retry budget.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestDescriptor {
        RequestDescriptor::new(method, url).with_max_retries(self.max_retries)
    }

    pub async fn execute(
        &self,
        mut request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        self.auth.authorize(&mut request);

        if !request.is_cache_eligible() {
            return self.fetch(request, cancel).await;
        }

        let key = request.fingerprint();
        match self.cache.get(&key) {
            Ok(Some(entry)) => {
                debug!(url = %request.url, "Serving cached response");
                return Ok(ApiResponse::ok(entry.payload));
            }
            Ok(None) => {}
            Err(err) => warn!(url = %request.url, error = %err, "Cache read failed, fetching"),
        }

        loop {
            let follower = match self.in_flight.claim(&key) {
                Claim::Leader(leader) => {
                    let result = self.fetch(request.clone(), cancel).await;
                    if let Ok(response) = &result {
                        let stored = self
                            .cache
                            .set(key.clone(), &request.url, response.body.clone());
                        if let Err(err) = stored {
                            warn!(url = %request.url, error = %err, "Cache write failed");
                        }
                    }
                    leader.publish(&result);
                    return result;
                }
                Claim::Follower(follower) => follower,
            };

            debug!(url = %request.url, "Joining in-flight request");
            let shared = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                shared = follower.wait() => shared,
            };
            match shared {
                // The leader's caller gave up; lead a fetch of our own.
                None | Some(Err(ApiError::Cancelled)) => continue,
                Some(result) => return result,
            }
        }
    }

    /// One retried round trip, with the outcome reported to the auth guard.
    async fn fetch(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        let observed = request.clone();
        let result = self.transport.execute(request, cancel).await;
        if self.auth.observe(&observed, &result) {
            self.purge_cache("sign-in required");
        }
        result
    }

    /// Store credentials and drop responses cached under previous ones.
    pub fn sign_in(&self, token: &str, user: Option<&Value>) -> Result<(), PersistenceError> {
        self.auth.sign_in(token, user)?;
        self.purge_cache("signed in");
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), PersistenceError> {
        self.auth.sign_out()?;
        self.purge_cache("signed out");
        Ok(())
    }

    fn purge_cache(&self, reason: &str) {
        match self.cache.clear() {
            Ok(removed) => debug!(removed, reason, "Cleared response cache"),
            Err(err) => warn!(reason, error = %err, "Failed to clear response cache"),
        }
    }

    pub async fn get_json<V: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<V, ApiError> {
        self.execute(request, cancel).await?.json()
    }

    pub async fn history(
        &self,
        params: &[(String, String)],
        skip_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        let request = params
            .iter()
            .fold(self.request(Method::Get, HISTORY_PATH), |request, (key, value)| {
                request.with_param(key.as_str(), value.as_str())
            })
            .with_skip_cache(skip_cache);
        self.get_json(request, cancel).await
    }

    pub async fn stats(
        &self,
        skip_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        let request = self
            .request(Method::Get, STATS_PATH)
            .with_skip_cache(skip_cache);
        self.get_json(request, cancel).await
    }

    /// Validate, rate-limit, and upload one file.
    ///
    /// Rejections from validation or the rate limiter happen before any
    /// network traffic.
    pub async fn submit_analysis(
        &self,
        file: UploadFile,
        cancel: &CancellationToken,
    ) -> Result<AnalyzeResponse, ApiError> {
        self.upload_policy
            .validate(&file)
            .map_err(|err| ApiError::InvalidRequest {
                reason: err.to_string(),
            })?;

        if let Some(limiter) = &self.analysis_limiter {
            limiter
                .try_acquire()
                .map_err(|wait| ApiError::RateLimited {
                    retry_after_ms: wait.as_millis() as u64,
                })?;
        }

        info!(file = %file.file_name, size = file.size(), "Submitting analysis");
        let mut request = self.request(Method::Post, ANALYZE_PATH);
        request.body = Some(RequestBody::Multipart {
            field: UPLOAD_FIELD.to_string(),
            file,
        });

        let value: Value = self.get_json(request, cancel).await?;
        Ok(AnalyzeResponse::from_value(value))
    }

    /// Follow `GET /api/progress/{session_id}` until the session ends.
    ///
    /// The session is registered for the duration of the call; cancelling
    /// `cancel` or calling [`SessionRegistry::cancel`] stops it.
    pub async fn track_session(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
        updates: Option<&mpsc::Sender<ProgressSnapshot>>,
    ) -> SessionOutcome {
        let registration = self.sessions.register(session_id, cancel);
        let mut session = ProgressSession::new(session_id);
        session.connect();

        let outcome = self
            .stream_session(&mut session, &registration, updates)
            .await;

        self.sessions.release(&registration);
        debug!(session_id, status = %session.status(), "Session finished");
        outcome
    }

    async fn stream_session(
        &self,
        session: &mut ProgressSession,
        registration: &Registration,
        updates: Option<&mpsc::Sender<ProgressSnapshot>>,
    ) -> SessionOutcome {
        let cancel = registration.cancel_token();
        let mut request = self
            .request(
                Method::Get,
                format!("{PROGRESS_PATH}/{}", session.session_id()),
            )
            .with_skip_cache(true);
        self.auth.authorize(&mut request);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            opened = self.transport.inner().open_stream(&request) => opened,
        };
        if self.auth.observe(&request, &opened) {
            self.purge_cache("sign-in required");
        }

        let stream = match opened {
            Ok(stream) => stream,
            Err(ApiError::Cancelled) => {
                session.cancel();
                return SessionOutcome::Cancelled;
            }
            Err(err) => {
                session.fail(err.to_string());
                return SessionOutcome::Errored(err);
            }
        };

        self.runner
            .run(session, stream, cancel, |snapshot| {
                self.sessions.update(registration, snapshot.clone());
                offer(updates, snapshot);
            })
            .await
    }

    /// Submit `file` and wait for its terminal result on either path.
    ///
    /// `notifier` hears exactly one of `on_completion` or `on_failure`.
    pub async fn analyze(
        &self,
        file: UploadFile,
        cancel: &CancellationToken,
        notifier: &dyn NotificationBridge,
        updates: Option<&mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<AnalysisCompletion, ApiError> {
        let result = self.run_analysis(file, cancel, updates).await;
        match &result {
            Ok(completion) => {
                self.invalidate_dashboards();
                notifier.on_completion(completion);
            }
            Err(err) => {
                warn!(error = %err, "Analysis failed");
                notifier.on_failure(&err.failure());
            }
        }
        result
    }

    async fn run_analysis(
        &self,
        file: UploadFile,
        cancel: &CancellationToken,
        updates: Option<&mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<AnalysisCompletion, ApiError> {
        match self.submit_analysis(file, cancel).await? {
            AnalyzeResponse::Inline(result) => {
                debug!("Analysis returned inline result");
                Ok(AnalysisCompletion::inline(result))
            }
            AnalyzeResponse::Session(session_id) => self
                .track_session(&session_id, cancel, updates)
                .await
                .into_result(),
        }
    }

    fn invalidate_dashboards(&self) {
        for prefix in [HISTORY_PATH, STATS_PATH] {
            if let Err(err) = self.cache.invalidate_prefix(prefix) {
                warn!(prefix, error = %err, "Cache invalidation failed");
            }
        }
    }
}

/// Read a file from disk into an [`UploadFile`], inferring its content type
/// from the extension.
pub async fn load_upload(path: &Path) -> std::io::Result<UploadFile> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = content_type_for(&file_name);
    Ok(UploadFile::new(file_name, content_type, bytes))
}
