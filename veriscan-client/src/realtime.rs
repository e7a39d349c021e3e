//! Drives a [`ProgressSession`] from an open event stream.

use crate::progress::{ProgressSession, SseDecoder, Transition};
use crate::transport::ByteStream;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use veriscan_core::{AnalysisCompletion, ApiError, ProgressEvent, ProgressSnapshot};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Terminal outcome of one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(AnalysisCompletion),
    Errored(ApiError),
    Cancelled,
}

impl SessionOutcome {
    pub fn into_result(self) -> Result<AnalysisCompletion, ApiError> {
        match self {
            Self::Completed(completion) => Ok(completion),
            Self::Errored(err) => Err(err),
            Self::Cancelled => Err(ApiError::Cancelled),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRunner {
    idle_timeout: Duration,
}

impl Default for SessionRunner {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionRunner {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Consume `stream` until the session reaches a terminal state.
    ///
    /// The stream is dropped (closing the connection) on return. Events are
    /// applied strictly in delivery order; `observer` sees a snapshot after
    /// every accepted update and once more on the terminal transition.
    pub async fn run<F>(
        &self,
        session: &mut ProgressSession,
        mut stream: ByteStream,
        cancel: &CancellationToken,
        mut observer: F,
    ) -> SessionOutcome
    where
        F: FnMut(ProgressSnapshot) + Send,
    {
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    session.cancel();
                    observer(session.snapshot());
                    return SessionOutcome::Cancelled;
                }
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_elapsed) => {
                    let err = ApiError::StreamIdle {
                        timeout_ms: self.idle_timeout.as_millis() as u64,
                    };
                    return fail(session, &mut observer, err);
                }
                Ok(None) => {
                    if decoder.has_pending() {
                        debug!(
                            session_id = %session.session_id(),
                            "Discarding unterminated event at end of stream"
                        );
                    }
                    let err = ApiError::stream("stream closed before completion");
                    return fail(session, &mut observer, err);
                }
                Ok(Some(Err(err))) => return fail(session, &mut observer, err),
                Ok(Some(Ok(chunk))) => chunk,
            };

            let payloads = match decoder.push(&chunk) {
                Ok(payloads) => payloads,
                Err(err) => return fail(session, &mut observer, err),
            };
            for data in payloads {
                match session.apply(ProgressEvent::parse(&data)) {
                    Transition::Completed(completion) => {
                        observer(session.snapshot());
                        return SessionOutcome::Completed(completion);
                    }
                    Transition::Updated(snapshot) => observer(snapshot),
                    Transition::Dropped { .. } | Transition::Ignored => {}
                    other => debug!(
                        session_id = %session.session_id(),
                        transition = ?other,
                        "Unexpected transition"
                    ),
                }
            }
        }
    }
}

fn fail<F: FnMut(ProgressSnapshot)>(
    session: &mut ProgressSession,
    observer: &mut F,
    err: ApiError,
) -> SessionOutcome {
    session.fail(err.to_string());
    observer(session.snapshot());
    SessionOutcome::Errored(err)
}

/// Offer a snapshot to an optional observer channel without blocking.
/// A full channel drops the snapshot.
pub fn offer(updates: Option<&mpsc::Sender<ProgressSnapshot>>, snapshot: ProgressSnapshot) {
    let Some(sender) = updates else {
        return;
    };
    if let Err(err) = sender.try_send(snapshot) {
        match err {
            mpsc::error::TrySendError::Full(snapshot) => {
                warn!(
                    session_id = %snapshot.session_id,
                    "Progress observer is lagging, dropping snapshot"
                );
            }
            mpsc::error::TrySendError::Closed(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;
    use veriscan_core::SessionStatus;

    fn chunks(parts: &[&'static str]) -> ByteStream {
        let items: Vec<Result<Bytes, ApiError>> = parts
            .iter()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect();
        stream::iter(items).boxed()
    }

    fn connected(id: &str) -> ProgressSession {
        let mut session = ProgressSession::new(id);
        session.connect();
        session
    }

    #[tokio::test]
    async fn test_run_completes_and_publishes() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = connected("s-1");
        let outcome = SessionRunner::default()
            .run(
                &mut session,
                chunks(&[
                    "data: {\"progress\":5,\"message\":\"Loading\"}\n\n",
                    "data: {\"progress\":100,\"message\":\"Done\"}\n\ndata: {\"progress\":7}\n\n",
                ]),
                &CancellationToken::new(),
                |snapshot| offer(Some(&tx), snapshot),
            )
            .await;

        let SessionOutcome::Completed(completion) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(completion.result["message"], "Done");
        assert_eq!(session.status(), SessionStatus::Completed);

        let first = rx.recv().await.expect("update");
        assert_eq!(first.progress, 5);
        let last = rx.recv().await.expect("final snapshot");
        assert_eq!(last.status, SessionStatus::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_early_close_is_an_error() {
        let mut session = connected("s-1");
        let outcome = SessionRunner::default()
            .run(
                &mut session,
                chunks(&["data: {\"progress\":40}\n\n"]),
                &CancellationToken::new(),
                |_| {},
            )
            .await;
        assert!(matches!(outcome, SessionOutcome::Errored(ApiError::Stream { .. })));
        assert_eq!(session.status(), SessionStatus::Errored);
    }

    #[tokio::test]
    async fn test_unterminated_oversized_event_errors() {
        let mut session = connected("s-1");
        let mut flood = b"data: ".to_vec();
        flood.resize(crate::progress::MAX_PENDING_EVENT_BYTES + 1, b'x');
        let items: Vec<Result<Bytes, ApiError>> = vec![Ok(Bytes::from(flood))];
        let body = stream::iter(items).chain(stream::pending()).boxed();
        let outcome = SessionRunner::default()
            .run(&mut session, body, &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, SessionOutcome::Errored(ApiError::Stream { .. })));
        assert_eq!(session.status(), SessionStatus::Errored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_errors_stalled_stream() {
        let mut session = connected("s-1");
        let stalled = chunks(&["data: {\"progress\":10}\n\n"]).chain(stream::pending()).boxed();
        let outcome = SessionRunner::new(Duration::from_secs(30))
            .run(&mut session, stalled, &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome, SessionOutcome::Errored(ApiError::StreamIdle { timeout_ms: 30_000 }));
        assert_eq!(session.progress(), 10);
    }

    #[tokio::test]
    async fn test_cancel_closes_session() {
        let mut session = connected("s-1");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut seen = Vec::new();
        let outcome = SessionRunner::default()
            .run(&mut session, stream::pending().boxed(), &cancel, |s| seen.push(s.status))
            .await;
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert_eq!(seen, vec![SessionStatus::Cancelled]);
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(SessionOutcome::Cancelled.into_result(), Err(ApiError::Cancelled));
    }
}
