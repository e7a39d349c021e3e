//! Registry of concurrently tracked progress sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use veriscan_core::{ProgressSnapshot, SessionId};

#[derive(Debug)]
struct SessionEntry {
    generation: u64,
    cancel: CancellationToken,
    snapshot: Option<ProgressSnapshot>,
}

/// One runner's claim on a session id.
///
/// Updates and release through a registration only touch the entry it
/// created, so a runner displaced by a newer registration of the same id
/// cannot clobber its successor.
#[derive(Debug, Clone)]
pub struct Registration {
    session_id: SessionId,
    generation: u64,
    cancel: CancellationToken,
}

impl Registration {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Sessions keyed by id, with no cap on how many run at once.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
    generations: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        // The map holds plain data; a panic mid-update cannot leave it torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a session. Its token is a child of `parent`, so cancelling the
    /// operation cancels the session while [`SessionRegistry::cancel`] only
    /// stops this one. An existing registration for the same id is cancelled
    /// and replaced.
    pub fn register(&self, session_id: &str, parent: &CancellationToken) -> Registration {
        let registration = Registration {
            session_id: session_id.to_string(),
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            cancel: parent.child_token(),
        };
        let previous = self.entries().insert(
            registration.session_id.clone(),
            SessionEntry {
                generation: registration.generation,
                cancel: registration.cancel.clone(),
                snapshot: None,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        registration
    }

    pub fn update(&self, registration: &Registration, snapshot: ProgressSnapshot) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&registration.session_id) {
            if entry.generation == registration.generation {
                entry.snapshot = Some(snapshot);
            }
        }
    }

    /// Drop the entry `registration` created, returning its last snapshot.
    /// A newer registration of the same id is left in place.
    pub fn release(&self, registration: &Registration) -> Option<ProgressSnapshot> {
        let mut entries = self.entries();
        match entries.get(&registration.session_id) {
            Some(entry) if entry.generation == registration.generation => entries
                .remove(&registration.session_id)
                .and_then(|entry| entry.snapshot),
            _ => None,
        }
    }

    pub fn cancel(&self, session_id: &str) -> bool {
        match self.entries().get(session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let entries = self.entries();
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        entries.len()
    }

    pub fn snapshot(&self, session_id: &str) -> Option<ProgressSnapshot> {
        self.entries()
            .get(session_id)
            .and_then(|entry| entry.snapshot.clone())
    }

    pub fn active_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.entries().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use veriscan_core::{SessionStatus, Stage};

    fn snapshot(id: &str, progress: u32) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id: id.to_string(),
            status: SessionStatus::Streaming,
            progress,
            message: String::new(),
            confidence: None,
            stage: Stage::from_progress(progress),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();
        let a = registry.register("a", &root);
        let b = registry.register("b", &root);

        registry.update(&a, snapshot("a", 30));
        assert!(registry.cancel("a"));
        assert!(a.cancel_token().is_cancelled());
        assert!(!b.cancel_token().is_cancelled());
        assert_eq!(registry.snapshot("a").map(|s| s.progress), Some(30));
        assert_eq!(registry.active_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_parent_cancellation_reaches_all() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();
        let a = registry.register("a", &root);
        let b = registry.register("b", &root);
        root.cancel();
        assert!(a.cancel_token().is_cancelled() && b.cancel_token().is_cancelled());
    }

    #[test]
    fn test_reregister_cancels_previous() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();
        let first = registry.register("a", &root);
        let second = registry.register("a", &root);
        assert!(first.cancel_token().is_cancelled());
        assert!(!second.cancel_token().is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_displaced_registration_leaves_successor_alone() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();
        let first = registry.register("a", &root);
        let second = registry.register("a", &root);

        registry.update(&second, snapshot("a", 40));
        registry.update(&first, snapshot("a", 99));
        assert_eq!(registry.release(&first), None);

        assert_eq!(registry.active_ids(), vec!["a".to_string()]);
        assert_eq!(registry.snapshot("a").map(|s| s.progress), Some(40));
        assert!(registry.cancel("a"));
        assert!(second.cancel_token().is_cancelled());
        assert_eq!(registry.release(&second).map(|s| s.progress), Some(40));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_and_unknown() {
        let registry = SessionRegistry::new();
        let a = registry.register("a", &CancellationToken::new());
        let ghost = SessionRegistry::new().register("ghost", &CancellationToken::new());
        registry.update(&a, snapshot("a", 90));
        registry.update(&ghost, snapshot("ghost", 10));
        assert_eq!(registry.release(&a).map(|s| s.progress), Some(90));
        assert!(registry.is_empty());
        assert!(!registry.cancel("a"));
        assert_eq!(registry.cancel_all(), 0);
    }
}
