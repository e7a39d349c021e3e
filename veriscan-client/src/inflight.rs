//! Coalescing of identical in-flight reads.
//!
//! The first caller for a [`Fingerprint`] becomes the leader and performs
//! the fetch; callers arriving while it runs follow and receive a clone of
//! the leader's result. A leader that is dropped or cancelled without a
//! usable result releases its followers, which then race to lead a fresh
//! fetch.

use crate::transport::ApiResponse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use veriscan_core::{ApiError, Fingerprint};

pub type SharedResult = Result<ApiResponse, ApiError>;

type ResultReceiver = watch::Receiver<Option<SharedResult>>;

#[derive(Debug)]
struct Pending {
    generation: u64,
    result: ResultReceiver,
}

#[derive(Debug, Default)]
pub struct InFlightRequests {
    pending: Mutex<HashMap<Fingerprint, Pending>>,
    generations: AtomicU64,
}

pub enum Claim<'a> {
    Leader(Leader<'a>),
    Follower(Follower),
}

impl InFlightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Fingerprint, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(&self, key: &Fingerprint) -> Claim<'_> {
        let mut pending = self.pending();
        if let Some(existing) = pending.get(key) {
            return Claim::Follower(Follower {
                result: existing.result.clone(),
            });
        }

        let (sender, result) = watch::channel(None);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        pending.insert(key.clone(), Pending { generation, result });
        Claim::Leader(Leader {
            owner: self,
            key: key.clone(),
            generation,
            sender,
        })
    }

    /// Number of fingerprints with a fetch in flight.
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &Fingerprint, generation: u64) {
        let mut pending = self.pending();
        if pending.get(key).map(|entry| entry.generation) == Some(generation) {
            pending.remove(key);
        }
    }
}

/// Exclusive right to fetch one fingerprint. Dropping it without
/// publishing releases any followers empty-handed.
pub struct Leader<'a> {
    owner: &'a InFlightRequests,
    key: Fingerprint,
    generation: u64,
    sender: watch::Sender<Option<SharedResult>>,
}

impl Leader<'_> {
    pub fn publish(self, result: &SharedResult) {
        self.owner.release(&self.key, self.generation);
        // Followers may all have given up; nobody listening is fine.
        let _ = self.sender.send(Some(result.clone()));
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        self.owner.release(&self.key, self.generation);
    }
}

pub struct Follower {
    result: ResultReceiver,
}

impl Follower {
    /// The leader's result, or `None` when the leader went away without one.
    pub async fn wait(mut self) -> Option<SharedResult> {
        match self.result.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        }
    }
}
