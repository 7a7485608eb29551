//! Short-lived client-side cache in front of the assignment endpoint.
//!
//! Assignments are sticky on the server, so a persisted outcome can be
//! replayed locally for a while without asking again. The cache never buckets
//! an identity itself; a miss always goes to the [`AssignmentSource`].

use std::{
  future::Future,
  num::NonZeroUsize,
  sync::{Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use anyhow::Result;
use cohort_core::assignment::AssignOutcome;
use lru::LruCache;
use tokio::time::Instant;
use uuid::Uuid;

/// Anything that can produce an authoritative assignment outcome.
pub trait AssignmentSource: Send + Sync {
  fn fetch_assignment(
    &self,
    experiment_id: Uuid,
    identity: &str,
    segment: &str,
  ) -> impl Future<Output = Result<AssignOutcome>> + Send;
}

/// Cache sizing and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  pub ttl:      Duration,
  pub capacity: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl:      Duration::from_secs(5 * 60),
      capacity: 1024,
    }
  }
}

type Key = (Uuid, String, String);

struct Entry {
  outcome:   AssignOutcome,
  stored_at: Instant,
}

/// An [`AssignmentSource`] wrapped with a bounded, TTL-limited LRU.
///
/// Only `assigned` and `excluded` outcomes are cached. `not_eligible` answers
/// and errors always pass straight through.
pub struct CachedAssigner<Src> {
  source:  Src,
  ttl:     Duration,
  entries: Mutex<LruCache<Key, Entry>>,
}

impl<Src: AssignmentSource> CachedAssigner<Src> {
  pub fn new(source: Src, config: CacheConfig) -> Self {
    let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
    Self {
      source,
      ttl: config.ttl,
      entries: Mutex::new(LruCache::new(capacity)),
    }
  }

  pub fn source(&self) -> &Src { &self.source }

  /// Return the cached outcome for this key, or fetch and remember it.
  pub async fn assign(
    &self,
    experiment_id: Uuid,
    identity: &str,
    segment: &str,
  ) -> Result<AssignOutcome> {
    let key = (experiment_id, identity.to_owned(), segment.to_owned());

    if let Some(hit) = self.lookup(&key) {
      tracing::debug!(%experiment_id, identity, "assignment cache hit");
      return Ok(hit);
    }

    let outcome = self.source.fetch_assignment(experiment_id, identity, segment).await?;
    if outcome.is_persisted() {
      self.lock().put(key, Entry {
        outcome:   outcome.clone(),
        stored_at: Instant::now(),
      });
    }
    Ok(outcome)
  }

  /// Drop every entry belonging to `experiment_id`.
  pub fn invalidate(&self, experiment_id: Uuid) {
    let mut entries = self.lock();
    let stale: Vec<Key> = entries
      .iter()
      .filter(|(key, _)| key.0 == experiment_id)
      .map(|(key, _)| key.clone())
      .collect();
    for key in stale {
      entries.pop(&key);
    }
  }

  pub fn clear(&self) { self.lock().clear(); }

  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  fn lookup(&self, key: &Key) -> Option<AssignOutcome> {
    let mut entries = self.lock();
    let fresh = entries.get(key).map(|e| e.stored_at.elapsed() < self.ttl)?;
    if fresh {
      entries.get(key).map(|e| e.outcome.clone())
    } else {
      entries.pop(key);
      None
    }
  }

  fn lock(&self) -> MutexGuard<'_, LruCache<Key, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
