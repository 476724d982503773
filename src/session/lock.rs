// Session lock management
//
// The lock lives inside the session document itself as the `lock` flag.
// Acquisition is a single conditional upsert `{_id, lock: 0} -> {lock: 1}`.
// When another holder has the flag set, the upsert collides with the existing
// `_id` and the store reports a duplicate key, which drives the backoff loop.

use super::backoff::BackoffPolicy;
use super::error::{SessionError, SessionResult};
use crate::store::{DocumentStore, Filter, LockState, StoreError, Update, UpdateOptions};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Acquires and releases per-session exclusive locks
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn DocumentStore>,
    policy: BackoffPolicy,
    /// Locks older than this may be taken over. `None` never steals.
    stale_after: Option<Duration>,
}

impl LockManager {
    pub fn new(store: Arc<dyn DocumentStore>, policy: BackoffPolicy) -> Self {
        Self {
            store,
            policy,
            stale_after: None,
        }
    }

    /// Allow taking over locks held longer than `stale_after`
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Acquire the lock on document `id`, waiting with exponential backoff.
    ///
    /// Creates the document when it does not exist yet. Fails with
    /// [`SessionError::LockUnavailable`] once the backoff budget is spent;
    /// any store error other than duplicate key is returned immediately.
    pub async fn acquire(&self, id: &str) -> SessionResult<()> {
        let started = Instant::now();

        if self.try_acquire(id).await? {
            log::debug!("Acquired session lock {}", id);
            return Ok(());
        }

        for (attempt, delay) in self.policy.schedule().enumerate() {
            if self.try_take_over(id).await? {
                return Ok(());
            }

            log::trace!(
                "Session lock {} busy, retry {} in {}ms",
                id,
                attempt + 1,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;

            if self.try_acquire(id).await? {
                log::debug!(
                    "Acquired session lock {} after {} retries ({}ms)",
                    id,
                    attempt + 1,
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
        }

        let waited = started.elapsed();
        log::warn!(
            "Gave up on session lock {} after {}ms",
            id,
            waited.as_millis()
        );
        Err(SessionError::LockUnavailable {
            id: id.to_string(),
            waited,
        })
    }

    /// Clear the lock flag on document `id`.
    ///
    /// Best effort: failures are logged and dropped, the next write clears
    /// the flag anyway.
    pub async fn release(&self, id: &str) {
        let update = Update::SetLock {
            state: LockState::Unlocked,
            locked_at: None,
        };
        match self
            .store
            .update_one(&Filter::by_id(id), &update, UpdateOptions::default())
            .await
        {
            Ok(outcome) if outcome.acknowledged() => log::debug!("Released session lock {}", id),
            Ok(_) => log::debug!("Release of session lock {} found no document", id),
            Err(e) => log::warn!("Failed to release session lock {}: {}", id, e),
        }
    }

    /// One conditional upsert. `Ok(false)` means somebody else holds the lock.
    async fn try_acquire(&self, id: &str) -> SessionResult<bool> {
        let filter = Filter::by_id(id).with_lock_state(LockState::Unlocked);
        let update = Update::SetLock {
            state: LockState::Locked,
            locked_at: Some(Utc::now()),
        };

        match self
            .store
            .update_one(&filter, &update, UpdateOptions::upsert())
            .await
        {
            Ok(outcome) if outcome.acknowledged() => Ok(true),
            Ok(_) => Err(StoreError::NotAcknowledged(format!("lock {}", id)).into()),
            Err(e) if e.is_duplicate_key() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Take over a lock whose `lockedAt` is older than the staleness bound
    async fn try_take_over(&self, id: &str) -> SessionResult<bool> {
        let Some(stale_after) = self.stale_after else {
            return Ok(false);
        };
        let Ok(stale_after) = chrono::Duration::from_std(stale_after) else {
            return Ok(false);
        };

        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(stale_after) else {
            return Ok(false);
        };
        let filter = Filter::by_id(id)
            .with_lock_state(LockState::Locked)
            .with_locked_before(cutoff);
        let update = Update::SetLock {
            state: LockState::Locked,
            locked_at: Some(now),
        };

        let outcome = self
            .store
            .update_one(&filter, &update, UpdateOptions::default())
            .await?;
        if outcome.acknowledged() {
            log::warn!(
                "Took over stale session lock {} (held longer than {}s)",
                id,
                stale_after.num_seconds()
            );
        }
        Ok(outcome.acknowledged())
    }
}
