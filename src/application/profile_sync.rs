use crate::domain::models::{CachedRecord, ProfileSnapshot};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::profile_client::ProfileSource;
use crate::infrastructure::snapshot_store::SnapshotStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
        }
    }
}

/// One emission of the sync stream. A call yields at most one of each, and
/// `Cached` always comes first.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileUpdate {
    Cached(ProfileSnapshot),
    Fresh(ProfileSnapshot),
}

impl ProfileUpdate {
    pub fn snapshot(&self) -> &ProfileSnapshot {
        match self {
            Self::Cached(snapshot) | Self::Fresh(snapshot) => snapshot,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOutcome {
    pub snapshot: ProfileSnapshot,
    pub freshness: Freshness,
}

pub struct ProfileSyncService<C, S>
where
    C: ProfileSource,
    S: SnapshotStore,
{
    profile_source: Arc<C>,
    snapshot_store: Arc<S>,
    retry_policy: RetryPolicy,
    calendar_year: Option<i32>,
}

impl<C, S> ProfileSyncService<C, S>
where
    C: ProfileSource + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(profile_source: Arc<C>, snapshot_store: Arc<S>) -> Self {
        Self {
            profile_source,
            snapshot_store,
            retry_policy: RetryPolicy::default(),
            calendar_year: None,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Asks the remote for a specific calendar year instead of its default window.
    pub fn with_calendar_year(mut self, calendar_year: Option<i32>) -> Self {
        self.calendar_year = calendar_year;
        self
    }

    /// Serves the cached snapshot, then refreshes in the background.
    pub fn fetch_profile(self: &Arc<Self>, username: &str) -> mpsc::Receiver<ProfileUpdate> {
        let (sender, receiver) = mpsc::channel(2);
        let service = Arc::clone(self);
        let username = username.trim().to_string();
        tokio::spawn(async move {
            service.run(&username, &sender).await;
        });
        receiver
    }

    /// Drains one sync and keeps the newest snapshot. Nothing at all (no cache
    /// and a failed fetch) is reported as `Unavailable`.
    pub async fn latest_profile(&self, username: &str) -> Result<ProfileOutcome, InfraError> {
        let username = username.trim();
        let (sender, mut receiver) = mpsc::channel(2);
        self.run(username, &sender).await;
        drop(sender);

        let mut latest = None;
        while let Some(update) = receiver.recv().await {
            latest = Some(update);
        }
        match latest {
            Some(ProfileUpdate::Fresh(snapshot)) => Ok(ProfileOutcome {
                snapshot,
                freshness: Freshness::Fresh,
            }),
            Some(ProfileUpdate::Cached(snapshot)) => Ok(ProfileOutcome {
                snapshot,
                freshness: Freshness::Stale,
            }),
            None => Err(InfraError::Unavailable(username.to_string())),
        }
    }

    pub async fn run(&self, username: &str, updates: &mpsc::Sender<ProfileUpdate>) {
        if username.is_empty() {
            tracing::warn!("profile sync skipped: empty username");
            return;
        }

        if let Some(cached) = self.cached_profile(username).await {
            if updates.send(ProfileUpdate::Cached(cached)).await.is_err() {
                return;
            }
        }

        let fresh = match self.fetch_with_retry(username).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(username = %username, error = %error, "profile refresh failed; keeping cached snapshot");
                return;
            }
        };

        self.persist(username, &fresh).await;
        tracing::info!(username = %username, fetched_at = %fresh.fetched_at, "profile refreshed");
        let _ = updates.send(ProfileUpdate::Fresh(fresh)).await;
    }

    /// The cached snapshot alone, without touching the remote. Unreadable or
    /// undecodable cache entries count as absent.
    pub async fn cached_profile(&self, username: &str) -> Option<ProfileSnapshot> {
        let username = username.trim();
        let store = Arc::clone(&self.snapshot_store);
        let key = username.to_string();
        let record = match tokio::task::spawn_blocking(move || store.get(&key)).await {
            Ok(Ok(record)) => record?,
            Ok(Err(error)) => {
                tracing::warn!(username = %username, error = %error, "cached profile read failed");
                return None;
            }
            Err(error) => {
                tracing::warn!(username = %username, error = %error, "cached profile read task failed");
                return None;
            }
        };

        match record.decode() {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::warn!(username = %username, error = %error, "ignoring undecodable cached profile");
                None
            }
        }
    }

    /// A write failure is logged, not returned: the fetched snapshot is still good.
    async fn persist(&self, username: &str, snapshot: &ProfileSnapshot) {
        let mut record = match CachedRecord::from_snapshot(snapshot) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(username = %username, error = %error, "failed encoding profile for cache");
                return;
            }
        };
        record.username = username.to_string();

        let store = Arc::clone(&self.snapshot_store);
        match tokio::task::spawn_blocking(move || store.put(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(username = %username, error = %error, "failed writing profile cache");
            }
            Err(error) => {
                tracing::warn!(username = %username, error = %error, "profile cache write task failed");
            }
        }
    }

    async fn fetch_with_retry(&self, username: &str) -> Result<ProfileSnapshot, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self
                .profile_source
                .fetch_profile(username, self.calendar_year)
                .await
            {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::debug!(username = %username, attempt, delay_ms = delay, error = %error, "retrying profile fetch");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
