use crate::application::scheduler::{
    BackoffPolicy, JobOutcome, NowProvider, RefreshScheduler, ScheduledJob,
};
use crate::domain::calendar_index::index_calendar_json;
use crate::domain::models::{Notification, ProfileSnapshot, ScheduledReminder};
use crate::domain::reminders::{plan_contest_reminders, streak_nudge, ReminderOffsets};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::Notifier;
use crate::infrastructure::reminder_store::ReminderStore;
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;

const NOTIFY_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

pub struct ReminderService {
    store: Arc<dyn ReminderStore>,
    scheduler: RefreshScheduler,
    notifier: Arc<dyn Notifier>,
    offsets: ReminderOffsets,
    now_provider: NowProvider,
}

impl ReminderService {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        scheduler: RefreshScheduler,
        notifier: Arc<dyn Notifier>,
        offsets: ReminderOffsets,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
            offsets,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Persists and arms every future contest reminder in the snapshot.
    /// Re-syncing the same contest replaces its rows and jobs.
    pub async fn sync_reminders(&self, snapshot: &ProfileSnapshot) -> Result<usize, InfraError> {
        let reminders = plan_contest_reminders(snapshot, self.offsets, (self.now_provider)());
        let store = Arc::clone(&self.store);
        let to_store = reminders.clone();
        tokio::task::spawn_blocking(move || {
            to_store
                .iter()
                .try_for_each(|reminder| store.upsert(reminder))
        })
        .await
        .map_err(|error| InfraError::Task(error.to_string()))??;

        for reminder in &reminders {
            self.arm(reminder).await;
        }
        tracing::info!(username = %snapshot.username, count = reminders.len(), "contest reminders synced");
        Ok(reminders.len())
    }

    /// Re-arms reminders persisted by an earlier run.
    pub async fn restore_pending(&self) -> Result<usize, InfraError> {
        let store = Arc::clone(&self.store);
        let now = (self.now_provider)();
        let pending = tokio::task::spawn_blocking(move || store.list_pending(now))
            .await
            .map_err(|error| InfraError::Task(error.to_string()))??;
        for reminder in &pending {
            self.arm(reminder).await;
        }
        Ok(pending.len())
    }

    /// Returns whether a nudge was sent.
    pub fn nudge_if_at_risk(&self, snapshot: &ProfileSnapshot, zone: Tz) -> Result<bool, InfraError> {
        let today = (self.now_provider)().with_timezone(&zone).date_naive();
        let counts = index_calendar_json(snapshot.submission_calendar.as_deref(), zone);
        match streak_nudge(snapshot, &counts, today) {
            Some(notification) => {
                self.notifier.notify(&notification)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn arm(&self, reminder: &ScheduledReminder) {
        let notification = Notification {
            key: reminder.job_name(),
            title: reminder.title.clone(),
            body: reminder.body.clone(),
        };
        let notifier = Arc::clone(&self.notifier);
        let job = ScheduledJob::new(move || {
            let notifier = Arc::clone(&notifier);
            let notification = notification.clone();
            async move {
                match notifier.notify(&notification) {
                    Ok(()) => JobOutcome::Success,
                    Err(error) => {
                        tracing::warn!(key = %notification.key, error = %error, "reminder delivery failed");
                        JobOutcome::Retry
                    }
                }
            }
        })
        .with_backoff(BackoffPolicy::Indefinite {
            delay: NOTIFY_RETRY_DELAY,
        });
        self.scheduler
            .register_exact(&reminder.job_name(), reminder.fire_at, job)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::tests::{fixed_time, sample_snapshot};
    use crate::domain::models::UpcomingContest;
    use crate::infrastructure::notifier::tests::RecordingNotifier;
    use crate::infrastructure::reminder_store::InMemoryReminderStore;
    use chrono::Duration as ChronoDuration;
    use tokio::time::{sleep, timeout};

    fn frozen() -> NowProvider {
        Arc::new(|| fixed_time("2026-10-18T08:00:00Z"))
    }

    #[tokio::test]
    async fn sync_persists_and_arms_each_phase_once() {
        let store = Arc::new(InMemoryReminderStore::default());
        let scheduler = RefreshScheduler::new().with_now_provider(frozen());
        let service = ReminderService::new(
            Arc::clone(&store) as Arc<dyn ReminderStore>,
            scheduler.clone(),
            Arc::new(RecordingNotifier::default()),
            ReminderOffsets::with_lead_minutes(15),
        )
        .with_now_provider(frozen());
        let snapshot = sample_snapshot("alice");

        assert_eq!(service.sync_reminders(&snapshot).await.expect("sync"), 3);
        assert_eq!(service.sync_reminders(&snapshot).await.expect("resync"), 3);

        let pending = store.list_pending(fixed_time("2026-10-18T08:00:00Z")).expect("pending");
        assert_eq!(pending.len(), 3);
        assert_eq!(
            scheduler.scheduled_names().await,
            vec![
                "reminder:weekly-contest-470:pre".to_string(),
                "reminder:weekly-contest-470:start".to_string(),
                "reminder:weekly-contest-470:summary".to_string(),
            ]
        );
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn restore_rearms_what_was_persisted() {
        let store = Arc::new(InMemoryReminderStore::default());
        let first = ReminderService::new(
            Arc::clone(&store) as Arc<dyn ReminderStore>,
            RefreshScheduler::new().with_now_provider(frozen()),
            Arc::new(RecordingNotifier::default()),
            ReminderOffsets::with_lead_minutes(15),
        )
        .with_now_provider(frozen());
        first.sync_reminders(&sample_snapshot("alice")).await.expect("sync");

        let scheduler = RefreshScheduler::new().with_now_provider(frozen());
        let restarted = ReminderService::new(
            Arc::clone(&store) as Arc<dyn ReminderStore>,
            scheduler.clone(),
            Arc::new(RecordingNotifier::default()),
            ReminderOffsets::with_lead_minutes(15),
        )
        .with_now_provider(frozen());

        assert_eq!(restarted.restore_pending().await.expect("restore"), 3);
        assert!(scheduler.is_scheduled("reminder:weekly-contest-470:start").await);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn due_reminders_reach_the_notifier() {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = RefreshScheduler::new();
        let service = ReminderService::new(
            Arc::new(InMemoryReminderStore::default()),
            scheduler.clone(),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            ReminderOffsets::with_lead_minutes(0),
        );
        let mut snapshot = sample_snapshot("alice");
        snapshot.contest.upcoming = vec![UpcomingContest {
            title: "Biweekly Contest 168".to_string(),
            title_slug: "biweekly-contest-168".to_string(),
            start_time: Utc::now() + ChronoDuration::milliseconds(80),
            duration_seconds: 5400,
        }];

        service.sync_reminders(&snapshot).await.expect("sync");
        timeout(std::time::Duration::from_secs(2), async {
            while notifier.sent().len() < 2 {
                sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pre and start delivered");

        let mut keys = notifier.sent().into_iter().map(|sent| sent.key).collect::<Vec<_>>();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "reminder:biweekly-contest-168:pre".to_string(),
                "reminder:biweekly-contest-168:start".to_string(),
            ]
        );
        assert!(scheduler.is_scheduled("reminder:biweekly-contest-168:summary").await);
        scheduler.shutdown().await;
    }

    #[test]
    fn nudge_only_fires_when_today_is_empty_and_a_streak_exists() {
        let notifier = Arc::new(RecordingNotifier::default());
        let at = |now: &'static str| {
            ReminderService::new(
                Arc::new(InMemoryReminderStore::default()),
                RefreshScheduler::new(),
                Arc::clone(&notifier) as Arc<dyn Notifier>,
                ReminderOffsets::with_lead_minutes(15),
            )
            .with_now_provider(Arc::new(move || fixed_time(now)))
        };
        let snapshot = sample_snapshot("alice");

        assert!(!at("2026-10-18T20:00:00Z").nudge_if_at_risk(&snapshot, Tz::UTC).expect("nudge"));
        assert!(at("2026-10-19T20:00:00Z").nudge_if_at_risk(&snapshot, Tz::UTC).expect("nudge"));

        let mut broken = snapshot.clone();
        broken.streak.current_streak = 0;
        assert!(!at("2026-10-19T20:00:00Z").nudge_if_at_risk(&broken, Tz::UTC).expect("nudge"));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, "streak:alice:2026-10-19");
    }
}
