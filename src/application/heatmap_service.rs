use crate::application::apply_guard::{ApplyError, ApplyGuard, ApplyReport};
use crate::application::profile_sync::{Freshness, ProfileSyncService};
use crate::application::scheduler::{JobOutcome, NowProvider};
use crate::domain::calendar_index::index_calendar_json;
use crate::domain::heatmap_grid::{build_grid, GridRequest};
use crate::domain::layout::solve_layout;
use crate::domain::models::ProfileSnapshot;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::output::{PublishTarget, RenderRequest};
use crate::infrastructure::profile_client::ProfileSource;
use crate::infrastructure::snapshot_store::SnapshotStore;
use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Profile(#[from] InfraError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl RefreshError {
    pub fn job_outcome(&self) -> JobOutcome {
        match self {
            Self::Profile(InfraError::InvalidConfig(_)) => JobOutcome::Failure,
            Self::Profile(_) | Self::Apply(_) => JobOutcome::Retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub snapshot: ProfileSnapshot,
    pub freshness: Freshness,
    pub apply: ApplyReport,
}

#[derive(Debug, Clone)]
pub struct HeatmapSettings {
    pub username: String,
    pub time_zone: Tz,
    pub week_start: Weekday,
    pub target: PublishTarget,
    config: AppConfig,
}

impl HeatmapSettings {
    pub fn from_config(config: &AppConfig, workspace_root: &Path) -> Result<Self, InfraError> {
        let username = config
            .username
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::InvalidConfig("username is not configured".to_string()))?;
        let (target, _) = config.output_paths(workspace_root);
        Ok(Self {
            username: username.to_string(),
            time_zone: config.time_zone()?,
            week_start: config.week_start()?,
            target: target.map(PublishTarget::Path).unwrap_or(PublishTarget::Default),
            config: config.clone(),
        })
    }
}

/// Profile snapshot in, published heatmap out.
pub struct HeatmapService<C, S>
where
    C: ProfileSource,
    S: SnapshotStore,
{
    sync: Arc<ProfileSyncService<C, S>>,
    guard: Arc<ApplyGuard>,
    settings: HeatmapSettings,
    now_provider: NowProvider,
}

impl<C, S> HeatmapService<C, S>
where
    C: ProfileSource + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(
        sync: Arc<ProfileSyncService<C, S>>,
        guard: Arc<ApplyGuard>,
        settings: HeatmapSettings,
    ) -> Self {
        Self {
            sync,
            guard,
            settings,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn settings(&self) -> &HeatmapSettings {
        &self.settings
    }

    pub fn render_request(&self, snapshot: &ProfileSnapshot, now: DateTime<Utc>) -> RenderRequest {
        let zone = self.settings.time_zone;
        let today = now.with_timezone(&zone).date_naive();
        let counts = index_calendar_json(snapshot.submission_calendar.as_deref(), zone);
        let grid = build_grid(
            &GridRequest {
                today,
                week_start: self.settings.week_start,
                mode: self.settings.config.grid_mode(today),
            },
            &counts,
        );
        let layout = solve_layout(&self.settings.config.layout_request(grid.num_weeks()));
        RenderRequest {
            username: snapshot.username.clone(),
            grid,
            layout,
            generated_at: now,
        }
    }

    pub async fn apply_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<ApplyReport, ApplyError> {
        let request = self.render_request(snapshot, (self.now_provider)());
        self.guard.apply(&request, &self.settings.target).await
    }

    /// Paints the cached snapshot straight away, then the fresh one if the
    /// remote answers. The result reflects the last emission.
    pub async fn refresh(&self) -> Result<RefreshReport, RefreshError> {
        let mut updates = self.sync.fetch_profile(&self.settings.username);
        let mut last: Option<Result<RefreshReport, ApplyError>> = None;

        while let Some(update) = updates.recv().await {
            let freshness = if update.is_fresh() {
                Freshness::Fresh
            } else {
                Freshness::Stale
            };
            let snapshot = update.snapshot();
            let applied = self.apply_snapshot(snapshot).await.map(|apply| RefreshReport {
                snapshot: snapshot.clone(),
                freshness,
                apply,
            });
            if let Err(error) = &applied {
                tracing::warn!(username = %snapshot.username, freshness = ?freshness, error = %error, "heatmap apply failed");
            }
            last = Some(applied);
        }

        match last {
            Some(result) => Ok(result?),
            None => Err(RefreshError::Profile(InfraError::Unavailable(
                self.settings.username.clone(),
            ))),
        }
    }

    /// Repaints from the cache only, so the today marker follows the clock.
    pub async fn reapply_cached(&self) -> Result<ApplyReport, RefreshError> {
        let snapshot = self
            .sync
            .cached_profile(&self.settings.username)
            .await
            .ok_or_else(|| InfraError::Unavailable(self.settings.username.clone()))?;
        Ok(self.apply_snapshot(&snapshot).await?)
    }

    pub async fn latest_snapshot(&self) -> Result<ProfileSnapshot, InfraError> {
        self.sync
            .latest_profile(&self.settings.username)
            .await
            .map(|outcome| outcome.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::apply_guard::tests::RecordingPublisher;
    use crate::application::profile_sync::tests::{FakeFetch, FakeProfileSource};
    use crate::domain::models::tests::{fixed_time, sample_snapshot};
    use crate::domain::models::CachedRecord;
    use crate::infrastructure::output::{FilePublisher, JsonGridRenderer, OutputPublisher};
    use crate::infrastructure::snapshot_store::InMemorySnapshotStore;
    use chrono::NaiveDate;

    fn settings(zone: &str) -> HeatmapSettings {
        let mut config = AppConfig::default();
        config.username = Some("alice".to_string());
        config.timezone = zone.to_string();
        HeatmapSettings::from_config(&config, Path::new("/tmp")).expect("settings")
    }

    fn service(
        responses: Vec<FakeFetch>,
        cached: Option<&ProfileSnapshot>,
        publisher: Arc<dyn OutputPublisher>,
        zone: &str,
    ) -> HeatmapService<FakeProfileSource, InMemorySnapshotStore> {
        let store = Arc::new(InMemorySnapshotStore::default());
        if let Some(snapshot) = cached {
            store
                .put(&CachedRecord::from_snapshot(snapshot).expect("encode"))
                .expect("seed cache");
        }
        let sync = Arc::new(ProfileSyncService::new(
            Arc::new(FakeProfileSource::with_responses(responses)),
            store,
        ));
        let guard = Arc::new(ApplyGuard::new(Arc::new(JsonGridRenderer), publisher));
        HeatmapService::new(sync, guard, settings(zone))
            .with_now_provider(Arc::new(|| fixed_time("2026-10-18T08:00:00Z")))
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).expect("date")
    }

    #[test]
    fn missing_username_is_a_configuration_error() {
        let result = HeatmapSettings::from_config(&AppConfig::default(), Path::new("/tmp"));
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn render_request_buckets_by_the_configured_zone() {
        let snapshot = sample_snapshot("alice");
        let now = fixed_time("2026-10-18T08:00:00Z");

        let utc = service(Vec::new(), None, Arc::new(RecordingPublisher::default()), "UTC")
            .render_request(&snapshot, now);
        let today_cell = utc
            .grid
            .weeks
            .iter()
            .flatten()
            .find(|cell| cell.is_today)
            .expect("today cell");
        assert_eq!(today_cell.date, Some(date(18)));
        assert_eq!(today_cell.count, 4);
        assert_eq!(utc.grid.range_start, date(1));
        assert_eq!(utc.grid.total_count(), 4);

        let pacific = service(
            Vec::new(),
            None,
            Arc::new(RecordingPublisher::default()),
            "America/Los_Angeles",
        )
        .render_request(&snapshot, now);
        let cells = pacific.grid.weeks.iter().flatten().collect::<Vec<_>>();
        let today_cell = cells.iter().find(|cell| cell.is_today).expect("today cell");
        assert_eq!(today_cell.date, Some(date(18)));
        assert_eq!(today_cell.count, 0);
        let yesterday = cells
            .iter()
            .find(|cell| cell.date == Some(date(17)))
            .expect("yesterday cell");
        assert_eq!(yesterday.count, 4);
    }

    #[tokio::test]
    async fn refresh_paints_cached_then_fresh() {
        let cached = sample_snapshot("alice");
        let mut fresh = sample_snapshot("alice");
        fresh.streak.current_streak = 10;
        fresh.fetched_at = fixed_time("2026-10-18T08:00:00Z");
        let publisher = Arc::new(RecordingPublisher::default());
        let service = service(
            vec![FakeFetch::Success(fresh.clone())],
            Some(&cached),
            Arc::clone(&publisher) as Arc<dyn OutputPublisher>,
            "UTC",
        );

        let report = service.refresh().await.expect("refresh");

        assert_eq!(report.freshness, Freshness::Fresh);
        assert_eq!(report.snapshot, fresh);
        assert_eq!(publisher.records().len(), 2);
    }

    #[tokio::test]
    async fn refresh_without_any_profile_is_retried() {
        let publisher = Arc::new(RecordingPublisher::default());
        let service = service(
            vec![FakeFetch::NetworkError],
            None,
            Arc::clone(&publisher) as Arc<dyn OutputPublisher>,
            "UTC",
        );

        let error = service.refresh().await.expect_err("nothing to paint");
        assert!(matches!(error, RefreshError::Profile(InfraError::Unavailable(_))));
        assert_eq!(error.job_outcome(), JobOutcome::Retry);
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn stale_cache_still_reaches_the_output() {
        let dir = tempfile::tempdir().expect("temp dir");
        let output = dir.path().join("heatmap.json");
        let cached = sample_snapshot("alice");
        let service = service(
            vec![FakeFetch::Timeout],
            Some(&cached),
            Arc::new(FilePublisher::new(&output)),
            "UTC",
        );

        let report = service.refresh().await.expect("stale refresh");
        assert_eq!(report.freshness, Freshness::Stale);

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&output).expect("output")).expect("json");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["rangeStart"], "2026-10-01");
    }

    #[tokio::test]
    async fn reapply_needs_a_cached_profile() {
        let publisher = Arc::new(RecordingPublisher::default());
        let empty = service(
            Vec::new(),
            None,
            Arc::clone(&publisher) as Arc<dyn OutputPublisher>,
            "UTC",
        );
        assert!(matches!(
            empty.reapply_cached().await,
            Err(RefreshError::Profile(InfraError::Unavailable(_)))
        ));

        let cached = sample_snapshot("alice");
        let seeded = service(
            Vec::new(),
            Some(&cached),
            Arc::clone(&publisher) as Arc<dyn OutputPublisher>,
            "UTC",
        );
        seeded.reapply_cached().await.expect("reapply");
        assert_eq!(publisher.records().len(), 1);
    }
}
