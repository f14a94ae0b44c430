use crate::application::apply_guard::ApplyGuard;
use crate::application::bootstrap::BootstrapResult;
use crate::application::heatmap_service::{
    HeatmapService, HeatmapSettings, RefreshError, RefreshReport,
};
use crate::application::profile_sync::{Freshness, ProfileSyncService};
use crate::application::reminder_service::ReminderService;
use crate::application::scheduler::{
    BackoffPolicy, DailyAlarm, ExistingWorkPolicy, JobOutcome, NowProvider, RefreshScheduler,
    ScheduledJob,
};
use crate::domain::reminders::ReminderOffsets;
use crate::infrastructure::config::{load_app_config, AppConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::{Notifier, TracingNotifier};
use crate::infrastructure::output::{
    FilePublisher, HeatmapRenderer, JsonGridRenderer, OutputPublisher,
};
use crate::infrastructure::profile_client::{ProfileSource, ReqwestProfileClient};
use crate::infrastructure::reminder_store::{ReminderStore, SqliteReminderStore};
use crate::infrastructure::snapshot_store::{SnapshotStore, SqliteSnapshotStore};
use chrono::{NaiveTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

pub const PROFILE_REFRESH_JOB: &str = "profile-refresh";
pub const REFRESH_NOW_JOB: &str = "refresh-now";
pub const STREAK_NUDGE_JOB: &str = "streak-nudge";
pub const MIDNIGHT_REPAINT_JOB: &str = "midnight-repaint";
const NUDGE_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);

/// Daily rolling JSON log under `logs_dir`. Keep the guard alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_tracing(logs_dir: &Path) -> Result<WorkerGuard, InfraError> {
    std::fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::daily(logs_dir, "streakgrid.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("failed to install tracing: {error}")))?;
    Ok(guard)
}

pub struct AppDeps<C, S> {
    pub profile_source: Arc<C>,
    pub snapshot_store: Arc<S>,
    pub reminder_store: Arc<dyn ReminderStore>,
    pub renderer: Arc<dyn HeatmapRenderer>,
    pub publisher: Arc<dyn OutputPublisher>,
    pub notifier: Arc<dyn Notifier>,
    pub now_provider: NowProvider,
}

/// Process root: owns the single apply guard and the scheduler.
pub struct App<C, S>
where
    C: ProfileSource,
    S: SnapshotStore,
{
    workspace_root: PathBuf,
    config: AppConfig,
    heatmap: Arc<HeatmapService<C, S>>,
    reminders: Arc<ReminderService>,
    scheduler: RefreshScheduler,
    now_provider: NowProvider,
}

impl App<ReqwestProfileClient, SqliteSnapshotStore> {
    pub fn from_workspace(bootstrap: &BootstrapResult) -> Result<Self, InfraError> {
        let config = load_app_config(&bootstrap.config_dir)?;
        let (_, default_target) = config.output_paths(&bootstrap.workspace_root);
        let deps = AppDeps {
            profile_source: Arc::new(ReqwestProfileClient::new(
                &config.endpoint,
                config.fetch_timeouts(),
            )?),
            snapshot_store: Arc::new(SqliteSnapshotStore::new(&bootstrap.database_path)),
            reminder_store: Arc::new(SqliteReminderStore::new(&bootstrap.database_path)),
            renderer: Arc::new(JsonGridRenderer),
            publisher: Arc::new(FilePublisher::new(default_target)),
            notifier: Arc::new(TracingNotifier),
            now_provider: Arc::new(Utc::now),
        };
        Self::from_parts(config, &bootstrap.workspace_root, deps)
    }
}

impl<C, S> App<C, S>
where
    C: ProfileSource + 'static,
    S: SnapshotStore + 'static,
{
    pub fn from_parts(
        config: AppConfig,
        workspace_root: &Path,
        deps: AppDeps<C, S>,
    ) -> Result<Self, InfraError> {
        config.validate()?;
        let settings = HeatmapSettings::from_config(&config, workspace_root)?;
        let scheduler = RefreshScheduler::new().with_now_provider(Arc::clone(&deps.now_provider));
        let sync = Arc::new(ProfileSyncService::new(deps.profile_source, deps.snapshot_store));
        let guard = Arc::new(ApplyGuard::new(deps.renderer, deps.publisher));
        let heatmap = Arc::new(
            HeatmapService::new(sync, guard, settings)
                .with_now_provider(Arc::clone(&deps.now_provider)),
        );
        let reminders = Arc::new(
            ReminderService::new(
                deps.reminder_store,
                scheduler.clone(),
                deps.notifier,
                ReminderOffsets::with_lead_minutes(config.reminders.contest_lead_minutes),
            )
            .with_now_provider(Arc::clone(&deps.now_provider)),
        );

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            config,
            heatmap,
            reminders,
            scheduler,
            now_provider: deps.now_provider,
        })
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub async fn refresh_now(&self) -> Result<RefreshReport, RefreshError> {
        run_refresh(&self.heatmap, &self.reminders).await
    }

    /// Queues an immediate refresh, superseding one that has not started yet.
    pub async fn request_refresh(&self) {
        self.scheduler
            .register_one_shot(
                REFRESH_NOW_JOB,
                Duration::ZERO,
                ExistingWorkPolicy::Replace,
                self.refresh_job(),
            )
            .await;
    }

    /// Registers the periodic refresh and both daily alarms, re-arms persisted
    /// reminders, then asks for one refresh right away.
    pub async fn start(&self) -> Result<(), InfraError> {
        self.scheduler
            .register_periodic(
                PROFILE_REFRESH_JOB,
                self.config.refresh_interval(),
                ExistingWorkPolicy::Keep,
                self.refresh_job(),
            )
            .await;

        let zone = self.config.time_zone()?;
        let now = (self.now_provider)();
        let nudge_at = self.config.streak_nudge_time()?;
        self.scheduler
            .schedule_daily(
                STREAK_NUDGE_JOB,
                DailyAlarm::next_after(now, nudge_at, zone),
                self.streak_nudge_job(),
            )
            .await;
        self.scheduler
            .schedule_daily(
                MIDNIGHT_REPAINT_JOB,
                DailyAlarm::next_after(now, NaiveTime::MIN, zone),
                self.midnight_repaint_job(),
            )
            .await;

        match self.reminders.restore_pending().await {
            Ok(count) => tracing::info!(count, "restored pending reminders"),
            Err(error) => tracing::warn!(error = %error, "failed to restore pending reminders"),
        }

        self.request_refresh().await;
        tracing::info!(
            workspace_root = %self.workspace_root.display(),
            jobs = ?self.scheduler.scheduled_names().await,
            "scheduler started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        tracing::info!("scheduler stopped");
    }

    fn refresh_job(&self) -> ScheduledJob {
        let heatmap = Arc::clone(&self.heatmap);
        let reminders = Arc::clone(&self.reminders);
        ScheduledJob::new(move || {
            let heatmap = Arc::clone(&heatmap);
            let reminders = Arc::clone(&reminders);
            async move {
                match run_refresh(&heatmap, &reminders).await {
                    Ok(_) => JobOutcome::Success,
                    Err(error) => error.job_outcome(),
                }
            }
        })
    }

    fn streak_nudge_job(&self) -> ScheduledJob {
        let heatmap = Arc::clone(&self.heatmap);
        let reminders = Arc::clone(&self.reminders);
        ScheduledJob::new(move || {
            let heatmap = Arc::clone(&heatmap);
            let reminders = Arc::clone(&reminders);
            async move {
                let snapshot = match heatmap.latest_snapshot().await {
                    Ok(snapshot) => snapshot,
                    Err(error) => {
                        tracing::warn!(error = %error, "streak check has no profile yet");
                        return JobOutcome::Retry;
                    }
                };
                match reminders.nudge_if_at_risk(&snapshot, heatmap.settings().time_zone) {
                    Ok(_) => JobOutcome::Success,
                    Err(error) => {
                        tracing::warn!(error = %error, "streak nudge failed");
                        JobOutcome::Retry
                    }
                }
            }
        })
        .with_backoff(BackoffPolicy::Indefinite {
            delay: NUDGE_RETRY_DELAY,
        })
    }

    fn midnight_repaint_job(&self) -> ScheduledJob {
        let heatmap = Arc::clone(&self.heatmap);
        ScheduledJob::new(move || {
            let heatmap = Arc::clone(&heatmap);
            async move {
                match heatmap.reapply_cached().await {
                    Ok(_) => JobOutcome::Success,
                    Err(error) => {
                        tracing::warn!(error = %error, "midnight repaint failed");
                        error.job_outcome()
                    }
                }
            }
        })
    }
}

/// A fresh snapshot also re-plans contest reminders; a stale one does not.
async fn run_refresh<C, S>(
    heatmap: &HeatmapService<C, S>,
    reminders: &ReminderService,
) -> Result<RefreshReport, RefreshError>
where
    C: ProfileSource + 'static,
    S: SnapshotStore + 'static,
{
    let report = heatmap.refresh().await?;
    if report.freshness == Freshness::Fresh {
        if let Err(error) = reminders.sync_reminders(&report.snapshot).await {
            tracing::warn!(username = %report.snapshot.username, error = %error, "failed to sync contest reminders");
        }
    }
    tracing::info!(
        username = %report.snapshot.username,
        freshness = ?report.freshness,
        publish_target = ?report.apply.target,
        fell_back = report.apply.fell_back,
        "heatmap applied"
    );
    Ok(report)
}
