use chrono::{
    DateTime, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_ATTEMPTS: u32 = 5;

pub type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;
pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type Release = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Retry,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    Keep,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Exponential { initial: Duration, max_attempts: u32 },
    Indefinite { delay: Duration },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: DEFAULT_BACKOFF_INITIAL,
            max_attempts: DEFAULT_BACKOFF_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt once `failed_attempts` runs asked to retry.
    /// `None` means the job has used up its attempts.
    pub fn delay_for(&self, failed_attempts: u32) -> Option<Duration> {
        match *self {
            Self::Exponential {
                initial,
                max_attempts,
            } => {
                if failed_attempts == 0 || failed_attempts >= max_attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(failed_attempts - 1);
                Some(initial.saturating_mul(factor))
            }
            Self::Indefinite { delay } => Some(delay),
        }
    }
}

#[derive(Clone)]
pub struct ScheduledJob {
    run: JobFn,
    backoff: BackoffPolicy,
}

impl ScheduledJob {
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        Self {
            run: Arc::new(move || Box::pin(run()) as JobFuture),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    async fn run_to_completion(&self, name: &str, state: &RunState) -> JobOutcome {
        self.run_within(name, None, state).await
    }

    /// Gives up instead of sleeping past `deadline`.
    async fn run_until(
        &self,
        name: &str,
        deadline: DateTime<Utc>,
        now_provider: &NowProvider,
        state: &RunState,
    ) -> JobOutcome {
        self.run_within(name, Some((deadline, now_provider)), state)
            .await
    }

    async fn run_within(
        &self,
        name: &str,
        window: Option<(DateTime<Utc>, &NowProvider)>,
        state: &RunState,
    ) -> JobOutcome {
        let mut failed_attempts = 0u32;
        loop {
            if !state.begin() {
                tracing::debug!(job = %name, "superseded before the attempt started");
                return JobOutcome::Failure;
            }
            let outcome = (self.run)().await;
            let keep_going = state.finish();
            match outcome {
                JobOutcome::Retry => {
                    failed_attempts = failed_attempts.saturating_add(1);
                    let Some(delay) = self.backoff.delay_for(failed_attempts) else {
                        tracing::warn!(job = %name, attempts = failed_attempts, "job gave up after retries");
                        return JobOutcome::Failure;
                    };
                    if !keep_going {
                        return JobOutcome::Failure;
                    }
                    if let Some((deadline, now_provider)) = window {
                        let resume_at = ChronoDuration::from_std(delay)
                            .ok()
                            .and_then(|delay| now_provider().checked_add_signed(delay));
                        if resume_at.is_none_or(|at| at >= deadline) {
                            tracing::warn!(job = %name, attempts = failed_attempts, %deadline, "retry window closed");
                            return JobOutcome::Failure;
                        }
                    }
                    tracing::debug!(job = %name, attempt = failed_attempts, delay_ms = delay.as_millis() as u64, "job asked to retry");
                    sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }
}

/// Tracks whether a registration is mid-attempt so a replacement can wait for
/// the attempt instead of aborting it.
#[derive(Debug, Default)]
struct RunState {
    running: AtomicBool,
    superseded: AtomicBool,
}

impl RunState {
    /// False when the registration was superseded before the attempt began.
    fn begin(&self) -> bool {
        self.running.store(true, Ordering::SeqCst);
        if self.superseded.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// False when the registration was superseded while the attempt ran.
    fn finish(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        !self.superseded.load(Ordering::SeqCst)
    }

    fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    /// An idle task is aborted now; a running attempt completes and the task
    /// then stops on its own.
    fn supersede(&self, handle: &JoinHandle<()>) {
        self.superseded.store(true, Ordering::SeqCst);
        if !self.running.load(Ordering::SeqCst) {
            handle.abort();
        }
    }
}

/// A once-a-day alarm. It fires for the armed date only; the next day must be
/// armed explicitly with `rearm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyAlarm {
    armed_for: NaiveDate,
    time_of_day: NaiveTime,
    zone: Tz,
}

impl DailyAlarm {
    pub fn armed(armed_for: NaiveDate, time_of_day: NaiveTime, zone: Tz) -> Self {
        Self {
            armed_for,
            time_of_day,
            zone,
        }
    }

    /// Arms for the next occurrence of `time_of_day` strictly after `now`.
    pub fn next_after(now: DateTime<Utc>, time_of_day: NaiveTime, zone: Tz) -> Self {
        let mut alarm = Self::armed(now.with_timezone(&zone).date_naive(), time_of_day, zone);
        while alarm.fire_at() <= now {
            alarm = alarm.rearm();
        }
        alarm
    }

    pub fn armed_for(&self) -> NaiveDate {
        self.armed_for
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        let local = self.armed_for.and_time(self.time_of_day);
        match self.zone.from_local_datetime(&local) {
            LocalResult::Single(at) => at.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Skipped by a DST jump: fire at the same wall-clock offset an hour on.
            LocalResult::None => self
                .zone
                .from_local_datetime(&(local + ChronoDuration::hours(1)))
                .earliest()
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
        }
    }

    pub fn rearm(&self) -> Self {
        Self {
            armed_for: self.armed_for.succ_opt().unwrap_or(self.armed_for),
            ..*self
        }
    }
}

struct Registration {
    generation: u64,
    handle: JoinHandle<()>,
    state: Arc<RunState>,
}

/// Named background jobs. Registering under a name that is already taken
/// either keeps the pending job or supersedes it. A superseded job that is
/// mid-attempt finishes that attempt and does not run again.
#[derive(Clone)]
pub struct RefreshScheduler {
    jobs: Arc<Mutex<HashMap<String, Registration>>>,
    next_generation: Arc<AtomicU64>,
    now_provider: NowProvider,
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Runs `job` every `interval`, first run one interval from now.
    /// Returns false when `Keep` left an existing registration in place.
    pub async fn register_periodic(
        &self,
        name: &str,
        interval: Duration,
        policy: ExistingWorkPolicy,
        job: ScheduledJob,
    ) -> bool {
        let task_name = name.to_string();
        self.register(name, policy, move |state, _| {
            run_periodic(task_name, interval, job, state)
        })
        .await
    }

    pub async fn register_one_shot(
        &self,
        name: &str,
        delay: Duration,
        policy: ExistingWorkPolicy,
        job: ScheduledJob,
    ) -> bool {
        let task_name = name.to_string();
        self.register(name, policy, move |state, release| async move {
            sleep(delay).await;
            let outcome = job.run_to_completion(&task_name, &state).await;
            tracing::info!(job = %task_name, outcome = ?outcome, "one-shot job finished");
            release.await;
        })
        .await
    }

    /// Fires once at `fire_at`, replacing any pending job with the same name.
    /// A time in the past fires immediately.
    pub async fn register_exact(&self, name: &str, fire_at: DateTime<Utc>, job: ScheduledJob) {
        let delay = self.delay_until(fire_at);
        self.register_one_shot(name, delay, ExistingWorkPolicy::Replace, job)
            .await;
    }

    pub async fn schedule_daily(&self, name: &str, alarm: DailyAlarm, job: ScheduledJob) {
        let task_name = name.to_string();
        let now_provider = Arc::clone(&self.now_provider);
        self.register(name, ExistingWorkPolicy::Replace, move |state, _| {
            run_daily(task_name, alarm, job, now_provider, state)
        })
        .await;
    }

    pub async fn cancel(&self, name: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.remove(name) {
            Some(registration) => {
                registration.handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, name: &str) -> bool {
        let jobs = self.jobs.lock().await;
        jobs.get(name)
            .is_some_and(|registration| !registration.handle.is_finished())
    }

    pub async fn scheduled_names(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        let mut names = jobs
            .iter()
            .filter(|(_, registration)| !registration.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, registration) in jobs.drain() {
            registration.handle.abort();
        }
    }

    fn delay_until(&self, fire_at: DateTime<Utc>) -> Duration {
        (fire_at - (self.now_provider)())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// `make_task` receives the run state and a future that unregisters this
    /// generation; one-shot tasks await it when they finish.
    async fn register<F, Fut>(&self, name: &str, policy: ExistingWorkPolicy, make_task: F) -> bool
    where
        F: FnOnce(Arc<RunState>, Release) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().await;
        if let Some(existing) = jobs.get(name) {
            if !existing.handle.is_finished() && policy == ExistingWorkPolicy::Keep {
                tracing::debug!(job = %name, "keeping existing registration");
                return false;
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let registry = Arc::clone(&self.jobs);
        let key = name.to_string();
        let release: Release = Box::pin(async move {
            let mut jobs = registry.lock().await;
            if jobs
                .get(&key)
                .is_some_and(|registration| registration.generation == generation)
            {
                jobs.remove(&key);
            }
        });

        let state = Arc::new(RunState::default());
        let handle = tokio::spawn(make_task(Arc::clone(&state), release));
        let registration = Registration {
            generation,
            handle,
            state,
        };
        if let Some(previous) = jobs.insert(name.to_string(), registration) {
            previous.state.supersede(&previous.handle);
            tracing::debug!(job = %name, "superseded existing registration");
        }
        true
    }
}

async fn run_periodic(name: String, interval: Duration, job: ScheduledJob, state: Arc<RunState>) {
    loop {
        sleep(interval).await;
        let outcome = job.run_to_completion(&name, &state).await;
        if state.is_superseded() {
            return;
        }
        tracing::info!(job = %name, outcome = ?outcome, "periodic job finished");
    }
}

/// Retries for one occurrence stop at the next occurrence's fire time, so the
/// alarm is always re-armed for the following day.
async fn run_daily(
    name: String,
    mut alarm: DailyAlarm,
    job: ScheduledJob,
    now_provider: NowProvider,
    state: Arc<RunState>,
) {
    loop {
        let wait = (alarm.fire_at() - now_provider())
            .to_std()
            .unwrap_or(Duration::ZERO);
        sleep(wait).await;
        let next_fire_at = alarm.rearm().fire_at();
        let outcome = job
            .run_until(&name, next_fire_at, &now_provider, &state)
            .await;
        if state.is_superseded() {
            return;
        }

        let now = now_provider();
        alarm = alarm.rearm();
        while alarm.fire_at() < now {
            alarm = alarm.rearm();
        }
        tracing::info!(job = %name, outcome = ?outcome, next = %alarm.armed_for(), "daily alarm re-armed");
    }
}
