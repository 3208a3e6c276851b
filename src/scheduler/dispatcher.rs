//! Time-triggered job dispatch
//!
//! Runs a background ticker that checks the job store and fires every job
//! whose time has come, unless it is already past its misfire grace.

use super::job::{FireAt, Job, JobEvent, JobOptions, JobState, JobTarget};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use courier_shared::defaults;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scheduler timezone and trigger policy
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed offset used for "now", naive fire times and log output
    pub timezone: FixedOffset,
    /// Default lateness tolerated before a job is dropped as missed
    pub misfire_grace: Duration,
    /// Interval between trigger checks
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: Utc.fix(),
            misfire_grace: defaults::MISFIRE_GRACE,
            tick: Duration::from_millis(500),
        }
    }
}

struct StoredJob {
    job: Job,
    target: JobTarget,
}

type JobStore = Arc<Mutex<HashMap<String, StoredJob>>>;

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 64;

/// The process-wide job scheduler
///
/// Owned by the caller and shared by handle; `start` and `stop` are
/// idempotent.
pub struct Scheduler {
    config: SchedulerConfig,
    /// Pending jobs by id; every add, fire and expiry holds this lock
    store: JobStore,
    /// Terminal transitions; dropped when nobody subscribes
    events: broadcast::Sender<JobEvent>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a stopped scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            store: Arc::new(Mutex::new(HashMap::new())),
            events,
            ticker: std::sync::Mutex::new(None),
        }
    }

    pub fn timezone(&self) -> FixedOffset {
        self.config.timezone
    }

    /// Current time in the scheduler's timezone
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.config.timezone)
    }

    /// Start the trigger loop; a no-op when already running
    pub fn start(&self) {
        let mut ticker = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("[SCHED] Scheduler already running");
            return;
        }

        let store = self.store.clone();
        let events = self.events.clone();
        let tz = self.config.timezone;
        let period = self.config.tick;

        *ticker = Some(tokio::spawn(async move {
            let mut clock = interval(period);
            loop {
                clock.tick().await;
                let now = Utc::now().with_timezone(&tz);
                dispatch_due(&store, &events, now).await;
            }
        }));

        info!("[SCHED] Scheduler started with timezone {}", tz);
    }

    /// Stop the trigger loop; pending jobs stay in the store
    pub fn stop(&self) {
        let mut ticker = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = ticker.take() {
            handle.abort();
            info!("[SCHED] Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        match self.ticker.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(poisoned) => poisoned.into_inner().as_ref().is_some_and(|h| !h.is_finished()),
        }
    }

    /// Register `target` to fire once at `fire_at`
    ///
    /// Returns `None` (and logs a warning) for times strictly before now;
    /// such work never enters the store. With `coalesce`, a pending job with
    /// the same key whose fire time lies within one misfire grace absorbs
    /// this request instead of adding a second run. The pending job keeps
    /// its fire time, so repeated requests cannot postpone it.
    pub async fn schedule_at(
        &self,
        target: JobTarget,
        fire_at: impl Into<FireAt>,
        options: JobOptions,
    ) -> Option<Job> {
        let tz = self.config.timezone;
        let requested = fire_at.into();
        let Some(fire_at) = requested.resolve(&tz) else {
            warn!("[SCHED] Unrepresentable fire time {:?} in {}", requested, tz);
            return None;
        };

        if fire_at < self.now() {
            warn!(
                "[SCHED] Attempted to schedule {} in the past: {}",
                target.name(),
                fire_at
            );
            return None;
        }

        let misfire_grace = options.misfire_grace.unwrap_or(self.config.misfire_grace);
        let id = Uuid::new_v4().to_string();
        let key = options.key.unwrap_or_else(|| id.clone());

        let mut jobs = self.store.lock().await;

        if options.coalesce {
            if let Some(existing) = jobs
                .values()
                .find(|s| s.job.coalesce && s.job.key == key && within(&s.job, fire_at))
            {
                info!(
                    "[SCHED] Coalesced {} into job {} at {}",
                    key, existing.job.id, existing.job.fire_at
                );
                return Some(existing.job.clone());
            }
        }

        let job = Job {
            id: id.clone(),
            key,
            target: target.name().to_string(),
            fire_at,
            misfire_grace,
            coalesce: options.coalesce,
            state: JobState::Pending,
        };
        jobs.insert(
            id,
            StoredJob {
                job: job.clone(),
                target,
            },
        );

        info!("[SCHED] Scheduled job {} ({}) for {}", job.id, job.target, job.fire_at);
        Some(job)
    }

    /// Snapshot of pending jobs, earliest first
    pub async fn pending_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .store
            .lock()
            .await
            .values()
            .map(|s| s.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.fire_at);
        jobs
    }

    /// Run one trigger check as if the clock read `now`
    ///
    /// Returns the number of jobs fired.
    pub async fn run_due_at(&self, now: DateTime<FixedOffset>) -> usize {
        dispatch_due(&self.store, &self.events, now).await
    }

    /// Subscribe to terminal job transitions
    ///
    /// `Fired` is published once the callback has returned. Only events
    /// sent after subscribing are received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Whether `fire_at` falls inside the misfire window of `job`
fn within(job: &Job, fire_at: DateTime<FixedOffset>) -> bool {
    let gap = (job.fire_at - fire_at).num_milliseconds().unsigned_abs();
    gap <= job.misfire_grace.as_millis() as u64
}

/// Fire or expire every job due at `now`
///
/// Due jobs leave the store under the lock, so a job can fire at most once
/// even when two checks overlap. Each callback runs as its own task, which
/// publishes `Fired` after the callback completes.
async fn dispatch_due(
    store: &JobStore,
    events: &broadcast::Sender<JobEvent>,
    now: DateTime<FixedOffset>,
) -> usize {
    let mut due: Vec<StoredJob> = {
        let mut jobs = store.lock().await;
        let ids: Vec<String> = jobs
            .values()
            .filter(|s| s.job.fire_at <= now)
            .map(|s| s.job.id.clone())
            .collect();
        ids.iter().filter_map(|id| jobs.remove(id)).collect()
    };
    due.sort_by_key(|s| s.job.fire_at);

    let mut fired = 0;
    for StoredJob { mut job, target } in due {
        let late_by = (now - job.fire_at).to_std().unwrap_or_default();

        if late_by > job.misfire_grace {
            job.state = JobState::Missed;
            warn!(
                "[SCHED] Job {} ({}) missed by {:?}, dropped",
                job.id, job.target, late_by
            );
            let _ = events.send(JobEvent::Missed { job, late_by });
            continue;
        }

        job.state = JobState::Fired;
        info!("[SCHED] Firing job {} ({})", job.id, job.target);
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(target.invoke()).await {
                error!("[SCHED] Job {} ({}) callback failed: {}", job.id, job.target, e);
            }
            let _ = events.send(JobEvent::Fired(job));
        });
        fired += 1;
    }

    fired
}
