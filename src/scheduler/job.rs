//! Job definitions owned by the scheduler

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback reference with its arguments already bound
#[derive(Clone)]
pub struct JobTarget {
    name: String,
    callback: JobCallback,
}

impl JobTarget {
    /// Wrap an async closure; `name` shows up in logs and job snapshots
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(callback()) }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self) -> BoxFuture<'static, ()> {
        (self.callback)()
    }
}

impl std::fmt::Debug for JobTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTarget").field("name", &self.name).finish()
    }
}

/// Requested fire time, with or without a timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireAt {
    Aware(DateTime<FixedOffset>),
    /// Wall-clock time in the scheduler's timezone
    Naive(NaiveDateTime),
}

impl FireAt {
    /// Pin to an instant expressed in `tz`
    ///
    /// Naive times take the scheduler's timezone, not UTC.
    pub fn resolve(self, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
        match self {
            FireAt::Aware(at) => Some(at.with_timezone(tz)),
            FireAt::Naive(naive) => naive.and_local_timezone(*tz).single(),
        }
    }
}

impl From<DateTime<FixedOffset>> for FireAt {
    fn from(at: DateTime<FixedOffset>) -> Self {
        FireAt::Aware(at)
    }
}

impl From<DateTime<Utc>> for FireAt {
    fn from(at: DateTime<Utc>) -> Self {
        FireAt::Aware(at.fixed_offset())
    }
}

impl From<NaiveDateTime> for FireAt {
    fn from(naive: NaiveDateTime) -> Self {
        FireAt::Naive(naive)
    }
}

/// Per-job scheduling policy
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Identity used for coalescing; defaults to the generated id
    pub key: Option<String>,
    /// Overrides the scheduler's misfire grace
    pub misfire_grace: Option<Duration>,
    pub coalesce: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            key: None,
            misfire_grace: None,
            coalesce: true,
        }
    }
}

impl JobOptions {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Callback invoked
    Fired,
    /// Passed `fire_at + misfire_grace` before it could run; dropped
    Missed,
}

/// Snapshot of a scheduled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub key: String,
    /// Name of the bound callback
    pub target: String,
    pub fire_at: DateTime<FixedOffset>,
    pub misfire_grace: Duration,
    pub coalesce: bool,
    pub state: JobState,
}

/// Terminal transitions published by the scheduler
#[derive(Debug, Clone)]
pub enum JobEvent {
    Fired(Job),
    Missed { job: Job, late_by: Duration },
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Fired(job) => job,
            JobEvent::Missed { job, .. } => job,
        }
    }
}
