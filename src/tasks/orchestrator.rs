//! Task orchestrator
//!
//! Drives immediate delivery through the task state machine and hands
//! deferred work to the scheduler.

use super::handlers::{self, TaskContext};
use super::{ImmediateTask, ScheduledTask, Task, TaskType};
use crate::connection::ConnectionManager;
use crate::scheduler::{Job, JobOptions, JobTarget, Scheduler};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use courier_shared::codec;
use courier_shared::state_machine::{TaskEvent, TaskStateMachine, TransitionResult};
use courier_shared::DispatchError;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where staged uploads live and how deferred work is timed
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Uploads are staged at `<staging_root>/<device name>/<bucket>`
    pub staging_root: PathBuf,
    /// Offset the `YYYYMMDDHHMMSS` bucket names are rendered in
    pub bucket_offset: FixedOffset,
    pub cleanup_delay: Duration,
}

/// An upload that finished staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub device_name: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// What `handle_upload` set in motion
#[derive(Debug)]
pub struct UploadReceipt {
    pub device_name: String,
    pub bucket: String,
    pub local_dir: PathBuf,
    /// Deferred cleanup, if the scheduler accepted it
    pub cleanup_job: Option<Job>,
    /// Detached immediate task; resolves to its success flag
    pub immediate: JoinHandle<bool>,
}

pub struct TaskOrchestrator {
    connections: Arc<ConnectionManager>,
    scheduler: Arc<Scheduler>,
    settings: DeliverySettings,
}

impl TaskOrchestrator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        scheduler: Arc<Scheduler>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            connections,
            scheduler,
            settings,
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Run one task to completion; never fails, reports success as a flag
    pub async fn run(&self, task: &Task) -> bool {
        debug!("[TASK] Running {}", task);
        match task {
            Task::Immediate(ImmediateTask {
                device_name,
                upload_time,
            }) => self.execute_immediate_tasks(device_name, *upload_time).await,
            Task::Scheduled(scheduled) => self.execute_scheduled_tasks(scheduled).await,
        }
    }

    /// Deliver one staged upload to its device
    ///
    /// Checks the connection (reconnecting once if needed), pushes the
    /// bucket folder, then asks the device for a media rescan. Returns true
    /// when at least one file was transferred.
    pub async fn execute_immediate_tasks(&self, device_name: &str, upload_time: i64) -> bool {
        let mut fsm = TaskStateMachine::new();
        advance(&mut fsm, device_name, TaskEvent::Begin);

        let ctx = match TaskContext::resolve(self.connections.registry(), device_name) {
            Ok(ctx) => ctx,
            Err(e) => return abort(&mut fsm, device_name, e),
        };

        match self.connections.is_connected(device_name).await {
            Ok(true) => advance(&mut fsm, device_name, TaskEvent::Connected),
            Ok(false) => {
                advance(&mut fsm, device_name, TaskEvent::NotConnected);
                match self.connections.reconnect(device_name).await {
                    Ok(true) => advance(&mut fsm, device_name, TaskEvent::Reconnected),
                    Ok(false) => {
                        let e = DispatchError::ConnectionUnavailable(format!(
                            "{} ({})",
                            device_name, ctx.device_id
                        ));
                        let reason = e.to_string();
                        advance(&mut fsm, device_name, TaskEvent::ReconnectFailed { reason });
                        return false;
                    }
                    Err(e) => return abort(&mut fsm, device_name, e),
                }
            }
            Err(e) => return abort(&mut fsm, device_name, e),
        }

        let Some((local_dir, bucket)) = self.locate(device_name, upload_time) else {
            let e = DispatchError::Staging(format!("timestamp {} out of range", upload_time));
            return abort(&mut fsm, device_name, e);
        };

        let report =
            match handlers::push_files(&self.connections, &ctx, &local_dir, &bucket).await {
                Ok(report) => report,
                Err(e) => return abort(&mut fsm, device_name, e),
            };
        advance(
            &mut fsm,
            device_name,
            TaskEvent::FilesPushed {
                transferred: report.transferred,
            },
        );

        handlers::broadcast_rescan(&self.connections, &ctx, &report.remote_dir).await;
        advance(&mut fsm, device_name, TaskEvent::Notified);

        if !report.failed.is_empty() {
            warn!(
                "[TASK] {} file(s) not delivered to {}: {:?}",
                report.failed.len(),
                device_name,
                report.failed
            );
        }
        report.any_transferred()
    }

    /// Run deferred work bound into a scheduler job
    pub async fn execute_scheduled_tasks(&self, task: &ScheduledTask) -> bool {
        let ctx = match TaskContext::resolve(self.connections.registry(), &task.device_name) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("[TASK] {} not run: {}", task.task_type, e);
                return false;
            }
        };

        let result = match task.task_type {
            TaskType::Cleanup => handlers::run_cleanup(&ctx, task.task_time).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("[TASK] {} for {} failed: {}", task.task_type, task.device_name, e);
                false
            }
        }
    }

    /// Entry point for a finished upload
    ///
    /// Validates the device and the staging folder, starts immediate
    /// delivery without waiting for it, and registers the deferred cleanup.
    pub async fn handle_upload(self: &Arc<Self>, event: UploadEvent) -> Result<UploadReceipt> {
        self.connections
            .registry()
            .resolve(&event.device_name)
            .context("Upload for unconfigured device")?;

        let (local_dir, bucket) = self
            .locate(&event.device_name, event.timestamp)
            .ok_or_else(|| {
                DispatchError::Staging(format!("timestamp {} out of range", event.timestamp))
            })?;

        let staged = tokio::fs::metadata(&local_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !staged {
            return Err(DispatchError::Staging(format!(
                "{} is not a staged upload folder",
                local_dir.display()
            ))
            .into());
        }

        info!(
            "[TASK] Upload {} from {} staged at {}",
            bucket,
            event.device_name,
            local_dir.display()
        );

        let immediate = {
            let this = Arc::clone(self);
            let task = Task::Immediate(ImmediateTask {
                device_name: event.device_name.clone(),
                upload_time: event.timestamp,
            });
            tokio::spawn(async move { this.run(&task).await })
        };

        let cleanup = ScheduledTask {
            device_name: event.device_name.clone(),
            task_time: event.timestamp,
            task_type: TaskType::Cleanup,
        };
        let fire_at = self.cleanup_fire_time(event.timestamp);
        let cleanup_job = self.schedule_task(cleanup, fire_at).await;
        if cleanup_job.is_none() {
            warn!("[TASK] Cleanup for {} upload {} not scheduled", event.device_name, bucket);
        }

        Ok(UploadReceipt {
            device_name: event.device_name,
            bucket,
            local_dir,
            cleanup_job,
            immediate,
        })
    }

    /// Register a scheduled task
    ///
    /// Keyed by task type, device and task time, so only repeated requests
    /// for the same upload coalesce.
    pub async fn schedule_task(
        self: &Arc<Self>,
        task: ScheduledTask,
        fire_at: DateTime<FixedOffset>,
    ) -> Option<Job> {
        let key = format!("{}:{}:{}", task.task_type, task.device_name, task.task_time);
        let this: Weak<Self> = Arc::downgrade(self);
        let bound = Task::Scheduled(task);

        let target = JobTarget::new(key.clone(), move || {
            let this = this.clone();
            let task = bound.clone();
            async move {
                match this.upgrade() {
                    Some(orchestrator) => {
                        orchestrator.run(&task).await;
                    }
                    None => error!("[TASK] {} fired after shutdown", task),
                }
            }
        });

        self.scheduler
            .schedule_at(target, fire_at, JobOptions::keyed(key))
            .await
    }

    /// Staging folder and bucket of an upload
    fn locate(&self, device_name: &str, upload_time: i64) -> Option<(PathBuf, String)> {
        let bucket = codec::time_bucket(upload_time, &self.settings.bucket_offset)?;
        let dir = self.settings.staging_root.join(device_name).join(&bucket);
        Some((dir, bucket))
    }

    /// Upload time plus the cleanup delay, measured from now for past uploads
    fn cleanup_fire_time(&self, upload_time: i64) -> DateTime<FixedOffset> {
        let now = self.scheduler.now();
        let base = DateTime::from_timestamp(upload_time, 0)
            .map(|t| t.with_timezone(&now.timezone()))
            .filter(|t| *t > now)
            .unwrap_or(now);
        let delay = chrono::Duration::from_std(self.settings.cleanup_delay)
            .unwrap_or_else(|_| chrono::Duration::zero());
        base + delay
    }
}

fn advance(fsm: &mut TaskStateMachine, device_name: &str, event: TaskEvent) {
    let from = fsm.state();
    match fsm.process_event(event) {
        TransitionResult::Success(to) => {
            debug!("[TASK] {}: {:?} -> {:?}", device_name, from, to)
        }
        TransitionResult::Aborted { reason } => {
            warn!("[TASK] {}: aborted in {:?}: {}", device_name, from, reason)
        }
        TransitionResult::Invalid { from, event } => {
            error!("[TASK] {}: invalid event {:?} in {:?}", device_name, event, from)
        }
    }
}

fn abort(fsm: &mut TaskStateMachine, device_name: &str, err: DispatchError) -> bool {
    advance(
        fsm,
        device_name,
        TaskEvent::Failed {
            reason: err.to_string(),
        },
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::scripted::{device_listing, Reply, ScriptedBridge};
    use crate::tasks::handlers::MEDIA_SCAN_ACTION as MEDIA_SCAN;
    use crate::command::{CommandExecutor, ExecutorConfig};
    use crate::device::{DeviceEntry, DeviceRegistry};
    use crate::scheduler::{JobEvent, SchedulerConfig};
    use chrono::{Offset, Utc};
    use std::collections::HashMap;
    use std::path::Path;
    use tokio::time::timeout;

    const DEVICE_ID: &str = "emulator-5554";    const UPLOAD_TS: i64 = 1_700_000_000;
    const BUCKET_UTC: &str = "20231114221320";

    struct Harness {
        bridge: Arc<ScriptedBridge>,
        orchestrator: Arc<TaskOrchestrator>,
        scheduler: Arc<Scheduler>,
        staging: tempfile::TempDir,
    }

    fn harness(bridge: ScriptedBridge, cleanup_delay: Duration) -> Harness {
        let bridge = Arc::new(bridge);
        let staging = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(
            vec![DeviceEntry::new("deviceA", DEVICE_ID)],
            HashMap::from([(DEVICE_ID.to_string(), "/sdcard/Courier".to_string())]),
        );
        let executor = CommandExecutor::new(
            bridge.clone(),
            ExecutorConfig {
                max_retry: 1,
                retry_interval: Duration::from_millis(5),
                command_timeout: Duration::from_millis(500),
            },
        );
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(registry),
            Arc::new(executor),
        ));
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            timezone: Utc.fix(),
            misfire_grace: Duration::from_secs(120),
            tick: Duration::from_millis(20),
        }));
        let settings = DeliverySettings {
            staging_root: staging.path().to_path_buf(),
            bucket_offset: Utc.fix(),
            cleanup_delay,
        };
        let orchestrator = Arc::new(TaskOrchestrator::new(
            connections,
            scheduler.clone(),
            settings,
        ));
        Harness {
            bridge,
            orchestrator,
            scheduler,
            staging,
        }
    }

    fn stage(root: &Path, files: &[&str]) -> PathBuf {
        stage_bucket(root, BUCKET_UTC, files)
    }

    fn stage_bucket(root: &Path, bucket: &str, files: &[&str]) -> PathBuf {
        let dir = root.join("deviceA").join(bucket);
        std::fs::create_dir_all(&dir).unwrap();
        for file in files {
            std::fs::write(dir.join(file), b"jpeg").unwrap();
        }
        dir
    }

    fn online() -> ScriptedBridge {
        ScriptedBridge::new(|args| match args.first().map(String::as_str) {
            Some("devices") => Reply::Ok(device_listing(&[DEVICE_ID])),
            _ => Reply::ok(""),
        })
    }

    fn position(calls: &[Vec<String>], pred: impl Fn(&[String]) -> bool) -> usize {
        calls.iter().position(|args| pred(args)).unwrap()
    }

    #[tokio::test]
    async fn test_upload_delivers_and_cleans_up_once() {
        let h = harness(online(), Duration::from_millis(200));
        let local_dir = stage(h.staging.path(), &["a.jpg", "b.jpg"]);
        let mut events = h.scheduler.subscribe();
        h.scheduler.start();

        let receipt = h
            .orchestrator
            .handle_upload(UploadEvent {
                device_name: "deviceA".into(),
                timestamp: UPLOAD_TS,
            })
            .await
            .unwrap();
        assert_eq!(receipt.bucket, BUCKET_UTC);
        assert_eq!(receipt.local_dir, local_dir);
        assert!(receipt.immediate.await.unwrap());

        let calls = h.bridge.calls();
        let remote_dir = format!("/sdcard/Courier/{}", BUCKET_UTC);
        let is_push = |args: &[String]| args.get(2).map(String::as_str) == Some("push");
        let pushes: Vec<_> = calls.iter().filter(|args| is_push(args.as_slice())).collect();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0][1], DEVICE_ID);
        assert_eq!(pushes[0][4], format!("{}/a.jpg", remote_dir));
        assert_eq!(pushes[1][4], format!("{}/b.jpg", remote_dir));

        let mkdir = position(&calls, |args| {
            args.last() == Some(&format!("mkdir -p '{}'", remote_dir))
        });
        let first_push = position(&calls, is_push);
        let rescan = position(&calls, |args| {
            args.last().is_some_and(|a| a.contains(MEDIA_SCAN))
        });
        assert!(mkdir < first_push);
        assert!(first_push < rescan);

        let job = receipt.cleanup_job.unwrap();
        assert_eq!(job.key, format!("cleanup:deviceA:{}", UPLOAD_TS));
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(&event, JobEvent::Fired(j) if j.id == job.id));
        assert!(timeout(Duration::from_millis(300), events.recv())
            .await
            .is_err());
        assert!(h.scheduler.pending_jobs().await.is_empty());
        h.scheduler.stop();
    }

    #[tokio::test]
    async fn test_device_never_connects() {
        let bridge = ScriptedBridge::new(|args| match args.first().map(String::as_str) {
            Some("devices") => Reply::Ok(device_listing(&[])),
            Some("connect") => Reply::ok("failed to connect to emulator-5554"),
            _ => Reply::ok(""),
        });
        let h = harness(bridge, Duration::from_secs(60));
        stage(h.staging.path(), &["a.jpg"]);

        assert!(
            !h.orchestrator
                .execute_immediate_tasks("deviceA", UPLOAD_TS)
                .await
        );
        assert_eq!(h.bridge.count("push"), 0);
        assert_eq!(h.bridge.count("connect"), 1);
    }

    #[tokio::test]
    async fn test_failed_file_does_not_stop_others() {
        let bridge = ScriptedBridge::new(|args| {
            if args.first().map(String::as_str) == Some("devices") {
                return Reply::Ok(device_listing(&[DEVICE_ID]));
            }
            if args.get(2).map(String::as_str) == Some("push")
                && args.last().is_some_and(|a| a.ends_with("a.jpg"))
            {
                return Reply::fail("remote write failed");
            }
            Reply::ok("")
        });
        let h = harness(bridge, Duration::from_secs(60));
        stage(h.staging.path(), &["a.jpg", "b.jpg"]);

        assert!(
            h.orchestrator
                .execute_immediate_tasks("deviceA", UPLOAD_TS)
                .await
        );
        let calls = h.bridge.calls();
        let a_attempts = calls
            .iter()
            .filter(|args| args.last().is_some_and(|a| a.ends_with("a.jpg")))
            .count();
        let b_attempts = calls
            .iter()
            .filter(|args| args.last().is_some_and(|a| a.ends_with("b.jpg")))
            .count();
        assert_eq!(a_attempts, 2);
        assert_eq!(b_attempts, 1);
    }

    #[tokio::test]
    async fn test_empty_bucket_reports_failure() {
        let h = harness(online(), Duration::from_secs(60));
        stage(h.staging.path(), &[]);

        assert!(
            !h.orchestrator
                .execute_immediate_tasks("deviceA", UPLOAD_TS)
                .await
        );
        assert_eq!(h.bridge.count("push"), 0);
    }

    #[tokio::test]
    async fn test_unknown_device_upload_rejected() {
        let h = harness(online(), Duration::from_secs(60));

        let result = h
            .orchestrator
            .handle_upload(UploadEvent {
                device_name: "ghost".into(),
                timestamp: UPLOAD_TS,
            })
            .await;
        assert!(result.is_err());
        assert!(h.bridge.calls().is_empty());
        assert!(h.scheduler.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_staging_folder_rejected() {
        let h = harness(online(), Duration::from_secs(60));

        let err = h
            .orchestrator
            .handle_upload(UploadEvent {
                device_name: "deviceA".into(),
                timestamp: UPLOAD_TS,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::Staging(_))
        ));
        assert!(h.bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_upload_still_schedules_cleanup() {
        let bridge = ScriptedBridge::new(|args| match args.first().map(String::as_str) {
            Some("devices") => Reply::Ok(device_listing(&[])),
            _ => Reply::fail("unreachable"),
        });
        let h = harness(bridge, Duration::from_secs(60));
        stage(h.staging.path(), &["a.jpg"]);

        let receipt = h
            .orchestrator
            .handle_upload(UploadEvent {
                device_name: "deviceA".into(),
                timestamp: UPLOAD_TS,
            })
            .await
            .unwrap();
        assert!(!receipt.immediate.await.unwrap());
        assert!(receipt.cleanup_job.is_some());
        assert_eq!(h.scheduler.pending_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_cleanup_touches_no_device() {
        let h = harness(online(), Duration::from_secs(60));
        let task = ScheduledTask {
            device_name: "deviceA".into(),
            task_time: UPLOAD_TS,
            task_type: TaskType::Cleanup,
        };

        assert!(h.orchestrator.execute_scheduled_tasks(&task).await);
        assert!(h.bridge.calls().is_empty());

        let unknown = ScheduledTask {
            device_name: "ghost".into(),
            ..task
        };
        assert!(!h.orchestrator.run(&Task::Scheduled(unknown)).await);
    }

    #[tokio::test]
    async fn test_repeat_uploads_coalesce_cleanup() {
        let h = harness(online(), Duration::from_secs(60));
        stage(h.staging.path(), &["a.jpg"]);

        for _ in 0..2 {
            let receipt = h
                .orchestrator
                .handle_upload(UploadEvent {
                    device_name: "deviceA".into(),
                    timestamp: UPLOAD_TS,
                })
                .await
                .unwrap();
            receipt.immediate.await.unwrap();
        }
        assert_eq!(h.scheduler.pending_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_uploads_keep_their_own_cleanup() {
        let h = harness(online(), Duration::from_secs(60));
        stage(h.staging.path(), &["a.jpg"]);
        stage_bucket(h.staging.path(), "20231114221350", &["b.jpg"]);

        let mut jobs = Vec::new();
        for timestamp in [UPLOAD_TS, UPLOAD_TS + 30] {
            let receipt = h
                .orchestrator
                .handle_upload(UploadEvent {
                    device_name: "deviceA".into(),
                    timestamp,
                })
                .await
                .unwrap();
            receipt.immediate.await.unwrap();
            jobs.push(receipt.cleanup_job.unwrap());
        }

        assert_ne!(jobs[0].id, jobs[1].id);
        let pending = h.scheduler.pending_jobs().await;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|j| j.key.ends_with(":1700000000")));
        assert!(pending.iter().any(|j| j.key.ends_with(":1700000030")));
    }
}
