//! Delivery tasks
//!
//! Tasks are ephemeral descriptions: an immediate task runs right after an
//! upload is staged, a scheduled task is the bound argument set of a job.

pub mod handlers;
mod orchestrator;

pub use orchestrator::{DeliverySettings, TaskOrchestrator, UploadEvent, UploadReceipt};

/// Push staged images and notify the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateTask {
    pub device_name: String,
    /// Unix seconds of the upload; selects the staging bucket
    pub upload_time: i64,
}

/// Deferred work bound into a scheduler job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub device_name: String,
    pub task_time: i64,
    pub task_type: TaskType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Cleanup,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Immediate(ImmediateTask),
    Scheduled(ScheduledTask),
}

impl Task {
    pub fn device_name(&self) -> &str {
        match self {
            Task::Immediate(t) => &t.device_name,
            Task::Scheduled(t) => &t.device_name,
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Immediate(t) => write!(f, "immediate({}@{})", t.device_name, t.upload_time),
            Task::Scheduled(t) => {
                write!(f, "{}({}@{})", t.task_type, t.device_name, t.task_time)
            }
        }
    }
}
