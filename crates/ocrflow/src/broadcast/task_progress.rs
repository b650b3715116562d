//! Task progress broadcaster for push-style status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::task::{TaskKind, TaskStatus};

/// Progress event for a task or batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressEvent {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Persisted progress, 0-100.
    pub progress: u8,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Document being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Page being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Error message (set on failure) or cancel reason (set on cancel).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskProgressEvent {
    pub fn new(task_id: &str, kind: TaskKind, progress: u8, message: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            status: TaskStatus::Processing,
            progress,
            message: message.to_string(),
            timestamp: Utc::now(),
            document_id: None,
            page: None,
            error: None,
        }
    }

    pub fn completed(task_id: &str, kind: TaskKind) -> Self {
        Self {
            status: TaskStatus::Completed,
            ..Self::new(task_id, kind, 100, "Processing completed successfully")
        }
    }

    pub fn failed(task_id: &str, kind: TaskKind, progress: u8, error: &str) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error.to_string()),
            ..Self::new(task_id, kind, progress, "Processing failed")
        }
    }

    pub fn cancelled(task_id: &str, kind: TaskKind, progress: u8, reason: &str) -> Self {
        Self {
            status: TaskStatus::Cancelled,
            error: Some(reason.to_string()),
            ..Self::new(task_id, kind, progress, "Processing cancelled")
        }
    }

    pub fn with_location(mut self, document_id: Option<&str>, page: Option<u32>) -> Self {
        self.document_id = document_id.map(|s| s.to_string());
        self.page = page;
        self
    }
}

/// Broadcasts task progress events to any number of subscribers.
#[derive(Clone)]
pub struct TaskProgressBroadcaster {
    sender: Arc<broadcast::Sender<TaskProgressEvent>>,
}

impl TaskProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: TaskProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one task.
    pub fn track(&self, task_id: &str, kind: TaskKind) -> TaskProgressTracker {
        TaskProgressTracker::new(task_id, kind, Arc::clone(&self.sender))
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<TaskProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for TaskProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Emits events for a single task.
pub struct TaskProgressTracker {
    task_id: String,
    kind: TaskKind,
    sender: Arc<broadcast::Sender<TaskProgressEvent>>,
}

impl TaskProgressTracker {
    pub fn new(
        task_id: &str,
        kind: TaskKind,
        sender: Arc<broadcast::Sender<TaskProgressEvent>>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            sender,
        }
    }

    pub fn progress(
        &self,
        progress: u8,
        document_id: Option<&str>,
        page: Option<u32>,
        message: &str,
    ) {
        let event = TaskProgressEvent::new(&self.task_id, self.kind, progress, message)
            .with_location(document_id, page);
        let _ = self.sender.send(event);
    }

    pub fn completed(&self) {
        let _ = self
            .sender
            .send(TaskProgressEvent::completed(&self.task_id, self.kind));
    }

    pub fn failed(&self, progress: u8, error: &str) {
        let _ = self.sender.send(TaskProgressEvent::failed(
            &self.task_id,
            self.kind,
            progress,
            error,
        ));
    }

    pub fn cancelled(&self, progress: u8, reason: &str) {
        let _ = self.sender.send(TaskProgressEvent::cancelled(
            &self.task_id,
            self.kind,
            progress,
            reason,
        ));
    }
}
