use crate::broadcast::task_progress::TaskProgressTracker;

/// Events emitted by the runners after each persisted change.
/// Extracted text is never part of an event.
pub enum ProgressEvent {
    Progress {
        progress: u8,
        document_id: Option<String>,
        page: Option<u32>,
        message: String,
    },
    Completed,
    Failed {
        progress: u8,
        error: String,
    },
    Cancelled {
        progress: u8,
        reason: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and pools without a broadcaster.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges runner events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: TaskProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: TaskProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Progress {
                progress,
                document_id,
                page,
                message,
            } => {
                self.tracker
                    .progress(progress, document_id.as_deref(), page, &message);
            }
            ProgressEvent::Completed => self.tracker.completed(),
            ProgressEvent::Failed { progress, error } => self.tracker.failed(progress, &error),
            ProgressEvent::Cancelled { progress, reason } => {
                self.tracker.cancelled(progress, &reason)
            }
        }
    }
}
