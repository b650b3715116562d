//! Broadcasting of task progress for real-time streaming.
//!
//! Polling through `OcrService::status` stays the primary contract; the
//! broadcaster is a push view of the same persisted updates.

pub mod task_progress;

pub use task_progress::{TaskProgressBroadcaster, TaskProgressEvent, TaskProgressTracker};
