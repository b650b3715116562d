use crate::pipeline::WorkOutcome;
use crate::task::{BatchRecord, InlineContent, TaskKind, TaskRecord};

/// One unit of scheduled work: a task or batch already stored as
/// `processing`.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Page {
        task: TaskRecord,
        content: Option<InlineContent>,
    },
    Document {
        task: TaskRecord,
    },
    Batch {
        batch: BatchRecord,
    },
}

impl WorkItem {
    pub fn id(&self) -> &str {
        match self {
            WorkItem::Page { task, .. } | WorkItem::Document { task } => &task.task_id,
            WorkItem::Batch { batch } => &batch.batch_id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            WorkItem::Page { .. } => TaskKind::Page,
            WorkItem::Document { .. } => TaskKind::Document,
            WorkItem::Batch { .. } => TaskKind::Batch,
        }
    }
}

/// Reported by a worker after it finished an item.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub id: String,
    pub kind: TaskKind,
    pub outcome: WorkOutcome,
    pub worker_id: usize,
}

impl WorkResult {
    pub fn is_completed(&self) -> bool {
        self.outcome == WorkOutcome::Completed
    }
}
