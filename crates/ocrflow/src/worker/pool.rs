use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::broadcast::TaskProgressBroadcaster;
use crate::error::WorkerError;
use crate::pipeline::{
    BatchCoordinator, BroadcastProgress, NoopProgress, Pipeline, ProgressReporter,
    SHUTDOWN_MESSAGE,
};
use crate::worker::job::{WorkItem, WorkResult};

/// Fixed set of worker threads. Submission never blocks; items wait in the
/// queue until a worker is free.
pub struct WorkerPool {
    job_sender: Sender<WorkItem>,
    job_receiver: Receiver<WorkItem>,
    result_receiver: Option<Receiver<WorkResult>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    pipeline: Pipeline,
}

impl WorkerPool {
    /// Creates a pool that reports every finished item through
    /// [`WorkerPool::recv_result`]. Callers must drain it.
    pub fn new(pipeline: Pipeline, worker_count: usize) -> Result<Self, WorkerError> {
        Self::spawn(pipeline, worker_count, None, true)
    }

    /// Creates a pool whose workers publish progress to `broadcaster` and
    /// keep no per-item results. Outcomes are only visible in the store.
    pub fn with_broadcaster(
        pipeline: Pipeline,
        worker_count: usize,
        broadcaster: Option<TaskProgressBroadcaster>,
    ) -> Result<Self, WorkerError> {
        Self::spawn(pipeline, worker_count, broadcaster, false)
    }

    fn spawn(
        pipeline: Pipeline,
        worker_count: usize,
        broadcaster: Option<TaskProgressBroadcaster>,
        collect_results: bool,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (job_sender, job_receiver) = unbounded::<WorkItem>();
        let (result_sender, result_receiver) = if collect_results {
            let (tx, rx) = unbounded::<WorkResult>();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_pipeline = pipeline.clone();
            let worker_broadcaster = broadcaster.clone();

            let handle = thread::Builder::new()
                .name(format!("ocrflow-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        result_tx,
                        shutdown_flag,
                        worker_pipeline,
                        worker_broadcaster,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            job_receiver,
            result_receiver,
            workers,
            shutdown,
            pipeline,
        })
    }

    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(item)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Blocks for the next finished item. `None` when the pool keeps no
    /// results or all workers are gone.
    pub fn recv_result(&self) -> Option<WorkResult> {
        self.result_receiver.as_ref()?.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Joins all workers. Items still queued are failed, or cancelled when a
    /// cancel was already requested for them.
    pub fn wait(self) {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        for item in self.job_receiver.try_iter() {
            debug!("Abandoning queued item {}", item.id());
            self.pipeline.abandon(item.id(), SHUTDOWN_MESSAGE);
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<WorkItem>,
    result_sender: Option<Sender<WorkResult>>,
    shutdown: Arc<AtomicBool>,
    pipeline: Pipeline,
    broadcaster: Option<TaskProgressBroadcaster>,
) {
    debug!("Worker {} started", worker_id);

    let coordinator = BatchCoordinator::new(pipeline.clone());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => {
                let id = item.id().to_string();
                let kind = item.kind();
                debug!("Worker {} processing {} {}", worker_id, kind, id);

                let progress: Box<dyn ProgressReporter> = match &broadcaster {
                    Some(b) => Box::new(BroadcastProgress::new(b.track(&id, kind))),
                    None => Box::new(NoopProgress),
                };

                let run = panic::catch_unwind(AssertUnwindSafe(|| match item {
                    WorkItem::Page { task, content } => {
                        pipeline.run_page_task(task, content, progress.as_ref())
                    }
                    WorkItem::Document { task } => {
                        pipeline.run_document_task(task, progress.as_ref())
                    }
                    WorkItem::Batch { batch } => coordinator.run(batch, progress.as_ref()),
                }));

                let outcome = match run {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("Worker {} panicked while processing {}", worker_id, id);
                        pipeline.abort(&id)
                    }
                };

                debug!("Worker {} finished {}: {:?}", worker_id, id, outcome);
                if let Some(sender) = &result_sender {
                    let result = WorkResult {
                        id,
                        kind,
                        outcome,
                        worker_id,
                    };
                    if let Err(e) = sender.send(result) {
                        error!("Worker {} failed to send result: {}", worker_id, e);
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
