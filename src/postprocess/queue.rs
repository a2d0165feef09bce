//! Background postprocess queue.
//!
//! The [`PostprocessQueue`] accepts `(kind, id)` submissions on a bounded
//! channel. A dispatcher task drains it and spawns one task per job, with at
//! most `workers` jobs running at once. Each finished job is broadcast as a
//! [`PostprocessEvent`].
//!
//! # Example
//!
//! ```rust,ignore
//! let queue = PostprocessQueue::new(Arc::new(postprocessor), &config.queue);
//! queue.submit(RecordKind::ForumPost, post.id).await?;
//! ```

use std::sync::Arc;

use agora_core::{RecordId, RecordKind};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::orchestrator::{PostprocessError, PostprocessReport, Postprocessor};
use crate::config::QueueConfig;

/// Broadcast capacity for job events; slow subscribers miss old events.
const EVENT_CAPACITY: usize = 256;

/// Something that can schedule a postprocess pass for a record.
///
/// Save paths depend on this rather than on the queue type, so they can be
/// exercised with a recording stub.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, kind: RecordKind, id: RecordId) -> Result<()>;
}

/// Outcome of one queued job.
#[derive(Debug, Clone)]
pub enum PostprocessEvent {
    Completed {
        kind: RecordKind,
        id: RecordId,
        report: PostprocessReport,
    },
    Failed {
        kind: RecordKind,
        id: RecordId,
        error: String,
    },
}

impl PostprocessEvent {
    pub fn record(&self) -> (RecordKind, RecordId) {
        match self {
            Self::Completed { kind, id, .. } | Self::Failed { kind, id, .. } => (*kind, *id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Job {
    kind: RecordKind,
    id: RecordId,
}

/// Handle to the background postprocess queue.
///
/// The dispatcher runs until every handle is dropped or [`close`](Self::close)
/// is called.
pub struct PostprocessQueue {
    sender: mpsc::Sender<Job>,
    events: broadcast::Sender<PostprocessEvent>,
    semaphore: Arc<Semaphore>,
    workers: usize,
    dispatcher: JoinHandle<()>,
}

impl PostprocessQueue {
    /// Create a queue and spawn its dispatcher task.
    pub fn new(postprocessor: Arc<Postprocessor>, config: &QueueConfig) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(workers));

        let dispatcher = tokio::spawn(process_jobs(
            receiver,
            postprocessor,
            Arc::clone(&semaphore),
            events.clone(),
        ));

        Self {
            sender,
            events,
            semaphore,
            workers,
            dispatcher,
        }
    }

    /// Enqueue a pass over `(kind, id)`.
    ///
    /// Waits only for channel capacity, never for the job itself. Returns an
    /// error if the dispatcher has stopped.
    pub async fn submit(&self, kind: RecordKind, id: RecordId) -> Result<()> {
        info!(kind = %kind, id = %id, "Submitting postprocess job to queue");

        self.sender
            .send(Job { kind, id })
            .await
            .map_err(|_| anyhow::anyhow!("Postprocess queue is closed"))?;

        Ok(())
    }

    /// Subscribe to job outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<PostprocessEvent> {
        self.events.subscribe()
    }

    /// Stop accepting jobs and wait for everything already queued to finish.
    pub async fn close(self) -> Result<()> {
        let Self {
            sender,
            semaphore,
            workers,
            dispatcher,
            ..
        } = self;

        drop(sender);
        dispatcher.await?;

        // Every running job holds a permit until it finishes.
        let _all = semaphore.acquire_many(workers as u32).await?;
        Ok(())
    }
}

#[async_trait]
impl Dispatch for PostprocessQueue {
    async fn dispatch(&self, kind: RecordKind, id: RecordId) -> Result<()> {
        self.submit(kind, id).await
    }
}

/// Drain the channel, spawning a task per job once a worker slot is free.
async fn process_jobs(
    mut receiver: mpsc::Receiver<Job>,
    postprocessor: Arc<Postprocessor>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<PostprocessEvent>,
) {
    info!("Postprocess queue worker started");

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let postprocessor = Arc::clone(&postprocessor);
        let events = events.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let event = run_job(&postprocessor, job).await;
            // No subscribers is fine.
            let _ = events.send(event);
        });
    }

    info!("Postprocess queue worker stopped (channel closed)");
}

async fn run_job(postprocessor: &Postprocessor, job: Job) -> PostprocessEvent {
    let Job { kind, id } = job;

    match postprocessor.postprocess(kind, id).await {
        Ok(report) => PostprocessEvent::Completed { kind, id, report },
        Err(e) => {
            match &e {
                PostprocessError::RecordNotFound { .. } => {
                    warn!(kind = %kind, id = %id, "Record vanished before postprocess; dropping job")
                }
                PostprocessError::Database(err) => {
                    warn!(kind = %kind, id = %id, error = %err, "Postprocess failed")
                }
                PostprocessError::Task(err) => {
                    warn!(kind = %kind, id = %id, error = %err, "Postprocess task failed")
                }
            }
            PostprocessEvent::Failed {
                kind,
                id,
                error: e.to_string(),
            }
        }
    }
}
