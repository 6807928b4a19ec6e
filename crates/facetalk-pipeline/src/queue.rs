//! Optional render offload.
//!
//! Rendering dominates pipeline latency, so it can be pushed onto a worker
//! pool instead of running inline. `RenderQueue` is the seam; the in-process
//! `LocalRenderQueue` runs a fixed number of workers over a bounded channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use facetalk_core::types::{AvatarVariant, MediaLocator};
use facetalk_core::{FacetalkError, Result};
use facetalk_providers::AvatarRenderer;

use crate::orchestrator::{render_to_locator, StageTimeouts};

/// One unit of render work: synthesized speech plus the avatar to animate.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub audio: Vec<u8>,
    pub variant: AvatarVariant,
}

/// A backend that accepts render jobs and reports their results.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Hand a job to the queue; returns an id to claim the result with.
    async fn enqueue(&self, job: RenderJob) -> Result<String>;

    /// Wait for the job to finish, up to `wait`. A task id the queue does
    /// not know (already claimed, or lost to shutdown) is
    /// `QueueUnavailable`.
    async fn await_result(&self, task_id: &str, wait: Duration) -> Result<MediaLocator>;

    async fn check(&self) -> facetalk_providers::Health;
}

struct QueuedTask {
    job: RenderJob,
    done: oneshot::Sender<Result<MediaLocator>>,
}

/// In-process worker pool over a bounded channel. Each job's result travels
/// back on a oneshot held in `pending` until the submitter claims it.
pub struct LocalRenderQueue {
    job_tx: mpsc::Sender<QueuedTask>,
    pending: Mutex<HashMap<String, oneshot::Receiver<Result<MediaLocator>>>>,
    shutdown: CancellationToken,
}

impl LocalRenderQueue {
    const CAPACITY: usize = 32;

    /// Start `workers` render workers sharing one job channel.
    pub fn spawn(
        renderer: Arc<dyn AvatarRenderer>,
        timeouts: StageTimeouts,
        workers: usize,
    ) -> Arc<Self> {
        let (job_tx, job_rx) = mpsc::channel::<QueuedTask>(Self::CAPACITY);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let shutdown = CancellationToken::new();

        for worker_id in 0..workers.max(1) {
            let renderer = renderer.clone();
            let job_rx = job_rx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(worker_id, "Render worker started");
                loop {
                    let task = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        task = async { job_rx.lock().await.recv().await } => task,
                    };
                    let Some(task) = task else { break };

                    debug!(worker_id, "Render worker picked up a job");
                    let result = render_to_locator(
                        &*renderer,
                        &task.job.audio,
                        task.job.variant,
                        &timeouts,
                        &shutdown,
                    )
                    .await;

                    // Submitter may have stopped waiting; nothing to do then.
                    if task.done.send(result).is_err() {
                        warn!(worker_id, "Render result had no waiter");
                    }
                }
                info!(worker_id, "Render worker stopped");
            });
        }

        Arc::new(Self {
            job_tx,
            pending: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RenderQueue for LocalRenderQueue {
    async fn enqueue(&self, job: RenderJob) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let (done_tx, done_rx) = oneshot::channel();

        self.job_tx
            .try_send(QueuedTask { job, done: done_tx })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    FacetalkError::QueueUnavailable("render queue is full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    FacetalkError::QueueUnavailable("render workers have shut down".into())
                }
            })?;

        self.pending.lock().await.insert(task_id.clone(), done_rx);
        debug!(task_id, "Render job enqueued");
        Ok(task_id)
    }

    async fn await_result(&self, task_id: &str, wait: Duration) -> Result<MediaLocator> {
        let rx = self.pending.lock().await.remove(task_id).ok_or_else(|| {
            FacetalkError::QueueUnavailable(format!("unknown render task {task_id}"))
        })?;

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FacetalkError::QueueUnavailable(
                "render worker dropped the task".into(),
            )),
            Err(_) => Err(FacetalkError::RenderTimeout {
                waited_secs: wait.as_secs(),
            }),
        }
    }

    async fn check(&self) -> facetalk_providers::Health {
        if self.shutdown.is_cancelled() || self.job_tx.is_closed() {
            facetalk_providers::Health::Unhealthy("render workers have shut down".into())
        } else {
            facetalk_providers::Health::Healthy
        }
    }
}
