//! Fixed-size pool of download workers sharing one job queue.
//!
//! Workers pull a [`Job`], run its transfer and report it on the completed
//! channel, re-queue it at the tail while attempts remain, or report it on
//! the failed channel once the attempt budget is spent. A job owns its asset
//! while in flight; results only become visible through the channels.
use anyhow::anyhow;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::asset::ExtractAsset;
use crate::queue::JobQueue;
use crate::transfer::Transfer;

/// One asset plus the transfer that downloads it.
pub struct Job {
    pub asset: ExtractAsset,
    transfer: Arc<dyn Transfer>,
}

impl Job {
    pub fn new(asset: ExtractAsset, transfer: Arc<dyn Transfer>) -> Self {
        Self { asset, transfer }
    }

    pub fn attempts(&self) -> u32 {
        self.asset.download_attempts
    }
}

/// A job whose attempts are exhausted, with the error of the last attempt.
pub struct FailedJob {
    pub job: Job,
    pub error: String,
}

#[derive(Default)]
pub struct PoolOutcome {
    pub completed: Vec<Job>,
    pub failed: Vec<FailedJob>,
}

pub struct DownloadPool {
    queue: JobQueue<Job>,
    completed_rx: UnboundedReceiver<Job>,
    failed_rx: UnboundedReceiver<FailedJob>,
    workers: Vec<JoinHandle<()>>,
}

impl DownloadPool {
    /// Spawns `num_workers` workers on the current runtime. `capacity` bounds
    /// the job queue and must cover every job that will be submitted, since
    /// workers re-queue into the same queue.
    pub fn start(num_workers: usize, max_attempts: u32, capacity: usize) -> Self {
        let queue = JobQueue::bounded(capacity);
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();

        let workers = (0..num_workers.max(1))
            .map(|worker| {
                tokio::spawn(work(
                    worker,
                    queue.clone(),
                    completed_tx.clone(),
                    failed_tx.clone(),
                    max_attempts.max(1),
                ))
            })
            .collect();

        Self {
            queue,
            completed_rx,
            failed_rx,
            workers,
        }
    }

    pub async fn submit(&self, job: Job) -> Result<(), SendError<Job>> {
        self.queue.put(job).await
    }

    /// Waits up to `wait` for the next completed job.
    pub async fn next_completed(&mut self, wait: Duration) -> Option<Job> {
        tokio::time::timeout(wait, self.completed_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// True once nothing is queued or in flight.
    pub fn is_drained(&self) -> bool {
        self.queue.is_drained()
    }

    pub fn unfinished(&self) -> usize {
        self.queue.unfinished()
    }

    /// Waits for the queue to drain, stops the workers and hands back every
    /// result not yet taken with [`DownloadPool::next_completed`].
    pub async fn finish(mut self) -> PoolOutcome {
        self.queue.join().await;
        for worker in &self.workers {
            worker.abort();
        }

        let mut outcome = PoolOutcome::default();
        while let Ok(job) = self.completed_rx.try_recv() {
            outcome.completed.push(job);
        }
        while let Ok(failed) = self.failed_rx.try_recv() {
            outcome.failed.push(failed);
        }
        outcome
    }
}

impl Drop for DownloadPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn work(
    worker: usize,
    queue: JobQueue<Job>,
    completed: UnboundedSender<Job>,
    failed: UnboundedSender<FailedJob>,
    max_attempts: u32,
) {
    while let Some(mut job) = queue.get().await {
        job.asset.download_attempts += 1;
        let attempts = job.asset.download_attempts;

        let attempt = AssertUnwindSafe(job.transfer.download(&job.asset))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("download panicked: {}", panic_message(&*panic))));

        match attempt {
            Ok(()) => {
                job.asset.downloaded = true;
                let _ = completed.send(job);
            }
            Err(err) if attempts < max_attempts => {
                debug!(
                    worker,
                    asset = %job.asset.id(),
                    "Will retry ({attempts}/{max_attempts} attempts so far): {err:#}"
                );
                if let Err(SendError(job)) = queue.put(job).await {
                    let _ = failed.send(FailedJob {
                        job,
                        error: format!("{err:#} (could not be re-queued)"),
                    });
                }
            }
            Err(err) => {
                error!(worker, "Failed to download {}: {err:#}", job.asset);
                let _ = failed.send(FailedJob {
                    job,
                    error: format!("{err:#}"),
                });
            }
        }
        queue.task_done();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("no message")
}
