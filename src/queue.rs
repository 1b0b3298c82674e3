//! A bounded job queue shared by many consumers.
//!
//! Every [`JobQueue::put`] adds one unfinished task and every
//! [`JobQueue::task_done`] retires one, so "drained" means no job is queued
//! and no dequeued job is still being worked on. Re-queueing a job before
//! marking its dequeue done keeps the count from touching zero in between.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::{Mutex, Notify};

pub struct JobQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    unfinished: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            unfinished: Arc::clone(&self.unfinished),
            drained: Arc::clone(&self.drained),
        }
    }
}

impl<T: Send> JobQueue<T> {
    /// Creates a queue holding at most `capacity` jobs.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            unfinished: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Enqueues at the tail, waiting for room if the queue is full.
    pub async fn put(&self, item: T) -> Result<(), SendError<T>> {
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = self.tx.send(item).await {
            self.task_done();
            return Err(rejected);
        }
        Ok(())
    }

    /// Waits for the next job.
    pub async fn get(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Marks one dequeued job as handled.
    pub fn task_done(&self) {
        let previous = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        debug_assert!(previous.is_ok(), "task_done called more often than put");
        if previous == Ok(1) {
            self.drained.notify_waiters();
        }
    }

    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.unfinished() == 0
    }

    /// Resolves once every job put so far has been marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_get_task_done() {
        let queue = JobQueue::bounded(4);
        assert!(queue.is_drained());
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();
        assert_eq!(queue.unfinished(), 2);

        assert_eq!(queue.get().await, Some(1));
        queue.task_done();
        assert_eq!(queue.unfinished(), 1);
        assert_eq!(queue.get().await, Some(2));
        assert!(!queue.is_drained());
        queue.task_done();
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_requeue_keeps_queue_busy() {
        let queue = JobQueue::bounded(1);
        queue.put("job").await.unwrap();
        let job = queue.get().await.unwrap();
        queue.put(job).await.unwrap();
        queue.task_done();
        assert_eq!(queue.unfinished(), 1);
        assert_eq!(queue.get().await, Some("job"));
        queue.task_done();
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_join_waits_for_consumers() {
        let queue = JobQueue::bounded(8);
        for i in 0..8 {
            queue.put(i).await.unwrap();
        }

        let mut handles = vec![];
        for _ in 0..3 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                while let Some(_job) = q.get().await {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    q.task_done();
                }
            }));
        }

        tokio::time::timeout(Duration::from_secs(5), queue.join())
            .await
            .unwrap();
        assert!(queue.is_drained());
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_join_on_empty_queue_returns() {
        let queue: JobQueue<u8> = JobQueue::bounded(1);
        tokio::time::timeout(Duration::from_millis(100), queue.join())
            .await
            .unwrap();
    }
}
