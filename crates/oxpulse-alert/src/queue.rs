//! Bounded background work queue.
//!
//! Notification fan-out and analyses run here instead of on detached tasks.
//! The channel capacity bounds memory; a full queue makes `submit` wait for
//! at most the enqueue timeout and then drop the task.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub workers: usize,
    pub enqueue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
            enqueue_timeout: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is full")]
    Full,

    #[error("task queue is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub workers: usize,
    /// Tasks waiting for a worker.
    pub depth: usize,
    pub submitted: u64,
    pub completed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
}

pub struct TaskQueue {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    config: QueueConfig,
}

impl TaskQueue {
    /// Starts `config.workers` workers on the current runtime.
    pub fn start(config: QueueConfig) -> Self {
        let capacity = config.capacity.max(1);
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Task>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    loop {
                        let task = { rx.lock().await.recv().await };
                        let Some(task) = task else { break };
                        // A panicking task must not take the worker down.
                        if let Err(e) = tokio::spawn(task).await {
                            tracing::error!(worker, error = %e, "Background task failed");
                        }
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::debug!(worker, "Task queue worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            counters,
            config: QueueConfig {
                capacity,
                workers,
                enqueue_timeout: config.enqueue_timeout,
            },
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Task>> {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Enqueues `task`, waiting at most the enqueue timeout for a free slot.
    pub async fn submit<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(tx) = self.sender() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Closed);
        };
        match tx.send_timeout(Box::pin(task), self.config.enqueue_timeout).await {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let err = match e {
                    mpsc::error::SendTimeoutError::Timeout(_) => QueueError::Full,
                    mpsc::error::SendTimeoutError::Closed(_) => QueueError::Closed,
                };
                tracing::warn!(error = %err, "Background task dropped");
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        let depth = self
            .sender()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        QueueStats {
            capacity: self.config.capacity,
            workers: self.config.workers,
            depth,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting tasks and waits until queued tasks have run.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Waits until every submitted task has completed.
    pub async fn drain(&self) {
        loop {
            let stats = self.stats();
            if stats.completed >= stats.submitted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
