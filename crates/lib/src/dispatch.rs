//! Background dispatch pool: a fixed set of workers draining a bounded job queue.
//!
//! Webhook replies and knowledge-store writes run here so HTTP handlers can return at once.
//! [`DispatchPool::shutdown`] stops intake and waits until every queued job has run.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Queued {
    label: String,
    job: Job,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    QueueFull,
    #[error("dispatch pool is shutting down")]
    ShuttingDown,
}

pub struct DispatchPool {
    tx: Mutex<Option<mpsc::Sender<Queued>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchPool {
    /// Spawn `workers` worker tasks on the current runtime with a queue of `queue_size` jobs.
    pub fn start(workers: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Queued>(queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|n| {
                let rx = rx.clone();
                tokio::spawn(async move { run_worker(n, rx).await })
            })
            .collect();
        log::debug!("dispatch pool started: {} worker(s), queue {}", workers.max(1), queue_size.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(handles),
        }
    }

    /// Queue a job without waiting. Fails when the queue is full or shutdown has begun.
    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(DispatchError::ShuttingDown)?;
        tx.try_send(Queued {
            label: label.into(),
            job: Box::pin(job),
        })
        .map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::ShuttingDown,
        })
    }

    /// Close the queue, then wait for workers to finish every job already queued. Idempotent.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(tx);
        let handles = std::mem::take(&mut *self.workers.lock().await);
        if handles.is_empty() {
            return;
        }
        log::info!("draining dispatch pool ({} worker(s))", handles.len());
        for h in handles {
            let _ = h.await;
        }
        log::info!("dispatch pool drained");
    }
}

async fn run_worker(n: usize, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Queued>>>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(Queued { label, job }) = next else {
            break;
        };
        log::debug!("worker {}: running {}", n, label);
        // Own task so a panicking job does not take the worker down.
        if let Err(e) = tokio::spawn(job).await {
            log::warn!("worker {}: job {} aborted: {}", n, label, e);
        }
    }
    log::debug!("worker {}: queue closed", n);
}
