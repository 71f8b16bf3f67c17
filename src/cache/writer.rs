//! Asynchronous cache write-back.
//!
//! # Responsibilities
//! - Persist freshly rendered pages off the response path
//! - Serialize writes per route key
//! - Bound the backlog without dropping entries
//!
//! # Design Decisions
//! - One worker drains a bounded queue in arrival order
//! - A full queue degrades to a detached write (still under the key lock)
//! - Failures are logged only; the response has already been sent

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::store::OutputCache;
use crate::locks::KeyedLocks;
use crate::observability::metrics;

/// One rendered page waiting to be persisted.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub key: String,
    pub ext: &'static str,
    pub body: Vec<u8>,
}

enum Job {
    Write(CacheWrite),
    Flush(oneshot::Sender<()>),
}

/// Handle to the write-back worker. Cheap to clone.
#[derive(Clone)]
pub struct WriteBack {
    tx: mpsc::Sender<Job>,
    store: Arc<OutputCache>,
    locks: Arc<KeyedLocks<String>>,
    debug_logs: bool,
}

impl WriteBack {
    /// Spawn the worker. It drains what is queued and stops when
    /// `shutdown` fires.
    pub fn spawn(
        store: Arc<OutputCache>,
        capacity: usize,
        debug_logs: bool,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let locks = Arc::new(KeyedLocks::new());

        let worker = tokio::spawn(run_worker(rx, store.clone(), locks.clone(), shutdown));

        (
            Self {
                tx,
                store,
                locks,
                debug_logs,
            },
            worker,
        )
    }

    /// Queue `write`; if the queue is full, persist it from a detached task.
    pub fn enqueue(&self, write: CacheWrite) {
        match self.tx.try_send(Job::Write(write)) {
            Ok(()) => {
                metrics::record_cache_write("queued");
            }
            Err(mpsc::error::TrySendError::Full(Job::Write(write)))
            | Err(mpsc::error::TrySendError::Closed(Job::Write(write))) => {
                if self.debug_logs {
                    tracing::debug!(key = %write.key, "Cache queue full, writing immediately");
                }
                metrics::record_cache_write("immediate");
                let store = self.store.clone();
                let locks = self.locks.clone();
                tokio::spawn(async move {
                    persist(&store, &locks, write, "immediate").await;
                });
            }
            Err(_) => {}
        }
    }

    /// Wait until everything queued before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// The per-route-key lock registry shared by every writer.
    pub fn locks(&self) -> &KeyedLocks<String> {
        &self.locks
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Job>,
    store: Arc<OutputCache>,
    locks: Arc<KeyedLocks<String>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => handle(job, &store, &locks).await,
                None => break,
            },
            _ = shutdown.recv() => {
                rx.close();
                while let Some(job) = rx.recv().await {
                    handle(job, &store, &locks).await;
                }
                break;
            }
        }
    }
    tracing::debug!("Cache write-back worker stopped");
}

async fn handle(job: Job, store: &OutputCache, locks: &KeyedLocks<String>) {
    match job {
        Job::Write(write) => persist(store, locks, write, "queued").await,
        Job::Flush(done) => {
            let _ = done.send(());
        }
    }
}

async fn persist(store: &OutputCache, locks: &KeyedLocks<String>, write: CacheWrite, mode: &str) {
    let lock = locks.lock_for(&write.key);
    let _guard = lock.lock().await;

    match store.save(&write.key, write.ext, &write.body).await {
        Ok(()) => {
            metrics::record_cache_write_outcome(mode, true);
            tracing::debug!(key = %write.key, mode, "Cache write complete");
        }
        Err(e) => {
            metrics::record_cache_write_outcome(mode, false);
            tracing::error!(key = %write.key, mode, error = %e, "Cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn page(key: &str, body: &str) -> CacheWrite {
        CacheWrite {
            key: key.to_string(),
            ext: "html",
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_queued_writes_land_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(OutputCache::new(dir.path()));
        let (_stop, stop_rx) = broadcast::channel(1);
        let (writer, _worker) = WriteBack::spawn(store, 8, false, stop_rx);

        writer.enqueue(page("a", "first"));
        writer.enqueue(page("a", "second"));
        writer.flush().await;

        let body = std::fs::read_to_string(dir.path().join("a/index.html")).unwrap();
        assert_eq!(body, "second");
    }

    #[tokio::test]
    async fn test_full_queue_writes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(OutputCache::new(dir.path()));
        let (_stop, stop_rx) = broadcast::channel(1);
        let (writer, _worker) = WriteBack::spawn(store, 1, false, stop_rx);

        // Park the worker on a held key lock.
        let blocker = writer.locks().lock_for(&"blocked".to_string());
        let guard = blocker.lock().await;
        writer.enqueue(page("blocked", "x"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        writer.enqueue(page("queued", "y")); // fills the queue
        writer.enqueue(page("overflow", "z")); // falls back to a detached write

        let overflow = dir.path().join("overflow/index.html");
        for _ in 0..100 {
            if overflow.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(overflow.exists(), "detached write should not wait for the worker");
        assert!(!dir.path().join("queued/index.html").exists());

        drop(guard);
        writer.flush().await;
        assert!(dir.path().join("blocked/index.html").exists());
        assert!(dir.path().join("queued/index.html").exists());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(OutputCache::new(dir.path()));
        let (stop, stop_rx) = broadcast::channel(1);
        let (writer, worker) = WriteBack::spawn(store, 8, false, stop_rx);

        writer.enqueue(page("one", "1"));
        writer.enqueue(page("two", "2"));
        stop.send(()).unwrap();
        worker.await.unwrap();

        assert!(dir.path().join("one/index.html").exists());
        assert!(dir.path().join("two/index.html").exists());
    }
}
