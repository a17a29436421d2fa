//! EventProcessor (spec §4.2): a bounded async queue drained by a fixed
//! worker pool, with per-event retry/backoff and dispatcher handoff.

use crate::common::consts;
use crate::db::{InsertOutcome, Store};
use crate::dispatcher::Dispatcher;
use crate::event::Event;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Job {
    Insert(Event),
}

/// Handle used by session tasks to submit work; cheap to clone.
#[derive(Clone)]
pub struct ProcessorHandle {
    sender: mpsc::Sender<Job>,
    store: Store,
}

impl ProcessorHandle {
    /// Non-blocking enqueue. A bloom-hit event is treated as already
    /// processed and returns `true` immediately, even under backpressure
    /// (spec §4.2). Otherwise returns `false` (backpressure) when the queue
    /// is full; the caller must surface `OK false "relay busy"`.
    pub fn enqueue(&self, evt: Event) -> bool {
        if self.store.bloom().may_contain(&evt.id) {
            return true;
        }
        self.sender.try_send(Job::Insert(evt)).is_ok()
    }

    /// Deletion routing is resolved in the worker from the event's category,
    /// so this is just `enqueue` under a spec-facing name (spec §4.2).
    pub fn enqueue_deletion(&self, evt: Event) -> bool {
        self.enqueue(evt)
    }
}

/// Owns the queue and the worker tasks. Dropped at shutdown once all
/// `ProcessorHandle` clones are gone and the channel drains.
pub struct EventProcessor {
    handle: ProcessorHandle,
}

impl EventProcessor {
    /// Spawns `2 * num_cpus` workers pulling from a bounded queue (spec §4.2).
    pub fn spawn(store: Store, dispatcher: Dispatcher, capacity: usize, shutdown: tokio_util::sync::CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (num_cpus() * 2).max(2);

        for _ in 0..workers {
            let rx = rx.clone();
            let worker_store = store.clone();
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                worker_loop(rx, worker_store, dispatcher, shutdown).await;
            });
        }

        Self { handle: ProcessorHandle { sender: tx, store } }
    }

    pub fn handle(&self) -> ProcessorHandle {
        self.handle.clone()
    }
}

async fn worker_loop(
    rx: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    store: Store,
    dispatcher: Dispatcher,
    shutdown: tokio_util::sync::CancellationToken,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            tokio::select! {
                job = guard.recv() => job,
                _ = shutdown.cancelled() => None,
            }
        };
        let Some(Job::Insert(evt)) = job else {
            return;
        };
        process_one(&store, &dispatcher, evt).await;
    }
}

async fn process_one(store: &Store, dispatcher: &Dispatcher, evt: Event) {
    let mut attempt = 0u32;
    loop {
        match store.insert(&evt).await {
            Ok(InsertOutcome::Stored) | Ok(InsertOutcome::Duplicate) => {
                dispatcher.publish(evt);
                return;
            }
            Ok(InsertOutcome::Rejected(reason)) => {
                tracing::debug!(event_id = %evt.id, reason, "event rejected at insert time");
                return;
            }
            Err(e) if attempt < consts::INSERT_RETRY_ATTEMPTS => {
                let backoff = consts::INSERT_RETRY_BASE_MS * 2u64.pow(attempt);
                tracing::warn!(event_id = %evt.id, attempt, error = %e, "insert failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(event_id = %evt.id, error = %e, "insert failed after retries, dropping");
                return;
            }
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
