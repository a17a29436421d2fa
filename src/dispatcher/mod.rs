//! EventDispatcher (spec §4.3): fans freshly stored/ephemeral events out to
//! local subscribers, and pulls events authored on other cluster nodes into
//! the same local broadcast stream.

use crate::common::consts;
use crate::db::Store;
use crate::event::Event;
use crate::filter::Filter;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Subscriber {
    filters: Vec<Filter>,
    sender: mpsc::Sender<Event>,
}

/// A live registration; dropping it unregisters automatically.
pub struct SubscriptionHandle {
    id: u64,
    registry: Arc<DashMap<u64, Subscriber>>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    input: mpsc::Sender<Event>,
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Spawns the batching pump and, when the store reports cluster mode,
    /// the cross-node poller (spec §4.3).
    pub fn spawn(store: Store, shutdown: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<Event>(consts::DISPATCHER_INPUT_CAPACITY);
        let subscribers: Arc<DashMap<u64, Subscriber>> = Arc::new(DashMap::new());
        let next_id = Arc::new(AtomicU64::new(1));

        let dispatcher = Self { input: tx, subscribers: subscribers.clone(), next_id };

        tokio::spawn({
            let subscribers = subscribers.clone();
            let shutdown = shutdown.clone();
            async move {
                let mut batch = Vec::new();
                let mut interval = tokio::time::interval(std::time::Duration::from_millis(consts::DISPATCH_FLUSH_INTERVAL_MS));
                loop {
                    tokio::select! {
                        maybe_evt = rx.recv() => {
                            match maybe_evt {
                                Some(evt) => {
                                    batch.push(evt);
                                    if batch.len() >= consts::SUBSCRIBER_CHANNEL_CAPACITY {
                                        flush(&subscribers, &mut batch).await;
                                    }
                                }
                                None => break,
                            }
                        }
                        _ = interval.tick() => {
                            if !batch.is_empty() {
                                flush(&subscribers, &mut batch).await;
                            }
                        }
                        _ = shutdown.cancelled() => break,
                    }
                }
                if !batch.is_empty() {
                    flush(&subscribers, &mut batch).await;
                }
            }
        });

        tokio::spawn({
            let dispatcher = dispatcher.clone();
            let store = store.clone();
            let shutdown = shutdown.clone();
            async move {
                if !store.is_cluster_mode().await {
                    return; // standalone mode skips polling entirely (spec §4.3)
                }
                cross_node_poll_loop(store, dispatcher, shutdown).await;
            }
        });

        dispatcher
    }

    /// Enqueues a stored/ephemeral event for local fan-out (spec §4.2 step 4).
    /// Never blocks the caller: if the input channel is momentarily full the
    /// event is dropped and logged (spec §9).
    pub fn publish(&self, evt: Event) {
        if self.input.try_send(evt).is_err() {
            tracing::warn!("dispatcher input channel full, dropping event");
        }
    }

    /// Registers a new subscription with its compiled filters. The returned
    /// channel delivers matching live events; dropping the handle unregisters.
    pub fn subscribe(&self, filters: Vec<Filter>) -> (SubscriptionHandle, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(consts::SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { filters, sender: tx });
        (SubscriptionHandle { id, registry: self.subscribers.clone() }, rx)
    }

    /// Replaces the filter set of an existing subscription in place (REQ
    /// re-use of the same subId replaces rather than duplicating — spec §4.7).
    pub fn update_filters(&self, handle: &SubscriptionHandle, filters: Vec<Filter>) {
        if let Some(mut sub) = self.subscribers.get_mut(&handle.id) {
            sub.filters = filters;
        }
    }
}

async fn flush(subscribers: &DashMap<u64, Subscriber>, batch: &mut Vec<Event>) {
    for evt in batch.drain(..) {
        for sub in subscribers.iter() {
            if sub.filters.iter().any(|f| f.matches(&evt)) {
                if sub.sender.try_send(evt.clone()).is_err() {
                    tracing::debug!(subscriber = sub.key(), "subscriber channel full, dropping event for it");
                }
            }
        }
    }
}

async fn cross_node_poll_loop(store: Store, dispatcher: Dispatcher, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(consts::CROSS_NODE_POLL_INTERVAL_SECS));
    let dedup_ttl = std::time::Duration::from_secs(consts::CROSS_NODE_DEDUP_TTL_SECS);
    let mut recently_forwarded: std::collections::HashMap<String, tokio::time::Instant> = std::collections::HashMap::new();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return,
        }
        let last_seen = match store.last_seen().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read cross-node cursor");
                continue;
            }
        };
        let now = now_secs();
        let poll_time = tokio::time::Instant::now();
        recently_forwarded.retain(|_, seen_at| poll_time.duration_since(*seen_at) < dedup_ttl);

        match store.events_since(last_seen, now).await {
            Ok(events) => {
                for evt in events {
                    // de-duplicate against events this node already forwarded in
                    // the last dedup window; every other polled row is a remote
                    // write that must be published unconditionally (spec §4.3).
                    if recently_forwarded.contains_key(&evt.id) {
                        continue;
                    }
                    recently_forwarded.insert(evt.id.clone(), poll_time);
                    dispatcher.publish(evt);
                }
                if let Err(e) = store.advance_last_seen(now).await {
                    tracing::warn!(error = %e, "failed to advance cross-node cursor");
                }
            }
            Err(e) => tracing::warn!(error = %e, "cross-node poll query failed"),
        }
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
