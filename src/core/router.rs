//! Fan-out of one byte stream to any number of consumers
//!
//! A [`Router`] is cheap to clone; all clones share the consumer list.
//! Consumers are either channel subscriptions or [`ByteSink`] objects
//! called inline. Each consumer sees every chunk once, in dispatch order.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Synchronous consumer of routed bytes
pub trait ByteSink: Send + Sync {
    /// Handle one chunk. Must not block.
    fn input_bytes(&self, bytes: &Bytes);
}

/// Identifier of a registered consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

#[derive(Clone)]
enum Consumer {
    Channel(mpsc::UnboundedSender<Bytes>),
    Sink(Arc<dyn ByteSink>),
}

struct Entry {
    id: ConsumerId,
    name: String,
    consumer: Consumer,
}

/// Receiving end of a router subscription
#[derive(Debug)]
pub struct Subscription {
    id: ConsumerId,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Subscription {
    /// Consumer id, usable with [`Router::detach`]
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Wait for the next chunk; `None` once detached
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a chunk if one is queued
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// Shared consumer list
#[derive(Clone, Default)]
pub struct Router {
    entries: Arc<RwLock<Vec<Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("consumers", &self.consumers())
            .finish()
    }
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, name: &str, consumer: Consumer) -> ConsumerId {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            name: name.to_string(),
            consumer,
        });
        debug!(consumer = name, "router consumer attached");
        id
    }

    /// Subscribe with a channel
    pub fn subscribe(&self, name: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(name, Consumer::Channel(tx));
        Subscription { id, rx }
    }

    /// Attach an inline sink
    pub fn attach(&self, name: &str, sink: Arc<dyn ByteSink>) -> ConsumerId {
        self.register(name, Consumer::Sink(sink))
    }

    /// Remove a consumer. Returns false if it was not registered.
    pub fn detach(&self, id: ConsumerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Names of registered consumers in registration order
    pub fn consumers(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Number of registered consumers
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no consumer is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver `bytes` to every consumer. Returns the number reached.
    ///
    /// Consumers are called on a snapshot of the list, so a sink may attach
    /// or detach on this router. Subscriptions whose receiver was dropped
    /// are pruned.
    pub fn dispatch(&self, bytes: &Bytes) -> usize {
        let snapshot: Vec<(ConsumerId, Consumer)> = self
            .entries
            .read()
            .iter()
            .map(|e| (e.id, e.consumer.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, consumer) in snapshot {
            match consumer {
                Consumer::Channel(tx) => {
                    if tx.send(bytes.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(id);
                    }
                }
                Consumer::Sink(sink) => {
                    sink.input_bytes(bytes);
                    delivered += 1;
                }
            }
        }

        if !closed.is_empty() {
            self.entries.write().retain(|e| !closed.contains(&e.id));
        }

        delivered
    }
}
