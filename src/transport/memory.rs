//! In-process broker.
//!
//! Every subscription owns an unbounded queue; a publish fans the payload
//! out to the queues registered on that channel and forgets it. Nothing is
//! retained for subscribers that join later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Connection, Envelope, Subscription, Transport};
use crate::error::{Error, Result};

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>;

struct BrokerInner {
    subscribers: Mutex<Subscribers>,
    reachable: AtomicBool,
    published: AtomicU64,
}

/// Shared in-memory pub/sub broker. Clones share the same channels.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the broker going away (or coming back) for new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total publishes accepted since creation.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    fn deliver(&self, channel: &str, payload: String) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.inner.subscribers.lock();
        let Some(subs) = subscribers.get_mut(channel) else {
            trace!(channel, "no subscribers");
            return 0;
        };
        subs.retain(|tx| {
            tx.send(Envelope {
                channel: channel.to_string(),
                payload: payload.clone(),
            })
            .is_ok()
        });
        let delivered = subs.len();
        if subs.is_empty() {
            subscribers.remove(channel);
        }
        delivered
    }

    fn attach(&self, channel: &str, tx: mpsc::UnboundedSender<Envelope>) {
        self.inner
            .subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
    }

    fn detach(&self, channel: &str, tx: &mpsc::UnboundedSender<Envelope>) {
        let mut subscribers = self.inner.subscribers.lock();
        if let Some(subs) = subscribers.get_mut(channel) {
            subs.retain(|other| !other.same_channel(tx));
            if subs.is_empty() {
                subscribers.remove(channel);
            }
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        if !self.is_reachable() {
            return Err(Error::Connection("memory broker is unreachable".to_string()));
        }
        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            closed: AtomicBool::new(false),
            attached: Mutex::new(Vec::new()),
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    closed: AtomicBool,
    attached: Mutex<Vec<(String, mpsc::UnboundedSender<Envelope>)>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let delivered = self.broker.deliver(channel, payload);
        trace!(channel, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut attached = self.attached.lock();
        for channel in channels {
            self.broker.attach(channel, tx.clone());
            attached.push((channel.clone(), tx.clone()));
        }
        debug!(?channels, "subscribed");
        Ok(Subscription::new(rx))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let attached = std::mem::take(&mut *self.attached.lock());
        for (channel, tx) in &attached {
            self.broker.detach(channel, tx);
        }
        debug!(subscriptions = attached.len(), "connection closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
