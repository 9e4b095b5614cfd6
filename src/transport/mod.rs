//! Publish/subscribe transport abstraction.
//!
//! A [`Transport`] hands out [`Connection`]s; a connection publishes raw
//! JSON strings to named channels and opens [`Subscription`]s over one or
//! more channels. Delivery is at-most-once and best effort.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryBroker;

/// A raw payload received on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub channel: String,
    pub payload: String,
}

/// Continuous stream of envelopes for the channels it was opened on.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { rx }
    }

    /// Next envelope, or `None` once the connection is closed. Cancel safe.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Acquire a connection. Fails with [`crate::Error::Connection`] when
    /// the broker is unreachable.
    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Publish to `channel`. Returns [`crate::Error::ConnectionClosed`] after
    /// [`Connection::close`].
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;

    /// Release the connection and end its subscriptions.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
