//! # dibs-bus
//!
//! Typed publish/subscribe contract between client and host processes.
//!
//! [`EventBus`] is the raw channel/payload contract; [`RedisBus`] implements it
//! over a Redis-compatible backend and [`MemoryBus`] in-process. Components use
//! the [`ModuleEvents`] facade, which names channels `<prefix>:<kind>` and
//! encodes `<module>@<timestamp>` payloads.

pub mod error;
pub mod events;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use error::BusError;
pub use events::{EventStream, ModuleEvents};
pub use memory::MemoryBus;
pub use redis::RedisBus;

/// Raw publish/subscribe over named channels.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Resolves only once the backend has confirmed the subscription, so a
    /// publish issued after this returns is never missed.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
}

/// An active subscription delivering payloads in backend order.
///
/// Dropping it releases the backend subscription.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub(crate) fn new(channel: String, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { channel, rx }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, or `None` once the backend side of the subscription is
    /// closed for good.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
