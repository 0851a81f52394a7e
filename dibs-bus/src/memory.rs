//! In-process bus backend.
//!
//! Delivers synchronously in publish order and keeps a history of every
//! publish, which makes it the test double for the Redis backend. It can be
//! switched offline to exercise the fail-fast paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BusError, EventBus, Subscription};

/// One recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    history: Vec<Published>,
    offline: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish so far, oldest first.
    pub fn history(&self) -> Vec<Published> {
        self.lock().history.clone()
    }

    /// Publishes on one channel, oldest first.
    pub fn history_for(&self, channel: &str) -> Vec<String> {
        self.lock()
            .history
            .iter()
            .filter(|p| p.channel == channel)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(BusError::Publish {
                channel: channel.to_owned(),
                reason: "memory bus is offline".to_owned(),
            });
        }

        inner.history.push(Published {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        });
        if let Some(senders) = inner.subscribers.get_mut(channel) {
            senders.retain(|tx| tx.send(payload.to_owned()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(BusError::Subscription {
                channel: channel.to_owned(),
                reason: "memory bus is offline".to_owned(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner
            .subscribers
            .entry(channel.to_owned())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel.to_owned(), rx))
    }
}
