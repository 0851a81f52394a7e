//! Redis-compatible bus backend (`fred`).
//!
//! One shared connection publishes; every subscription gets its own
//! subscriber client so a slow consumer of one channel never blocks another.
//!
//! Both reconnect after the backend restarts, and subscriber clients
//! re-issue their `SUBSCRIBE` on every reconnect. Messages published while
//! the backend was down are lost. A backend that is unreachable at startup
//! is still a connect error.

use async_trait::async_trait;
use fred::clients::SubscriberClient;
use fred::prelude::*;
use fred::types::config::ReconnectPolicy;
use tokio::sync::{broadcast, mpsc};

use crate::{BusError, EventBus, Subscription};

#[derive(Clone)]
pub struct RedisBus {
    url: String,
    config: Config,
    publisher: Client,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").field("url", &self.url).finish()
    }
}

impl RedisBus {
    /// Connect the publisher. The first connection attempt is not retried;
    /// later disconnects are.
    #[tracing::instrument(err)]
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let connect_err = |err: fred::error::Error| BusError::Connect {
            url: url.to_owned(),
            reason: err.to_string(),
        };

        let config = client_config(url).map_err(connect_err)?;
        let publisher = Client::new(config.clone(), None, None, Some(reconnect_policy()));
        publisher.init().await.map_err(connect_err)?;

        tracing::info!("connected to event bus");
        Ok(Self {
            url: url.to_owned(),
            config,
            publisher,
        })
    }
}

/// Retry forever, backing off from 100ms to 10s.
fn reconnect_policy() -> ReconnectPolicy {
    ReconnectPolicy::new_exponential(0, 100, 10_000, 2)
}

/// `fail_fast` keeps the initial connection error visible despite the
/// reconnect policy.
fn client_config(url: &str) -> Result<Config, fred::error::Error> {
    let mut config = Config::from_url(url)?;
    config.fail_fast = true;
    Ok(config)
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        self.publisher
            .publish::<(), _, _>(channel, payload)
            .await
            .map_err(|err| BusError::Publish {
                channel: channel.to_owned(),
                reason: err.to_string(),
            })
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let subscription_err = |err: fred::error::Error| BusError::Subscription {
            channel: channel.to_owned(),
            reason: err.to_string(),
        };

        let subscriber =
            SubscriberClient::new(self.config.clone(), None, None, Some(reconnect_policy()));
        subscriber.init().await.map_err(subscription_err)?;

        // Take the receiver before SUBSCRIBE so nothing published after the
        // confirmation can slip past.
        let mut messages = subscriber.message_rx();
        if let Err(err) = subscriber.subscribe(channel).await {
            let _ = subscriber.quit().await;
            return Err(subscription_err(err));
        }
        let resubscriber = subscriber.manage_subscriptions();
        tracing::debug!(channel, "subscription confirmed");

        let (tx, rx) = mpsc::unbounded_channel();
        let wanted = channel.to_owned();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = tx.closed() => break,
                    received = messages.recv() => received,
                };
                match received {
                    Ok(message) => {
                        let from: &str = &message.channel;
                        if from != wanted {
                            continue;
                        }
                        match message.value.convert::<String>() {
                            Ok(payload) => {
                                if tx.send(payload).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(channel = %wanted, error = %err, "dropping non-string payload");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %wanted, skipped, "subscriber lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            resubscriber.abort();
            let _ = subscriber.quit().await;
            tracing::debug!(channel = %wanted, "subscription released");
        });

        Ok(Subscription::new(channel.to_owned(), rx))
    }
}
