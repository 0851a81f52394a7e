//! Error types for dibs-bus.

use thiserror::Error;

/// All errors that can arise talking to the event bus backend.
#[derive(Debug, Error)]
pub enum BusError {
    /// The backend could not be reached or rejected the handshake.
    #[error("cannot connect to event bus at {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The backend did not confirm a subscription.
    #[error("subscription to '{channel}' failed: {reason}")]
    Subscription { channel: String, reason: String },

    #[error("publish to '{channel}' failed: {reason}")]
    Publish { channel: String, reason: String },
}
