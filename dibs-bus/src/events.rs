//! Module lifecycle events on top of the raw bus contract.

use std::sync::Arc;

use dibs_core::payload::{self, EventPayload};
use dibs_core::{CoreError, EventKind, ModuleName};

use crate::{BusError, EventBus, Subscription};

/// Publishes and subscribes to `<prefix>:<kind>` channels with encoded
/// `<module>@<timestamp>` payloads.
#[derive(Clone)]
pub struct ModuleEvents {
    bus: Arc<dyn EventBus>,
    prefix: String,
}

impl ModuleEvents {
    pub fn new(bus: Arc<dyn EventBus>, prefix: impl Into<String>) -> Self {
        Self {
            bus,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn channel(&self, kind: EventKind) -> String {
        kind.channel(&self.prefix)
    }

    /// Publish `kind` for `module`; returns the payload that was sent.
    pub async fn publish(&self, kind: EventKind, module: &ModuleName) -> Result<String, BusError> {
        let payload = payload::encode(module);
        self.bus.publish(&self.channel(kind), &payload).await?;
        tracing::debug!(event = %kind, payload = %payload, "published");
        Ok(payload)
    }

    pub async fn subscribe(&self, kind: EventKind) -> Result<EventStream, BusError> {
        let inner = self.bus.subscribe(&self.channel(kind)).await?;
        Ok(EventStream { kind, inner })
    }
}

/// Decoded stream of one event kind.
#[derive(Debug)]
pub struct EventStream {
    kind: EventKind,
    inner: Subscription,
}

impl EventStream {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next decoded payload. Malformed payloads are yielded as errors so the
    /// consumer decides whether to skip them; `None` means the stream ended.
    pub async fn next(&mut self) -> Option<Result<EventPayload, CoreError>> {
        let raw = self.inner.next().await?;
        Some(payload::decode(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBus;

    fn module() -> ModuleName {
        ModuleName::parse("services/api").expect("name")
    }

    #[tokio::test]
    async fn registration_lands_on_prefixed_channel() {
        let bus = MemoryBus::new();
        let events = ModuleEvents::new(Arc::new(bus.clone()), "dibs");

        let payload = events
            .publish(EventKind::ModuleRegistered, &module())
            .await
            .expect("publish");

        assert!(payload.starts_with("services/api@"));
        assert_eq!(bus.history_for("dibs:module_registered"), vec![payload]);
    }

    #[tokio::test]
    async fn stream_decodes_and_surfaces_malformed_payloads() {
        let bus = MemoryBus::new();
        let events = ModuleEvents::new(Arc::new(bus.clone()), "dibs");
        let mut stream = events
            .subscribe(EventKind::ModuleUnregistered)
            .await
            .expect("subscribe");
        assert_eq!(stream.kind(), EventKind::ModuleUnregistered);

        bus.publish("dibs:module_unregistered", "garbage")
            .await
            .expect("publish raw");
        events
            .publish(EventKind::ModuleUnregistered, &module())
            .await
            .expect("publish");

        let first = stream.next().await.expect("item");
        assert!(matches!(first, Err(CoreError::MalformedPayload { .. })));
        let second = stream.next().await.expect("item").expect("decoded");
        assert_eq!(second.module, module());
    }

    #[tokio::test]
    async fn prefixes_do_not_collide() {
        let bus = MemoryBus::new();
        let staging = ModuleEvents::new(Arc::new(bus.clone()), "staging");
        let prod = ModuleEvents::new(Arc::new(bus.clone()), "prod");
        let mut prod_stream = prod.subscribe(EventKind::ModuleBuilt).await.expect("subscribe");

        staging
            .publish(EventKind::ModuleBuilt, &module())
            .await
            .expect("publish");
        prod.publish(EventKind::ModuleBuilt, &module())
            .await
            .expect("publish");

        let received = prod_stream.next().await.expect("item").expect("decoded");
        assert_eq!(received.module, module());
        assert_eq!(bus.history_for("staging:module_built").len(), 1);
        assert_eq!(bus.history_for("prod:module_built").len(), 1);
    }
}
