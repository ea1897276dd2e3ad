// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! In-memory pub/sub for [`crate::domain::events::DomainEvent`], backing the
//! observer contracts of the layer manager (C10) and context manager (C9).
//! MVP in-memory only — events are lost on restart, same tradeoff the
//! teacher's bus documents for its own domain events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::events::{ContextEvent, DomainEvent, LayerEvent, ToolEvent};

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender: Arc::new(sender) }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_layer_event(&self, event: LayerEvent) {
        self.publish(DomainEvent::Layer(event));
    }

    pub fn publish_context_event(&self, event: ContextEvent) {
        self.publish(DomainEvent::Context(event));
    }

    pub fn publish_tool_event(&self, event: ToolEvent) {
        self.publish(DomainEvent::Tool(event));
    }

    fn publish(&self, event: DomainEvent) {
        let _receiver_count = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { receiver: self.sender.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!(lagged = n, "event receiver lagged, events dropped");
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,
    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::LayerState;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_subscribe_round_trip() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();
        bus.publish_layer_event(LayerEvent {
            layer_id: "video-creation".to_string(),
            from: LayerState::Inactive,
            to: LayerState::Activating,
            at: Utc::now(),
        });
        let event = receiver.recv().await.unwrap();
        assert!(matches!(event, DomainEvent::Layer(_)));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new(10);
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish_tool_event(ToolEvent {
            tool_name: "launch-remotion-studio".to_string(),
            invoked_at: Utc::now(),
            succeeded: true,
            duration_ms: 42,
        });
        r1.recv().await.unwrap();
        r2.recv().await.unwrap();
    }
}
