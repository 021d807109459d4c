//! Event routing from orchestrations to the stream bus and webhooks.

use std::sync::Arc;

use protocol::EventType;
use serde_json::Value;
use streams::{StreamBus, WebhookDispatcher};
use tracing::warn;
use uuid::Uuid;

/// Fans each lifecycle event out to the stream bus and, when a webhook is
/// registered, to the webhook dispatcher.
pub struct EventSink {
    bus: Arc<StreamBus>,
    webhooks: Arc<WebhookDispatcher>,
}

impl EventSink {
    pub fn new(bus: Arc<StreamBus>, webhooks: Arc<WebhookDispatcher>) -> Self {
        Self { bus, webhooks }
    }

    /// Publish an event. Stream failures are logged, never propagated:
    /// delivery problems must not affect workflow execution.
    pub async fn emit(&self, workflow_id: Uuid, event_type: EventType, payload: Value) {
        match self.bus.publish(workflow_id, event_type, payload).await {
            Ok(event) => self.webhooks.dispatch(&event),
            Err(err) => {
                warn!(
                    workflow_id = %workflow_id,
                    event = %event_type,
                    "Failed to publish event: {err}"
                );
            }
        }
    }

    pub fn bus(&self) -> &Arc<StreamBus> {
        &self.bus
    }

    pub fn webhooks(&self) -> &Arc<WebhookDispatcher> {
        &self.webhooks
    }
}
