//! Outbound creation events.

use async_trait::async_trait;
use tracing::warn;

use tessera_core::events::ActionCreatedEvent;

use crate::error::PublishError;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ActionCreatedEvent) -> Result<(), PublishError>;
}

/// Publish an event, logging instead of propagating failures.
pub async fn publish_best_effort(publisher: &dyn EventPublisher, event: &ActionCreatedEvent) -> bool {
    match publisher.publish(event).await {
        Ok(()) => true,
        Err(e) => {
            warn!(action_id = %event.action_id, error = %e, "Creation event not published");
            false
        }
    }
}
