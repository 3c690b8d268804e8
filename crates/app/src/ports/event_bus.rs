//! Event bus port — the outbound half of the platform message bus.

use std::future::Future;

use vconnector_domain::error::ConnectorError;

use crate::messages::OutboundMessage;

/// Publishes outbound messages (state changes, acknowledgements, connection
/// transitions) to the platform.
pub trait EventPublisher: Send + Sync {
    /// Publish a message to all current subscribers.
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), ConnectorError>> + Send;
}

impl<T: EventPublisher> EventPublisher for std::sync::Arc<T> {
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), ConnectorError>> + Send {
        (**self).publish(message)
    }
}
