//! Event bridge — translates between the platform message bus and the engine.
//!
//! Inbound: raw messages become [`Command`]s handed to the
//! [`CommandProcessor`], answered by an [`Acknowledgement`].
//! Outbound: every committed [`StateChange`], whatever its origin, becomes an
//! [`OutboundMessage`] on the [`EventPublisher`].

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;

use vconnector_domain::command::Command;
use vconnector_domain::device::ConnectionChange;
use vconnector_domain::error::{ConnectorError, ProtocolError};
use vconnector_domain::state_change::StateChange;

use crate::messages::{Acknowledgement, OutboundMessage, decode_command};
use crate::ports::EventPublisher;
use crate::services::command_processor::CommandProcessor;

/// Bridge between the message bus and the command processor.
pub struct EventBridge<P> {
    processor: Arc<CommandProcessor>,
    publisher: P,
}

impl<P> EventBridge<P>
where
    P: EventPublisher,
{
    pub fn new(processor: Arc<CommandProcessor>, publisher: P) -> Self {
        Self {
            processor,
            publisher,
        }
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<CommandProcessor> {
        &self.processor
    }

    /// Handle a command and publish the resulting state change.
    ///
    /// The property's emission turn is held across commit and publish, so
    /// events for one property leave in commit order.
    ///
    /// # Errors
    ///
    /// Returns the processor's rejection; nothing is published in that case.
    pub async fn submit(&self, command: &Command) -> Result<StateChange, ConnectorError> {
        let _turn = self.processor.store().emission_turn(&command.target).await;
        let change = self.processor.handle(command)?;
        self.publish_state_change(&change).await;
        Ok(change)
    }

    /// Decode and handle one inbound message, then publish its acknowledgement.
    ///
    /// Rejections (unknown property, access, validation) are not errors here:
    /// they produce a negative acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the message cannot be decoded. No
    /// acknowledgement is published, since there is nothing to correlate it to.
    pub async fn on_inbound_command(&self, raw: &str) -> Result<Acknowledgement, ProtocolError> {
        let command = decode_command(raw)?;

        let ack = match self.submit(&command).await {
            Ok(_) => Acknowledgement::accepted(&command),
            Err(err) => {
                tracing::warn!(
                    property = %command.target,
                    correlation_id = %command.correlation_id,
                    error = ?err,
                    "command rejected"
                );
                Acknowledgement::rejected(&command, &err)
            }
        };

        self.publish(OutboundMessage::Ack(ack.clone())).await;
        Ok(ack)
    }

    /// Outbound message for a committed state change.
    #[must_use]
    pub fn on_state_change(change: &StateChange) -> OutboundMessage {
        OutboundMessage::from(change)
    }

    pub async fn publish_state_change(&self, change: &StateChange) {
        self.publish(Self::on_state_change(change)).await;
    }

    pub async fn publish_connection_change(&self, change: &ConnectionChange) {
        tracing::info!(
            device = %change.device,
            previous = %change.previous,
            state = %change.state,
            "device connection changed"
        );
        self.publish(OutboundMessage::from(change)).await;
    }

    async fn publish(&self, message: OutboundMessage) {
        if let Err(err) = self.publisher.publish(message).await {
            tracing::warn!(error = %err, "failed to publish outbound message");
        }
    }
}

impl<P> EventBridge<P>
where
    P: EventPublisher + 'static,
{
    /// Serve inbound messages until `stop` turns `true` or `inbound` closes.
    ///
    /// At most `limit` messages are handled concurrently. Handlers already
    /// started when the loop ends are awaited, so their commits and events
    /// are never cut short.
    pub async fn run_inbound(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<String>,
        limit: usize,
        mut stop: watch::Receiver<bool>,
    ) {
        let permits = Arc::new(Semaphore::new(limit.max(1)));
        let mut handlers = JoinSet::new();

        loop {
            while let Some(result) = handlers.try_join_next() {
                log_handler_result(result);
            }

            let permit = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let raw = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                raw = inbound.recv() => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };

            let bridge = Arc::clone(&self);
            handlers.spawn(async move {
                let _permit = permit;
                if let Err(err) = bridge.on_inbound_command(&raw).await {
                    tracing::warn!(error = ?err, "dropping inbound message");
                }
            });
        }

        while let Some(result) = handlers.join_next().await {
            log_handler_result(result);
        }
        tracing::debug!("inbound loop finished");
    }
}

fn log_handler_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "inbound handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InProcessEventBus;
    use crate::messages::AckErrorCode;
    use crate::store::DeviceStateStore;
    use crate::store::tests::{hall_device, target_temp};
    use tokio::sync::broadcast;
    use vconnector_domain::command::Origin;
    use vconnector_domain::value::PropertyValue;

    fn bridge() -> (Arc<EventBridge<InProcessEventBus>>, broadcast::Receiver<OutboundMessage>) {
        let store = Arc::new(DeviceStateStore::new());
        store.upsert_device(hall_device()).unwrap();
        let bus = InProcessEventBus::new(256);
        let rx = bus.subscribe();
        let processor = Arc::new(CommandProcessor::new(store));
        (Arc::new(EventBridge::new(processor, bus)), rx)
    }

    fn command(property: &str, value: &str) -> String {
        let (channel, property) = property.split_once('/').unwrap();
        format!(
            r#"{{"device":"hall","channel":"{channel}","property":"{property}","value":{value}}}"#
        )
    }

    fn drain(rx: &mut broadcast::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn should_publish_state_change_then_ack_when_command_accepted() {
        let (bridge, mut rx) = bridge();

        let ack = bridge
            .on_inbound_command(&command("thermostat/targetTemp", "22.5"))
            .await
            .unwrap();
        assert!(ack.accepted);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        let OutboundMessage::StateChanged {
            previous,
            value,
            origin,
            correlation_id,
            ..
        } = &messages[0]
        else {
            panic!("expected a state change first, got {:?}", messages[0]);
        };
        assert_eq!(previous, &Some(PropertyValue::Float(20.0)));
        assert_eq!(value, &PropertyValue::Float(22.5));
        assert_eq!(*origin, Origin::Command);
        assert_eq!(*correlation_id, Some(ack.correlation_id));
        assert_eq!(messages[1], OutboundMessage::Ack(ack));
    }

    #[tokio::test]
    async fn should_only_publish_negative_ack_when_value_out_of_range() {
        let (bridge, mut rx) = bridge();
        bridge
            .on_inbound_command(&command("thermostat/targetTemp", "22.5"))
            .await
            .unwrap();
        drain(&mut rx);

        let ack = bridge
            .on_inbound_command(&command("thermostat/targetTemp", "150"))
            .await
            .unwrap();

        assert!(!ack.accepted);
        assert_eq!(ack.error.as_ref().unwrap().code, AckErrorCode::ValidationFailed);
        assert_eq!(drain(&mut rx), vec![OutboundMessage::Ack(ack)]);
        assert_eq!(
            bridge.processor().store().get(&target_temp()),
            Some(PropertyValue::Float(22.5))
        );
    }

    #[tokio::test]
    async fn should_deny_command_on_generated_property() {
        let (bridge, _rx) = bridge();
        let ack = bridge
            .on_inbound_command(&command("sensors/temperature", "50"))
            .await
            .unwrap();
        assert_eq!(ack.error.unwrap().code, AckErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn should_reject_unknown_property_with_ack() {
        let (bridge, _rx) = bridge();
        let ack = bridge
            .on_inbound_command(&command("sensors/humidity", "50"))
            .await
            .unwrap();
        assert_eq!(ack.error.unwrap().code, AckErrorCode::UnknownProperty);
    }

    #[tokio::test]
    async fn should_surface_protocol_error_and_publish_nothing_when_malformed() {
        let (bridge, mut rx) = bridge();
        let result = bridge.on_inbound_command("{\"device\":").await;
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_emit_changes_of_one_property_in_commit_order() {
        let (bridge, mut rx) = bridge();

        let mut tasks = JoinSet::new();
        for i in 0..40_i32 {
            let bridge = Arc::clone(&bridge);
            tasks.spawn(async move {
                let value = 10.0 + f64::from(i % 20);
                bridge
                    .on_inbound_command(&command("thermostat/targetTemp", &value.to_string()))
                    .await
                    .unwrap();
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let mut last = Some(PropertyValue::Float(20.0));
        let mut changes = 0;
        for message in drain(&mut rx) {
            if let OutboundMessage::StateChanged { previous, value, .. } = message {
                assert_eq!(previous, last);
                last = Some(value);
                changes += 1;
            }
        }
        assert_eq!(changes, 40);
    }

    #[tokio::test]
    async fn should_handle_every_message_until_inbound_closes() {
        let (bridge, mut rx) = bridge();
        let (tx, inbound) = mpsc::channel(8);
        let (_stop_tx, stop) = watch::channel(false);

        let server = tokio::spawn(Arc::clone(&bridge).run_inbound(inbound, 2, stop));
        tx.send(command("thermostat/targetTemp", "21")).await.unwrap();
        tx.send("garbage".to_string()).await.unwrap();
        tx.send(command("thermostat/targetTemp", "150")).await.unwrap();
        drop(tx);
        server.await.unwrap();

        let acks: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Ack(ack) => Some(ack.accepted),
                _ => None,
            })
            .collect();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks.iter().filter(|accepted| **accepted).count(), 1);
    }

    #[tokio::test]
    async fn should_return_when_stop_signalled() {
        let (bridge, _rx) = bridge();
        let (_tx, inbound) = mpsc::channel::<String>(8);
        let (stop_tx, stop) = watch::channel(false);

        let server = tokio::spawn(bridge.run_inbound(inbound, 4, stop));
        stop_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
