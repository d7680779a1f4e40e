//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Consumer side of the notification pipeline. `Sender::run` hands a `NotificationHandler` to the
// queue; the handler decodes each delivery and flags the event through a `Notifier`.
//
// | AckMode        | Order                  | Failure mode                                        |
// |----------------|------------------------|-----------------------------------------------------|
// | BeforeNotify   | ack, then notify       | a failed notify is lost (at-most-once flagging)     |
// | AfterNotify    | notify, then ack       | a failed notify is requeued (at-least-once)         |
//
// Undecodable payloads are logged and acked in both modes.
//--------------------------------------------------------------------------------------------------

pub mod sender_service;

use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{DeliveryHandler, RabbitMQError};
use tokio_util::sync::CancellationToken;

pub use sender_service::{NotificationHandler, Sender};

/// Ordering of the broker acknowledgement relative to the notify call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    #[default]
    BeforeNotify,
    AfterNotify,
}

/// Inbound port the sender consumes deliveries from
#[async_trait]
pub trait NotificationConsumer: Send + Sync {
    /// Feeds deliveries to `handler` until `cancel` fires or the consumer is shut down
    async fn consume(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), RabbitMQError>;

    async fn shutdown(&self) -> Result<(), RabbitMQError>;
}
