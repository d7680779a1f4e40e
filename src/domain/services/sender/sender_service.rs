use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{Delivery, DeliveryHandler, RabbitMQError};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{models::NotificationMessage, services::calendar::Notifier};

use super::{AckMode, NotificationConsumer};

/// Turns deliveries into notify calls
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
    ack_mode: AckMode,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>, ack_mode: AckMode) -> Self {
        Self { notifier, ack_mode }
    }

    async fn ack(delivery: &Delivery) {
        if let Err(err) = delivery.ack().await {
            error!(tag = delivery.delivery_tag(), error = %err, "failed to ack message");
        }
    }

    async fn process(&self, delivery: &Delivery, message: &NotificationMessage) {
        match self.ack_mode {
            AckMode::BeforeNotify => {
                Self::ack(delivery).await;

                match self.notifier.notify(message.id).await {
                    Ok(()) => debug!("event notified"),
                    Err(err) => error!(error = %err, "failed to flag event as notified"),
                }
            }
            AckMode::AfterNotify => match self.notifier.notify(message.id).await {
                Ok(()) => {
                    Self::ack(delivery).await;
                    debug!("event notified");
                }
                Err(err) => {
                    warn!(error = %err, "failed to flag event as notified, requeueing");
                    if let Err(err) = delivery.reject(true).await {
                        error!(error = %err, "failed to requeue message");
                    }
                }
            },
        }
    }
}

#[async_trait]
impl DeliveryHandler for NotificationHandler {
    async fn handle(&self, delivery: Delivery) {
        let message: NotificationMessage = match serde_json::from_slice(delivery.body()) {
            Ok(message) => message,
            Err(err) => {
                warn!(tag = delivery.delivery_tag(), error = %err, "dropping undecodable message");
                Self::ack(&delivery).await;
                return;
            }
        };

        let span = info_span!("notification", id = message.id, user_id = message.user_id);
        self.process(&delivery, &message).instrument(span).await;
    }
}

/// Consumes notification messages and flags their events
pub struct Sender {
    queue: Arc<dyn NotificationConsumer>,
    handler: Arc<NotificationHandler>,
}

impl Sender {
    pub fn new(
        queue: Arc<dyn NotificationConsumer>,
        notifier: Arc<dyn Notifier>,
        ack_mode: AckMode,
    ) -> Self {
        Self {
            queue,
            handler: Arc::new(NotificationHandler::new(notifier, ack_mode)),
        }
    }

    /// Consumes until `cancel` fires or the queue is shut down
    ///
    /// # Errors
    /// Propagates the queue error when the broker cannot be reached again
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RabbitMQError> {
        info!(ack_mode = ?self.handler.ack_mode, "sender started");

        let result = self.queue.consume(cancel, self.handler.clone()).await;

        match &result {
            Ok(()) => info!("sender stopped"),
            Err(err) => error!(error = %err, "sender stopped"),
        }

        result
    }

    pub async fn shutdown(&self) -> Result<(), RabbitMQError> {
        self.queue.shutdown().await
    }
}
