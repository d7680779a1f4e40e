//! Binds the RabbitMQ client to the scheduler and sender ports.

use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{DeliveryHandler, RabbitMQBuilder, RabbitMQError, RabbitQueue};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::{
        models::NotificationMessage,
        services::{scheduler::NotificationPublisher, sender::NotificationConsumer},
    },
};

/// Builds the notification queue described by `config` without connecting
pub fn notification_queue(config: &Config) -> RabbitQueue {
    queue_builder(config).build()
}

/// Builds the notification queue and opens its first connection
///
/// # Errors
/// `RabbitMQError::RetriesExceeded` if the broker is unreachable for every attempt
pub async fn connect_notification_queue(config: &Config) -> Result<Arc<RabbitQueue>, RabbitMQError> {
    let queue = queue_builder(config).connect().await?;
    Ok(Arc::new(queue))
}

fn queue_builder(config: &Config) -> RabbitMQBuilder {
    RabbitMQBuilder::new(&config.rabbit_url, &config.app_id)
        .queue(&config.queue_name)
        .handlers(config.handlers_number)
        .reconnect_policy(config.reconnect_policy())
}

#[async_trait]
impl NotificationPublisher for RabbitQueue {
    async fn publish(&self, message: &NotificationMessage) -> Result<(), RabbitMQError> {
        RabbitQueue::publish(self, message).await
    }

    async fn shutdown(&self) -> Result<(), RabbitMQError> {
        RabbitQueue::shutdown(self).await
    }
}

#[async_trait]
impl NotificationConsumer for RabbitQueue {
    async fn consume(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), RabbitMQError> {
        RabbitQueue::consume(self, cancel, handler).await
    }

    async fn shutdown(&self) -> Result<(), RabbitMQError> {
        RabbitQueue::shutdown(self).await
    }
}
