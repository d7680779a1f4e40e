//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Periodic driver of the notification pipeline. Every tick:
//
// | Step                  | Effect                                                           |
// |-----------------------|------------------------------------------------------------------|
// | send_notifications    | publish a message for each event due in `[now - freq + margin, now]` |
// | delete_old_notified   | purge notified events that started a year or more ago            |
//
// Ticks run as independent tasks and may overlap. Events stay un-notified until the sender
// flags them, so an event whose publish failed is picked up again while still in a window.
//--------------------------------------------------------------------------------------------------

pub mod scheduler_service;

use async_trait::async_trait;
use rabbitmq::RabbitMQError;
use thiserror::Error;

use crate::domain::{models::NotificationMessage, services::calendar::CalendarError};

pub use scheduler_service::Scheduler;

/// Errors that can stop a scheduler tick
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("queue error: {0}")]
    Queue(#[from] RabbitMQError),

    #[error("storage error: {0}")]
    Storage(#[from] CalendarError),
}

impl SchedulerError {
    /// True when the broker link is gone for good and the run loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Queue(err) if err.is_fatal())
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Events found in the scan window
    pub due: usize,
    pub published: usize,
    pub failed: usize,
    /// Events removed by the retention sweep
    pub purged: u64,
}

/// Outbound port the scheduler publishes notifications through
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, message: &NotificationMessage) -> Result<(), RabbitMQError>;

    async fn shutdown(&self) -> Result<(), RabbitMQError>;
}
