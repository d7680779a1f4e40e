//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Persistence for calendar events. Two interchangeable backends implement `EventRepository`:
//
// | Backend              | Description                                                   |
// |----------------------|---------------------------------------------------------------|
// | MemoryEventStorage   | HashMap behind a single reader/writer lock                    |
// | SqlEventStorage      | PostgreSQL table with a unique (user_id, start_date) index    |
//
// Both enforce the double-booking invariant: a user cannot own two events starting at the
// same instant. Violations surface as `StorageError::DateBusy`.
//--------------------------------------------------------------------------------------------------

pub mod memory;
pub mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{Config, StorageBackend};

pub use memory::MemoryEventStorage;
pub use sql::SqlEventStorage;

/// Store-assigned event identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct EventId(pub i64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

/// Canonical storage representation of an event
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredEvent {
    pub id: EventId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub notification_date: DateTime<Utc>,
    pub is_notified: bool,
}

/// Errors that can occur in an event store
#[derive(Debug, Error)]
pub enum StorageError {
    /// No event with the requested id
    #[error("entity not found")]
    NotFound,

    /// The user already has an event starting at the same instant
    #[error("date already busy")]
    DateBusy,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Storage contract shared by every backend.
///
/// Single calls are atomic; there is no transaction spanning several calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Fetches one event, `StorageError::NotFound` if it does not exist
    async fn get_event_by_id(&self, id: EventId) -> Result<StoredEvent, StorageError>;

    /// Inserts a new, not yet notified event and returns its assigned id.
    ///
    /// # Errors
    /// `StorageError::DateBusy` if the user already owns an event with the same start date
    async fn create_event(&self, event: StoredEvent) -> Result<EventId, StorageError>;

    /// Replaces the event with `event.id`, keeping its notification flag.
    ///
    /// # Returns
    /// Number of affected events, `0` when the id does not exist
    ///
    /// # Errors
    /// `StorageError::DateBusy` if another event of the user starts at the same date
    async fn update_event(&self, event: StoredEvent) -> Result<u64, StorageError>;

    /// Deletes an event, returning `0` when it does not exist
    async fn delete_event(&self, id: EventId) -> Result<u64, StorageError>;

    /// Events of `user_id` starting within `[start, end]`, ordered by start date
    async fn get_user_events_by_period(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// Not yet notified events whose notification date is within `[start, end]`,
    /// ordered by notification date
    async fn get_events_by_notification_date_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// Sets the notification flag; a missing id is not an error
    async fn update_is_notified(&self, id: EventId, is_notified: bool)
    -> Result<(), StorageError>;

    /// Deletes notified events starting at or before `cutoff`
    async fn delete_notified_events_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StorageError>;
}

/// Builds the event store selected by the configuration.
///
/// The relational backend connects and applies pending migrations before it is returned.
pub async fn create_event_repository(
    config: &Config,
) -> Result<Arc<dyn EventRepository>, StorageError> {
    match &config.storage {
        StorageBackend::InMemory => {
            info!("using in-memory event storage");
            Ok(Arc::new(MemoryEventStorage::new()))
        }
        StorageBackend::Sql { database_url } => {
            info!("using sql event storage");
            let pool = sql::connect(database_url).await?;
            sql::run_migrations(&pool).await?;
            Ok(Arc::new(SqlEventStorage::new(pool)))
        }
    }
}
