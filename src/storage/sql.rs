//! PostgreSQL event store.
//!
//! The double-booking invariant is delegated to the `uq_events_user_start` unique
//! constraint; its violation (SQLSTATE 23505) is translated to `StorageError::DateBusy`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{debug, info};

use super::{EventId, EventRepository, StorageError, StoredEvent, UserId};

const UNIQUE_VIOLATION: &str = "23505";
const MAX_CONNECTIONS: u32 = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Creates a connection pool from a database URL.
pub async fn connect(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect(database_url)
        .await?;

    info!("database connection established");

    Ok(pool)
}

/// Applies the embedded migrations in `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn map_write_error(err: sqlx::Error) -> StorageError {
    let unique_violation = err
        .as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);

    if unique_violation {
        debug!("unique constraint violated");
        return StorageError::DateBusy;
    }

    StorageError::Database(err)
}

#[derive(Debug, Clone)]
pub struct SqlEventStorage {
    pool: PgPool,
}

impl SqlEventStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventRepository for SqlEventStorage {
    async fn get_event_by_id(&self, id: EventId) -> Result<StoredEvent, StorageError> {
        sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT id, user_id, title, description, start_date, end_date, notification_date, is_notified
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)
    }

    async fn create_event(&self, event: StoredEvent) -> Result<EventId, StorageError> {
        let id = sqlx::query_scalar::<_, EventId>(
            r#"
            INSERT INTO events (user_id, title, description, start_date, end_date, notification_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(event.user_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.notification_date)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(id)
    }

    async fn update_event(&self, event: StoredEvent) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET
                user_id = $2,
                title = $3,
                description = $4,
                start_date = $5,
                end_date = $6,
                notification_date = $7
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.notification_date)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_event(&self, id: EventId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn get_user_events_by_period(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let events = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT id, user_id, title, description, start_date, end_date, notification_date, is_notified
            FROM events
            WHERE user_id = $1 AND start_date BETWEEN $2 AND $3
            ORDER BY start_date, id
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn get_events_by_notification_date_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let events = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT id, user_id, title, description, start_date, end_date, notification_date, is_notified
            FROM events
            WHERE NOT is_notified AND notification_date BETWEEN $1 AND $2
            ORDER BY notification_date, id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn update_is_notified(
        &self,
        id: EventId,
        is_notified: bool,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE events SET is_notified = $2 WHERE id = $1")
            .bind(id)
            .bind(is_notified)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_notified_events_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM events WHERE start_date <= $1 AND is_notified")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
