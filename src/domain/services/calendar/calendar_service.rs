//! Calendar use case backed by an `EventRepository`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::{
    domain::models::Event,
    storage::{EventId, EventRepository, StorageError, StoredEvent, UserId},
};

use super::{CalendarError, NotificationSource, Notifier, Period};

/// Domain facade over the event store
///
/// Shared by the scheduler (as a [`NotificationSource`]), the sender (as a
/// [`Notifier`]) and any transport layer exposing event CRUD.
#[derive(Clone)]
pub struct EventUseCase {
    repository: Arc<dyn EventRepository>,
}

impl EventUseCase {
    pub fn new(repository: Arc<dyn EventRepository>) -> Self {
        Self { repository }
    }

    pub async fn get_event_by_id(&self, id: i64) -> Result<Event, CalendarError> {
        self.repository
            .get_event_by_id(EventId(id))
            .await
            .map(Event::from)
            .map_err(|err| match err {
                StorageError::NotFound => CalendarError::NotFound(id),
                source => CalendarError::Storage {
                    operation: "get event",
                    source,
                },
            })
    }

    /// Stores a new event and returns its id
    ///
    /// A missing notification date defaults to the start date; the notification flag of the
    /// input is ignored.
    ///
    /// # Errors
    /// `CalendarError::DateBusy` if the user already has an event starting at the same instant
    #[instrument(skip(self, event), fields(user_id = event.user_id))]
    pub async fn create_event(&self, event: Event) -> Result<i64, CalendarError> {
        let user_id = event.user_id;
        let start_date = event.start_date;

        let id = self
            .repository
            .create_event(StoredEvent::from(event))
            .await
            .map_err(|err| write_error(err, "create event", user_id, start_date))?;

        debug!(id = id.0, "event created");

        Ok(id.0)
    }

    /// Replaces the event `id` with `event`
    ///
    /// # Returns
    /// Number of updated events, `0` when `id` does not exist
    pub async fn update_event(&self, id: i64, mut event: Event) -> Result<u64, CalendarError> {
        event.id = id;
        let user_id = event.user_id;
        let start_date = event.start_date;

        self.repository
            .update_event(StoredEvent::from(event))
            .await
            .map_err(|err| write_error(err, "update event", user_id, start_date))
    }

    pub async fn delete_event(&self, id: i64) -> Result<u64, CalendarError> {
        self.repository
            .delete_event(EventId(id))
            .await
            .map_err(storage_error("delete event"))
    }

    /// Events of `user_id` starting within the calendar unit that contains `date`
    pub async fn get_user_events(
        &self,
        user_id: i64,
        period: Period,
        date: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        let (start, end) = period.bounds(date).ok_or(CalendarError::OutOfRange(date))?;

        let events = self
            .repository
            .get_user_events_by_period(UserId(user_id), start, end)
            .await
            .map_err(storage_error("list user events"))?;

        Ok(events.into_iter().map(Event::from).collect())
    }

    pub async fn get_user_day_events(
        &self,
        user_id: i64,
        date: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        self.get_user_events(user_id, Period::Day, date).await
    }

    pub async fn get_user_week_events(
        &self,
        user_id: i64,
        date: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        self.get_user_events(user_id, Period::Week, date).await
    }

    pub async fn get_user_month_events(
        &self,
        user_id: i64,
        date: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        self.get_user_events(user_id, Period::Month, date).await
    }

    pub async fn get_events_by_notification_date_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        let events = self
            .repository
            .get_events_by_notification_date_period(start, end)
            .await
            .map_err(storage_error("list due events"))?;

        Ok(events.into_iter().map(Event::from).collect())
    }

    pub async fn delete_notified_events_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CalendarError> {
        self.repository
            .delete_notified_events_before_date(cutoff)
            .await
            .map_err(storage_error("delete notified events"))
    }

    /// Flags the event as notified. Idempotent; unknown ids are ignored.
    pub async fn notify(&self, id: i64) -> Result<(), CalendarError> {
        self.repository
            .update_is_notified(EventId(id), true)
            .await
            .map_err(storage_error("flag event as notified"))
    }
}

fn storage_error(operation: &'static str) -> impl Fn(StorageError) -> CalendarError {
    move |source| CalendarError::Storage { operation, source }
}

fn write_error(
    err: StorageError,
    operation: &'static str,
    user_id: i64,
    start_date: DateTime<Utc>,
) -> CalendarError {
    match err {
        StorageError::DateBusy => CalendarError::DateBusy {
            user_id,
            start_date,
        },
        source => CalendarError::Storage { operation, source },
    }
}

#[async_trait]
impl NotificationSource for EventUseCase {
    async fn get_events_by_notification_date_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        EventUseCase::get_events_by_notification_date_period(self, start, end).await
    }

    async fn delete_notified_events_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CalendarError> {
        EventUseCase::delete_notified_events_before_date(self, cutoff).await
    }
}

#[async_trait]
impl Notifier for EventUseCase {
    async fn notify(&self, id: i64) -> Result<(), CalendarError> {
        EventUseCase::notify(self, id).await
    }
}
