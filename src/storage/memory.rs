//! In-process event store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{EventId, EventRepository, StorageError, StoredEvent, UserId};

#[derive(Debug, Default)]
struct Table {
    events: HashMap<EventId, StoredEvent>,
    last_id: i64,
}

impl Table {
    /// True if an event of the same user starts at the same instant, ignoring `except`
    fn is_busy(&self, candidate: &StoredEvent, except: Option<EventId>) -> bool {
        self.events.values().any(|e| {
            Some(e.id) != except
                && e.user_id == candidate.user_id
                && e.start_date == candidate.start_date
        })
    }
}

/// Event store keeping every event in a `HashMap`.
///
/// Reads take the read lock and run concurrently; every mutation, including the
/// double-booking scan, runs under the write lock.
#[derive(Debug, Default)]
pub struct MemoryEventStorage {
    table: RwLock<Table>,
}

impl MemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventRepository for MemoryEventStorage {
    async fn get_event_by_id(&self, id: EventId) -> Result<StoredEvent, StorageError> {
        self.table
            .read()
            .events
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn create_event(&self, mut event: StoredEvent) -> Result<EventId, StorageError> {
        let mut table = self.table.write();

        if table.is_busy(&event, None) {
            return Err(StorageError::DateBusy);
        }

        table.last_id += 1;
        let id = EventId(table.last_id);

        event.id = id;
        event.is_notified = false;
        table.events.insert(id, event);

        Ok(id)
    }

    async fn update_event(&self, mut event: StoredEvent) -> Result<u64, StorageError> {
        let mut table = self.table.write();

        let Some(current) = table.events.get(&event.id) else {
            return Ok(0);
        };
        event.is_notified = current.is_notified;

        if table.is_busy(&event, Some(event.id)) {
            return Err(StorageError::DateBusy);
        }

        table.events.insert(event.id, event);

        Ok(1)
    }

    async fn delete_event(&self, id: EventId) -> Result<u64, StorageError> {
        let removed = self.table.write().events.remove(&id);

        Ok(u64::from(removed.is_some()))
    }

    async fn get_user_events_by_period(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let table = self.table.read();

        let mut events: Vec<StoredEvent> = table
            .events
            .values()
            .filter(|e| e.user_id == user_id && start <= e.start_date && e.start_date <= end)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.start_date, e.id));

        Ok(events)
    }

    async fn get_events_by_notification_date_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let table = self.table.read();

        let mut events: Vec<StoredEvent> = table
            .events
            .values()
            .filter(|e| {
                !e.is_notified && start <= e.notification_date && e.notification_date <= end
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.notification_date, e.id));

        Ok(events)
    }

    async fn update_is_notified(
        &self,
        id: EventId,
        is_notified: bool,
    ) -> Result<(), StorageError> {
        if let Some(event) = self.table.write().events.get_mut(&id) {
            event.is_notified = is_notified;
        }

        Ok(())
    }

    async fn delete_notified_events_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let mut table = self.table.write();

        let before = table.events.len();
        table
            .events
            .retain(|_, e| !(e.is_notified && e.start_date <= cutoff));

        Ok((before - table.events.len()) as u64)
    }
}
