use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{EventId, StoredEvent, UserId};

/// A calendar event as seen by the use-case layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// When to notify the owner, defaults to `start_date`
    pub notification_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_notified: bool,
}

impl Event {
    /// Effective notification instant
    pub fn notify_at(&self) -> DateTime<Utc> {
        self.notification_date.unwrap_or(self.start_date)
    }
}

impl From<StoredEvent> for Event {
    fn from(stored: StoredEvent) -> Self {
        Self {
            id: stored.id.0,
            user_id: stored.user_id.0,
            title: stored.title,
            description: stored.description,
            start_date: stored.start_date,
            end_date: stored.end_date,
            notification_date: Some(stored.notification_date),
            is_notified: stored.is_notified,
        }
    }
}

/// Sub-second digits kept in storage; Postgres `timestamptz` stops at microseconds
const STORED_SUBSEC_DIGITS: u16 = 6;

impl From<Event> for StoredEvent {
    fn from(event: Event) -> Self {
        let notification_date = event.notify_at().trunc_subsecs(STORED_SUBSEC_DIGITS);

        Self {
            id: EventId(event.id),
            user_id: UserId(event.user_id),
            title: event.title,
            description: event.description,
            start_date: event.start_date.trunc_subsecs(STORED_SUBSEC_DIGITS),
            end_date: event.end_date.trunc_subsecs(STORED_SUBSEC_DIGITS),
            notification_date,
            is_notified: event.is_notified,
        }
    }
}
