use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Event;

/// Message published for every event whose notification is due
///
/// Serialised as `{"ID": 1, "UserID": 2, "Title": "...", "Date": "<RFC 3339>"}`,
/// where `Date` carries the start date of the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "UserID")]
    pub user_id: i64,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Date")]
    pub date: DateTime<Utc>,
}

impl From<&Event> for NotificationMessage {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id,
            title: event.title.clone(),
            date: event.start_date,
        }
    }
}
