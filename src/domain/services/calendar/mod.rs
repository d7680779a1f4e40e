//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Calendar use case: the domain facade over an `EventRepository`.
//
// | Item                 | Role                                                              |
// |----------------------|-------------------------------------------------------------------|
// | EventUseCase         | CRUD, period queries and notification bookkeeping                 |
// | Period               | Day / week / month boundary derivation                            |
// | NotificationSource   | Port read by the scheduler (due events, retention sweep)          |
// | Notifier             | Port used by the sender to flag processed events                  |
//
// Storage identifiers and records never leave this module: callers see `Event` with plain ids.
//--------------------------------------------------------------------------------------------------

pub mod calendar_service;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveTime, TimeZone, Utc};
use thiserror::Error;

use crate::domain::models::Event;
use crate::storage::StorageError;

pub use calendar_service::EventUseCase;

/// Errors returned by the calendar use case
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The event does not exist
    #[error("event {0} not found")]
    NotFound(i64),

    /// The user already has an event starting at this instant
    #[error("user {user_id} already has an event at {start_date}")]
    DateBusy {
        user_id: i64,
        start_date: DateTime<Utc>,
    },

    #[error("failed to {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    /// The requested period cannot be represented
    #[error("period out of range for {0}")]
    OutOfRange(DateTime<Utc>),
}

/// Calendar unit used by the period queries
///
/// Bounds are inclusive and computed in UTC. Weeks start on Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// Returns the first and last instant of the unit containing `date`
    ///
    /// # Returns
    /// `None` only at the edges of the representable date range
    pub fn bounds(self, date: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let day = date.date_naive();

        let (first, next) = match self {
            Period::Day => (day, day.checked_add_days(Days::new(1))?),
            Period::Week => {
                let offset = u64::from(day.weekday().num_days_from_sunday());
                let sunday = day.checked_sub_days(Days::new(offset))?;
                (sunday, sunday.checked_add_days(Days::new(7))?)
            }
            Period::Month => {
                let first = day.with_day(1)?;
                (first, first.checked_add_months(Months::new(1))?)
            }
        };

        let start = Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN));
        let end = Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)) - Duration::nanoseconds(1);

        Some((start, end))
    }
}

/// Read side of the calendar needed by the scheduler
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Not yet notified events whose notification date lies within `[start, end]`
    async fn get_events_by_notification_date_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError>;

    /// Deletes notified events starting at or before `cutoff`, returning how many were removed
    async fn delete_notified_events_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CalendarError>;
}

/// Marks events as notified once their message has been processed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, id: i64) -> Result<(), CalendarError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn last_nanosecond(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        at(y, m, d, 23, 59) + Duration::seconds(59) + Duration::nanoseconds(999_999_999)
    }

    #[test]
    fn day_bounds_cover_the_whole_day() {
        let (start, end) = Period::Day.bounds(at(2024, 3, 13, 15, 42)).unwrap();

        assert_eq!(start, at(2024, 3, 13, 0, 0));
        assert_eq!(end, last_nanosecond(2024, 3, 13));
    }

    #[test]
    fn week_starts_on_sunday() {
        // Wednesday
        let (start, end) = Period::Week.bounds(at(2024, 3, 13, 8, 0)).unwrap();
        assert_eq!(start, at(2024, 3, 10, 0, 0));
        assert_eq!(end, last_nanosecond(2024, 3, 16));

        // a Sunday is the first day of its own week
        let (start, _) = Period::Week.bounds(at(2024, 3, 10, 23, 0)).unwrap();
        assert_eq!(start, at(2024, 3, 10, 0, 0));
    }

    #[test]
    fn week_may_span_two_months() {
        let (start, end) = Period::Week.bounds(at(2024, 3, 1, 12, 0)).unwrap();

        assert_eq!(start, at(2024, 2, 25, 0, 0));
        assert_eq!(end, last_nanosecond(2024, 3, 2));
    }

    #[test]
    fn month_bounds_handle_leap_february() {
        let (start, end) = Period::Month.bounds(at(2024, 2, 14, 9, 0)).unwrap();

        assert_eq!(start, at(2024, 2, 1, 0, 0));
        assert_eq!(end, last_nanosecond(2024, 2, 29));
    }

    #[test]
    fn december_rolls_into_next_year() {
        let (start, end) = Period::Month.bounds(at(2023, 12, 31, 23, 59)).unwrap();

        assert_eq!(start, at(2023, 12, 1, 0, 0));
        assert_eq!(end, last_nanosecond(2023, 12, 31));
    }
}
