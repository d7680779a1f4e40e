use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Months, TimeDelta, Utc};
use rabbitmq::RabbitMQError;
use tokio::{
    select,
    task::JoinSet,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::{models::NotificationMessage, services::calendar::NotificationSource};

use super::{NotificationPublisher, SchedulerError, TickReport};

const RETENTION_MONTHS: u32 = 12;
/// Upper bound of the overlap between consecutive scan windows
const SCAN_MARGIN: Duration = Duration::from_secs(1);

/// Scans for due notifications and publishes them on a fixed interval
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn NotificationPublisher>,
    source: Arc<dyn NotificationSource>,
    frequency: Duration,
    /// Cancelled by `shutdown`, stops `run` like the caller's token does
    stopped: CancellationToken,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    /// * `queue` - Where notification messages are published
    /// * `source` - Provides due events and performs the retention sweep
    /// * `frequency` - Tick interval, also the width of every scan window
    pub fn new(
        queue: Arc<dyn NotificationPublisher>,
        source: Arc<dyn NotificationSource>,
        frequency: Duration,
    ) -> Self {
        Self {
            queue,
            source,
            frequency,
            stopped: CancellationToken::new(),
        }
    }

    /// Ticks every `frequency` until `cancel` fires or [`Scheduler::shutdown`] is called
    ///
    /// The first tick happens one full interval after the call. Ticks are spawned as
    /// separate tasks, so a slow tick does not delay the next one.
    ///
    /// # Errors
    /// Returns the first fatal broker error reported by a tick; outstanding ticks are aborted.
    /// A closed queue after `shutdown` is not an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        let mut ticker = interval(self.frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut ticks = JoinSet::new();

        info!(frequency_secs = self.frequency.as_secs_f64(), "scheduler started");

        loop {
            select! {
                _ = cancel.cancelled() => {
                    ticks.abort_all();
                    info!("scheduler stopped");
                    return Ok(());
                }
                _ = self.stopped.cancelled() => {
                    ticks.abort_all();
                    info!("scheduler shut down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    let now = Utc::now();
                    ticks.spawn(
                        async move { scheduler.tick(now).await }
                            .instrument(info_span!("tick", %now)),
                    );
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => match joined {
                    Ok(Ok(report)) => debug!(?report, "tick finished"),
                    Ok(Err(err)) if err.is_fatal() && self.stopped.is_cancelled() => {
                        debug!(error = %err, "queue closed by shutdown");
                        ticks.abort_all();
                        return Ok(());
                    }
                    Ok(Err(err)) if err.is_fatal() => {
                        error!(error = %err, "stopping scheduler");
                        ticks.abort_all();
                        return Err(err);
                    }
                    Ok(Err(err)) => warn!(error = %err, "tick failed"),
                    Err(err) => error!(error = %err, "tick task panicked"),
                },
            }
        }
    }

    /// Runs one scheduling round at `now`
    ///
    /// Storage failures are logged and do not fail the tick.
    ///
    /// # Errors
    /// `SchedulerError::Queue` when publishing hit a fatal broker error
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = match self.send_notifications(now).await {
            Ok(report) => report,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(error = %err, "failed to send notifications");
                TickReport::default()
            }
        };

        match self.delete_old_notified_events(now).await {
            Ok(purged) => report.purged = purged,
            Err(err) => error!(error = %err, "failed to delete old notified events"),
        }

        Ok(report)
    }

    /// Publishes a message for every event due within the scan window ending at `now`
    ///
    /// A publish failure that is not fatal is logged and counted, and the batch goes on.
    pub async fn send_notifications(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let (start, end) = self.scan_window(now);

        let events = self
            .source
            .get_events_by_notification_date_period(start, end)
            .await?;

        let mut report = TickReport {
            due: events.len(),
            ..TickReport::default()
        };

        for event in &events {
            let message = NotificationMessage::from(event);

            match self.queue.publish(&message).await {
                Ok(()) => {
                    report.published += 1;
                    debug!(id = message.id, "notification published");
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    report.failed += 1;
                    warn!(id = message.id, error = %err, "failed to publish notification");
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                published = report.published,
                failed = report.failed,
                "notifications sent"
            );
        }

        Ok(report)
    }

    /// Purges notified events that started at or before one year ago
    pub async fn delete_old_notified_events(&self, now: DateTime<Utc>) -> Result<u64, SchedulerError> {
        let cutoff = retention_cutoff(now);
        let purged = self.source.delete_notified_events_before_date(cutoff).await?;

        if purged > 0 {
            info!(purged, %cutoff, "old notified events deleted");
        }

        Ok(purged)
    }

    /// Stops `run` and closes the publishing queue. Idempotent.
    pub async fn shutdown(&self) -> Result<(), RabbitMQError> {
        self.stopped.cancel();
        self.queue.shutdown().await
    }

    /// `[now - frequency + margin, now]`, where the margin never exceeds half the frequency
    fn scan_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let width = TimeDelta::from_std(self.frequency).unwrap_or(TimeDelta::MAX);
        let margin = TimeDelta::from_std(SCAN_MARGIN.min(self.frequency / 2))
            .unwrap_or(TimeDelta::zero());

        let start = now
            .checked_sub_signed(width)
            .and_then(|start| start.checked_add_signed(margin))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        (start, now)
    }
}

fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(RETENTION_MONTHS))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        models::Event,
        services::calendar::{CalendarError, MockNotificationSource},
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Publisher that records messages and fails for selected ids
    #[derive(Default)]
    struct RecordingQueue {
        published: Mutex<Vec<NotificationMessage>>,
        failing_ids: Vec<i64>,
        fatal: bool,
        shutdowns: AtomicUsize,
    }

    impl RecordingQueue {
        fn is_closed(&self) -> bool {
            self.shutdowns.load(Ordering::SeqCst) > 0
        }
    }

    #[async_trait]
    impl NotificationPublisher for RecordingQueue {
        async fn publish(&self, message: &NotificationMessage) -> Result<(), RabbitMQError> {
            if self.is_closed() {
                return Err(RabbitMQError::QueueClosed);
            }
            if self.fatal {
                return Err(RabbitMQError::RetriesExceeded { attempts: 3 });
            }
            if self.failing_ids.contains(&message.id) {
                return Err(RabbitMQError::PublishError("channel closed".into()));
            }
            self.published.lock().push(message.clone());
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), RabbitMQError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn due_event(id: i64) -> Event {
        let start = now() + TimeDelta::minutes(5);
        Event {
            id,
            user_id: 100 + id,
            title: format!("event {id}"),
            description: String::new(),
            start_date: start,
            end_date: start + TimeDelta::hours(1),
            notification_date: Some(now()),
            is_notified: false,
        }
    }

    fn source_with(events: Vec<Event>) -> MockNotificationSource {
        let mut source = MockNotificationSource::new();
        source
            .expect_get_events_by_notification_date_period()
            .returning(move |_, _| Ok(events.clone()));
        source
            .expect_delete_notified_events_before_date()
            .returning(|_| Ok(0));
        source
    }

    #[tokio::test]
    async fn tick_scans_the_window_ending_now() {
        let mut source = MockNotificationSource::new();
        source
            .expect_get_events_by_notification_date_period()
            .withf(|start, end| {
                *start == now() - TimeDelta::minutes(5) + TimeDelta::seconds(1) && *end == now()
            })
            .times(1)
            .returning(|_, _| Ok(vec![due_event(1)]));
        source
            .expect_delete_notified_events_before_date()
            .withf(|cutoff| *cutoff == Utc.with_ymd_and_hms(2023, 7, 1, 12, 0, 0).unwrap())
            .times(1)
            .returning(|_| Ok(2));

        let queue = Arc::new(RecordingQueue::default());
        let scheduler = Scheduler::new(queue.clone(), Arc::new(source), Duration::from_secs(300));

        let report = scheduler.tick(now()).await.unwrap();

        assert_eq!(
            report,
            TickReport {
                due: 1,
                published: 1,
                failed: 0,
                purged: 2
            }
        );

        let published = queue.published.lock();
        assert_eq!(published[0].id, 1);
        assert_eq!(published[0].user_id, 101);
        assert_eq!(published[0].date, now() + TimeDelta::minutes(5));
    }

    #[tokio::test]
    async fn publish_failures_do_not_abort_the_batch() {
        let queue = Arc::new(RecordingQueue {
            failing_ids: vec![2],
            ..RecordingQueue::default()
        });
        let source = source_with(vec![due_event(1), due_event(2), due_event(3)]);
        let scheduler = Scheduler::new(queue.clone(), Arc::new(source), Duration::from_secs(60));

        let report = scheduler.tick(now()).await.unwrap();

        assert_eq!(report.due, 3);
        assert_eq!(report.published, 2);
        assert_eq!(report.failed, 1);

        let ids: Vec<i64> = queue.published.lock().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn fatal_publish_error_fails_the_tick() {
        let queue = Arc::new(RecordingQueue {
            fatal: true,
            ..RecordingQueue::default()
        });
        let scheduler = Scheduler::new(
            queue,
            Arc::new(source_with(vec![due_event(1)])),
            Duration::from_secs(60),
        );

        let err = scheduler.tick(now()).await.unwrap_err();

        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn storage_failures_are_logged_not_raised() {
        let mut source = MockNotificationSource::new();
        source
            .expect_get_events_by_notification_date_period()
            .returning(|_, _| Err(CalendarError::NotFound(0)));
        source
            .expect_delete_notified_events_before_date()
            .returning(|_| Err(CalendarError::NotFound(0)));

        let scheduler = Scheduler::new(
            Arc::new(RecordingQueue::default()),
            Arc::new(source),
            Duration::from_secs(60),
        );

        assert_eq!(scheduler.tick(now()).await.unwrap(), TickReport::default());
    }

    #[test_log::test(tokio::test)]
    async fn run_stops_on_cancellation() {
        let scheduler = Scheduler::new(
            Arc::new(RecordingQueue::default()),
            Arc::new(source_with(Vec::new())),
            Duration::from_millis(10),
        );
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn run_returns_fatal_broker_errors() {
        let scheduler = Scheduler::new(
            Arc::new(RecordingQueue {
                fatal: true,
                ..RecordingQueue::default()
            }),
            Arc::new(source_with(vec![due_event(1)])),
            Duration::from_millis(10),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(CancellationToken::new()),
        )
        .await
        .expect("run did not stop");

        assert!(matches!(
            result,
            Err(SchedulerError::Queue(RabbitMQError::RetriesExceeded { .. }))
        ));
    }

    #[tokio::test]
    async fn shutdown_closes_the_queue() {
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = Scheduler::new(
            queue.clone(),
            Arc::new(source_with(Vec::new())),
            Duration::from_secs(60),
        );

        scheduler.shutdown().await.unwrap();
        scheduler.shutdown().await.unwrap();

        assert_eq!(queue.shutdowns.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn scan_window_stays_open_for_short_frequencies() {
        let source = || Arc::new(source_with(Vec::new()));
        let queue = || Arc::new(RecordingQueue::default());

        let minute = Scheduler::new(queue(), source(), Duration::from_secs(60));
        assert_eq!(
            minute.scan_window(now()),
            (now() - TimeDelta::seconds(59), now())
        );

        let second = Scheduler::new(queue(), source(), Duration::from_secs(1));
        assert_eq!(
            second.scan_window(now()),
            (now() - TimeDelta::milliseconds(500), now())
        );

        let fast = Scheduler::new(queue(), source(), Duration::from_millis(100));
        let (start, end) = fast.scan_window(now());
        assert_eq!(start, now() - TimeDelta::milliseconds(50));
        assert!(start < end);
    }

    #[test_log::test(tokio::test)]
    async fn shutdown_stops_a_running_scheduler() {
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = Scheduler::new(
            queue.clone(),
            Arc::new(source_with(vec![due_event(1)])),
            Duration::from_millis(10),
        );

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(CancellationToken::new()).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run did not stop after shutdown")
            .unwrap();
        assert!(result.is_ok());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn run_after_shutdown_returns_immediately() {
        let scheduler = Scheduler::new(
            Arc::new(RecordingQueue::default()),
            Arc::new(source_with(Vec::new())),
            Duration::from_millis(10),
        );

        scheduler.shutdown().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(CancellationToken::new()),
        )
        .await
        .expect("run did not observe shutdown");
        assert!(result.is_ok());
    }
}
