pub mod config;
pub mod domain;
pub mod outbounds;
pub mod storage;
pub mod telemetry;

pub use config::{Config, ConfigError, StorageBackend};
pub use domain::models::{Event, NotificationMessage};
pub use domain::services::calendar::{CalendarError, EventUseCase, NotificationSource, Notifier, Period};
pub use domain::services::scheduler::{NotificationPublisher, Scheduler, SchedulerError, TickReport};
pub use domain::services::sender::{AckMode, NotificationConsumer, NotificationHandler, Sender};
pub use storage::{EventRepository, StorageError, create_event_repository};
