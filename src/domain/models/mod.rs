pub mod event;
pub mod notification;

pub use event::Event;
pub use notification::NotificationMessage;
