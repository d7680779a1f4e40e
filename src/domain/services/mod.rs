pub mod calendar;
pub mod scheduler;
pub mod sender;
