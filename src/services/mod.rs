pub mod dispatch;
pub mod inbox;
pub mod init;
pub mod notifications;
pub mod queue;
pub mod read_tracker;
pub mod recipients;
pub mod stats;
pub mod telegram;
