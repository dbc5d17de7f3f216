pub mod notification;
pub mod recipient;
pub mod user;

pub use notification::NotificationRepository;
pub use recipient::RecipientRepository;
pub use user::{BotSessionRepository, UserRepository};
