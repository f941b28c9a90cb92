pub mod models;
pub mod services;
pub mod handlers;
pub mod router;

pub use models::*;
pub use services::{MemoryNotificationStore, NotificationStore, SupabaseNotificationStore};
pub use router::notification_routes;
