pub mod store;
pub mod memory;
pub mod supabase;

pub use store::NotificationStore;
pub use memory::MemoryNotificationStore;
pub use supabase::SupabaseNotificationStore;
