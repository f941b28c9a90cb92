use async_trait::async_trait;
use uuid::Uuid;

use shared_models::ids::NotificationId;

use crate::models::{Notification, NotificationDraft, NotificationError, NotificationQuery};

/// Per-user inbox of system messages.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn enqueue(&self, draft: NotificationDraft) -> Result<Notification, NotificationError>;

    /// Marks one notification as read. Idempotent: an already read
    /// notification is returned unchanged, keeping its original `read_at`.
    async fn mark_read(
        &self,
        notification_id: NotificationId,
        user_id: Uuid,
    ) -> Result<Notification, NotificationError>;

    /// Returns how many notifications were newly marked as read.
    async fn mark_all_read(&self, user_id: Uuid) -> Result<usize, NotificationError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, NotificationError>;

    async fn unread_count(&self, user_id: Uuid) -> Result<usize, NotificationError>;
}
