use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::ids::NotificationId;

use crate::models::{Notification, NotificationDraft, NotificationError, NotificationQuery};
use crate::services::store::NotificationStore;

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<HashMap<NotificationId, Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn enqueue(&self, draft: NotificationDraft) -> Result<Notification, NotificationError> {
        draft.validate()?;
        let notification = draft.into_notification();

        self.notifications
            .write()
            .await
            .insert(notification.id, notification.clone());

        debug!("Notification {} enqueued for user {}", notification.id, notification.user_id);
        Ok(notification)
    }

    async fn mark_read(
        &self,
        notification_id: NotificationId,
        user_id: Uuid,
    ) -> Result<Notification, NotificationError> {
        let mut notifications = self.notifications.write().await;

        let notification = notifications
            .get_mut(&notification_id)
            .filter(|n| n.user_id == user_id)
            .ok_or(NotificationError::NotFound)?;

        if notification.read_at.is_none() {
            notification.read_at = Some(Utc::now());
        }

        Ok(notification.clone())
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<usize, NotificationError> {
        let now = Utc::now();
        let mut marked = 0;

        for notification in self.notifications.write().await.values_mut() {
            if notification.user_id == user_id && notification.read_at.is_none() {
                notification.read_at = Some(now);
                marked += 1;
            }
        }

        Ok(marked)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, NotificationError> {
        let notifications = self.notifications.read().await;

        let mut inbox: Vec<Notification> = notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .filter(|n| !query.unread_only() || !n.is_read())
            .cloned()
            .collect();

        inbox.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        inbox.truncate(query.effective_limit());
        Ok(inbox)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<usize, NotificationError> {
        Ok(self
            .notifications
            .read()
            .await
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read())
            .count())
    }
}
