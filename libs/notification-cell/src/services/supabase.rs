use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::ids::NotificationId;

use crate::models::{Notification, NotificationDraft, NotificationError, NotificationQuery};
use crate::services::store::NotificationStore;

const NOTIFICATIONS_PATH: &str = "/rest/v1/notifications";

/// Inbox stored in the `notifications` table.
pub struct SupabaseNotificationStore {
    supabase: SupabaseClient,
    server_token: String,
}

impl SupabaseNotificationStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            server_token: config.server_token().to_string(),
        }
    }

    fn db_error(context: &str, err: anyhow::Error) -> NotificationError {
        error!("{}: {}", context, err);
        NotificationError::DatabaseError(format!("{}: {}", context, err))
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Notification>, NotificationError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    NotificationError::DatabaseError(format!("Failed to parse notification: {}", e))
                })
            })
            .collect()
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Notification>, NotificationError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(&self.server_token), None)
            .await
            .map_err(|e| Self::db_error("Failed to load notifications", e))?;
        Self::parse_rows(rows)
    }

    async fn patch_unread(&self, filter: &str) -> Result<Vec<Notification>, NotificationError> {
        // read_at=is.null keeps repeated calls from moving the timestamp
        let path = format!("{}?{}&read_at=is.null", NOTIFICATIONS_PATH, filter);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(&self.server_token),
                Some(json!({ "read_at": Utc::now() })),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| Self::db_error("Failed to mark notifications read", e))?;
        Self::parse_rows(rows)
    }
}

#[async_trait]
impl NotificationStore for SupabaseNotificationStore {
    async fn enqueue(&self, draft: NotificationDraft) -> Result<Notification, NotificationError> {
        draft.validate()?;
        let notification = draft.into_notification();

        let body = serde_json::to_value(&notification).map_err(|e| {
            NotificationError::DatabaseError(format!("Failed to serialize notification: {}", e))
        })?;

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                NOTIFICATIONS_PATH,
                Some(&self.server_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| Self::db_error("Failed to enqueue notification", e))?;

        let stored = Self::parse_rows(rows)?
            .into_iter()
            .next()
            .unwrap_or(notification);

        debug!("Notification {} enqueued for user {}", stored.id, stored.user_id);
        Ok(stored)
    }

    async fn mark_read(
        &self,
        notification_id: NotificationId,
        user_id: Uuid,
    ) -> Result<Notification, NotificationError> {
        let filter = format!("id=eq.{}&user_id=eq.{}", notification_id, user_id);

        if let Some(updated) = self.patch_unread(&filter).await?.into_iter().next() {
            return Ok(updated);
        }

        // Nothing updated: either already read, or not this user's notification
        let path = format!("{}?{}", NOTIFICATIONS_PATH, filter);
        self.fetch(&path)
            .await?
            .into_iter()
            .next()
            .ok_or(NotificationError::NotFound)
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<usize, NotificationError> {
        let filter = format!("user_id=eq.{}", user_id);
        Ok(self.patch_unread(&filter).await?.len())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, NotificationError> {
        let mut path = format!(
            "{}?user_id=eq.{}&order=created_at.desc&limit={}",
            NOTIFICATIONS_PATH,
            user_id,
            query.effective_limit()
        );
        if query.unread_only() {
            path.push_str("&read_at=is.null");
        }
        self.fetch(&path).await
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<usize, NotificationError> {
        let path = format!(
            "{}?user_id=eq.{}&read_at=is.null&select=id",
            NOTIFICATIONS_PATH, user_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.server_token), None)
            .await
            .map_err(|e| Self::db_error("Failed to count unread notifications", e))?;
        Ok(rows.len())
    }
}
