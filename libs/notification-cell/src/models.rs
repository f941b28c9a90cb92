// libs/notification-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::ids::NotificationId;

// ==============================================================================
// CORE NOTIFICATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Sent to the student who claimed a procedure.
    ProcedureAssigned,
    /// Sent to the procedure's creator when someone else claims it.
    ProcedureClaimed,
    /// Sent to the creator when a claim is abandoned and the procedure is free again.
    ProcedureReleased,
    /// Sent to a student whose active claim was terminated by a cancellation.
    ProcedureCancelled,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationType::ProcedureAssigned => write!(f, "procedure_assigned"),
            NotificationType::ProcedureClaimed => write!(f, "procedure_claimed"),
            NotificationType::ProcedureReleased => write!(f, "procedure_released"),
            NotificationType::ProcedureCancelled => write!(f, "procedure_cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub priority: NotificationPriority,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// A notification waiting to be enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationDraft {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub priority: NotificationPriority,
}

impl NotificationDraft {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            body: body.into(),
            data: Value::Object(Default::default()),
            priority: NotificationPriority::Normal,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.user_id.is_nil() {
            return Err(NotificationError::ValidationError("Recipient is required".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(NotificationError::ValidationError("Title is required".to_string()));
        }
        Ok(())
    }

    pub(crate) fn into_notification(self) -> Notification {
        Notification {
            id: NotificationId::new(),
            user_id: self.user_id,
            notification_type: self.notification_type,
            title: self.title,
            body: self.body,
            data: self.data,
            priority: self.priority,
            read_at: None,
            created_at: Utc::now(),
        }
    }
}

// ==============================================================================
// QUERY / ERROR MODELS
// ==============================================================================

pub const DEFAULT_INBOX_LIMIT: usize = 50;
pub const MAX_INBOX_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationQuery {
    pub unread_only: Option<bool>,
    pub limit: Option<usize>,
}

impl NotificationQuery {
    pub fn unread_only(&self) -> bool {
        self.unread_only.unwrap_or(false)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_INBOX_LIMIT).clamp(1, MAX_INBOX_LIMIT)
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound => AppError::NotFound("Notification not found".to_string()),
            NotificationError::ValidationError(msg) => AppError::ValidationError(msg),
            NotificationError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
