// libs/notification-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_models::error::AppError;
use shared_models::ids::NotificationId;
use shared_utils::extractor::Actor;

use crate::models::NotificationQuery;
use crate::services::store::NotificationStore;

#[derive(Clone)]
pub struct NotificationState {
    pub store: Arc<dyn NotificationStore>,
}

pub async fn list_notifications(
    State(state): State<NotificationState>,
    Actor(actor): Actor,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Value>, AppError> {
    let notifications = state.store.list_for_user(actor.user_id, &query).await?;

    Ok(Json(json!({
        "notifications": notifications,
        "count": notifications.len()
    })))
}

pub async fn get_unread_count(
    State(state): State<NotificationState>,
    Actor(actor): Actor,
) -> Result<Json<Value>, AppError> {
    let unread = state.store.unread_count(actor.user_id).await?;

    Ok(Json(json!({ "unread": unread })))
}

pub async fn mark_notification_read(
    State(state): State<NotificationState>,
    Actor(actor): Actor,
    Path(notification_id): Path<NotificationId>,
) -> Result<Json<Value>, AppError> {
    let notification = state.store.mark_read(notification_id, actor.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "notification": notification
    })))
}

pub async fn mark_all_notifications_read(
    State(state): State<NotificationState>,
    Actor(actor): Actor,
) -> Result<Json<Value>, AppError> {
    let marked = state.store.mark_all_read(actor.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "marked": marked
    })))
}
