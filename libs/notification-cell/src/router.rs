// libs/notification-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, NotificationState};
use crate::services::store::NotificationStore;

pub fn notification_routes(config: Arc<AppConfig>, store: Arc<dyn NotificationStore>) -> Router {
    // The inbox is always the caller's own
    Router::new()
        .route("/", get(handlers::list_notifications))
        .route("/unread-count", get(handlers::get_unread_count))
        .route("/read-all", post(handlers::mark_all_notifications_read))
        .route("/{notification_id}/read", post(handlers::mark_notification_read))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(NotificationState { store })
}
