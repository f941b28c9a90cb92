use std::sync::Arc;

use axum::{
    Json, Router,
    routing::get,
};
use serde_json::json;
use tracing::{info, warn};

use audit_cell::TransactionalAuditLog;
use notification_cell::{
    notification_routes, MemoryNotificationStore, NotificationStore, SupabaseNotificationStore,
};
use procedure_cell::{
    procedure_routes, MemoryWorkflowStore, StaticTreatmentCatalog, SupabaseTreatmentCatalog,
    SupabaseWorkflowStore, TreatmentCatalog, WorkflowEngine, WorkflowSettings, WorkflowStore,
};
use shared_config::AppConfig;

struct Backends {
    store: Arc<dyn WorkflowStore>,
    notifications: Arc<dyn NotificationStore>,
    catalog: Arc<dyn TreatmentCatalog>,
}

fn backends(config: &AppConfig) -> Backends {
    if config.uses_supabase() {
        if config.is_configured() {
            info!("Using Supabase storage at {}", config.supabase_url);
            return Backends {
                store: Arc::new(SupabaseWorkflowStore::new(config)),
                notifications: Arc::new(SupabaseNotificationStore::new(config)),
                catalog: Arc::new(SupabaseTreatmentCatalog::new(config)),
            };
        }
        warn!("STORAGE_BACKEND=supabase but Supabase is not configured, falling back to memory");
    }

    info!("Using in-memory storage");
    Backends {
        store: Arc::new(MemoryWorkflowStore::new()),
        notifications: Arc::new(MemoryNotificationStore::new()),
        catalog: Arc::new(StaticTreatmentCatalog::with_defaults(&config.absent_tooth_treatment_code)),
    }
}

pub fn create_router(state: Arc<AppConfig>) -> Router {
    let Backends { store, notifications, catalog } = backends(&state);

    let engine = Arc::new(WorkflowEngine::new(
        store,
        Arc::new(TransactionalAuditLog::new()),
        notifications.clone(),
        catalog,
        WorkflowSettings::from_config(&state),
    ));

    Router::new()
        .route("/", get(|| async { "Dental clinic workflow API is running!" }))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(procedure_routes(state.clone(), engine))
        .nest("/notifications", notification_routes(state.clone(), notifications))
}
