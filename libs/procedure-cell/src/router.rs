// libs/procedure-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, ProcedureState};
use crate::services::workflow::WorkflowEngine;

pub fn procedure_routes(config: Arc<AppConfig>, engine: Arc<WorkflowEngine>) -> Router {
    let state = ProcedureState { engine };

    Router::new()
        .route("/procedures", post(handlers::create_procedure).get(handlers::list_procedures))
        .route(
            "/procedures/{procedure_id}",
            get(handlers::get_procedure).patch(handlers::update_procedure),
        )
        .route("/procedures/{procedure_id}/assign", post(handlers::assign_procedure))
        .route("/procedures/{procedure_id}/cancel", post(handlers::cancel_procedure))
        .route("/procedures/{procedure_id}/audit", get(handlers::get_procedure_audit))
        .route("/assignments/{assignment_id}", get(handlers::get_assignment))
        .route("/assignments/{assignment_id}/complete", post(handlers::complete_assignment))
        .route("/assignments/{assignment_id}/abandon", post(handlers::abandon_assignment))
        .route(
            "/assignments/{assignment_id}/sessions",
            get(handlers::list_sessions).post(handlers::record_session),
        )
        .route(
            "/sessions/{session_id}",
            put(handlers::update_session).delete(handlers::delete_session),
        )
        .route("/students/{student_id}/assignments", get(handlers::get_student_assignments))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
