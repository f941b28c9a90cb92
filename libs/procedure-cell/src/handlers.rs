// libs/procedure-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::ids::{AssignmentId, ProcedureId, SessionId};
use shared_utils::extractor::Actor;

use crate::models::{
    AbandonAssignmentRequest, AssignProcedureRequest, AssignmentQuery, CompleteAssignmentRequest,
    CreateProcedureRequest, ProcedureQuery, RecordSessionRequest, UpdateProcedureRequest,
    UpdateSessionRequest,
};
use crate::services::workflow::WorkflowEngine;

#[derive(Clone)]
pub struct ProcedureState {
    pub engine: Arc<WorkflowEngine>,
}

// ==============================================================================
// PROCEDURES
// ==============================================================================

pub async fn create_procedure(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Json(request): Json<CreateProcedureRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let created = state.engine.create_procedure(&actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "procedure": created.procedure,
            "assignment": created.assignment
        })),
    ))
}

pub async fn list_procedures(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Query(query): Query<ProcedureQuery>,
) -> Result<Json<Value>, AppError> {
    let procedures = state.engine.list_procedures(&actor, &query).await?;

    Ok(Json(json!({
        "procedures": procedures,
        "count": procedures.len(),
        "limit": query.effective_limit(),
        "offset": query.effective_offset()
    })))
}

pub async fn get_procedure(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(procedure_id): Path<ProcedureId>,
) -> Result<Json<Value>, AppError> {
    let detail = state.engine.procedure_detail(&actor, procedure_id).await?;

    Ok(Json(json!(detail)))
}

pub async fn update_procedure(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(procedure_id): Path<ProcedureId>,
    Json(request): Json<UpdateProcedureRequest>,
) -> Result<Json<Value>, AppError> {
    let procedure = state.engine.update_procedure(&actor, procedure_id, request).await?;

    Ok(Json(json!({ "procedure": procedure })))
}

pub async fn assign_procedure(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(procedure_id): Path<ProcedureId>,
    request: Option<Json<AssignProcedureRequest>>,
) -> Result<Json<Value>, AppError> {
    let student_id = request.and_then(|Json(r)| r.student_id);
    let assignment = state.engine.assign_procedure(&actor, procedure_id, student_id).await?;

    Ok(Json(json!({
        "success": true,
        "assignment": assignment
    })))
}

pub async fn cancel_procedure(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(procedure_id): Path<ProcedureId>,
) -> Result<Json<Value>, AppError> {
    let procedure = state.engine.cancel_procedure(&actor, procedure_id).await?;

    Ok(Json(json!({
        "success": true,
        "procedure": procedure
    })))
}

pub async fn get_procedure_audit(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(procedure_id): Path<ProcedureId>,
) -> Result<Json<Value>, AppError> {
    let entries = state.engine.procedure_audit_trail(&actor, procedure_id).await?;

    Ok(Json(json!({
        "entries": entries,
        "count": entries.len()
    })))
}

// ==============================================================================
// ASSIGNMENTS
// ==============================================================================

pub async fn get_assignment(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(assignment_id): Path<AssignmentId>,
) -> Result<Json<Value>, AppError> {
    let assignment = state.engine.assignment(&actor, assignment_id).await?;

    Ok(Json(json!({ "assignment": assignment })))
}

pub async fn complete_assignment(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(assignment_id): Path<AssignmentId>,
    request: Option<Json<CompleteAssignmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let final_notes = request.and_then(|Json(r)| r.final_notes);
    let assignment = state
        .engine
        .complete_assignment(&actor, assignment_id, final_notes)
        .await?;

    Ok(Json(json!({
        "success": true,
        "completed_at": assignment.completed_at,
        "assignment": assignment
    })))
}

pub async fn abandon_assignment(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(assignment_id): Path<AssignmentId>,
    request: Option<Json<AbandonAssignmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let reason = request.and_then(|Json(r)| r.reason);
    let assignment = state
        .engine
        .abandon_assignment(&actor, assignment_id, reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "abandoned_at": assignment.abandoned_at,
        "reason": assignment.abandon_reason,
        "assignment": assignment
    })))
}

pub async fn get_student_assignments(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(student_id): Path<Uuid>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<Value>, AppError> {
    let assignments = state
        .engine
        .student_assignments(&actor, student_id, query.status)
        .await?;

    Ok(Json(json!({
        "assignments": assignments,
        "count": assignments.len()
    })))
}

// ==============================================================================
// SESSIONS
// ==============================================================================

pub async fn list_sessions(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(assignment_id): Path<AssignmentId>,
) -> Result<Json<Value>, AppError> {
    let sessions = state.engine.assignment_sessions(&actor, assignment_id).await?;

    Ok(Json(json!({
        "sessions": sessions,
        "count": sessions.len()
    })))
}

pub async fn record_session(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(assignment_id): Path<AssignmentId>,
    Json(request): Json<RecordSessionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let session = state.engine.record_session(&actor, assignment_id, request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

pub async fn update_session(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(session_id): Path<SessionId>,
    Json(request): Json<UpdateSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state.engine.update_session(&actor, session_id, request).await?;

    Ok(Json(json!({ "session": session })))
}

pub async fn delete_session(
    State(state): State<ProcedureState>,
    Actor(actor): Actor,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Value>, AppError> {
    let session = state.engine.delete_session(&actor, session_id).await?;

    Ok(Json(json!({
        "success": true,
        "deleted": session
    })))
}
