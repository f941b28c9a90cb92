// =====================================================================================
// AUDIT CELL MODELS
// =====================================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_models::auth::Role;
use shared_models::ids::{AssignmentId, ProcedureId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Assigned,
    Completed,
    Abandoned,
    Cancelled,
    SessionRecorded,
    SessionUpdated,
    SessionDeleted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Assigned => "assigned",
            AuditAction::Completed => "completed",
            AuditAction::Abandoned => "abandoned",
            AuditAction::Cancelled => "cancelled",
            AuditAction::SessionRecorded => "session_recorded",
            AuditAction::SessionUpdated => "session_updated",
            AuditAction::SessionDeleted => "session_deleted",
        };
        f.write_str(verb)
    }
}

/// The audited record. Serialized as `entity_type` + `entity_id` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "entity_id", rename_all = "snake_case")]
pub enum AuditEntity {
    PatientProcedure(ProcedureId),
    Assignment(AssignmentId),
    TreatmentSession(SessionId),
}

impl AuditEntity {
    pub fn entity_type(&self) -> &'static str {
        match self {
            AuditEntity::PatientProcedure(_) => "patient_procedure",
            AuditEntity::Assignment(_) => "assignment",
            AuditEntity::TreatmentSession(_) => "treatment_session",
        }
    }

    pub fn entity_uuid(&self) -> Uuid {
        match self {
            AuditEntity::PatientProcedure(id) => id.as_uuid(),
            AuditEntity::Assignment(id) => id.as_uuid(),
            AuditEntity::TreatmentSession(id) => id.as_uuid(),
        }
    }
}

impl fmt::Display for AuditEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type(), self.entity_uuid())
    }
}

/// Immutable record of one state-changing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: Role,
    pub action: AuditAction,
    #[serde(flatten)]
    pub entity: AuditEntity,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit metadata must be a JSON object, got {0}")]
    InvalidMetadata(&'static str),

    #[error("Audit actor is missing")]
    MissingActor,
}
