use thiserror::Error;

use audit_cell::AuditError;
use shared_models::error::AppError;
use shared_models::ids::ProcedureId;

use crate::store::StoreError;

/// Typed failure of a workflow operation. Nothing is retried by the engine.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Malformed or missing input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is not permitted for the entity's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Another claim won; retry against a different procedure.
    #[error("Procedure {0} is already assigned")]
    AlreadyAssigned(ProcedureId),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Audit log rejected the entry: {0}")]
    Audit(#[from] AuditError),

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Stable identifier exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Validation(_) => "validation_error",
            WorkflowError::InvalidState(_) => "invalid_state",
            WorkflowError::AlreadyAssigned(_) => "already_assigned",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::Audit(_) => "audit_failure",
            WorkflowError::Store(_) => "storage_failure",
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        let kind = err.kind();
        match err {
            WorkflowError::Validation(msg) => AppError::ValidationError(msg),
            WorkflowError::InvalidState(msg) => AppError::Unprocessable { kind, message: msg },
            WorkflowError::AlreadyAssigned(id) => AppError::Unprocessable {
                kind,
                message: format!("Procedure {} is already assigned to another student", id),
            },
            WorkflowError::Forbidden(msg) => AppError::Forbidden(msg),
            WorkflowError::NotFound(msg) => AppError::NotFound(msg),
            WorkflowError::Audit(e) => AppError::Internal(e.to_string()),
            WorkflowError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
