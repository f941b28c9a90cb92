// libs/procedure-cell/src/store/mod.rs
pub mod memory;
pub mod supabase;

pub use memory::MemoryWorkflowStore;
pub use supabase::SupabaseWorkflowStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use audit_cell::{AuditEntity, AuditEntry, AuditSink};
use shared_models::ids::{AssignmentId, ProcedureId, SessionId};

use crate::models::{
    Assignment, AssignmentStatus, PatientProcedure, Priority, ProcedureQuery, ProcedureStatus,
    SessionStatus, ToothLocation, TreatmentSession,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A guard of the unit did not hold; nothing was applied.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

// ==============================================================================
// UNIT OF WORK
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcedureChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcedureStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooth_location: Option<ToothLocation>,
}

impl ProcedureChanges {
    pub fn apply_to(&self, procedure: &mut PatientProcedure) {
        if let Some(status) = self.status {
            procedure.status = status;
        }
        if let Some(priority) = self.priority {
            procedure.priority = priority;
        }
        if let Some(price) = self.estimated_price {
            procedure.estimated_price = price;
        }
        if let Some(notes) = &self.notes {
            procedure.notes = Some(notes.clone());
        }
        if let Some(location) = &self.tooth_location {
            procedure.tooth_location = Some(location.clone());
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SessionChanges {
    pub fn apply_to(&self, session: &mut TreatmentSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(date) = self.session_date {
            session.session_date = date;
        }
        if let Some(notes) = &self.notes {
            session.notes = Some(notes.clone());
        }
    }
}

/// Session row without its number; the store numbers it inside the commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSession {
    pub id: SessionId,
    pub assignment_id: AssignmentId,
    pub session_date: NaiveDate,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl NewSession {
    pub fn numbered(&self, session_number: i32) -> TreatmentSession {
        TreatmentSession {
            id: self.id,
            assignment_id: self.assignment_id,
            session_number,
            session_date: self.session_date,
            status: self.status,
            notes: self.notes.clone(),
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// One guarded write. A guard that does not hold fails the whole unit with
/// `StoreError::Conflict`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    InsertProcedure {
        procedure: PatientProcedure,
    },
    /// Compare-and-swap on the procedure status.
    TransitionProcedure {
        procedure_id: ProcedureId,
        from: ProcedureStatus,
        to: ProcedureStatus,
        at: DateTime<Utc>,
    },
    UpdateProcedureDetails {
        procedure_id: ProcedureId,
        expected_status: ProcedureStatus,
        changes: ProcedureChanges,
        at: DateTime<Utc>,
    },
    /// Rejected when the procedure already has an active assignment.
    InsertAssignment {
        assignment: Assignment,
    },
    CloseAssignment {
        assignment_id: AssignmentId,
        to: AssignmentStatus,
        at: DateTime<Utc>,
        reason: Option<String>,
        final_notes: Option<String>,
    },
    AppendSession {
        session: NewSession,
    },
    UpdateSession {
        session_id: SessionId,
        expected_status: SessionStatus,
        changes: SessionChanges,
        at: DateTime<Utc>,
    },
    DeleteSession {
        session_id: SessionId,
        expected_status: SessionStatus,
    },
    AdjustCompletedSessions {
        assignment_id: AssignmentId,
        delta: i32,
    },
}

/// Mutations and audit entries that commit together or not at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub mutations: Vec<Mutation>,
    pub audit: Vec<AuditEntry>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl AuditSink for UnitOfWork {
    fn stage_audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
    }
}

/// Rows as they stand after a commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitReceipt {
    #[serde(default)]
    pub procedures: Vec<PatientProcedure>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub sessions: Vec<TreatmentSession>,
}

impl CommitReceipt {
    pub fn procedure(&self, id: ProcedureId) -> Result<PatientProcedure, StoreError> {
        self.procedures
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| StoreError::Database(format!("Commit did not return procedure {}", id)))
    }

    pub fn assignment(&self, id: AssignmentId) -> Result<Assignment, StoreError> {
        self.assignments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::Database(format!("Commit did not return assignment {}", id)))
    }

    pub fn session(&self, id: SessionId) -> Result<TreatmentSession, StoreError> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::Database(format!("Commit did not return session {}", id)))
    }
}

// ==============================================================================
// STORE TRAITS
// ==============================================================================

#[async_trait]
pub trait ProcedureStore: Send + Sync {
    async fn get_procedure(&self, id: ProcedureId) -> Result<Option<PatientProcedure>, StoreError>;

    /// Newest first, paginated by the query.
    async fn list_procedures(&self, query: &ProcedureQuery) -> Result<Vec<PatientProcedure>, StoreError>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError>;

    /// Oldest first.
    async fn assignments_for_procedure(&self, procedure_id: ProcedureId) -> Result<Vec<Assignment>, StoreError>;

    async fn active_assignment(&self, procedure_id: ProcedureId) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .assignments_for_procedure(procedure_id)
            .await?
            .into_iter()
            .find(Assignment::is_active))
    }

    /// Newest first.
    async fn assignments_for_student(
        &self,
        student_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<TreatmentSession>, StoreError>;

    /// Ordered by session number.
    async fn sessions_for_assignment(&self, assignment_id: AssignmentId) -> Result<Vec<TreatmentSession>, StoreError>;
}

/// Full persistence surface used by the engine.
#[async_trait]
pub trait WorkflowStore: ProcedureStore + AssignmentStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<CommitReceipt, StoreError>;

    /// Oldest first.
    async fn audit_trail(&self, entity: AuditEntity) -> Result<Vec<AuditEntry>, StoreError>;
}
