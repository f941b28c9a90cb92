// libs/procedure-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_models::ids::{AssignmentId, ProcedureId, SessionId};

// ==============================================================================
// PATIENT PROCEDURE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureStatus {
    Available,
    InProgress,
    Completed,
    Contraindicated,
    Absent,
    Cancelled,
}

impl ProcedureStatus {
    /// Statuses a procedure may be created in.
    pub fn is_initial(&self) -> bool {
        matches!(
            self,
            ProcedureStatus::Available | ProcedureStatus::Contraindicated | ProcedureStatus::Absent
        )
    }

    /// Not claimed by anyone and not finished; details may still be edited.
    pub fn is_unclaimed(&self) -> bool {
        self.is_initial()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcedureStatus::Completed | ProcedureStatus::Cancelled)
    }
}

impl fmt::Display for ProcedureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureStatus::Available => write!(f, "available"),
            ProcedureStatus::InProgress => write!(f, "in_progress"),
            ProcedureStatus::Completed => write!(f, "completed"),
            ProcedureStatus::Contraindicated => write!(f, "contraindicated"),
            ProcedureStatus::Absent => write!(f, "absent"),
            ProcedureStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// This priority and every higher one.
    pub fn at_least(self) -> Vec<Priority> {
        [Priority::Low, Priority::Medium, Priority::High]
            .into_iter()
            .filter(|p| *p >= self)
            .collect()
    }
}

/// Tooth in FDI notation plus the treated surfaces (e.g. `MOD`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToothLocation {
    pub fdi_code: Option<u8>,
    pub surface: Option<String>,
}

impl ToothLocation {
    pub fn tooth(fdi_code: u8) -> Self {
        Self { fdi_code: Some(fdi_code), surface: None }
    }

    pub fn with_surface(mut self, surface: &str) -> Self {
        self.surface = Some(surface.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fdi_code.is_none() && self.surface.as_deref().map_or(true, |s| s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientProcedure {
    pub id: ProcedureId,
    pub patient_id: Uuid,
    pub treatment_id: Uuid,
    pub treatment_subclass_id: Option<Uuid>,
    pub treatment_option_id: Option<Uuid>,
    pub chair_id: Option<Uuid>,
    pub tooth_location: Option<ToothLocation>,
    pub status: ProcedureStatus,
    pub priority: Priority,
    pub estimated_price: f64,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// ASSIGNMENT & TREATMENT SESSION
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Abandoned,
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStatus::Active => write!(f, "active"),
            AssignmentStatus::Completed => write!(f, "completed"),
            AssignmentStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A student's claim on one procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub procedure_id: ProcedureId,
    pub student_id: Uuid,
    pub status: AssignmentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub sessions_completed: i32,
    pub abandon_reason: Option<String>,
    pub final_notes: Option<String>,
}

impl Assignment {
    pub fn start(procedure_id: ProcedureId, student_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: AssignmentId::new(),
            procedure_id,
            student_id,
            status: AssignmentStatus::Active,
            started_at,
            completed_at: None,
            abandoned_at: None,
            sessions_completed: 0,
            abandon_reason: None,
            final_notes: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Change to `assignment.sessions_completed` when a session moves from
    /// `self` to `next`.
    pub fn completed_delta(self, next: SessionStatus) -> i32 {
        match (self == SessionStatus::Completed, next == SessionStatus::Completed) {
            (false, true) => 1,
            (true, false) => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreatmentSession {
    pub id: SessionId,
    pub assignment_id: AssignmentId,
    pub session_number: i32,
    pub session_date: NaiveDate,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// REFERENCE DATA
// ==============================================================================

/// Read-only treatment from the reference catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Treatment {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub chair_id: Option<Uuid>,
    pub requires_tooth: bool,
    pub estimated_sessions: i32,
    pub base_price: f64,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProcedureRequest {
    pub patient_id: Uuid,
    /// May be omitted for an absent tooth; the fallback treatment is used.
    pub treatment_id: Option<Uuid>,
    pub treatment_subclass_id: Option<Uuid>,
    pub treatment_option_id: Option<Uuid>,
    pub chair_id: Option<Uuid>,
    pub tooth_location: Option<ToothLocation>,
    pub priority: Option<Priority>,
    pub estimated_price: Option<f64>,
    pub notes: Option<String>,
    pub initial_status: Option<ProcedureStatus>,
    pub auto_assign: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProcedureRequest {
    pub priority: Option<Priority>,
    pub estimated_price: Option<f64>,
    pub notes: Option<String>,
    pub tooth_location: Option<ToothLocation>,
    pub status: Option<ProcedureStatus>,
}

impl UpdateProcedureRequest {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none()
            && self.estimated_price.is_none()
            && self.notes.is_none()
            && self.tooth_location.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignProcedureRequest {
    /// Defaults to the caller.
    pub student_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteAssignmentRequest {
    pub final_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbandonAssignmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSessionRequest {
    pub session_date: NaiveDate,
    #[serde(default)]
    pub status: SessionStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    pub status: Option<SessionStatus>,
    pub session_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl UpdateSessionRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.session_date.is_none() && self.notes.is_none()
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcedureQuery {
    pub status: Option<ProcedureStatus>,
    pub created_by: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub chair_id: Option<Uuid>,
    pub min_priority: Option<Priority>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ProcedureQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, procedure: &PatientProcedure) -> bool {
        self.status.map_or(true, |s| procedure.status == s)
            && self.created_by.map_or(true, |id| procedure.created_by == id)
            && self.patient_id.map_or(true, |id| procedure.patient_id == id)
            && self.chair_id.map_or(true, |id| procedure.chair_id == Some(id))
            && self.min_priority.map_or(true, |p| procedure.priority >= p)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentQuery {
    pub status: Option<AssignmentStatus>,
}

/// Result of `create_procedure`; carries the assignment when auto-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedProcedure {
    pub procedure: PatientProcedure,
    pub assignment: Option<Assignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureDetail {
    pub procedure: PatientProcedure,
    pub active_assignment: Option<Assignment>,
    pub assignments: Vec<Assignment>,
}
