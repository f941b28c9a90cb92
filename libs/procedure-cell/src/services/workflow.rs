// =====================================================================================
// PROCEDURE / ASSIGNMENT WORKFLOW ENGINE
// =====================================================================================
//
// Every state-changing operation builds one UnitOfWork: guarded mutations plus
// the audit entries describing them. The store commits the unit atomically;
// notifications are only dispatched after a successful commit.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use audit_cell::{AuditAction, AuditEntity, AuditEntry, AuditLog};
use notification_cell::NotificationStore;
use shared_config::{AppConfig, DEFAULT_ABSENT_TOOTH_TREATMENT_CODE};
use shared_models::auth::ActorContext;
use shared_models::ids::{AssignmentId, ProcedureId, SessionId};

use crate::error::WorkflowError;
use crate::models::{
    Assignment, AssignmentStatus, CreateProcedureRequest, CreatedProcedure, PatientProcedure,
    ProcedureDetail, ProcedureQuery, ProcedureStatus, RecordSessionRequest, SessionStatus,
    Treatment, TreatmentSession, UpdateProcedureRequest, UpdateSessionRequest,
};
use crate::services::catalog::TreatmentCatalog;
use crate::services::fanout::{self, NotificationFanout};
use crate::services::validation;
use crate::store::{
    CommitReceipt, Mutation, NewSession, ProcedureChanges, SessionChanges, StoreError, UnitOfWork,
    WorkflowStore,
};

pub const CANCELLED_ABANDON_REASON: &str = "procedure cancelled";

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Catalog code used when an absent tooth is recorded without a treatment.
    pub absent_tooth_treatment_code: String,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            absent_tooth_treatment_code: config.absent_tooth_treatment_code.clone(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            absent_tooth_treatment_code: DEFAULT_ABSENT_TOOTH_TREATMENT_CODE.to_string(),
        }
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    audit: Arc<dyn AuditLog>,
    fanout: NotificationFanout,
    catalog: Arc<dyn TreatmentCatalog>,
    settings: WorkflowSettings,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        audit: Arc<dyn AuditLog>,
        notifications: Arc<dyn NotificationStore>,
        catalog: Arc<dyn TreatmentCatalog>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            audit,
            fanout: NotificationFanout::new(notifications),
            catalog,
            settings,
        }
    }

    // ==============================================================================
    // PROCEDURE OPERATIONS
    // ==============================================================================

    #[instrument(skip(self, actor, request), fields(actor_id = %actor.user_id, patient_id = %request.patient_id))]
    pub async fn create_procedure(
        &self,
        actor: &ActorContext,
        request: CreateProcedureRequest,
    ) -> Result<CreatedProcedure, WorkflowError> {
        let initial_status =
            validation::validate_initial_status(request.initial_status.unwrap_or(ProcedureStatus::Available))?;
        let auto_assign = request.auto_assign.unwrap_or(false);

        if auto_assign && initial_status != ProcedureStatus::Available {
            return Err(WorkflowError::Validation(format!(
                "A procedure created as {} cannot be auto-assigned",
                initial_status
            )));
        }
        if request.patient_id.is_nil() {
            return Err(WorkflowError::Validation("patient_id is required".to_string()));
        }

        let treatment = self.resolve_treatment(request.treatment_id, initial_status).await?;
        let tooth_location =
            validation::validate_tooth_location(request.tooth_location.as_ref(), treatment.requires_tooth)?;
        let estimated_price =
            validation::validate_price(request.estimated_price.unwrap_or(treatment.base_price))?;

        let now = Utc::now();
        let procedure = PatientProcedure {
            id: ProcedureId::new(),
            patient_id: request.patient_id,
            treatment_id: treatment.id,
            treatment_subclass_id: request.treatment_subclass_id,
            treatment_option_id: request.treatment_option_id,
            chair_id: request.chair_id.or(treatment.chair_id),
            tooth_location,
            status: initial_status,
            priority: request.priority.unwrap_or_default(),
            estimated_price,
            notes: non_empty(request.notes),
            created_by: actor.user_id,
            created_at: now,
            updated_at: now,
        };

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::InsertProcedure { procedure: procedure.clone() });
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::Created,
            AuditEntity::PatientProcedure(procedure.id),
            json!({
                "status": procedure.status,
                "treatment_id": treatment.id,
                "treatment_code": treatment.code,
                "tooth_location": procedure.tooth_location,
                "priority": procedure.priority,
                "estimated_price": procedure.estimated_price,
                "auto_assign": auto_assign,
            }),
        )?;

        let assignment = if auto_assign {
            let assignment = Assignment::start(procedure.id, actor.user_id, now);
            unit.push(Mutation::TransitionProcedure {
                procedure_id: procedure.id,
                from: ProcedureStatus::Available,
                to: ProcedureStatus::InProgress,
                at: now,
            })
            .push(Mutation::InsertAssignment { assignment: assignment.clone() });
            self.audit.append(
                &mut unit,
                actor,
                AuditAction::Created,
                AuditEntity::Assignment(assignment.id),
                json!({
                    "procedure_id": procedure.id,
                    "student_id": assignment.student_id,
                }),
            )?;
            Some(assignment)
        } else {
            None
        };

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        let procedure = receipt.procedure(procedure.id)?;
        let assignment = match assignment {
            Some(a) => Some(receipt.assignment(a.id)?),
            None => None,
        };

        info!(
            procedure_id = %procedure.id,
            status = %procedure.status,
            auto_assigned = assignment.is_some(),
            "Procedure created"
        );

        if let Some(assignment) = &assignment {
            let draft = fanout::assigned_to_student(&procedure, assignment, &treatment.name);
            self.fanout.dispatch(vec![draft]).await;
        }

        Ok(CreatedProcedure { procedure, assignment })
    }

    /// Claims an available procedure for `student_id` (the caller when omitted).
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn assign_procedure(
        &self,
        actor: &ActorContext,
        procedure_id: ProcedureId,
        student_id: Option<Uuid>,
    ) -> Result<Assignment, WorkflowError> {
        let student_id = student_id.unwrap_or(actor.user_id);
        if student_id.is_nil() {
            return Err(WorkflowError::Validation("student_id is required".to_string()));
        }
        if student_id != actor.user_id && !actor.is_supervisor() {
            return Err(WorkflowError::Forbidden(
                "Only an admin or professor may assign a procedure to another student".to_string(),
            ));
        }

        let procedure = self.load_procedure(procedure_id).await?;
        match procedure.status {
            ProcedureStatus::Available => {}
            ProcedureStatus::InProgress => return Err(WorkflowError::AlreadyAssigned(procedure_id)),
            status => {
                return Err(WorkflowError::InvalidState(format!(
                    "Procedure {} is {} and cannot be assigned",
                    procedure_id, status
                )))
            }
        }
        if self.store.active_assignment(procedure_id).await?.is_some() {
            return Err(WorkflowError::AlreadyAssigned(procedure_id));
        }

        let now = Utc::now();
        let assignment = Assignment::start(procedure_id, student_id, now);

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::TransitionProcedure {
            procedure_id,
            from: ProcedureStatus::Available,
            to: ProcedureStatus::InProgress,
            at: now,
        })
        .push(Mutation::InsertAssignment { assignment: assignment.clone() });
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::Assigned,
            AuditEntity::Assignment(assignment.id),
            json!({
                "procedure_id": procedure_id,
                "student_id": student_id,
                "previous_status": procedure.status,
            }),
        )?;

        let receipt = self
            .commit(unit, |_| WorkflowError::AlreadyAssigned(procedure_id))
            .await?;
        let assignment = receipt.assignment(assignment.id)?;
        let procedure = receipt.procedure(procedure_id)?;

        info!(
            procedure_id = %procedure_id,
            assignment_id = %assignment.id,
            student_id = %student_id,
            "Procedure assigned"
        );

        let treatment_name = self.treatment_name(procedure.treatment_id).await;
        self.fanout
            .dispatch(fanout::claim_drafts(&procedure, &assignment, &treatment_name))
            .await;

        Ok(assignment)
    }

    /// Creator-only. Force-abandons an active claim in the same unit.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn cancel_procedure(
        &self,
        actor: &ActorContext,
        procedure_id: ProcedureId,
    ) -> Result<PatientProcedure, WorkflowError> {
        let procedure = self.load_procedure(procedure_id).await?;
        if procedure.created_by != actor.user_id {
            return Err(WorkflowError::Forbidden(
                "Only the creator may cancel this procedure".to_string(),
            ));
        }
        if procedure.status.is_terminal() {
            return Err(WorkflowError::InvalidState(format!(
                "Procedure {} is already {}",
                procedure_id, procedure.status
            )));
        }

        let active = self.store.active_assignment(procedure_id).await?;
        let now = Utc::now();

        let mut unit = UnitOfWork::new();
        if let Some(assignment) = &active {
            unit.push(Mutation::CloseAssignment {
                assignment_id: assignment.id,
                to: AssignmentStatus::Abandoned,
                at: now,
                reason: Some(CANCELLED_ABANDON_REASON.to_string()),
                final_notes: None,
            });
        }
        unit.push(Mutation::TransitionProcedure {
            procedure_id,
            from: procedure.status,
            to: ProcedureStatus::Cancelled,
            at: now,
        });
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::Cancelled,
            AuditEntity::PatientProcedure(procedure_id),
            json!({
                "previous_status": procedure.status,
                "abandoned_assignment_id": active.as_ref().map(|a| a.id),
            }),
        )?;

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        let cancelled = receipt.procedure(procedure_id)?;

        info!(procedure_id = %procedure_id, "Procedure cancelled");

        if let Some(assignment) = active {
            if assignment.student_id != actor.user_id {
                let assignment = receipt.assignment(assignment.id).unwrap_or(assignment);
                let treatment_name = self.treatment_name(cancelled.treatment_id).await;
                let draft = fanout::cancelled_for_student(&cancelled, &assignment, &treatment_name);
                self.fanout.dispatch(vec![draft]).await;
            }
        }

        Ok(cancelled)
    }

    /// Creator-only edit of an unclaimed procedure.
    #[instrument(skip(self, actor, request), fields(actor_id = %actor.user_id))]
    pub async fn update_procedure(
        &self,
        actor: &ActorContext,
        procedure_id: ProcedureId,
        request: UpdateProcedureRequest,
    ) -> Result<PatientProcedure, WorkflowError> {
        if request.is_empty() {
            return Err(WorkflowError::Validation("No changes requested".to_string()));
        }

        let procedure = self.load_procedure(procedure_id).await?;
        if procedure.created_by != actor.user_id {
            return Err(WorkflowError::Forbidden(
                "Only the creator may edit this procedure".to_string(),
            ));
        }
        if !procedure.status.is_unclaimed() {
            return Err(WorkflowError::InvalidState(format!(
                "Procedure {} is {} and can no longer be edited",
                procedure_id, procedure.status
            )));
        }

        let mut changes = ProcedureChanges::default();
        let mut old = Map::new();
        let mut new = Map::new();

        if let Some(status) = request.status {
            if !status.is_unclaimed() {
                return Err(WorkflowError::Validation(format!(
                    "Status can only change among available, contraindicated and absent, not {}",
                    status
                )));
            }
            changes.status = Some(status);
            old.insert("status".into(), json!(procedure.status));
            new.insert("status".into(), json!(status));
        }
        if let Some(priority) = request.priority {
            changes.priority = Some(priority);
            old.insert("priority".into(), json!(procedure.priority));
            new.insert("priority".into(), json!(priority));
        }
        if let Some(price) = request.estimated_price {
            let price = validation::validate_price(price)?;
            changes.estimated_price = Some(price);
            old.insert("estimated_price".into(), json!(procedure.estimated_price));
            new.insert("estimated_price".into(), json!(price));
        }
        if let Some(notes) = request.notes {
            changes.notes = Some(notes.trim().to_string());
            old.insert("notes".into(), json!(procedure.notes));
            new.insert("notes".into(), json!(notes.trim()));
        }
        if let Some(location) = request.tooth_location {
            let requires_tooth = self
                .catalog
                .get_treatment(procedure.treatment_id)
                .await?
                .map_or(false, |t| t.requires_tooth);
            let validated = validation::validate_tooth_location(Some(&location), requires_tooth)?
                .ok_or_else(|| {
                    WorkflowError::Validation(
                        "tooth_location must name a tooth or a surface".to_string(),
                    )
                })?;
            old.insert("tooth_location".into(), json!(procedure.tooth_location));
            new.insert("tooth_location".into(), json!(validated));
            changes.tooth_location = Some(validated);
        }

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::UpdateProcedureDetails {
            procedure_id,
            expected_status: procedure.status,
            changes,
            at: Utc::now(),
        });
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::Updated,
            AuditEntity::PatientProcedure(procedure_id),
            json!({ "old": old, "new": new }),
        )?;

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        let updated = receipt.procedure(procedure_id)?;
        debug!(procedure_id = %procedure_id, "Procedure updated");
        Ok(updated)
    }

    // ==============================================================================
    // ASSIGNMENT OPERATIONS
    // ==============================================================================

    #[instrument(skip(self, actor, final_notes), fields(actor_id = %actor.user_id))]
    pub async fn complete_assignment(
        &self,
        actor: &ActorContext,
        assignment_id: AssignmentId,
        final_notes: Option<String>,
    ) -> Result<Assignment, WorkflowError> {
        let assignment = self.load_assignment(assignment_id).await?;
        authorize_assignment(actor, &assignment)?;
        require_active(&assignment, "completed")?;

        let now = Utc::now();
        let final_notes = non_empty(final_notes);

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::CloseAssignment {
            assignment_id,
            to: AssignmentStatus::Completed,
            at: now,
            reason: None,
            final_notes: final_notes.clone(),
        })
        .push(Mutation::TransitionProcedure {
            procedure_id: assignment.procedure_id,
            from: ProcedureStatus::InProgress,
            to: ProcedureStatus::Completed,
            at: now,
        });
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::Completed,
            AuditEntity::Assignment(assignment_id),
            json!({
                "procedure_id": assignment.procedure_id,
                "sessions_completed": assignment.sessions_completed,
                "final_notes": final_notes,
            }),
        )?;

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        let completed = receipt.assignment(assignment_id)?;

        info!(
            assignment_id = %assignment_id,
            procedure_id = %assignment.procedure_id,
            "Assignment completed"
        );
        Ok(completed)
    }

    /// Releases the procedure back to `available`.
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.user_id))]
    pub async fn abandon_assignment(
        &self,
        actor: &ActorContext,
        assignment_id: AssignmentId,
        reason: Option<String>,
    ) -> Result<Assignment, WorkflowError> {
        let reason = validation::validate_reason(reason.as_deref())?;
        let assignment = self.load_assignment(assignment_id).await?;
        authorize_assignment(actor, &assignment)?;
        require_active(&assignment, "abandoned")?;

        let now = Utc::now();
        let mut unit = UnitOfWork::new();
        unit.push(Mutation::CloseAssignment {
            assignment_id,
            to: AssignmentStatus::Abandoned,
            at: now,
            reason: Some(reason.clone()),
            final_notes: None,
        })
        .push(Mutation::TransitionProcedure {
            procedure_id: assignment.procedure_id,
            from: ProcedureStatus::InProgress,
            to: ProcedureStatus::Available,
            at: now,
        });
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::Abandoned,
            AuditEntity::Assignment(assignment_id),
            json!({
                "procedure_id": assignment.procedure_id,
                "reason": reason,
                "sessions_completed": assignment.sessions_completed,
            }),
        )?;

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        let abandoned = receipt.assignment(assignment_id)?;
        let procedure = receipt.procedure(assignment.procedure_id)?;

        info!(
            assignment_id = %assignment_id,
            procedure_id = %procedure.id,
            "Assignment abandoned, procedure available again"
        );

        if procedure.created_by != abandoned.student_id {
            let treatment_name = self.treatment_name(procedure.treatment_id).await;
            let draft = fanout::released_for_creator(&procedure, &abandoned, &treatment_name, &reason);
            self.fanout.dispatch(vec![draft]).await;
        }

        Ok(abandoned)
    }

    // ==============================================================================
    // SESSION OPERATIONS
    // ==============================================================================

    #[instrument(skip(self, actor, request), fields(actor_id = %actor.user_id))]
    pub async fn record_session(
        &self,
        actor: &ActorContext,
        assignment_id: AssignmentId,
        request: RecordSessionRequest,
    ) -> Result<TreatmentSession, WorkflowError> {
        let assignment = self.load_assignment(assignment_id).await?;
        authorize_assignment(actor, &assignment)?;
        require_active(&assignment, "given new sessions")?;

        let session = NewSession {
            id: SessionId::new(),
            assignment_id,
            session_date: request.session_date,
            status: request.status,
            notes: non_empty(request.notes),
            created_by: actor.user_id,
            created_at: Utc::now(),
        };
        let delta = SessionStatus::Scheduled.completed_delta(session.status);

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::AppendSession { session: session.clone() });
        if delta != 0 {
            unit.push(Mutation::AdjustCompletedSessions { assignment_id, delta });
        }
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::SessionRecorded,
            AuditEntity::TreatmentSession(session.id),
            json!({
                "assignment_id": assignment_id,
                "status": session.status,
                "session_date": session.session_date,
            }),
        )?;

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        let recorded = receipt.session(session.id)?;

        debug!(
            assignment_id = %assignment_id,
            session_number = recorded.session_number,
            "Session recorded"
        );
        Ok(recorded)
    }

    #[instrument(skip(self, actor, request), fields(actor_id = %actor.user_id))]
    pub async fn update_session(
        &self,
        actor: &ActorContext,
        session_id: SessionId,
        request: UpdateSessionRequest,
    ) -> Result<TreatmentSession, WorkflowError> {
        if request.is_empty() {
            return Err(WorkflowError::Validation("No changes requested".to_string()));
        }

        let session = self.load_session(session_id).await?;
        let assignment = self.load_assignment(session.assignment_id).await?;
        authorize_assignment(actor, &assignment)?;
        require_active(&assignment, "have its sessions edited")?;

        let new_status = request.status.unwrap_or(session.status);
        let delta = session.status.completed_delta(new_status);
        let changes = SessionChanges {
            status: request.status,
            session_date: request.session_date,
            notes: request.notes.map(|n| n.trim().to_string()),
        };

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::UpdateSession {
            session_id,
            expected_status: session.status,
            changes: changes.clone(),
            at: Utc::now(),
        });
        if delta != 0 {
            unit.push(Mutation::AdjustCompletedSessions { assignment_id: assignment.id, delta });
        }
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::SessionUpdated,
            AuditEntity::TreatmentSession(session_id),
            json!({
                "assignment_id": assignment.id,
                "old": { "status": session.status, "session_date": session.session_date },
                "new": changes,
            }),
        )?;

        let receipt = self.commit(unit, WorkflowError::InvalidState).await?;
        Ok(receipt.session(session_id)?)
    }

    /// Returns the removed session.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete_session(
        &self,
        actor: &ActorContext,
        session_id: SessionId,
    ) -> Result<TreatmentSession, WorkflowError> {
        let session = self.load_session(session_id).await?;
        let assignment = self.load_assignment(session.assignment_id).await?;
        authorize_assignment(actor, &assignment)?;
        require_active(&assignment, "have its sessions deleted")?;

        let delta = session.status.completed_delta(SessionStatus::Cancelled);

        let mut unit = UnitOfWork::new();
        unit.push(Mutation::DeleteSession { session_id, expected_status: session.status });
        if delta != 0 {
            unit.push(Mutation::AdjustCompletedSessions { assignment_id: assignment.id, delta });
        }
        self.audit.append(
            &mut unit,
            actor,
            AuditAction::SessionDeleted,
            AuditEntity::TreatmentSession(session_id),
            json!({
                "assignment_id": assignment.id,
                "session_number": session.session_number,
                "status": session.status,
            }),
        )?;

        self.commit(unit, WorkflowError::InvalidState).await?;
        Ok(session)
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn procedure_detail(
        &self,
        actor: &ActorContext,
        procedure_id: ProcedureId,
    ) -> Result<ProcedureDetail, WorkflowError> {
        let procedure = self.load_procedure(procedure_id).await?;
        let assignments = self.store.assignments_for_procedure(procedure_id).await?;
        let active_assignment = assignments.iter().find(|a| a.is_active()).cloned();

        Ok(ProcedureDetail { procedure, active_assignment, assignments })
    }

    #[instrument(skip(self, actor, query), fields(actor_id = %actor.user_id))]
    pub async fn list_procedures(
        &self,
        actor: &ActorContext,
        query: &ProcedureQuery,
    ) -> Result<Vec<PatientProcedure>, WorkflowError> {
        Ok(self.store.list_procedures(query).await?)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn assignment(
        &self,
        actor: &ActorContext,
        assignment_id: AssignmentId,
    ) -> Result<Assignment, WorkflowError> {
        self.load_assignment(assignment_id).await
    }

    /// A student's own assignments; supervisors may look up anyone.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn student_assignments(
        &self,
        actor: &ActorContext,
        student_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, WorkflowError> {
        if student_id != actor.user_id && !actor.is_supervisor() {
            return Err(WorkflowError::Forbidden(
                "Cannot view another student's assignments".to_string(),
            ));
        }
        Ok(self.store.assignments_for_student(student_id, status).await?)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn assignment_sessions(
        &self,
        actor: &ActorContext,
        assignment_id: AssignmentId,
    ) -> Result<Vec<TreatmentSession>, WorkflowError> {
        let assignment = self.load_assignment(assignment_id).await?;
        Ok(self.store.sessions_for_assignment(assignment.id).await?)
    }

    /// Entries for the procedure, its assignments and their sessions, oldest first.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn procedure_audit_trail(
        &self,
        actor: &ActorContext,
        procedure_id: ProcedureId,
    ) -> Result<Vec<AuditEntry>, WorkflowError> {
        self.load_procedure(procedure_id).await?;

        let mut entries = self
            .store
            .audit_trail(AuditEntity::PatientProcedure(procedure_id))
            .await?;
        for assignment in self.store.assignments_for_procedure(procedure_id).await? {
            entries.extend(self.store.audit_trail(AuditEntity::Assignment(assignment.id)).await?);
            for session in self.store.sessions_for_assignment(assignment.id).await? {
                entries.extend(
                    self.store
                        .audit_trail(AuditEntity::TreatmentSession(session.id))
                        .await?,
                );
            }
        }
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn commit<F>(&self, unit: UnitOfWork, on_conflict: F) -> Result<CommitReceipt, WorkflowError>
    where
        F: FnOnce(String) -> WorkflowError,
    {
        let entries = unit.audit.clone();
        match self.store.commit(unit).await {
            Ok(receipt) => {
                self.audit.committed(&entries);
                Ok(receipt)
            }
            Err(StoreError::Conflict(message)) => {
                debug!("Unit rejected by a guard: {}", message);
                Err(on_conflict(message))
            }
            Err(StoreError::NotFound(message)) => Err(WorkflowError::NotFound(message)),
            Err(e) => Err(WorkflowError::Store(e)),
        }
    }

    async fn resolve_treatment(
        &self,
        treatment_id: Option<Uuid>,
        initial_status: ProcedureStatus,
    ) -> Result<Treatment, WorkflowError> {
        match treatment_id {
            Some(id) => self
                .catalog
                .get_treatment(id)
                .await?
                .ok_or_else(|| WorkflowError::Validation(format!("Unknown treatment {}", id))),
            None if initial_status == ProcedureStatus::Absent => {
                let code = &self.settings.absent_tooth_treatment_code;
                self.catalog.find_by_code(code).await?.ok_or_else(|| {
                    WorkflowError::Validation(format!(
                        "Absent-tooth treatment '{}' is missing from the catalog",
                        code
                    ))
                })
            }
            None => Err(WorkflowError::Validation("treatment_id is required".to_string())),
        }
    }

    async fn treatment_name(&self, treatment_id: Uuid) -> String {
        match self.catalog.get_treatment(treatment_id).await {
            Ok(Some(treatment)) => treatment.name,
            Ok(None) => "procedure".to_string(),
            Err(e) => {
                warn!("Could not resolve treatment {} for notification: {}", treatment_id, e);
                "procedure".to_string()
            }
        }
    }

    async fn load_procedure(&self, id: ProcedureId) -> Result<PatientProcedure, WorkflowError> {
        self.store
            .get_procedure(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Procedure {}", id)))
    }

    async fn load_assignment(&self, id: AssignmentId) -> Result<Assignment, WorkflowError> {
        self.store
            .get_assignment(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Assignment {}", id)))
    }

    async fn load_session(&self, id: SessionId) -> Result<TreatmentSession, WorkflowError> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Session {}", id)))
    }
}

/// The assignment's student or a supervisor.
fn authorize_assignment(actor: &ActorContext, assignment: &Assignment) -> Result<(), WorkflowError> {
    if assignment.student_id == actor.user_id || actor.is_supervisor() {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(
            "Only the assigned student or a supervisor may act on this assignment".to_string(),
        ))
    }
}

fn require_active(assignment: &Assignment, verb: &str) -> Result<(), WorkflowError> {
    if assignment.is_active() {
        Ok(())
    } else {
        Err(WorkflowError::InvalidState(format!(
            "Assignment {} is {} and cannot be {}",
            assignment.id, assignment.status, verb
        )))
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
