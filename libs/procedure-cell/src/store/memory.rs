// libs/procedure-cell/src/store/memory.rs
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use audit_cell::{AuditEntity, AuditEntry};
use shared_models::ids::{AssignmentId, ProcedureId, SessionId};

use crate::models::{
    Assignment, AssignmentStatus, PatientProcedure, ProcedureQuery, TreatmentSession,
};
use crate::store::{
    AssignmentStore, CommitReceipt, Mutation, ProcedureStore, StoreError, UnitOfWork, WorkflowStore,
};

#[derive(Default)]
struct MemoryState {
    procedures: HashMap<ProcedureId, PatientProcedure>,
    assignments: HashMap<AssignmentId, Assignment>,
    sessions: HashMap<SessionId, TreatmentSession>,
    audit: Vec<AuditEntry>,
}

/// Prior value of a row touched by the current commit.
enum Undo {
    Procedure(ProcedureId, Option<PatientProcedure>),
    Assignment(AssignmentId, Option<Assignment>),
    Session(SessionId, Option<TreatmentSession>),
}

#[derive(Default)]
struct Touched {
    procedures: Vec<ProcedureId>,
    assignments: Vec<AssignmentId>,
    sessions: Vec<SessionId>,
}

fn touch<T: PartialEq>(ids: &mut Vec<T>, id: T) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Process-local store. Commits run under one write lock and are rolled back
/// on the first failing guard.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    state: RwLock<MemoryState>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rollback(state: &mut MemoryState, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Procedure(id, Some(previous)) => {
                    state.procedures.insert(id, previous);
                }
                Undo::Procedure(id, None) => {
                    state.procedures.remove(&id);
                }
                Undo::Assignment(id, Some(previous)) => {
                    state.assignments.insert(id, previous);
                }
                Undo::Assignment(id, None) => {
                    state.assignments.remove(&id);
                }
                Undo::Session(id, Some(previous)) => {
                    state.sessions.insert(id, previous);
                }
                Undo::Session(id, None) => {
                    state.sessions.remove(&id);
                }
            }
        }
    }

    fn require_active_assignment(state: &MemoryState, id: AssignmentId) -> Result<(), StoreError> {
        match state.assignments.get(&id) {
            Some(assignment) if assignment.is_active() => Ok(()),
            Some(assignment) => Err(StoreError::Conflict(format!(
                "Assignment {} is {}",
                id, assignment.status
            ))),
            None => Err(StoreError::NotFound(format!("Assignment {}", id))),
        }
    }

    fn apply(
        state: &mut MemoryState,
        mutation: Mutation,
        journal: &mut Vec<Undo>,
        touched: &mut Touched,
    ) -> Result<(), StoreError> {
        match mutation {
            Mutation::InsertProcedure { procedure } => {
                if state.procedures.contains_key(&procedure.id) {
                    return Err(StoreError::Conflict(format!("Procedure {} already exists", procedure.id)));
                }
                journal.push(Undo::Procedure(procedure.id, None));
                touch(&mut touched.procedures, procedure.id);
                state.procedures.insert(procedure.id, procedure);
            }
            Mutation::TransitionProcedure { procedure_id, from, to, at } => {
                let procedure = state
                    .procedures
                    .get_mut(&procedure_id)
                    .ok_or_else(|| StoreError::NotFound(format!("Procedure {}", procedure_id)))?;
                if procedure.status != from {
                    return Err(StoreError::Conflict(format!(
                        "Procedure {} is {}, expected {}",
                        procedure_id, procedure.status, from
                    )));
                }
                journal.push(Undo::Procedure(procedure_id, Some(procedure.clone())));
                touch(&mut touched.procedures, procedure_id);
                procedure.status = to;
                procedure.updated_at = at;
            }
            Mutation::UpdateProcedureDetails { procedure_id, expected_status, changes, at } => {
                let procedure = state
                    .procedures
                    .get_mut(&procedure_id)
                    .ok_or_else(|| StoreError::NotFound(format!("Procedure {}", procedure_id)))?;
                if procedure.status != expected_status {
                    return Err(StoreError::Conflict(format!(
                        "Procedure {} is {}, expected {}",
                        procedure_id, procedure.status, expected_status
                    )));
                }
                journal.push(Undo::Procedure(procedure_id, Some(procedure.clone())));
                touch(&mut touched.procedures, procedure_id);
                changes.apply_to(procedure);
                procedure.updated_at = at;
            }
            Mutation::InsertAssignment { assignment } => {
                if !state.procedures.contains_key(&assignment.procedure_id) {
                    return Err(StoreError::NotFound(format!("Procedure {}", assignment.procedure_id)));
                }
                let already_active = state
                    .assignments
                    .values()
                    .any(|a| a.procedure_id == assignment.procedure_id && a.is_active());
                if already_active || state.assignments.contains_key(&assignment.id) {
                    return Err(StoreError::Conflict(format!(
                        "Procedure {} already has an active assignment",
                        assignment.procedure_id
                    )));
                }
                journal.push(Undo::Assignment(assignment.id, None));
                touch(&mut touched.assignments, assignment.id);
                state.assignments.insert(assignment.id, assignment);
            }
            Mutation::CloseAssignment { assignment_id, to, at, reason, final_notes } => {
                Self::require_active_assignment(state, assignment_id)?;
                let assignment = state
                    .assignments
                    .get_mut(&assignment_id)
                    .ok_or_else(|| StoreError::NotFound(format!("Assignment {}", assignment_id)))?;
                journal.push(Undo::Assignment(assignment_id, Some(assignment.clone())));
                touch(&mut touched.assignments, assignment_id);
                assignment.status = to;
                match to {
                    AssignmentStatus::Completed => assignment.completed_at = Some(at),
                    AssignmentStatus::Abandoned => assignment.abandoned_at = Some(at),
                    AssignmentStatus::Active => {}
                }
                if reason.is_some() {
                    assignment.abandon_reason = reason;
                }
                if final_notes.is_some() {
                    assignment.final_notes = final_notes;
                }
            }
            Mutation::AppendSession { session } => {
                Self::require_active_assignment(state, session.assignment_id)?;
                if state.sessions.contains_key(&session.id) {
                    return Err(StoreError::Conflict(format!("Session {} already exists", session.id)));
                }
                let next_number = state
                    .sessions
                    .values()
                    .filter(|s| s.assignment_id == session.assignment_id)
                    .map(|s| s.session_number)
                    .max()
                    .unwrap_or(0)
                    + 1;
                journal.push(Undo::Session(session.id, None));
                touch(&mut touched.sessions, session.id);
                state.sessions.insert(session.id, session.numbered(next_number));
            }
            Mutation::UpdateSession { session_id, expected_status, changes, at } => {
                let assignment_id = Self::guard_session(state, session_id, expected_status)?;
                Self::require_active_assignment(state, assignment_id)?;
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    journal.push(Undo::Session(session_id, Some(session.clone())));
                    touch(&mut touched.sessions, session_id);
                    changes.apply_to(session);
                    session.updated_at = at;
                }
            }
            Mutation::DeleteSession { session_id, expected_status } => {
                let assignment_id = Self::guard_session(state, session_id, expected_status)?;
                Self::require_active_assignment(state, assignment_id)?;
                if let Some(previous) = state.sessions.remove(&session_id) {
                    journal.push(Undo::Session(session_id, Some(previous)));
                }
            }
            Mutation::AdjustCompletedSessions { assignment_id, delta } => {
                let assignment = state
                    .assignments
                    .get_mut(&assignment_id)
                    .ok_or_else(|| StoreError::NotFound(format!("Assignment {}", assignment_id)))?;
                let adjusted = assignment.sessions_completed + delta;
                if adjusted < 0 {
                    return Err(StoreError::Conflict(format!(
                        "Completed session count of assignment {} cannot go below zero",
                        assignment_id
                    )));
                }
                journal.push(Undo::Assignment(assignment_id, Some(assignment.clone())));
                touch(&mut touched.assignments, assignment_id);
                assignment.sessions_completed = adjusted;
            }
        }
        Ok(())
    }

    fn guard_session(
        state: &MemoryState,
        session_id: SessionId,
        expected_status: crate::models::SessionStatus,
    ) -> Result<AssignmentId, StoreError> {
        let session = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("Session {}", session_id)))?;
        if session.status != expected_status {
            return Err(StoreError::Conflict(format!(
                "Session {} is {}, expected {}",
                session_id, session.status, expected_status
            )));
        }
        Ok(session.assignment_id)
    }

    fn receipt(state: &MemoryState, touched: &Touched) -> CommitReceipt {
        CommitReceipt {
            procedures: touched
                .procedures
                .iter()
                .filter_map(|id| state.procedures.get(id).cloned())
                .collect(),
            assignments: touched
                .assignments
                .iter()
                .filter_map(|id| state.assignments.get(id).cloned())
                .collect(),
            sessions: touched
                .sessions
                .iter()
                .filter_map(|id| state.sessions.get(id).cloned())
                .collect(),
        }
    }
}

#[async_trait]
impl ProcedureStore for MemoryWorkflowStore {
    async fn get_procedure(&self, id: ProcedureId) -> Result<Option<PatientProcedure>, StoreError> {
        Ok(self.state.read().await.procedures.get(&id).cloned())
    }

    async fn list_procedures(&self, query: &ProcedureQuery) -> Result<Vec<PatientProcedure>, StoreError> {
        let state = self.state.read().await;
        let mut procedures: Vec<PatientProcedure> = state
            .procedures
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        procedures.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(procedures
            .into_iter()
            .skip(query.effective_offset())
            .take(query.effective_limit())
            .collect())
    }
}

#[async_trait]
impl AssignmentStore for MemoryWorkflowStore {
    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        Ok(self.state.read().await.assignments.get(&id).cloned())
    }

    async fn assignments_for_procedure(&self, procedure_id: ProcedureId) -> Result<Vec<Assignment>, StoreError> {
        let state = self.state.read().await;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| a.procedure_id == procedure_id)
            .cloned()
            .collect();
        assignments.sort_by_key(|a| a.started_at);
        Ok(assignments)
    }

    async fn assignments_for_student(
        &self,
        student_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let state = self.state.read().await;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| a.student_id == student_id && status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        assignments.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(assignments)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<TreatmentSession>, StoreError> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn sessions_for_assignment(&self, assignment_id: AssignmentId) -> Result<Vec<TreatmentSession>, StoreError> {
        let state = self.state.read().await;
        let mut sessions: Vec<TreatmentSession> = state
            .sessions
            .values()
            .filter(|s| s.assignment_id == assignment_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.session_number);
        Ok(sessions)
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.write().await;
        let mut journal = Vec::with_capacity(unit.mutations.len());
        let mut touched = Touched::default();

        for mutation in unit.mutations {
            if let Err(err) = Self::apply(&mut state, mutation, &mut journal, &mut touched) {
                debug!("Rolling back {} applied mutations: {}", journal.len(), err);
                Self::rollback(&mut state, journal);
                return Err(err);
            }
        }

        state.audit.extend(unit.audit);
        Ok(Self::receipt(&state, &touched))
    }

    async fn audit_trail(&self, entity: AuditEntity) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.audit.iter().filter(|e| e.entity == entity).cloned().collect())
    }
}
