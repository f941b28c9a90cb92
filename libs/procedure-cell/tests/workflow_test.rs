use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use audit_cell::{AuditAction, AuditEntity, AuditEntry, AuditError, AuditLog, AuditSink, TransactionalAuditLog};
use notification_cell::{
    MemoryNotificationStore, Notification, NotificationDraft, NotificationError, NotificationQuery,
    NotificationStore, NotificationType,
};
use procedure_cell::*;
use shared_models::auth::{ActorContext, Role};
use shared_models::ids::{AssignmentId, NotificationId, ProcedureId, SessionId};

// ==============================================================================
// HARNESS
// ==============================================================================

struct Harness {
    engine: Arc<WorkflowEngine>,
    store: Arc<MemoryWorkflowStore>,
    inbox: Arc<MemoryNotificationStore>,
    catalog: Arc<StaticTreatmentCatalog>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryWorkflowStore::new());
        let inbox = Arc::new(MemoryNotificationStore::new());
        let catalog = Arc::new(StaticTreatmentCatalog::with_defaults("DIENTE_AUSENTE"));
        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            Arc::new(TransactionalAuditLog::new()),
            inbox.clone(),
            catalog.clone(),
            WorkflowSettings::default(),
        ));
        Self { engine, store, inbox, catalog }
    }

    /// Engine over the same store and catalog with other collaborators.
    fn engine_with(&self, audit: Arc<dyn AuditLog>, notifications: Arc<dyn NotificationStore>) -> WorkflowEngine {
        WorkflowEngine::new(
            self.store.clone(),
            audit,
            notifications,
            self.catalog.clone(),
            WorkflowSettings::default(),
        )
    }

    fn treatment(&self, code: &str) -> Treatment {
        self.catalog
            .treatments()
            .iter()
            .find(|t| t.code == code)
            .cloned()
            .unwrap()
    }

    fn extraction_request(&self) -> CreateProcedureRequest {
        CreateProcedureRequest {
            patient_id: Uuid::new_v4(),
            treatment_id: Some(self.treatment("EXO-SIMPLE").id),
            tooth_location: Some(ToothLocation::tooth(36)),
            ..Default::default()
        }
    }

    async fn available_procedure(&self, creator: &ActorContext) -> PatientProcedure {
        self.engine
            .create_procedure(creator, self.extraction_request())
            .await
            .unwrap()
            .procedure
    }

    async fn unread(&self, user: &ActorContext) -> Vec<Notification> {
        self.inbox
            .list_for_user(user.user_id, &NotificationQuery { unread_only: Some(true), limit: None })
            .await
            .unwrap()
    }

    async fn active_count(&self, procedure_id: ProcedureId) -> usize {
        self.store
            .assignments_for_procedure(procedure_id)
            .await
            .unwrap()
            .iter()
            .filter(|a| a.is_active())
            .count()
    }
}

fn staff() -> ActorContext {
    ActorContext::new(Uuid::new_v4(), Role::Staff)
}

fn student() -> ActorContext {
    ActorContext::new(Uuid::new_v4(), Role::Student)
}

fn professor() -> ActorContext {
    ActorContext::new(Uuid::new_v4(), Role::Professor)
}

fn session_on(day: u32, status: SessionStatus) -> RecordSessionRequest {
    RecordSessionRequest {
        session_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
        status,
        notes: None,
    }
}

struct RejectingAuditLog;

impl AuditLog for RejectingAuditLog {
    fn append(
        &self,
        _sink: &mut dyn AuditSink,
        _actor: &ActorContext,
        _action: AuditAction,
        _entity: AuditEntity,
        _metadata: Value,
    ) -> Result<AuditEntry, AuditError> {
        Err(AuditError::MissingActor)
    }
}

struct UnavailableInbox;

#[async_trait]
impl NotificationStore for UnavailableInbox {
    async fn enqueue(&self, _draft: NotificationDraft) -> Result<Notification, NotificationError> {
        Err(NotificationError::DatabaseError("inbox offline".to_string()))
    }

    async fn mark_read(&self, _id: NotificationId, _user_id: Uuid) -> Result<Notification, NotificationError> {
        Err(NotificationError::DatabaseError("inbox offline".to_string()))
    }

    async fn mark_all_read(&self, _user_id: Uuid) -> Result<usize, NotificationError> {
        Err(NotificationError::DatabaseError("inbox offline".to_string()))
    }

    async fn list_for_user(&self, _user_id: Uuid, _query: &NotificationQuery) -> Result<Vec<Notification>, NotificationError> {
        Err(NotificationError::DatabaseError("inbox offline".to_string()))
    }

    async fn unread_count(&self, _user_id: Uuid) -> Result<usize, NotificationError> {
        Err(NotificationError::DatabaseError("inbox offline".to_string()))
    }
}

// ==============================================================================
// END-TO-END SCENARIOS
// ==============================================================================

#[tokio::test]
async fn test_simple_extraction_end_to_end() {
    let h = Harness::new();
    let creator = staff();
    let student_b = student();
    let student_c = student();

    let procedure = h.available_procedure(&creator).await;
    assert_eq!(procedure.status, ProcedureStatus::Available);
    assert_eq!(procedure.estimated_price, 40.0);

    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();
    assert_eq!(assignment.status, AssignmentStatus::Active);
    assert_eq!(assignment.student_id, student_b.user_id);

    let detail = h.engine.procedure_detail(&creator, procedure.id).await.unwrap();
    assert_eq!(detail.procedure.status, ProcedureStatus::InProgress);
    assert_eq!(detail.active_assignment.as_ref().map(|a| a.id), Some(assignment.id));
    assert_eq!(h.active_count(procedure.id).await, 1);

    let creator_inbox = h.unread(&creator).await;
    assert_eq!(creator_inbox.len(), 1);
    assert_eq!(creator_inbox[0].notification_type, NotificationType::ProcedureClaimed);
    let student_inbox = h.unread(&student_b).await;
    assert_eq!(student_inbox.len(), 1);
    assert_eq!(student_inbox[0].notification_type, NotificationType::ProcedureAssigned);
    assert!(student_inbox[0].body.contains("Exodoncia Simple"));

    let session = h
        .engine
        .record_session(&student_b, assignment.id, session_on(3, SessionStatus::Completed))
        .await
        .unwrap();
    assert_eq!(session.session_number, 1);
    let reloaded = h.engine.assignment(&student_b, assignment.id).await.unwrap();
    assert_eq!(reloaded.sessions_completed, 1);

    let completed = h
        .engine
        .complete_assignment(&student_b, assignment.id, Some("Sin complicaciones".to_string()))
        .await
        .unwrap();
    assert_eq!(completed.status, AssignmentStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.final_notes.as_deref(), Some("Sin complicaciones"));

    let detail = h.engine.procedure_detail(&creator, procedure.id).await.unwrap();
    assert_eq!(detail.procedure.status, ProcedureStatus::Completed);
    assert!(detail.active_assignment.is_none());

    let late = h.engine.assign_procedure(&student_c, procedure.id, None).await;
    assert_matches!(late, Err(WorkflowError::InvalidState(_)));

    // Completion does not notify anyone
    assert_eq!(h.unread(&creator).await.len(), 1);

    let actions: Vec<AuditAction> = h
        .engine
        .procedure_audit_trail(&creator, procedure.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Created,
            AuditAction::Assigned,
            AuditAction::SessionRecorded,
            AuditAction::Completed
        ]
    );
}

#[tokio::test]
async fn test_patient_no_show_abandon_and_reassign() {
    let h = Harness::new();
    let creator = staff();
    let student_b = student();
    let student_d = student();

    let procedure = h.available_procedure(&creator).await;
    let first = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();

    let abandoned = h
        .engine
        .abandon_assignment(&student_b, first.id, Some("paciente no asistió".to_string()))
        .await
        .unwrap();
    assert_eq!(abandoned.status, AssignmentStatus::Abandoned);
    assert_eq!(abandoned.abandon_reason.as_deref(), Some("paciente no asistió"));
    assert!(abandoned.abandoned_at.is_some());

    let detail = h.engine.procedure_detail(&creator, procedure.id).await.unwrap();
    assert_eq!(detail.procedure.status, ProcedureStatus::Available);
    assert!(detail.active_assignment.is_none());

    let released = h
        .unread(&creator)
        .await
        .into_iter()
        .filter(|n| n.notification_type == NotificationType::ProcedureReleased)
        .count();
    assert_eq!(released, 1);

    let second = h.engine.assign_procedure(&student_d, procedure.id, None).await.unwrap();
    assert_eq!(second.student_id, student_d.user_id);

    let history = h.engine.procedure_detail(&creator, procedure.id).await.unwrap().assignments;
    assert_eq!(history.len(), 2);
    assert_eq!(h.active_count(procedure.id).await, 1);
}

#[tokio::test]
async fn test_abandon_requires_a_reason() {
    let h = Harness::new();
    let procedure = h.available_procedure(&staff()).await;
    let student_b = student();
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();

    for reason in [None, Some("   ".to_string())] {
        let result = h.engine.abandon_assignment(&student_b, assignment.id, reason).await;
        assert_matches!(result, Err(WorkflowError::Validation(_)));
    }

    let reloaded = h.engine.assignment(&student_b, assignment.id).await.unwrap();
    assert_eq!(reloaded.status, AssignmentStatus::Active);
}

#[tokio::test]
async fn test_completed_assignment_is_terminal() {
    let h = Harness::new();
    let creator = staff();
    let student_b = student();
    let procedure = h.available_procedure(&creator).await;
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();
    h.engine.complete_assignment(&student_b, assignment.id, None).await.unwrap();

    assert_matches!(
        h.engine.complete_assignment(&student_b, assignment.id, None).await,
        Err(WorkflowError::InvalidState(_))
    );
    assert_matches!(
        h.engine
            .abandon_assignment(&student_b, assignment.id, Some("cambio de plan".to_string()))
            .await,
        Err(WorkflowError::InvalidState(_))
    );
    assert_matches!(
        h.engine.assign_procedure(&student_b, procedure.id, None).await,
        Err(WorkflowError::InvalidState(_))
    );
    assert_matches!(
        h.engine
            .record_session(&student_b, assignment.id, session_on(4, SessionStatus::Scheduled))
            .await,
        Err(WorkflowError::InvalidState(_))
    );
}

// ==============================================================================
// EXCLUSIVITY
// ==============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let h = Harness::new();
    let procedure = h.available_procedure(&staff()).await;

    let claims = (0..16).map(|_| {
        let engine = h.engine.clone();
        let procedure_id = procedure.id;
        tokio::spawn(async move { engine.assign_procedure(&student(), procedure_id, None).await })
    });
    let results: Vec<_> = futures::future::join_all(claims)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(result, Err(WorkflowError::AlreadyAssigned(id)) if *id == procedure.id);
    }

    assert_eq!(h.active_count(procedure.id).await, 1);
    let detail = h.engine.procedure_detail(&staff(), procedure.id).await.unwrap();
    assert_eq!(detail.procedure.status, ProcedureStatus::InProgress);
}

#[tokio::test]
async fn test_claim_on_in_progress_procedure_is_already_assigned() {
    let h = Harness::new();
    let procedure = h.available_procedure(&staff()).await;
    h.engine.assign_procedure(&student(), procedure.id, None).await.unwrap();

    let result = h.engine.assign_procedure(&student(), procedure.id, None).await;
    assert_matches!(result, Err(WorkflowError::AlreadyAssigned(_)));
}

/// Serves the procedure as it was before any claim and hides its
/// assignments, so every check before commit passes.
struct StaleReadStore {
    inner: Arc<MemoryWorkflowStore>,
    snapshot: PatientProcedure,
}

#[async_trait]
impl ProcedureStore for StaleReadStore {
    async fn get_procedure(&self, id: ProcedureId) -> Result<Option<PatientProcedure>, StoreError> {
        if id == self.snapshot.id {
            return Ok(Some(self.snapshot.clone()));
        }
        self.inner.get_procedure(id).await
    }

    async fn list_procedures(&self, query: &ProcedureQuery) -> Result<Vec<PatientProcedure>, StoreError> {
        self.inner.list_procedures(query).await
    }
}

#[async_trait]
impl AssignmentStore for StaleReadStore {
    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        self.inner.get_assignment(id).await
    }

    async fn assignments_for_procedure(&self, _procedure_id: ProcedureId) -> Result<Vec<Assignment>, StoreError> {
        Ok(Vec::new())
    }

    async fn assignments_for_student(
        &self,
        student_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError> {
        self.inner.assignments_for_student(student_id, status).await
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<TreatmentSession>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn sessions_for_assignment(&self, assignment_id: AssignmentId) -> Result<Vec<TreatmentSession>, StoreError> {
        self.inner.sessions_for_assignment(assignment_id).await
    }
}

#[async_trait]
impl WorkflowStore for StaleReadStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        self.inner.commit(unit).await
    }

    async fn audit_trail(&self, entity: AuditEntity) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.audit_trail(entity).await
    }
}

#[tokio::test]
async fn test_claim_lost_at_commit_is_already_assigned() {
    let h = Harness::new();
    let procedure = h.available_procedure(&staff()).await;
    let winner = student();
    h.engine.assign_procedure(&winner, procedure.id, None).await.unwrap();

    let stale_engine = WorkflowEngine::new(
        Arc::new(StaleReadStore { inner: h.store.clone(), snapshot: procedure.clone() }),
        Arc::new(TransactionalAuditLog::new()),
        h.inbox.clone(),
        h.catalog.clone(),
        WorkflowSettings::default(),
    );

    let result = stale_engine.assign_procedure(&student(), procedure.id, None).await;
    assert_matches!(result, Err(WorkflowError::AlreadyAssigned(id)) if id == procedure.id);

    assert_eq!(h.active_count(procedure.id).await, 1);
    let active = h.store.active_assignment(procedure.id).await.unwrap().unwrap();
    assert_eq!(active.student_id, winner.user_id);
    let stored = h.store.get_procedure(procedure.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProcedureStatus::InProgress);
}

#[tokio::test]
async fn test_assigning_for_someone_else_requires_supervisor() {
    let h = Harness::new();
    let procedure = h.available_procedure(&staff()).await;
    let target = student();

    let result = h
        .engine
        .assign_procedure(&student(), procedure.id, Some(target.user_id))
        .await;
    assert_matches!(result, Err(WorkflowError::Forbidden(_)));

    let assignment = h
        .engine
        .assign_procedure(&professor(), procedure.id, Some(target.user_id))
        .await
        .unwrap();
    assert_eq!(assignment.student_id, target.user_id);
}

// ==============================================================================
// SESSIONS
// ==============================================================================

async fn completed_count(h: &Harness, assignment_id: AssignmentId) -> usize {
    h.store
        .sessions_for_assignment(assignment_id)
        .await
        .unwrap()
        .iter()
        .filter(|s| s.status == SessionStatus::Completed)
        .count()
}

async fn assert_counter(
    h: &Harness,
    actor: &ActorContext,
    assignment_id: AssignmentId,
    expected: i32,
) {
    let assignment = h.engine.assignment(actor, assignment_id).await.unwrap();
    assert_eq!(assignment.sessions_completed, expected);
    assert_eq!(completed_count(h, assignment_id).await as i32, expected);
}

#[tokio::test]
async fn test_session_counter_tracks_every_mutation() {
    let h = Harness::new();
    let student_b = student();
    let procedure = h.available_procedure(&staff()).await;
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();

    let first = h
        .engine
        .record_session(&student_b, assignment.id, session_on(1, SessionStatus::Scheduled))
        .await
        .unwrap();
    let second = h
        .engine
        .record_session(&student_b, assignment.id, session_on(2, SessionStatus::Completed))
        .await
        .unwrap();
    let third = h
        .engine
        .record_session(&student_b, assignment.id, session_on(3, SessionStatus::Completed))
        .await
        .unwrap();
    assert_eq!((first.session_number, second.session_number, third.session_number), (1, 2, 3));

    assert_counter(&h, &student_b, assignment.id, 2).await;

    let update = |status| UpdateSessionRequest { status: Some(status), ..Default::default() };

    h.engine.update_session(&student_b, first.id, update(SessionStatus::Completed)).await.unwrap();
    assert_counter(&h, &student_b, assignment.id, 3).await;

    h.engine.update_session(&student_b, second.id, update(SessionStatus::Cancelled)).await.unwrap();
    assert_counter(&h, &student_b, assignment.id, 2).await;

    // Notes-only edit leaves the counter alone
    let edited = h
        .engine
        .update_session(
            &student_b,
            third.id,
            UpdateSessionRequest { notes: Some("Control post-operatorio".to_string()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(edited.status, SessionStatus::Completed);
    assert_counter(&h, &student_b, assignment.id, 2).await;

    h.engine.delete_session(&student_b, third.id).await.unwrap();
    assert_counter(&h, &student_b, assignment.id, 1).await;

    h.engine.delete_session(&student_b, second.id).await.unwrap();
    assert_counter(&h, &student_b, assignment.id, 1).await;

    let next = h
        .engine
        .record_session(&student_b, assignment.id, session_on(5, SessionStatus::Scheduled))
        .await
        .unwrap();
    assert_eq!(next.session_number, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_session_completions_are_all_counted() {
    let h = Harness::new();
    let student_b = student();
    let procedure = h.available_procedure(&staff()).await;
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();

    let mut sessions = Vec::new();
    for day in 1..=6 {
        sessions.push(
            h.engine
                .record_session(&student_b, assignment.id, session_on(day, SessionStatus::Scheduled))
                .await
                .unwrap(),
        );
    }

    let completions = sessions.iter().map(|session| {
        let engine = h.engine.clone();
        let session_id = session.id;
        tokio::spawn(async move {
            let request = UpdateSessionRequest { status: Some(SessionStatus::Completed), ..Default::default() };
            engine.update_session(&student_b, session_id, request).await
        })
    });
    for joined in futures::future::join_all(completions).await {
        joined.unwrap().unwrap();
    }

    let reloaded = h.engine.assignment(&student_b, assignment.id).await.unwrap();
    assert_eq!(reloaded.sessions_completed, 6);
    assert_eq!(completed_count(&h, assignment.id).await, 6);
}

#[tokio::test]
async fn test_stale_session_update_does_not_double_count() {
    let h = Harness::new();
    let student_b = student();
    let procedure = h.available_procedure(&staff()).await;
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();
    let session = h
        .engine
        .record_session(&student_b, assignment.id, session_on(1, SessionStatus::Scheduled))
        .await
        .unwrap();

    // A writer that read the session as scheduled after it was completed
    let mut unit = UnitOfWork::new();
    unit.push(Mutation::UpdateSession {
        session_id: session.id,
        expected_status: SessionStatus::Scheduled,
        changes: SessionChanges { status: Some(SessionStatus::Completed), ..Default::default() },
        at: chrono::Utc::now(),
    })
    .push(Mutation::AdjustCompletedSessions { assignment_id: assignment.id, delta: 1 });

    let request = UpdateSessionRequest { status: Some(SessionStatus::Completed), ..Default::default() };
    h.engine.update_session(&student_b, session.id, request).await.unwrap();

    assert_matches!(h.store.commit(unit).await, Err(StoreError::Conflict(_)));
    let reloaded = h.engine.assignment(&student_b, assignment.id).await.unwrap();
    assert_eq!(reloaded.sessions_completed, 1);
}

#[tokio::test]
async fn test_session_operations_check_assignment() {
    let h = Harness::new();
    let student_b = student();
    let procedure = h.available_procedure(&staff()).await;
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();

    let unknown = h
        .engine
        .record_session(&student_b, AssignmentId::new(), session_on(1, SessionStatus::Scheduled))
        .await;
    assert_matches!(unknown, Err(WorkflowError::NotFound(_)));

    let stranger = h
        .engine
        .record_session(&student(), assignment.id, session_on(1, SessionStatus::Scheduled))
        .await;
    assert_matches!(stranger, Err(WorkflowError::Forbidden(_)));

    let supervised = h
        .engine
        .record_session(&professor(), assignment.id, session_on(1, SessionStatus::Completed))
        .await
        .unwrap();
    assert_eq!(supervised.session_number, 1);
}

// ==============================================================================
// CANCELLATION & EDITS
// ==============================================================================

#[tokio::test]
async fn test_cancel_is_creator_only_in_every_status() {
    let h = Harness::new();
    let creator = staff();
    let outsider = staff();
    let student_b = student();

    let available = h.available_procedure(&creator).await;
    let in_progress = h.available_procedure(&creator).await;
    let completed = h.available_procedure(&creator).await;
    h.engine.assign_procedure(&student_b, in_progress.id, None).await.unwrap();
    let done = h.engine.assign_procedure(&student_b, completed.id, None).await.unwrap();
    h.engine.complete_assignment(&student_b, done.id, None).await.unwrap();

    for procedure in [&available, &in_progress, &completed] {
        let result = h.engine.cancel_procedure(&outsider, procedure.id).await;
        assert_matches!(result, Err(WorkflowError::Forbidden(_)));
    }
    assert_matches!(
        h.engine.cancel_procedure(&creator, completed.id).await,
        Err(WorkflowError::InvalidState(_))
    );
}

#[tokio::test]
async fn test_cancel_force_abandons_active_claim() {
    let h = Harness::new();
    let creator = staff();
    let student_b = student();
    let procedure = h.available_procedure(&creator).await;
    let assignment = h.engine.assign_procedure(&student_b, procedure.id, None).await.unwrap();

    let cancelled = h.engine.cancel_procedure(&creator, procedure.id).await.unwrap();
    assert_eq!(cancelled.status, ProcedureStatus::Cancelled);

    let closed = h.engine.assignment(&creator, assignment.id).await.unwrap();
    assert_eq!(closed.status, AssignmentStatus::Abandoned);
    assert_eq!(closed.abandon_reason.as_deref(), Some("procedure cancelled"));
    assert_eq!(h.active_count(procedure.id).await, 0);

    let notified = h
        .unread(&student_b)
        .await
        .iter()
        .any(|n| n.notification_type == NotificationType::ProcedureCancelled);
    assert!(notified);

    assert_matches!(
        h.engine.cancel_procedure(&creator, procedure.id).await,
        Err(WorkflowError::InvalidState(_))
    );
    assert_matches!(
        h.engine.assign_procedure(&student(), procedure.id, None).await,
        Err(WorkflowError::InvalidState(_))
    );
}

#[tokio::test]
async fn test_update_procedure_rules() {
    let h = Harness::new();
    let creator = staff();
    let procedure = h.available_procedure(&creator).await;

    let updated = h
        .engine
        .update_procedure(
            &creator,
            procedure.id,
            UpdateProcedureRequest {
                priority: Some(Priority::High),
                tooth_location: Some(ToothLocation::tooth(46).with_surface("od")),
                status: Some(ProcedureStatus::Contraindicated),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.priority, Priority::High);
    assert_eq!(updated.status, ProcedureStatus::Contraindicated);
    assert_eq!(updated.tooth_location, Some(ToothLocation::tooth(46).with_surface("OD")));

    let trail = h.engine.procedure_audit_trail(&creator, procedure.id).await.unwrap();
    let update = trail.iter().find(|e| e.action == AuditAction::Updated).unwrap();
    assert_eq!(update.metadata["old"]["priority"], "medium");
    assert_eq!(update.metadata["new"]["priority"], "high");

    let outsider = h
        .engine
        .update_procedure(&staff(), procedure.id, UpdateProcedureRequest { notes: Some("x".into()), ..Default::default() })
        .await;
    assert_matches!(outsider, Err(WorkflowError::Forbidden(_)));

    let bad_status = h
        .engine
        .update_procedure(
            &creator,
            procedure.id,
            UpdateProcedureRequest { status: Some(ProcedureStatus::InProgress), ..Default::default() },
        )
        .await;
    assert_matches!(bad_status, Err(WorkflowError::Validation(_)));

    let cleaning = h
        .engine
        .create_procedure(
            &creator,
            CreateProcedureRequest {
                patient_id: Uuid::new_v4(),
                treatment_id: Some(h.treatment("PROFILAXIS").id),
                tooth_location: Some(ToothLocation::tooth(11)),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .procedure;
    let empty_location = h
        .engine
        .update_procedure(
            &creator,
            cleaning.id,
            UpdateProcedureRequest { tooth_location: Some(ToothLocation::default()), ..Default::default() },
        )
        .await;
    assert_matches!(empty_location, Err(WorkflowError::Validation(_)));
    let unchanged = h.store.get_procedure(cleaning.id).await.unwrap().unwrap();
    assert_eq!(unchanged.tooth_location, Some(ToothLocation::tooth(11)));

    let claimed = h.available_procedure(&creator).await;
    h.engine.assign_procedure(&student(), claimed.id, None).await.unwrap();
    let locked = h
        .engine
        .update_procedure(&creator, claimed.id, UpdateProcedureRequest { priority: Some(Priority::Low), ..Default::default() })
        .await;
    assert_matches!(locked, Err(WorkflowError::InvalidState(_)));
}

// ==============================================================================
// CREATION
// ==============================================================================

#[tokio::test]
async fn test_auto_assign_claims_for_creator() {
    let h = Harness::new();
    let creator = student();
    let request = CreateProcedureRequest { auto_assign: Some(true), ..h.extraction_request() };

    let created = h.engine.create_procedure(&creator, request).await.unwrap();
    assert_eq!(created.procedure.status, ProcedureStatus::InProgress);
    let assignment = created.assignment.unwrap();
    assert_eq!(assignment.student_id, creator.user_id);
    assert_eq!(h.active_count(created.procedure.id).await, 1);

    let inbox = h.unread(&creator).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].notification_type, NotificationType::ProcedureAssigned);

    let created_entries: Vec<AuditEntity> = h
        .engine
        .procedure_audit_trail(&creator, created.procedure.id)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.action == AuditAction::Created)
        .map(|e| e.entity)
        .collect();
    assert_eq!(created_entries.len(), 2);
    assert!(created_entries.contains(&AuditEntity::PatientProcedure(created.procedure.id)));
    assert!(created_entries.contains(&AuditEntity::Assignment(assignment.id)));
}

#[tokio::test]
async fn test_initial_status_rules() {
    let h = Harness::new();
    let creator = staff();

    let contraindicated = h
        .engine
        .create_procedure(
            &creator,
            CreateProcedureRequest {
                initial_status: Some(ProcedureStatus::Contraindicated),
                ..h.extraction_request()
            },
        )
        .await
        .unwrap();
    assert_eq!(contraindicated.procedure.status, ProcedureStatus::Contraindicated);
    assert_matches!(
        h.engine.assign_procedure(&student(), contraindicated.procedure.id, None).await,
        Err(WorkflowError::InvalidState(_))
    );

    for request in [
        CreateProcedureRequest { initial_status: Some(ProcedureStatus::Completed), ..h.extraction_request() },
        CreateProcedureRequest {
            initial_status: Some(ProcedureStatus::Absent),
            auto_assign: Some(true),
            ..h.extraction_request()
        },
    ] {
        let result = h.engine.create_procedure(&creator, request).await;
        assert_matches!(result, Err(WorkflowError::Validation(_)));
    }
    assert!(h.engine.list_procedures(&creator, &ProcedureQuery::default()).await.unwrap().len() == 1);
}

#[tokio::test]
async fn test_absent_tooth_resolves_fallback_treatment() {
    let h = Harness::new();
    let creator = staff();
    let fallback = h.treatment("DIENTE_AUSENTE");

    let created = h
        .engine
        .create_procedure(
            &creator,
            CreateProcedureRequest {
                patient_id: Uuid::new_v4(),
                initial_status: Some(ProcedureStatus::Absent),
                tooth_location: Some(ToothLocation::tooth(18)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(created.procedure.treatment_id, fallback.id);
    assert_eq!(created.procedure.status, ProcedureStatus::Absent);

    let missing = h
        .engine
        .create_procedure(&creator, CreateProcedureRequest { patient_id: Uuid::new_v4(), ..Default::default() })
        .await;
    assert_matches!(missing, Err(WorkflowError::Validation(_)));
}

#[tokio::test]
async fn test_tooth_location_validation() {
    let h = Harness::new();
    let creator = staff();

    let no_tooth = CreateProcedureRequest { tooth_location: None, ..h.extraction_request() };
    let bad_code = CreateProcedureRequest { tooth_location: Some(ToothLocation::tooth(19)), ..h.extraction_request() };
    let bad_surface = CreateProcedureRequest {
        tooth_location: Some(ToothLocation::tooth(36).with_surface("MOX")),
        ..h.extraction_request()
    };
    for request in [no_tooth, bad_code, bad_surface] {
        assert_matches!(
            h.engine.create_procedure(&creator, request).await,
            Err(WorkflowError::Validation(_))
        );
    }

    // Cleanings are not tied to a tooth
    let cleaning = CreateProcedureRequest {
        patient_id: Uuid::new_v4(),
        treatment_id: Some(h.treatment("PROFILAXIS").id),
        ..Default::default()
    };
    let created = h.engine.create_procedure(&creator, cleaning).await.unwrap();
    assert!(created.procedure.tooth_location.is_none());

    let primary = CreateProcedureRequest {
        tooth_location: Some(ToothLocation::tooth(75).with_surface("mod")),
        ..h.extraction_request()
    };
    let created = h.engine.create_procedure(&creator, primary).await.unwrap();
    assert_eq!(created.procedure.tooth_location.unwrap().surface.as_deref(), Some("MOD"));
}

// ==============================================================================
// SIDE EFFECTS
// ==============================================================================

#[tokio::test]
async fn test_audit_failure_aborts_without_state_change() {
    let h = Harness::new();
    let creator = staff();
    let procedure = h.available_procedure(&creator).await;
    let unaudited = h.engine_with(Arc::new(RejectingAuditLog), h.inbox.clone());

    let result = unaudited.assign_procedure(&student(), procedure.id, None).await;
    assert_matches!(result, Err(WorkflowError::Audit(_)));

    let detail = h.engine.procedure_detail(&creator, procedure.id).await.unwrap();
    assert_eq!(detail.procedure.status, ProcedureStatus::Available);
    assert!(detail.assignments.is_empty());

    let created = unaudited.create_procedure(&creator, h.extraction_request()).await;
    assert_matches!(created, Err(WorkflowError::Audit(_)));
    let all = h.engine.list_procedures(&creator, &ProcedureQuery::default()).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_transition() {
    let h = Harness::new();
    let creator = staff();
    let procedure = h.available_procedure(&creator).await;
    let offline = h.engine_with(Arc::new(TransactionalAuditLog::new()), Arc::new(UnavailableInbox));

    let student_b = student();
    let assignment = offline.assign_procedure(&student_b, procedure.id, None).await.unwrap();
    assert_eq!(assignment.status, AssignmentStatus::Active);

    offline
        .abandon_assignment(&student_b, assignment.id, Some("paciente no asistió".to_string()))
        .await
        .unwrap();
    let detail = h.engine.procedure_detail(&creator, procedure.id).await.unwrap();
    assert_eq!(detail.procedure.status, ProcedureStatus::Available);
}

// ==============================================================================
// READS
// ==============================================================================

#[tokio::test]
async fn test_listing_and_student_views() {
    let h = Harness::new();
    let creator = staff();
    let student_b = student();

    let low = h
        .engine
        .create_procedure(&creator, CreateProcedureRequest { priority: Some(Priority::Low), ..h.extraction_request() })
        .await
        .unwrap()
        .procedure;
    let high = h
        .engine
        .create_procedure(&creator, CreateProcedureRequest { priority: Some(Priority::High), ..h.extraction_request() })
        .await
        .unwrap()
        .procedure;
    h.engine.assign_procedure(&student_b, low.id, None).await.unwrap();

    let urgent = h
        .engine
        .list_procedures(&creator, &ProcedureQuery { min_priority: Some(Priority::Medium), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(urgent.iter().map(|p| p.id).collect::<Vec<_>>(), vec![high.id]);

    let available = h
        .engine
        .list_procedures(&creator, &ProcedureQuery { status: Some(ProcedureStatus::Available), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(available.len(), 1);

    let newest_first = h.engine.list_procedures(&creator, &ProcedureQuery::default()).await.unwrap();
    assert_eq!(newest_first[0].id, high.id);

    let own = h.engine.student_assignments(&student_b, student_b.user_id, None).await.unwrap();
    assert_eq!(own.len(), 1);
    let supervised = h
        .engine
        .student_assignments(&professor(), student_b.user_id, Some(AssignmentStatus::Active))
        .await
        .unwrap();
    assert_eq!(supervised.len(), 1);
    assert_matches!(
        h.engine.student_assignments(&student(), student_b.user_id, None).await,
        Err(WorkflowError::Forbidden(_))
    );
}
