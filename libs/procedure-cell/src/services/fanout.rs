// libs/procedure-cell/src/services/fanout.rs
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use notification_cell::{NotificationDraft, NotificationPriority, NotificationStore, NotificationType};

use crate::models::{Assignment, PatientProcedure};

/// Post-commit notification dispatch. Failures are logged and dropped.
pub struct NotificationFanout {
    store: Arc<dyn NotificationStore>,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    pub async fn dispatch(&self, drafts: Vec<NotificationDraft>) {
        for draft in drafts {
            let user_id = draft.user_id;
            let notification_type = draft.notification_type;
            match self.store.enqueue(draft).await {
                Ok(notification) => {
                    debug!("Notification {} sent to user {}", notification.id, user_id);
                }
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        notification_type = ?notification_type,
                        "Failed to enqueue notification: {}", e
                    );
                }
            }
        }
    }
}

fn payload(procedure: &PatientProcedure, assignment: &Assignment) -> serde_json::Value {
    json!({
        "procedure_id": procedure.id,
        "assignment_id": assignment.id,
        "patient_id": procedure.patient_id,
        "treatment_id": procedure.treatment_id,
        "tooth_location": procedure.tooth_location,
    })
}

/// Tells the student a procedure is now theirs.
pub fn assigned_to_student(
    procedure: &PatientProcedure,
    assignment: &Assignment,
    treatment_name: &str,
) -> NotificationDraft {
    NotificationDraft::new(
        assignment.student_id,
        NotificationType::ProcedureAssigned,
        "Procedure assigned",
        format!("You have been assigned the procedure '{}'.", treatment_name),
    )
    .with_data(payload(procedure, assignment))
    .with_priority(NotificationPriority::High)
}

/// Tells the creator a student claimed their procedure.
pub fn claimed_for_creator(
    procedure: &PatientProcedure,
    assignment: &Assignment,
    treatment_name: &str,
) -> NotificationDraft {
    NotificationDraft::new(
        procedure.created_by,
        NotificationType::ProcedureClaimed,
        "Procedure claimed",
        format!("The procedure '{}' was claimed by a student.", treatment_name),
    )
    .with_data(json!({
        "procedure_id": procedure.id,
        "assignment_id": assignment.id,
        "student_id": assignment.student_id,
    }))
}

/// Tells the creator an abandoned procedure is available again.
pub fn released_for_creator(
    procedure: &PatientProcedure,
    assignment: &Assignment,
    treatment_name: &str,
    reason: &str,
) -> NotificationDraft {
    NotificationDraft::new(
        procedure.created_by,
        NotificationType::ProcedureReleased,
        "Procedure available again",
        format!("The procedure '{}' was abandoned: {}", treatment_name, reason),
    )
    .with_data(json!({
        "procedure_id": procedure.id,
        "assignment_id": assignment.id,
        "student_id": assignment.student_id,
        "reason": reason,
    }))
}

/// Tells a student their claim ended because the procedure was cancelled.
pub fn cancelled_for_student(
    procedure: &PatientProcedure,
    assignment: &Assignment,
    treatment_name: &str,
) -> NotificationDraft {
    NotificationDraft::new(
        assignment.student_id,
        NotificationType::ProcedureCancelled,
        "Procedure cancelled",
        format!("The procedure '{}' assigned to you was cancelled.", treatment_name),
    )
    .with_data(payload(procedure, assignment))
    .with_priority(NotificationPriority::High)
}

/// Drafts for a successful claim: the student, plus the creator when it is
/// someone else.
pub fn claim_drafts(
    procedure: &PatientProcedure,
    assignment: &Assignment,
    treatment_name: &str,
) -> Vec<NotificationDraft> {
    let mut drafts = vec![assigned_to_student(procedure, assignment, treatment_name)];
    if procedure.created_by != assignment.student_id && procedure.created_by != Uuid::nil() {
        drafts.push(claimed_for_creator(procedure, assignment, treatment_name));
    }
    drafts
}
