// libs/procedure-cell/src/store/supabase.rs
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use audit_cell::{AuditEntity, AuditEntry};
use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, SupabaseError};
use shared_models::ids::{AssignmentId, ProcedureId, SessionId};

use crate::models::{Assignment, AssignmentStatus, PatientProcedure, ProcedureQuery, TreatmentSession};
use crate::store::{
    AssignmentStore, CommitReceipt, ProcedureStore, StoreError, UnitOfWork, WorkflowStore,
};

const PROCEDURES_PATH: &str = "/rest/v1/patient_procedures";
const ASSIGNMENTS_PATH: &str = "/rest/v1/assignments";
const SESSIONS_PATH: &str = "/rest/v1/treatment_sessions";
const AUDIT_PATH: &str = "/rest/v1/audit_log";

/// Postgres function applying a whole unit of work in one transaction.
pub const APPLY_UNIT_RPC: &str = "apply_workflow_unit";

/// Workflow tables behind PostgREST. Reads are plain `GET`s; every write goes
/// through the `apply_workflow_unit` RPC.
pub struct SupabaseWorkflowStore {
    supabase: SupabaseClient,
    server_token: String,
}

impl SupabaseWorkflowStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            server_token: config.server_token().to_string(),
        }
    }

    fn store_error(context: &str, err: anyhow::Error) -> StoreError {
        match err.downcast_ref::<SupabaseError>() {
            Some(api) if api.is_conflict() => {
                debug!("{}: guard failed: {}", context, api.body);
                StoreError::Conflict(api.body.clone())
            }
            Some(api) if api.is_not_found() => StoreError::NotFound(format!("{}: {}", context, api.body)),
            _ => {
                error!("{}: {}", context, err);
                StoreError::Database(format!("{}: {}", context, err))
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str, context: &str) -> Result<Vec<T>, StoreError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(&self.server_token), None)
            .await
            .map_err(|e| Self::store_error(context, e))?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| StoreError::Database(format!("{}: unexpected row: {}", context, e)))
            })
            .collect()
    }

    async fn fetch_one<T: DeserializeOwned>(&self, path: &str, context: &str) -> Result<Option<T>, StoreError> {
        Ok(self.fetch(path, context).await?.into_iter().next())
    }

    fn procedure_list_path(query: &ProcedureQuery) -> String {
        let mut filters = Vec::new();
        if let Some(status) = query.status {
            filters.push(format!("status=eq.{}", status));
        }
        if let Some(created_by) = query.created_by {
            filters.push(format!("created_by=eq.{}", created_by));
        }
        if let Some(patient_id) = query.patient_id {
            filters.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(chair_id) = query.chair_id {
            filters.push(format!("chair_id=eq.{}", chair_id));
        }
        if let Some(min_priority) = query.min_priority {
            let allowed: Vec<&str> = min_priority.at_least().iter().map(|p| p.as_str()).collect();
            filters.push(format!("priority=in.({})", allowed.join(",")));
        }
        filters.push("order=created_at.desc".to_string());
        filters.push(format!("limit={}", query.effective_limit()));
        filters.push(format!("offset={}", query.effective_offset()));

        format!("{}?{}", PROCEDURES_PATH, filters.join("&"))
    }
}

#[async_trait]
impl ProcedureStore for SupabaseWorkflowStore {
    async fn get_procedure(&self, id: ProcedureId) -> Result<Option<PatientProcedure>, StoreError> {
        let path = format!("{}?id=eq.{}", PROCEDURES_PATH, id);
        self.fetch_one(&path, "Failed to load procedure").await
    }

    async fn list_procedures(&self, query: &ProcedureQuery) -> Result<Vec<PatientProcedure>, StoreError> {
        self.fetch(&Self::procedure_list_path(query), "Failed to list procedures").await
    }
}

#[async_trait]
impl AssignmentStore for SupabaseWorkflowStore {
    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        let path = format!("{}?id=eq.{}", ASSIGNMENTS_PATH, id);
        self.fetch_one(&path, "Failed to load assignment").await
    }

    async fn assignments_for_procedure(&self, procedure_id: ProcedureId) -> Result<Vec<Assignment>, StoreError> {
        let path = format!("{}?procedure_id=eq.{}&order=started_at.asc", ASSIGNMENTS_PATH, procedure_id);
        self.fetch(&path, "Failed to load procedure assignments").await
    }

    async fn active_assignment(&self, procedure_id: ProcedureId) -> Result<Option<Assignment>, StoreError> {
        let path = format!("{}?procedure_id=eq.{}&status=eq.active", ASSIGNMENTS_PATH, procedure_id);
        let active: Vec<Assignment> = self.fetch(&path, "Failed to load active assignment").await?;
        if active.len() > 1 {
            warn!("Procedure {} has {} active assignments", procedure_id, active.len());
        }
        Ok(active.into_iter().next())
    }

    async fn assignments_for_student(
        &self,
        student_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut path = format!("{}?student_id=eq.{}&order=started_at.desc", ASSIGNMENTS_PATH, student_id);
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        self.fetch(&path, "Failed to load student assignments").await
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<TreatmentSession>, StoreError> {
        let path = format!("{}?id=eq.{}", SESSIONS_PATH, id);
        self.fetch_one(&path, "Failed to load session").await
    }

    async fn sessions_for_assignment(&self, assignment_id: AssignmentId) -> Result<Vec<TreatmentSession>, StoreError> {
        let path = format!("{}?assignment_id=eq.{}&order=session_number.asc", SESSIONS_PATH, assignment_id);
        self.fetch(&path, "Failed to load sessions").await
    }
}

#[async_trait]
impl WorkflowStore for SupabaseWorkflowStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        debug!(
            "Committing unit with {} mutations and {} audit entries",
            unit.mutations.len(),
            unit.audit.len()
        );

        let payload = serde_json::to_value(&unit)
            .map_err(|e| StoreError::Database(format!("Failed to serialize unit of work: {}", e)))?;

        self.supabase
            .rpc(APPLY_UNIT_RPC, Some(&self.server_token), json!({ "unit": payload }))
            .await
            .map_err(|e| Self::store_error("Failed to commit unit of work", e))
    }

    async fn audit_trail(&self, entity: AuditEntity) -> Result<Vec<AuditEntry>, StoreError> {
        let path = format!(
            "{}?entity_type=eq.{}&entity_id=eq.{}&order=created_at.asc",
            AUDIT_PATH,
            entity.entity_type(),
            entity.entity_uuid()
        );
        self.fetch(&path, "Failed to load audit trail").await
    }
}
