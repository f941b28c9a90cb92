// =====================================================================================
// AUDIT LOG - APPEND-ONLY, PART OF THE WORKFLOW TRANSACTION
// =====================================================================================

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::ActorContext;

use crate::models::{AuditAction, AuditEntity, AuditEntry, AuditError};

/// Anything that can carry staged audit entries into a commit.
pub trait AuditSink {
    fn stage_audit(&mut self, entry: AuditEntry);
}

impl AuditSink for Vec<AuditEntry> {
    fn stage_audit(&mut self, entry: AuditEntry) {
        self.push(entry);
    }
}

/// Records one entry per transition.
///
/// Entries are staged into the same unit of work as the state change they
/// describe; if staging fails the transition must not be committed.
pub trait AuditLog: Send + Sync {
    fn append(
        &self,
        sink: &mut dyn AuditSink,
        actor: &ActorContext,
        action: AuditAction,
        entity: AuditEntity,
        metadata: Value,
    ) -> Result<AuditEntry, AuditError>;

    /// Called once the unit carrying `entries` has been committed.
    fn committed(&self, entries: &[AuditEntry]) {
        for entry in entries {
            info!(
                audit_id = %entry.id,
                actor_id = %entry.actor_id,
                actor_role = %entry.actor_role,
                entity = %entry.entity,
                "AUDIT: {}", entry.action
            );
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionalAuditLog;

impl TransactionalAuditLog {
    pub fn new() -> Self {
        Self
    }

    fn normalize_metadata(metadata: Value) -> Result<Value, AuditError> {
        match metadata {
            Value::Object(_) => Ok(metadata),
            Value::Null => Ok(Value::Object(Map::new())),
            Value::Array(_) => Err(AuditError::InvalidMetadata("array")),
            Value::String(_) => Err(AuditError::InvalidMetadata("string")),
            Value::Number(_) => Err(AuditError::InvalidMetadata("number")),
            Value::Bool(_) => Err(AuditError::InvalidMetadata("bool")),
        }
    }
}

impl AuditLog for TransactionalAuditLog {
    fn append(
        &self,
        sink: &mut dyn AuditSink,
        actor: &ActorContext,
        action: AuditAction,
        entity: AuditEntity,
        metadata: Value,
    ) -> Result<AuditEntry, AuditError> {
        if actor.user_id.is_nil() {
            return Err(AuditError::MissingActor);
        }

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id: actor.user_id,
            actor_role: actor.role,
            action,
            entity,
            metadata: Self::normalize_metadata(metadata)?,
            created_at: Utc::now(),
        };

        sink.stage_audit(entry.clone());
        Ok(entry)
    }
}
