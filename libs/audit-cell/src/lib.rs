pub mod models;
pub mod services;

pub use models::{AuditAction, AuditEntity, AuditEntry, AuditError};
pub use services::log::{AuditLog, AuditSink, TransactionalAuditLog};
