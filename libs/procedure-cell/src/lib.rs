pub mod models;
pub mod error;
pub mod store;
pub mod services;
pub mod handlers;
pub mod router;

pub use models::*;
pub use error::WorkflowError;
pub use store::{
    AssignmentStore, CommitReceipt, MemoryWorkflowStore, Mutation, NewSession, ProcedureChanges,
    ProcedureStore, SessionChanges, StoreError, SupabaseWorkflowStore, UnitOfWork, WorkflowStore,
};
pub use services::catalog::{StaticTreatmentCatalog, SupabaseTreatmentCatalog, TreatmentCatalog};
pub use services::workflow::{WorkflowEngine, WorkflowSettings};
pub use router::procedure_routes;
