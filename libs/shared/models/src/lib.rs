pub mod auth;
pub mod error;
pub mod ids;

pub use auth::{ActorContext, Role, User};
pub use error::AppError;
pub use ids::{AssignmentId, NotificationId, ProcedureId, SessionId};
