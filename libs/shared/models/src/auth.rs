use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Professor,
    Staff,
    Student,
}

impl Role {
    /// Unknown or missing roles are treated as the least privileged one.
    pub fn from_claim(role: Option<&str>) -> Self {
        match role.map(|r| r.trim().to_ascii_lowercase()) {
            Some(r) if r == "admin" => Role::Admin,
            Some(r) if r == "professor" || r == "profesor" => Role::Professor,
            Some(r) if r == "staff" => Role::Staff,
            _ => Role::Student,
        }
    }

    /// Supervising roles may act on other users' assignments.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, Role::Admin | Role::Professor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Professor => write!(f, "professor"),
            Role::Staff => write!(f, "staff"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// The acting user threaded explicitly into every workflow call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl ActorContext {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn from_user(user: &User) -> Result<Self, AppError> {
        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::Auth("Authenticated user id is not a valid UUID".to_string()))?;

        Ok(Self {
            user_id,
            role: Role::from_claim(user.role.as_deref()),
        })
    }

    pub fn is_supervisor(&self) -> bool {
        self.role.is_supervisor()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}
