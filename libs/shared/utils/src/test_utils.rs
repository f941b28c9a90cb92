use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};
use shared_models::auth::{ActorContext, Role, User};

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    /// Points the Supabase backend at a mock server.
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        let mut config = AppConfig::for_local(&self.jwt_secret);
        config.supabase_url = self.supabase_url.clone();
        config.supabase_anon_key = self.supabase_anon_key.clone();
        config
    }

    pub fn to_supabase_config(&self) -> AppConfig {
        let mut config = self.to_app_config();
        config.storage_backend = StorageBackend::Supabase;
        config.supabase_service_role_key = Some("test-service-role-key".to_string());
        config
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "student".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn student(email: &str) -> Self {
        Self::new(email, "student")
    }

    pub fn professor(email: &str) -> Self {
        Self::new(email, "professor")
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).expect("test user ids are generated UUIDs")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn to_actor(&self) -> ActorContext {
        ActorContext::new(self.uuid(), Role::from_claim(Some(&self.role)))
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        // Supabase puts the clinical role in app_metadata
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }

    pub fn bearer(user: &TestUser) -> String {
        format!("Bearer {}", Self::create_test_token(user, TEST_JWT_SECRET, None))
    }
}

/// Row shapes as PostgREST returns them for the clinic tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn procedure_row(procedure_id: Uuid, created_by: Uuid, status: &str) -> serde_json::Value {
        json!({
            "id": procedure_id,
            "patient_id": Uuid::new_v4(),
            "treatment_id": Uuid::new_v4(),
            "treatment_subclass_id": null,
            "treatment_option_id": null,
            "chair_id": null,
            "tooth_location": { "fdi_code": 36, "surface": "MO" },
            "status": status,
            "priority": "medium",
            "estimated_price": 45.0,
            "notes": null,
            "created_by": created_by,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn assignment_row(assignment_id: Uuid, procedure_id: Uuid, student_id: Uuid, status: &str) -> serde_json::Value {
        json!({
            "id": assignment_id,
            "procedure_id": procedure_id,
            "student_id": student_id,
            "status": status,
            "started_at": "2026-01-02T09:00:00Z",
            "completed_at": null,
            "abandoned_at": null,
            "sessions_completed": 0,
            "abandon_reason": null,
            "final_notes": null
        })
    }

    pub fn session_row(session_id: Uuid, assignment_id: Uuid, number: i32, status: &str) -> serde_json::Value {
        json!({
            "id": session_id,
            "assignment_id": assignment_id,
            "session_number": number,
            "session_date": "2026-01-03",
            "status": status,
            "notes": null,
            "created_by": Uuid::new_v4(),
            "created_at": "2026-01-03T10:00:00Z",
            "updated_at": "2026-01-03T10:00:00Z"
        })
    }

    pub fn notification_row(notification_id: Uuid, user_id: Uuid, read_at: Option<&str>) -> serde_json::Value {
        json!({
            "id": notification_id,
            "user_id": user_id,
            "notification_type": "procedure_assigned",
            "title": "Procedure assigned",
            "body": "You claimed a procedure",
            "data": {},
            "priority": "normal",
            "read_at": read_at,
            "created_at": "2026-01-02T09:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
