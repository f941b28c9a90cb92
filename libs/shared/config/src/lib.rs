use std::env;
use tracing::warn;

pub const DEFAULT_ABSENT_TOOTH_TREATMENT_CODE: &str = "DIENTE_AUSENTE";
pub const DEFAULT_API_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Some(StorageBackend::Memory),
            "supabase" => Some(StorageBackend::Supabase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: Option<String>,
    pub storage_backend: StorageBackend,
    pub absent_tooth_treatment_code: String,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            storage_backend: match env::var("STORAGE_BACKEND") {
                Ok(value) => StorageBackend::parse(&value).unwrap_or_else(|| {
                    warn!("Unknown STORAGE_BACKEND '{}', using in-memory storage", value);
                    StorageBackend::Memory
                }),
                Err(_) => StorageBackend::Memory,
            },
            absent_tooth_treatment_code: env::var("ABSENT_TOOTH_TREATMENT_CODE")
                .unwrap_or_else(|_| DEFAULT_ABSENT_TOOTH_TREATMENT_CODE.to_string()),
            api_port: env::var("API_PORT")
                .ok()
                .and_then(|port| {
                    port.parse().map_err(|_| warn!("API_PORT '{}' is not a valid port", port)).ok()
                })
                .unwrap_or(DEFAULT_API_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// Configuration used by tests and local runs: in-memory storage, fixed secret.
    pub fn for_local(jwt_secret: &str) -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: jwt_secret.to_string(),
            supabase_service_role_key: None,
            storage_backend: StorageBackend::Memory,
            absent_tooth_treatment_code: DEFAULT_ABSENT_TOOTH_TREATMENT_CODE.to_string(),
            api_port: DEFAULT_API_PORT,
        }
    }

    pub fn is_configured(&self) -> bool {
        if self.supabase_jwt_secret.is_empty() {
            return false;
        }
        match self.storage_backend {
            StorageBackend::Memory => true,
            StorageBackend::Supabase => {
                !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        }
    }

    pub fn uses_supabase(&self) -> bool {
        self.storage_backend == StorageBackend::Supabase
    }

    /// Bearer token used for server-side writes. Falls back to the anon key.
    pub fn server_token(&self) -> &str {
        self.supabase_service_role_key
            .as_deref()
            .unwrap_or(&self.supabase_anon_key)
    }
}
