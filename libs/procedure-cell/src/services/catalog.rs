// libs/procedure-cell/src/services/catalog.rs
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::Treatment;
use crate::store::StoreError;

/// Read-only treatment reference data.
#[async_trait]
pub trait TreatmentCatalog: Send + Sync {
    async fn get_treatment(&self, id: Uuid) -> Result<Option<Treatment>, StoreError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Treatment>, StoreError>;
}

// ==============================================================================
// STATIC CATALOG
// ==============================================================================

pub struct StaticTreatmentCatalog {
    treatments: Vec<Treatment>,
}

impl StaticTreatmentCatalog {
    pub fn new(treatments: Vec<Treatment>) -> Self {
        Self { treatments }
    }

    /// Seeded with the clinic's common treatments plus the absent-tooth
    /// fallback under `absent_tooth_code`.
    pub fn with_defaults(absent_tooth_code: &str) -> Self {
        let seed = |code: &str, name: &str, requires_tooth: bool, sessions: i32, price: f64| Treatment {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            chair_id: None,
            requires_tooth,
            estimated_sessions: sessions,
            base_price: price,
        };

        Self::new(vec![
            seed(absent_tooth_code, "Diente ausente", false, 0, 0.0),
            seed("EXO-SIMPLE", "Exodoncia Simple", true, 1, 40.0),
            seed("OBT-RESINA", "Obturación con Resina", true, 1, 35.0),
            seed("ENDO-UNI", "Endodoncia Unirradicular", true, 2, 120.0),
            seed("CORONA-MP", "Corona Metal Porcelana", true, 3, 250.0),
            seed("PROFILAXIS", "Profilaxis", false, 1, 20.0),
        ])
    }

    pub fn treatments(&self) -> &[Treatment] {
        &self.treatments
    }
}

#[async_trait]
impl TreatmentCatalog for StaticTreatmentCatalog {
    async fn get_treatment(&self, id: Uuid) -> Result<Option<Treatment>, StoreError> {
        Ok(self.treatments.iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Treatment>, StoreError> {
        Ok(self.treatments.iter().find(|t| t.code.eq_ignore_ascii_case(code)).cloned())
    }
}

// ==============================================================================
// SUPABASE CATALOG
// ==============================================================================

/// Reads the `treatments` table.
pub struct SupabaseTreatmentCatalog {
    supabase: SupabaseClient,
    server_token: String,
}

impl SupabaseTreatmentCatalog {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            server_token: config.server_token().to_string(),
        }
    }

    async fn fetch_one(&self, filter: &str) -> Result<Option<Treatment>, StoreError> {
        let path = format!("/rest/v1/treatments?{}&limit=1", filter);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.server_token), None)
            .await
            .map_err(|e| {
                error!("Failed to load treatment: {}", e);
                StoreError::Database(format!("Failed to load treatment: {}", e))
            })?;

        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| StoreError::Database(format!("Failed to parse treatment: {}", e)))
            })
            .transpose()
    }
}

#[async_trait]
impl TreatmentCatalog for SupabaseTreatmentCatalog {
    async fn get_treatment(&self, id: Uuid) -> Result<Option<Treatment>, StoreError> {
        self.fetch_one(&format!("id=eq.{}", id)).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Treatment>, StoreError> {
        self.fetch_one(&format!("code=eq.{}", code)).await
    }
}
