// libs/procedure-cell/src/services/validation.rs
use std::sync::OnceLock;

use regex::Regex;

use crate::error::WorkflowError;
use crate::models::{ProcedureStatus, ToothLocation};

fn surface_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[MODVLPI]{1,5}$").expect("surface pattern is valid"))
}

/// Permanent (11-48) or primary (51-85) tooth in FDI notation.
pub fn is_valid_fdi_code(code: u8) -> bool {
    let quadrant = code / 10;
    let tooth = code % 10;
    match quadrant {
        1..=4 => (1..=8).contains(&tooth),
        5..=8 => (1..=5).contains(&tooth),
        _ => false,
    }
}

/// Normalizes a surface string to upper case; 1-5 distinct letters of `MODVLPI`.
pub fn normalize_surface(surface: &str) -> Result<String, WorkflowError> {
    let normalized = surface.trim().to_ascii_uppercase();
    if !surface_pattern().is_match(&normalized) {
        return Err(WorkflowError::Validation(format!(
            "Invalid tooth surface '{}': expected 1-5 of M, O, D, V, L, P, I",
            surface
        )));
    }

    let mut seen = Vec::with_capacity(normalized.len());
    for letter in normalized.chars() {
        if seen.contains(&letter) {
            return Err(WorkflowError::Validation(format!(
                "Invalid tooth surface '{}': '{}' repeated",
                surface, letter
            )));
        }
        seen.push(letter);
    }

    Ok(normalized)
}

/// Validates a tooth location. `None` when nothing meaningful was given.
pub fn validate_tooth_location(
    location: Option<&ToothLocation>,
    requires_tooth: bool,
) -> Result<Option<ToothLocation>, WorkflowError> {
    let location = location.filter(|l| !l.is_empty());

    let Some(location) = location else {
        if requires_tooth {
            return Err(WorkflowError::Validation(
                "This treatment requires a tooth (FDI code)".to_string(),
            ));
        }
        return Ok(None);
    };

    if requires_tooth && location.fdi_code.is_none() {
        return Err(WorkflowError::Validation(
            "This treatment requires a tooth (FDI code)".to_string(),
        ));
    }

    if let Some(code) = location.fdi_code {
        if !is_valid_fdi_code(code) {
            return Err(WorkflowError::Validation(format!("Invalid FDI tooth code {}", code)));
        }
    }

    let surface = match location.surface.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(normalize_surface(s)?),
        _ => None,
    };

    Ok(Some(ToothLocation { fdi_code: location.fdi_code, surface }))
}

pub fn validate_price(price: f64) -> Result<f64, WorkflowError> {
    if !price.is_finite() || price < 0.0 {
        return Err(WorkflowError::Validation(format!(
            "Estimated price must be a non-negative amount, got {}",
            price
        )));
    }
    Ok(price)
}

/// Trimmed, non-empty abandonment reason.
pub fn validate_reason(reason: Option<&str>) -> Result<String, WorkflowError> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => Ok(r.to_string()),
        _ => Err(WorkflowError::Validation("An abandonment reason is required".to_string())),
    }
}

pub fn validate_initial_status(status: ProcedureStatus) -> Result<ProcedureStatus, WorkflowError> {
    if !status.is_initial() {
        return Err(WorkflowError::Validation(format!(
            "A procedure cannot be created as {}",
            status
        )));
    }
    Ok(status)
}
