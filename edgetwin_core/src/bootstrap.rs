//! Patient bootstrap record: decoding and validation.
//!
//! The payload is JSON. Two shapes are accepted:
//!
//! ```text
//! flat:      { "patient_id": "P1",
//!              "risk_factors": { "genetic": 0.05, "environmental": 0.01 },
//!              "morphology":   { "initial_radius": 1.2, "tissue_density": 0.6 } }
//!
//! envelope:  { "meta":   { "patient_id": "P1", "timestamp": ... },
//!              "config": { "risk_factors": { "genetic": 0.05 } } }
//! ```
//!
//! Flat fields win when both are present. Unknown fields are ignored.

use crate::error::BootstrapError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Validated bootstrap record. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientBootstrap {
    pub patient_id: String,
    pub risk_factors: RiskFactors,
    pub morphology: Option<Morphology>,
}

/// Risk factors, both in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskFactors {
    pub genetic: f64,
    pub environmental: f64,
}

/// Optional morphology measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Morphology {
    /// Baseline tumor radius, `> 0`
    pub initial_radius: f64,

    /// Tissue density, `[0, 1]`
    pub tissue_density: f64,
}

impl PatientBootstrap {
    /// Decodes and validates a raw payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, BootstrapError> {
        let wire: BootstrapWire = serde_json::from_slice(payload)
            .map_err(|e| BootstrapError::Malformed(e.to_string()))?;
        wire.validate()
    }

    /// Sum of the risk factors.
    pub fn risk_score(&self) -> f64 {
        self.risk_factors.genetic + self.risk_factors.environmental
    }

    /// Baseline radius contributed by morphology (0 when absent).
    pub fn base_radius(&self) -> f64 {
        self.morphology.map(|m| m.initial_radius).unwrap_or(0.0)
    }
}

// =============================================================================
// WIRE SHAPE
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BootstrapWire {
    patient_id: Option<String>,
    risk_factors: Option<RiskWire>,
    morphology: Option<MorphologyWire>,
    meta: Option<MetaWire>,
    config: Option<ConfigWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RiskWire {
    genetic: Option<f64>,
    environmental: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MorphologyWire {
    initial_radius: Option<f64>,
    tissue_density: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaWire {
    patient_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigWire {
    risk_factors: Option<RiskWire>,
}

impl BootstrapWire {
    fn validate(self) -> Result<PatientBootstrap, BootstrapError> {
        let patient_id = self
            .patient_id
            .or(self.meta.and_then(|m| m.patient_id))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(BootstrapError::MissingField("patient_id"))?;

        let risk = self
            .risk_factors
            .or(self.config.and_then(|c| c.risk_factors))
            .ok_or(BootstrapError::MissingField("risk_factors"))?;

        let genetic = risk
            .genetic
            .ok_or(BootstrapError::MissingField("risk_factors.genetic"))?;
        unit_interval("risk_factors.genetic", genetic)?;

        let environmental = risk.environmental.unwrap_or(0.0);
        unit_interval("risk_factors.environmental", environmental)?;

        let morphology = match self.morphology {
            Some(MorphologyWire { initial_radius: Some(initial_radius), tissue_density }) => {
                if !initial_radius.is_finite() || initial_radius <= 0.0 {
                    return Err(BootstrapError::OutOfRange {
                        field: "morphology.initial_radius",
                        value: initial_radius,
                    });
                }
                let tissue_density = tissue_density
                    .ok_or(BootstrapError::MissingField("morphology.tissue_density"))?;
                unit_interval("morphology.tissue_density", tissue_density)?;
                Some(Morphology { initial_radius, tissue_density })
            }
            Some(_) => {
                debug!("Bootstrap morphology has no initial_radius; ignoring it");
                None
            }
            None => None,
        };

        Ok(PatientBootstrap {
            patient_id,
            risk_factors: RiskFactors { genetic, environmental },
            morphology,
        })
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), BootstrapError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(BootstrapError::OutOfRange { field, value })
    }
}
