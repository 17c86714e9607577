//! On-the-wire formats shared with consumers and senders.

use crate::error::SessionError;
use crate::model::SimulationTick;
use edgetwin_env::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Retained token meaning "node is listening for a bootstrap".
pub const READY_TOKEN: &str = "READY";

/// Retained token replacing `READY` once the node has shut down.
pub const OFFLINE_TOKEN: &str = "OFFLINE";

/// One published tick: every site's snapshot at the same instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    /// Wall-clock seconds since the UNIX epoch
    pub timestamp: f64,

    /// Snapshot per site id
    pub sites: BTreeMap<String, SimulationTick>,
}

impl TickMessage {
    /// Builds a message, rounding every figure to 4 decimal places.
    pub fn new(timestamp: SystemTime, ticks: impl IntoIterator<Item = (String, SimulationTick)>) -> Self {
        let timestamp = timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let sites = ticks
            .into_iter()
            .map(|(site, tick)| {
                let rounded = SimulationTick {
                    radius: round4(tick.radius),
                    cellularity: round4(tick.cellularity),
                    drug_level: round4(tick.drug_level),
                    status: tick.status,
                };
                (site, rounded)
            })
            .collect();

        Self { timestamp, sites }
    }

    /// Encodes as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    /// Decodes JSON bytes (consumer side).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Serialization(e.to_string()))
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Inbound drug injection command.
///
/// `{"efficacy": 2.0}` doses every site; `{"efficacy": 2.0, "site": "left"}`
/// doses one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugCommand {
    pub efficacy: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl DrugCommand {
    /// Creates a command for all sites.
    pub fn all_sites(efficacy: f64) -> Self {
        Self { efficacy, site: None }
    }

    /// Creates a command for one site.
    pub fn for_site(site: impl Into<String>, efficacy: f64) -> Self {
        Self { efficacy, site: Some(site.into()) }
    }

    /// Decodes JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::MalformedCommand(e.to_string()))
    }

    /// Encodes as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }
}
