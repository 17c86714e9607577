//! Node configuration.
//!
//! Supplied by the caller at construction time. The CLI can load it from a
//! JSON file; every field has a default so partial files are fine.

use crate::error::ConfigError;
use crate::model::{GrowthParams, NoiseBand};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Initial state offsets for one anatomical site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site identifier (e.g. "left", "right")
    pub id: String,

    /// Radius offset added to the bootstrap's initial radius
    pub radius: f64,

    /// Initial cellularity
    pub cellularity: f64,
}

impl SiteConfig {
    pub fn new(id: impl Into<String>, radius: f64, cellularity: f64) -> Self {
        Self {
            id: id.into(),
            radius,
            cellularity,
        }
    }
}

/// Logical channel names, fixed per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Retained readiness token
    pub status: String,

    /// Inbound one-shot bootstrap
    pub bootstrap: String,

    /// Outbound per-tick state
    pub ticks: String,

    /// Inbound drug commands
    pub drug: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            status: "digitaltwin/system/status".to_string(),
            bootstrap: "digitaltwin/breast/bootstrap".to_string(),
            ticks: "digitaltwin/breast/tumor".to_string(),
            drug: "digitaltwin/breast/drug".to_string(),
        }
    }
}

/// Configuration for an edge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Scheduler rate in Hz (default: 10)
    pub tick_rate_hz: f64,

    /// Growth noise band (default: [0.8, 1.2])
    pub noise_band: NoiseBand,

    /// Base proliferation rate before risk scaling (default: 0.01)
    pub proliferation_rate: f64,

    /// Carrying capacity (default: 100)
    pub carrying_capacity: f64,

    /// Drug decay rate (default: 0.005)
    pub drug_decay: f64,

    /// Radius change per unit cellularity change (default: 0.05)
    pub geometric_factor: f64,

    /// Weight of the summed risk factors on proliferation (default: 1.0)
    pub risk_weight: f64,

    /// Master seed for growth noise; `None` draws from OS entropy
    pub seed: Option<u64>,

    /// Simulated sites (default: left (0.5, 10), right (0.7, 20))
    pub sites: Vec<SiteConfig>,

    /// Channel names
    pub channels: ChannelConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 10.0,
            noise_band: NoiseBand::default(),
            proliferation_rate: 0.01,
            carrying_capacity: 100.0,
            drug_decay: 0.005,
            geometric_factor: 0.05,
            risk_weight: 1.0,
            seed: None,
            sites: vec![
                SiteConfig::new("left", 0.5, 10.0),
                SiteConfig::new("right", 0.7, 20.0),
            ],
            channels: ChannelConfig::default(),
        }
    }
}

impl EdgeConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads and validates a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        let config = Self::from_json(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: f64) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    /// Sets the noise band.
    pub fn with_noise_band(mut self, band: NoiseBand) -> Self {
        self.noise_band = band;
        self
    }

    /// Sets the master seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replaces the site list.
    pub fn with_sites(mut self, sites: Vec<SiteConfig>) -> Self {
        self.sites = sites;
        self
    }

    /// Sets the risk weight.
    pub fn with_risk_weight(mut self, weight: f64) -> Self {
        self.risk_weight = weight;
        self
    }

    /// Returns the scheduler's tick budget.
    ///
    /// Rates that `validate` rejects saturate to `Duration::MAX`.
    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.tick_rate_hz).unwrap_or(Duration::MAX)
    }

    /// Returns the growth constants before risk scaling.
    pub fn growth_params(&self) -> GrowthParams {
        GrowthParams {
            proliferation_rate: self.proliferation_rate,
            carrying_capacity: self.carrying_capacity,
            drug_decay: self.drug_decay,
            geometric_factor: self.geometric_factor,
            noise_band: self.noise_band,
        }
    }

    /// Checks the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tick_rate_hz.is_finite()
            || self.tick_rate_hz <= 0.0
            || Duration::try_from_secs_f64(1.0 / self.tick_rate_hz).is_err()
        {
            return Err(ConfigError::InvalidTickRate(self.tick_rate_hz));
        }

        self.growth_params().validate()?;

        if !self.risk_weight.is_finite() || self.risk_weight < 0.0 {
            return Err(ConfigError::Model(crate::error::ModelError::InvalidParameter {
                name: "risk_weight",
                value: self.risk_weight,
            }));
        }

        if self.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.id.trim().is_empty() {
                return Err(ConfigError::EmptySiteId);
            }
            if !seen.insert(site.id.as_str()) {
                return Err(ConfigError::DuplicateSite(site.id.clone()));
            }
            if !site.radius.is_finite() || site.radius < 0.0 {
                return Err(ConfigError::InvalidSite {
                    site: site.id.clone(),
                    reason: format!("radius must be >= 0, got {}", site.radius),
                });
            }
            if !site.cellularity.is_finite() || site.cellularity < 0.0 {
                return Err(ConfigError::InvalidSite {
                    site: site.id.clone(),
                    reason: format!("cellularity must be >= 0, got {}", site.cellularity),
                });
            }
        }

        let channels = [
            ("status", &self.channels.status),
            ("bootstrap", &self.channels.bootstrap),
            ("ticks", &self.channels.ticks),
            ("drug", &self.channels.drug),
        ];
        for (name, channel) in channels {
            if channel.is_empty() {
                return Err(ConfigError::EmptyChannel(name));
            }
        }

        Ok(())
    }
}
