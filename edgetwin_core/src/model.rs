//! Tumor growth model.
//!
//! Logistic proliferation with a drug kill term and first-order drug decay,
//! integrated with explicit Euler steps of whatever wall-clock `dt` elapsed
//! since the previous update:
//!
//! ```text
//! growth = k · noise · N · (1 − N/θ)
//! death  = λ · N
//! ΔN     = (growth − death) · dt
//! r     += ΔN · g
//! λ     -= β · λ · dt
//! ```
//!
//! `N` (cellularity), `r` (radius) and `λ` (drug efficacy) are clamped at zero
//! after every step. The model does no I/O; callers supply `now`.

use crate::error::ModelError;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// PARAMETERS
// =============================================================================

/// Band for the multiplicative growth noise factor.
///
/// Each update draws one factor uniformly from `[low, high]`. A degenerate
/// band (`low == high`) consumes no randomness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct NoiseBand {
    pub low: f64,
    pub high: f64,
}

impl NoiseBand {
    /// No noise: every update uses a factor of exactly 1.
    pub const NONE: NoiseBand = NoiseBand { low: 1.0, high: 1.0 };

    /// Creates a validated band.
    pub fn new(low: f64, high: f64) -> Result<Self, ModelError> {
        let band = Self { low, high };
        band.validate()?;
        Ok(band)
    }

    /// Checks `0 ≤ low ≤ high`, both finite.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.low.is_finite() || self.low < 0.0 {
            return Err(ModelError::InvalidParameter { name: "noise_band.low", value: self.low });
        }
        if !self.high.is_finite() || self.high < self.low {
            return Err(ModelError::InvalidParameter { name: "noise_band.high", value: self.high });
        }
        Ok(())
    }

    /// Returns true if the band always yields the same factor.
    pub fn is_degenerate(&self) -> bool {
        self.low == self.high
    }

    /// Draws one noise factor.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> f64 {
        if self.is_degenerate() {
            self.low
        } else {
            rng.gen_range(self.low..=self.high)
        }
    }
}

impl Default for NoiseBand {
    fn default() -> Self {
        Self { low: 0.8, high: 1.2 }
    }
}

impl From<[f64; 2]> for NoiseBand {
    fn from(band: [f64; 2]) -> Self {
        Self { low: band[0], high: band[1] }
    }
}

impl From<NoiseBand> for [f64; 2] {
    fn from(band: NoiseBand) -> Self {
        [band.low, band.high]
    }
}

/// Constants of one growth model instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthParams {
    /// k: natural proliferation rate (1/s)
    pub proliferation_rate: f64,

    /// θ: maximum sustainable cellularity
    pub carrying_capacity: f64,

    /// β: first-order drug decay rate (1/s)
    pub drug_decay: f64,

    /// g: radius change per unit of cellularity change
    pub geometric_factor: f64,

    /// Multiplicative noise applied to the growth term
    pub noise_band: NoiseBand,
}

impl Default for GrowthParams {
    fn default() -> Self {
        Self {
            proliferation_rate: 0.01,
            carrying_capacity: 100.0,
            drug_decay: 0.005,
            geometric_factor: 0.05,
            noise_band: NoiseBand::default(),
        }
    }
}

impl GrowthParams {
    /// Sets the noise band.
    pub fn with_noise(mut self, band: NoiseBand) -> Self {
        self.noise_band = band;
        self
    }

    /// Checks every constant is inside its domain.
    pub fn validate(&self) -> Result<(), ModelError> {
        positive("proliferation_rate", self.proliferation_rate)?;
        positive("carrying_capacity", self.carrying_capacity)?;
        positive("drug_decay", self.drug_decay)?;
        if !self.geometric_factor.is_finite() || self.geometric_factor < 0.0 {
            return Err(ModelError::InvalidParameter {
                name: "geometric_factor",
                value: self.geometric_factor,
            });
        }
        self.noise_band.validate()
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidParameter { name, value })
    }
}

/// Checks a drug dose before it touches any model.
pub fn validate_dose(efficacy: f64) -> Result<(), ModelError> {
    if efficacy.is_finite() && efficacy >= 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidDose(efficacy))
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Direction of the last update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TumorStatus {
    Growing,
    Healing,
}

/// Immutable snapshot produced by one update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationTick {
    pub radius: f64,
    pub cellularity: f64,
    pub drug_level: f64,
    pub status: TumorStatus,
}

/// Full mutable state of a model, for inspection and equality checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelState {
    pub radius: f64,
    pub cellularity: f64,
    pub drug_efficacy: f64,
    pub last_update_time: f64,
}

// =============================================================================
// MODEL
// =============================================================================

/// Tumor growth model for one anatomical site.
pub struct GrowthModel {
    radius: f64,
    cellularity: f64,
    drug_efficacy: f64,
    params: GrowthParams,

    /// Seconds on the caller's monotonic clock
    last_update_time: f64,

    /// Noise source
    rng: ChaCha8Rng,

    /// Number of updates whose `now` went backwards or was not finite
    clock_anomalies: u64,
}

impl GrowthModel {
    /// Creates a model at `start_time` with no drug on board.
    ///
    /// Negative initial values are clamped to zero.
    pub fn new(
        radius: f64,
        cellularity: f64,
        params: GrowthParams,
        start_time: f64,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            radius: radius.max(0.0),
            cellularity: cellularity.max(0.0),
            drug_efficacy: 0.0,
            params,
            last_update_time: start_time,
            rng,
            clock_anomalies: 0,
        }
    }

    /// Advances the model to `now` and returns the resulting tick.
    pub fn update(&mut self, now: f64) -> SimulationTick {
        let dt = self.advance_clock(now);
        let noise = self.params.noise_band.sample(&mut self.rng);

        let p = &self.params;
        let growth = p.proliferation_rate
            * noise
            * self.cellularity
            * (1.0 - self.cellularity / p.carrying_capacity);
        let death = self.drug_efficacy * self.cellularity;
        let delta = (growth - death) * dt;

        self.cellularity += delta;
        self.radius += delta * p.geometric_factor;
        self.drug_efficacy -= p.drug_decay * self.drug_efficacy * dt;

        self.cellularity = self.cellularity.max(0.0);
        self.radius = self.radius.max(0.0);
        self.drug_efficacy = self.drug_efficacy.max(0.0);

        SimulationTick {
            radius: self.radius,
            cellularity: self.cellularity,
            drug_level: self.drug_efficacy,
            status: if delta > 0.0 { TumorStatus::Growing } else { TumorStatus::Healing },
        }
    }

    /// Adds `efficacy` to the active drug level.
    pub fn inject_drug(&mut self, efficacy: f64) -> Result<(), ModelError> {
        validate_dose(efficacy)?;
        self.drug_efficacy += efficacy;
        Ok(())
    }

    /// Returns elapsed seconds since the last update and moves the clock.
    ///
    /// A backwards or non-finite `now` yields `dt = 0` and leaves
    /// `last_update_time` where it was.
    fn advance_clock(&mut self, now: f64) -> f64 {
        if !now.is_finite() || now < self.last_update_time {
            self.clock_anomalies += 1;
            warn!(
                "Clock anomaly: now={} precedes last update {}; treating dt as 0",
                now, self.last_update_time
            );
            return 0.0;
        }
        let dt = now - self.last_update_time;
        self.last_update_time = now;
        dt
    }

    /// Returns the current state.
    pub fn state(&self) -> ModelState {
        ModelState {
            radius: self.radius,
            cellularity: self.cellularity,
            drug_efficacy: self.drug_efficacy,
            last_update_time: self.last_update_time,
        }
    }

    /// Returns the model constants.
    pub fn params(&self) -> &GrowthParams {
        &self.params
    }

    /// Number of clock anomalies corrected so far.
    pub fn clock_anomalies(&self) -> u64 {
        self.clock_anomalies
    }
}

impl std::fmt::Debug for GrowthModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowthModel")
            .field("radius", &self.radius)
            .field("cellularity", &self.cellularity)
            .field("drug_efficacy", &self.drug_efficacy)
            .field("last_update_time", &self.last_update_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn reference_params() -> GrowthParams {
        GrowthParams {
            proliferation_rate: 0.05,
            carrying_capacity: 100.0,
            drug_decay: 0.01,
            geometric_factor: 0.1,
            noise_band: NoiseBand::NONE,
        }
    }

    fn reference_model() -> GrowthModel {
        GrowthModel::new(17.0, 50.0, reference_params(), 0.0, ChaCha8Rng::seed_from_u64(1))
    }

    #[test]
    fn test_logistic_step_without_drug() {
        let mut model = reference_model();
        let tick = model.update(1.0);

        assert_relative_eq!(tick.cellularity, 51.25, epsilon = 1e-12);
        assert_relative_eq!(tick.radius, 17.125, epsilon = 1e-12);
        assert_eq!(tick.drug_level, 0.0);
        assert_eq!(tick.status, TumorStatus::Growing);
    }

    #[test]
    fn test_large_dose_heals_and_clamps() {
        let mut model = reference_model();
        model.update(1.0);
        model.inject_drug(2.0).unwrap();

        let tick = model.update(2.0);

        // death = 2.0 * 51.25 = 102.5 dwarfs growth; N would go negative
        assert_eq!(tick.status, TumorStatus::Healing);
        assert_eq!(tick.cellularity, 0.0);
        assert!(tick.radius < 17.125);
        assert_relative_eq!(tick.drug_level, 1.98, epsilon = 1e-12);
    }

    #[test]
    fn test_drug_keeps_cellularity_falling_until_it_decays() {
        let mut model = reference_model();
        model.inject_drug(0.5).unwrap();

        let mut previous = model.state().cellularity;
        let mut t = 0.0;
        for _ in 0..50 {
            t += 0.1;
            let tick = model.update(t);
            assert_eq!(tick.status, TumorStatus::Healing);
            assert!(tick.cellularity < previous);
            previous = tick.cellularity;
        }
    }

    #[test]
    fn test_backwards_clock_is_a_no_op() {
        let mut model = reference_model();
        model.update(5.0);
        let before = model.state();

        let tick = model.update(4.0);

        assert_eq!(model.state(), before);
        assert_eq!(tick.status, TumorStatus::Healing);
        assert_eq!(model.clock_anomalies(), 1);

        model.update(f64::NAN);
        assert_eq!(model.state().last_update_time, 5.0);
        assert_eq!(model.clock_anomalies(), 2);
    }

    #[test]
    fn test_inject_drug_accumulates_and_rejects_bad_doses() {
        let mut model = reference_model();
        model.inject_drug(0.5).unwrap();
        model.inject_drug(0.25).unwrap();
        assert_relative_eq!(model.state().drug_efficacy, 0.75);

        assert_eq!(model.inject_drug(-1.0), Err(ModelError::InvalidDose(-1.0)));
        assert!(model.inject_drug(f64::INFINITY).is_err());
        assert_relative_eq!(model.state().drug_efficacy, 0.75);
    }

    #[test]
    fn test_noise_is_reproducible_per_seed() {
        let params = reference_params().with_noise(NoiseBand::default());
        let mut a = GrowthModel::new(1.0, 30.0, params.clone(), 0.0, ChaCha8Rng::seed_from_u64(9));
        let mut b = GrowthModel::new(1.0, 30.0, params.clone(), 0.0, ChaCha8Rng::seed_from_u64(9));
        let mut c = GrowthModel::new(1.0, 30.0, params, 0.0, ChaCha8Rng::seed_from_u64(10));

        for step in 1..=5 {
            let t = step as f64;
            let (ta, tb, tc) = (a.update(t), b.update(t), c.update(t));
            assert_eq!(ta, tb);
            if step == 5 {
                assert_ne!(ta, tc);
            }
        }
    }

    #[test]
    fn test_degenerate_band_ignores_rng() {
        let mut a = GrowthModel::new(1.0, 30.0, reference_params(), 0.0, ChaCha8Rng::seed_from_u64(1));
        let mut b = GrowthModel::new(1.0, 30.0, reference_params(), 0.0, ChaCha8Rng::seed_from_u64(2));
        assert_eq!(a.update(1.0), b.update(1.0));
    }

    #[test]
    fn test_params_validation() {
        assert!(GrowthParams::default().validate().is_ok());

        let bad_rate = GrowthParams { proliferation_rate: 0.0, ..GrowthParams::default() };
        assert!(matches!(
            bad_rate.validate(),
            Err(ModelError::InvalidParameter { name: "proliferation_rate", .. })
        ));

        assert!(NoiseBand::new(1.2, 0.8).is_err());
        assert!(NoiseBand::new(-0.1, 1.0).is_err());
        assert!(NoiseBand::new(0.9, 0.9).unwrap().is_degenerate());
    }

    #[test]
    fn test_noise_band_serializes_as_pair() {
        let json = serde_json::to_string(&NoiseBand::default()).unwrap();
        assert_eq!(json, "[0.8,1.2]");
        let band: NoiseBand = serde_json::from_str("[0.5,1.5]").unwrap();
        assert_eq!(band, NoiseBand { low: 0.5, high: 1.5 });
    }

    proptest! {
        #[test]
        fn prop_state_never_negative(
            radius in 0.0f64..50.0,
            cellularity in 0.0f64..150.0,
            low in 0.0f64..2.0,
            spread in 0.0f64..2.0,
            dose in 0.0f64..20.0,
            steps in proptest::collection::vec(-5.0f64..60.0, 1..40),
            seed in any::<u64>(),
        ) {
            let params = reference_params().with_noise(NoiseBand { low, high: low + spread });
            let mut model = GrowthModel::new(radius, cellularity, params, 0.0, ChaCha8Rng::seed_from_u64(seed));
            model.inject_drug(dose).unwrap();

            let mut now = 0.0;
            let mut last_time = 0.0;
            for step in steps {
                now += step;
                let tick = model.update(now);
                let state = model.state();
                prop_assert!(tick.radius >= 0.0);
                prop_assert!(tick.cellularity >= 0.0);
                prop_assert!(tick.drug_level >= 0.0);
                prop_assert!(state.last_update_time >= last_time);
                last_time = state.last_update_time;
            }
        }
    }
}
