//! Session controller: bootstrap intake, one-shot initialization, shutdown.
//!
//! # Lifecycle
//!
//! ```text
//!            valid bootstrap          models built +
//!   Idle ─────────────────────▶ Initializing ─────────────▶ Running
//!    │                               │       scheduler spawned  │
//!    └───────────────┬───────────────┴──────────────────────────┘
//!                    ▼ shutdown()
//!                 Stopped (terminal)
//! ```
//!
//! The phase lives in one atomic and only moves by compare-and-set, so of N
//! bootstraps racing out of Idle exactly one wins; the rest are rejected as
//! duplicates, never queued.

use crate::bootstrap::PatientBootstrap;
use crate::config::EdgeConfig;
use crate::error::{BootstrapError, ConfigError, SessionError};
use crate::model::{validate_dose, GrowthModel, ModelState};
use crate::scheduler::{with_model, Scheduler, SchedulerStats, SharedModel, StatsSnapshot, StopSignal};
use crate::wire::DrugCommand;

use edgetwin_env::{Publisher, TwinContext};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Session lifecycle phase.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Idle = 0,
    Initializing = 1,
    Running = 2,
    Stopped = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Idle,
            1 => Phase::Initializing,
            2 => Phase::Running,
            _ => Phase::Stopped,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initializing => "initializing",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Public description of the active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub patient_id: String,
    pub sites: Vec<String>,
    pub bootstrap: PatientBootstrap,
}

/// Session contents, written once when leaving Idle.
struct Session {
    info: SessionInfo,

    /// Models in configured site order, each behind its own lock
    models: Vec<(String, SharedModel)>,
}

/// Owns all state of the node's single simulation session.
///
/// Generic over the context and publisher so the same controller runs in
/// production (tokio + real transport) and under the simulation harness.
pub struct SessionController<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    context: Arc<Ctx>,
    publisher: Arc<P>,
    config: EdgeConfig,
    phase: AtomicU8,
    session: OnceLock<Session>,
    stop: StopSignal,
    stats: Arc<SchedulerStats>,
}

impl<Ctx, P> SessionController<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    /// Creates an Idle controller. Fails if `config` is invalid.
    pub fn new(context: Arc<Ctx>, publisher: Arc<P>, config: EdgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            context,
            publisher,
            config,
            phase: AtomicU8::new(Phase::Idle as u8),
            session: OnceLock::new(),
            stop: StopSignal::new(),
            stats: Arc::new(SchedulerStats::default()),
        })
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn transition(&self, from: Phase, to: Phase) -> Result<(), Phase> {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(Phase::from_u8)
    }

    /// Handles a raw bootstrap payload.
    ///
    /// On success the models are built and the scheduler is spawned. An
    /// invalid payload is rejected in any phase and changes nothing; a valid
    /// one arriving after the first accepted one is rejected as a duplicate.
    pub fn on_bootstrap(&self, payload: &[u8]) -> Result<SessionInfo, BootstrapError> {
        let bootstrap = PatientBootstrap::from_slice(payload).map_err(|e| {
            warn!("Rejected bootstrap ({}): {}", self.phase(), e);
            e
        })?;

        if let Err(actual) = self.transition(Phase::Idle, Phase::Initializing) {
            warn!("Ignoring bootstrap for {}: session already {}", bootstrap.patient_id, actual);
            return Err(BootstrapError::DuplicateSession(actual));
        }

        info!("📩 Bootstrap received for patient {}; initializing", bootstrap.patient_id);
        let session = self.session.get_or_init(|| self.build_session(bootstrap));

        if let Err(actual) = self.transition(Phase::Initializing, Phase::Running) {
            warn!("Session {} not started: node is {}", session.info.session_id, actual);
            return Err(BootstrapError::DuplicateSession(actual));
        }

        self.launch_scheduler(session);
        info!(
            "🚀 Session {} running for patient {} ({} sites)",
            session.info.session_id,
            session.info.patient_id,
            session.models.len()
        );
        Ok(session.info.clone())
    }

    fn build_session(&self, bootstrap: PatientBootstrap) -> Session {
        let now = self.context.now().as_secs_f64();
        let mut params = self.config.growth_params();
        params.proliferation_rate *= 1.0 + self.config.risk_weight * bootstrap.risk_score();
        let base_radius = bootstrap.base_radius();

        let models: Vec<(String, SharedModel)> = self
            .config
            .sites
            .iter()
            .enumerate()
            .map(|(index, site)| {
                let model = GrowthModel::new(
                    base_radius + site.radius,
                    site.cellularity,
                    params.clone(),
                    now,
                    self.context.derive_rng(index as u64),
                );
                (site.id.clone(), Arc::new(Mutex::new(model)))
            })
            .collect();

        Session {
            info: SessionInfo {
                session_id: Uuid::new_v4(),
                patient_id: bootstrap.patient_id.clone(),
                sites: models.iter().map(|(site, _)| site.clone()).collect(),
                bootstrap,
            },
            models,
        }
    }

    fn launch_scheduler(&self, session: &Session) {
        let scheduler = Scheduler::new(
            Arc::clone(&self.context),
            Arc::clone(&self.publisher),
            self.config.channels.ticks.clone(),
            self.config.tick_interval(),
            session.models.clone(),
            self.stop.clone(),
            Arc::clone(&self.stats),
        );
        self.context.spawn("scheduler", scheduler.run());
    }

    /// Stops the scheduler and moves to Stopped. Idempotent.
    pub fn shutdown(&self) {
        let previous = Phase::from_u8(self.phase.swap(Phase::Stopped as u8, Ordering::SeqCst));
        self.stop.stop();
        if previous != Phase::Stopped {
            info!("Session shut down (was {})", previous);
        }
    }

    /// Injects a drug dose into one site, or every site when `site` is `None`.
    ///
    /// Returns the number of sites dosed.
    pub fn inject_drug(&self, site: Option<&str>, efficacy: f64) -> Result<usize, SessionError> {
        let session = self.running_session()?;
        validate_dose(efficacy)?;

        let targets: Vec<&(String, SharedModel)> = match site {
            Some(id) => {
                let entry = session
                    .models
                    .iter()
                    .find(|(site, _)| site == id)
                    .ok_or_else(|| SessionError::UnknownSite(id.to_string()))?;
                vec![entry]
            }
            None => session.models.iter().collect(),
        };

        for (id, model) in targets.iter().copied() {
            with_model(model, |m| m.inject_drug(efficacy))?;
            info!("💉 Drug injected at {}: efficacy {}", id, efficacy);
        }
        Ok(targets.len())
    }

    /// Decodes and applies a drug command payload.
    pub fn on_drug_command(&self, payload: &[u8]) -> Result<usize, SessionError> {
        let command = DrugCommand::from_slice(payload)?;
        self.inject_drug(command.site.as_deref(), command.efficacy)
    }

    fn running_session(&self) -> Result<&Session, SessionError> {
        let phase = self.phase();
        if phase != Phase::Running {
            return Err(SessionError::NotRunning(phase));
        }
        self.session.get().ok_or(SessionError::NotRunning(phase))
    }

    /// Returns the session, once one has been initialized.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.get().map(|s| &s.info)
    }

    /// Returns a snapshot of every model's state, keyed by site.
    pub fn model_states(&self) -> BTreeMap<String, ModelState> {
        self.session
            .get()
            .map(|s| {
                s.models
                    .iter()
                    .map(|(site, model)| (site.clone(), with_model(model, |m| m.state())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the scheduler counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns a handle to the stop flag.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Arc<P> {
        &self.publisher
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }
}
