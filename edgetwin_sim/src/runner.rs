//! Scenario runner - drives a simulated edge node through session scenarios.
//!
//! Each run builds a fresh node on a [`LocalBus`] with a [`SimContext`]
//! clock, executes one scenario on a current-thread runtime, and checks the
//! session's observable behavior: phase, published ticks, scheduler counters.

use crate::context::{settle, SimContext};
use crate::network::{LocalBus, LocalEndpoint};
use crate::scenarios::ScenarioId;
use crate::twin::{sample_bootstrap, DrugTwin, PhysicalTwin, TwinError};

use edgetwin_core::{
    BootstrapListener, DrugCommand, EdgeConfig, Phase, SessionController, TickMessage, TumorStatus,
};
use edgetwin_env::{Subscriber, TransportError, TwinContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Virtual clock resolution while driving a scenario.
const CLOCK_STEP: Duration = Duration::from_millis(1);

/// How long simulated twins wait for READY.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Tick messages observed on the tick channel
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Last tick message observed, if any
    pub final_tick: Option<TickMessage>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn aborted(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_tick: None,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Scheduler cycles executed
    pub cycles: u64,

    /// Ticks handed to the transport
    pub published: u64,

    /// Tick publishes that failed
    pub publish_failures: u64,

    /// Cycles that overran the tick interval
    pub overruns: u64,

    /// Sends refused by the bus while offline
    pub bus_rejected: u64,
}

type Node = SessionController<SimContext, LocalEndpoint>;

// =============================================================================
// HARNESS
// =============================================================================

/// One simulated edge node plus an observer on its tick channel.
struct Harness {
    context: Arc<SimContext>,
    bus: LocalBus,
    controller: Arc<Node>,
    listener: JoinHandle<Result<(), TransportError>>,
    observer: LocalEndpoint,
    ticks: Vec<TickMessage>,
}

impl Harness {
    async fn start(seed: u64, config: EdgeConfig) -> Result<Self, String> {
        let context = SimContext::shared(seed);
        let bus = LocalBus::new();

        let observer = bus.endpoint();
        observer
            .subscribe(&config.channels.ticks)
            .await
            .map_err(|e| e.to_string())?;

        let endpoint = Arc::new(bus.endpoint());
        let controller = Arc::new(
            SessionController::new(Arc::clone(&context), Arc::clone(&endpoint), config)
                .map_err(|e| format!("invalid config: {}", e))?,
        );

        let listener = BootstrapListener::new(Arc::clone(&controller));
        let listener = tokio::spawn(async move { listener.run(endpoint.as_ref()).await });
        settle().await;

        Ok(Self {
            context,
            bus,
            controller,
            listener,
            observer,
            ticks: Vec::new(),
        })
    }

    fn twin(&self) -> PhysicalTwin<SimContext, LocalEndpoint> {
        PhysicalTwin::new(
            Arc::clone(&self.context),
            self.bus.endpoint(),
            self.controller.config().channels.clone(),
        )
    }

    /// Starts a twin that waits for READY and sends `payload`.
    fn spawn_handshake(&self, timeout: Duration, payload: Vec<u8>) -> JoinHandle<Result<Duration, TwinError>> {
        let twin = self.twin();
        tokio::spawn(async move { twin.handshake(timeout, payload).await })
    }

    async fn advance(&mut self, duration: Duration) {
        self.context.drive(duration, CLOCK_STEP).await;
        self.collect();
    }

    /// Advances until the session is running, up to `limit`.
    async fn advance_until_running(&mut self, limit: Duration) -> Result<(), String> {
        let deadline = self.context.now() + limit;
        while self.controller.phase() != Phase::Running {
            if self.context.now() >= deadline {
                return Err(format!("session not running after {:?} ({})", limit, self.controller.phase()));
            }
            self.advance(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    fn collect(&mut self) {
        for message in self.observer.drain() {
            match TickMessage::from_slice(&message.payload) {
                Ok(tick) => self.ticks.push(tick),
                Err(e) => warn!("Undecodable tick: {}", e),
            }
        }
    }

    async fn finish(mut self, scenario: ScenarioId, seed: u64, outcome: Result<(), String>) -> ScenarioResult {
        self.controller.shutdown();
        self.advance(Duration::from_millis(200)).await;

        let joined = match (&mut self.listener).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("listener failed: {}", e)),
            Err(e) => Err(format!("listener task panicked: {}", e)),
        };
        let outcome = outcome.and(joined);

        let stats = self.controller.stats();
        ScenarioResult {
            scenario,
            seed,
            passed: outcome.is_ok(),
            total_ticks: self.ticks.len() as u64,
            final_time_secs: self.context.now().as_secs_f64(),
            final_tick: self.ticks.last().cloned(),
            failure_reason: outcome.err(),
            metrics: ScenarioMetrics {
                cycles: stats.cycles,
                published: stats.published,
                publish_failures: stats.publish_failures,
                overruns: stats.overruns,
                bus_rejected: self.bus.stats().rejected,
            },
        }
    }
}

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

async fn join_twin<T>(handle: JoinHandle<Result<T, TwinError>>) -> Result<T, String> {
    match handle.await {
        Ok(result) => result.map_err(|e| format!("twin failed: {}", e)),
        Err(e) => Err(format!("twin task panicked: {}", e)),
    }
}

// =============================================================================
// RUNNER
// =============================================================================

/// Runs session scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tick rate in Hz
    tick_rate_hz: f64,

    /// Observation window in seconds
    duration_secs: f64,

    /// Base node configuration
    config: EdgeConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 10.0,
            duration_secs: 3.0,
            config: EdgeConfig::default(),
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: f64) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    /// Sets the observation window.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Sets the base node configuration (tick rate and seed are overridden).
    pub fn with_config(mut self, config: EdgeConfig) -> Self {
        self.config = config;
        self
    }

    fn node_config(&self) -> EdgeConfig {
        self.config
            .clone()
            .with_tick_rate(self.tick_rate_hz)
            .with_seed(self.seed)
    }

    fn window(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => return ScenarioResult::aborted(scenario, self.seed, format!("runtime: {}", e)),
        };
        runtime.block_on(self.run_async(scenario))
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let mut harness = match Harness::start(self.seed, self.node_config()).await {
            Ok(harness) => harness,
            Err(reason) => return ScenarioResult::aborted(scenario, self.seed, reason),
        };

        let outcome = match scenario {
            ScenarioId::Handshake => self.run_handshake(&mut harness).await,
            ScenarioId::LateJoiner => self.run_late_joiner(&mut harness).await,
            ScenarioId::DuplicateBootstrap => self.run_duplicate_bootstrap(&mut harness).await,
            ScenarioId::MalformedBootstrap => self.run_malformed_bootstrap(&mut harness).await,
            ScenarioId::DrugResponse => self.run_drug_response(&mut harness).await,
            ScenarioId::TransportOutage => self.run_transport_outage(&mut harness).await,
            ScenarioId::Cadence => self.run_cadence(&mut harness).await,
        };

        if let Err(reason) = &outcome {
            debug!("Scenario {} failed: {}", scenario, reason);
        }
        harness.finish(scenario, self.seed, outcome).await
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    async fn run_handshake(&self, harness: &mut Harness) -> Result<(), String> {
        let twin = harness.spawn_handshake(READY_TIMEOUT, sample_bootstrap("P-HANDSHAKE", 0.05));
        harness.advance(self.window()).await;
        join_twin(twin).await?;

        let status = &harness.controller.config().channels.status;
        ensure(harness.bus.retained(status).as_deref() == Some(b"READY".as_slice()), || {
            "status channel does not retain READY".into()
        })?;
        ensure(harness.controller.phase() == Phase::Running, || {
            format!("expected running, node is {}", harness.controller.phase())
        })?;

        let patient = harness.controller.session().map(|s| s.patient_id.clone());
        ensure(patient.as_deref() == Some("P-HANDSHAKE"), || format!("wrong session: {:?}", patient))?;
        ensure(!harness.ticks.is_empty(), || "no ticks published".into())?;

        let sites = harness.controller.config().sites.len();
        ensure(harness.ticks.iter().all(|t| t.sites.len() == sites), || {
            "a tick is missing a site".into()
        })?;

        info!("  Handshake: {} ticks over {:.1}s", harness.ticks.len(), self.duration_secs);
        Ok(())
    }

    async fn run_late_joiner(&self, harness: &mut Harness) -> Result<(), String> {
        harness.advance(Duration::from_secs(2)).await;
        ensure(harness.controller.phase() == Phase::Idle, || "node left idle without bootstrap".into())?;

        let twin = harness.spawn_handshake(Duration::from_millis(100), sample_bootstrap("P-LATE", 0.1));
        harness.advance(self.window()).await;
        let waited = join_twin(twin).await?;

        ensure(waited.is_zero(), || format!("retained READY took {:?}", waited))?;
        ensure(harness.controller.phase() == Phase::Running, || {
            format!("expected running, node is {}", harness.controller.phase())
        })?;
        Ok(())
    }

    async fn run_duplicate_bootstrap(&self, harness: &mut Harness) -> Result<(), String> {
        let twin = harness.spawn_handshake(READY_TIMEOUT, sample_bootstrap("P-FIRST", 0.05));
        harness.advance_until_running(Duration::from_secs(1)).await?;
        join_twin(twin).await?;
        harness.advance(Duration::from_millis(500)).await;

        let before = harness.controller.session().cloned();
        let ticks_before = harness.ticks.len();

        let intruder = harness.twin();
        intruder
            .send_bootstrap(sample_bootstrap("P-SECOND", 0.9))
            .await
            .map_err(|e| e.to_string())?;
        harness.advance(self.window()).await;

        let after = harness.controller.session().cloned();
        ensure(before == after, || "duplicate bootstrap changed the session".into())?;
        ensure(
            after.as_ref().map(|s| s.patient_id.as_str()) == Some("P-FIRST"),
            || format!("wrong session: {:?}", after.map(|s| s.patient_id)),
        )?;
        ensure(harness.ticks.len() > ticks_before, || "ticks stopped after duplicate".into())?;
        Ok(())
    }

    async fn run_malformed_bootstrap(&self, harness: &mut Harness) -> Result<(), String> {
        let twin = harness.spawn_handshake(READY_TIMEOUT, b"{not json".to_vec());
        harness.advance(Duration::from_millis(100)).await;
        join_twin(twin).await?;

        let sender = harness.twin();
        for payload in [
            br#"{"risk_factors": {"genetic": 0.1}}"#.to_vec(),
            br#"{"patient_id": "P-BAD", "risk_factors": {"genetic": 1.5}}"#.to_vec(),
            br#"{"patient_id": "P-BAD", "risk_factors": {"genetic": 0.1},
                 "morphology": {"initial_radius": -2.0, "tissue_density": 0.5}}"#
                .to_vec(),
        ] {
            sender.send_bootstrap(payload).await.map_err(|e| e.to_string())?;
        }
        harness.advance(Duration::from_millis(500)).await;

        ensure(harness.controller.phase() == Phase::Idle, || {
            format!("invalid bootstrap moved node to {}", harness.controller.phase())
        })?;
        ensure(harness.ticks.is_empty(), || "ticks published without a session".into())?;

        sender
            .send_bootstrap(sample_bootstrap("P-GOOD", 0.05))
            .await
            .map_err(|e| e.to_string())?;
        harness.advance(self.window()).await;

        ensure(harness.controller.phase() == Phase::Running, || {
            format!("valid bootstrap not accepted, node is {}", harness.controller.phase())
        })?;
        ensure(!harness.ticks.is_empty(), || "no ticks after valid bootstrap".into())?;
        Ok(())
    }

    async fn run_drug_response(&self, harness: &mut Harness) -> Result<(), String> {
        let twin = harness.spawn_handshake(READY_TIMEOUT, sample_bootstrap("P-DRUG", 0.05));
        harness.advance_until_running(Duration::from_secs(1)).await?;
        join_twin(twin).await?;

        let dose_at = harness.context.now() + Duration::from_secs(1);
        let drug = DrugTwin::new(
            Arc::clone(&harness.context),
            harness.bus.endpoint(),
            harness.controller.config().channels.drug.clone(),
        )
        .with_dose(dose_at, DrugCommand::for_site("left", 2.0));
        let drug = tokio::spawn(async move { drug.run().await });

        let before = harness.controller.model_states();
        harness.advance(self.window().max(Duration::from_secs(2))).await;
        join_twin(drug).await?;

        let after = harness.controller.model_states();
        let (Some(left0), Some(left1), Some(right0), Some(right1)) =
            (before.get("left"), after.get("left"), before.get("right"), after.get("right"))
        else {
            return Err("expected left and right sites".into());
        };

        ensure(left1.cellularity < left0.cellularity, || {
            format!("dosed site did not shrink: {} -> {}", left0.cellularity, left1.cellularity)
        })?;
        ensure(right1.cellularity > right0.cellularity, || {
            format!("untreated site did not grow: {} -> {}", right0.cellularity, right1.cellularity)
        })?;
        ensure(left1.drug_efficacy > 0.0 && left1.drug_efficacy < 2.0, || {
            format!("drug level did not decay: {}", left1.drug_efficacy)
        })?;

        let last = harness.ticks.last().ok_or("no ticks published")?;
        ensure(
            last.sites.get("left").map(|t| t.status) == Some(TumorStatus::Healing)
                && last.sites.get("right").map(|t| t.status) == Some(TumorStatus::Growing),
            || format!("unexpected final statuses: {:?}", last.sites),
        )?;

        info!(
            "  Drug response: left {:.3} -> {:.3}, right {:.3} -> {:.3}",
            left0.cellularity, left1.cellularity, right0.cellularity, right1.cellularity
        );
        Ok(())
    }

    async fn run_transport_outage(&self, harness: &mut Harness) -> Result<(), String> {
        let twin = harness.spawn_handshake(READY_TIMEOUT, sample_bootstrap("P-OUTAGE", 0.05));
        harness.advance_until_running(Duration::from_secs(1)).await?;
        join_twin(twin).await?;

        harness.advance(Duration::from_secs(1)).await;
        let before_outage = harness.ticks.len();

        harness.bus.set_offline(true);
        harness.advance(Duration::from_secs(1)).await;
        let during_outage = harness.ticks.len() - before_outage;
        harness.bus.set_offline(false);

        harness.advance(Duration::from_secs(1)).await;
        let after_outage = harness.ticks.len() - before_outage - during_outage;

        let stats = harness.controller.stats();
        let expected_failures = self.tick_rate_hz;
        ensure(during_outage == 0, || format!("{} ticks leaked through the outage", during_outage))?;
        ensure(
            (stats.publish_failures as f64 - expected_failures).abs() <= 1.0,
            || format!("expected ~{} failed publishes, got {}", expected_failures, stats.publish_failures),
        )?;
        ensure(after_outage > 0, || "ticks did not resume after outage".into())?;
        ensure(stats.cycles == stats.published + stats.publish_failures, || {
            format!("counters disagree: {:?}", stats)
        })?;
        ensure(harness.controller.phase() == Phase::Running, || "outage stopped the session".into())?;
        Ok(())
    }

    async fn run_cadence(&self, harness: &mut Harness) -> Result<(), String> {
        let twin = harness.spawn_handshake(READY_TIMEOUT, sample_bootstrap("P-CADENCE", 0.05));
        harness.advance_until_running(Duration::from_secs(1)).await?;
        join_twin(twin).await?;

        let start_cycles = harness.controller.stats().cycles;
        harness.advance(self.window()).await;
        let cycles = harness.controller.stats().cycles - start_cycles;

        let expected = self.duration_secs * self.tick_rate_hz;
        ensure((cycles as f64 - expected).abs() <= 1.0, || {
            format!("expected {:.0}±1 ticks, got {}", expected, cycles)
        })?;
        ensure(harness.controller.stats().overruns == 0, || "cycles overran on a virtual clock".into())?;

        info!("  Cadence: {} cycles in {:.1}s at {} Hz", cycles, self.duration_secs, self.tick_rate_hz);
        Ok(())
    }
}
