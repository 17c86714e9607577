//! Fixed-tick-rate simulation loop.
//!
//! Each cycle: update every model, publish one `TickMessage`, then sleep
//! whatever is left of the tick budget. An overrun cycle is neither skipped
//! nor batched; the next cycle simply starts immediately, so sustained
//! overload lowers the effective rate instead of dropping or queueing ticks.

use crate::model::{GrowthModel, SimulationTick};
use crate::wire::TickMessage;
use edgetwin_env::{Publisher, TwinContext};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// A growth model shared between the scheduler and command handlers.
pub type SharedModel = Arc<Mutex<GrowthModel>>;

/// Runs `f` with exclusive access to `model`.
///
/// A poisoned lock still holds a consistent model (every mutation clamps
/// before returning), so the guard is recovered rather than propagated.
pub fn with_model<R>(model: &SharedModel, f: impl FnOnce(&mut GrowthModel) -> R) -> R {
    let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut *guard)
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative stop flag shared by the session, scheduler and listener.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Returns true only for the call that raised it.
    pub fn stop(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// STATS
// =============================================================================

/// Live counters updated by the scheduler.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    overruns: AtomicU64,
}

/// Point-in-time copy of `SchedulerStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Cycles executed (one tick computed per cycle)
    pub cycles: u64,
    /// Ticks handed to the transport successfully
    pub published: u64,
    /// Ticks the transport refused
    pub publish_failures: u64,
    /// Cycles whose work exceeded the tick budget
    pub overruns: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Drives a set of growth models at a fixed tick rate.
pub struct Scheduler<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    context: Arc<Ctx>,
    publisher: Arc<P>,
    channel: String,
    tick_interval: Duration,
    models: Vec<(String, SharedModel)>,
    stop: StopSignal,
    stats: Arc<SchedulerStats>,
}

impl<Ctx, P> Scheduler<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    /// Creates a scheduler. `models` are updated in the given order.
    pub fn new(
        context: Arc<Ctx>,
        publisher: Arc<P>,
        channel: impl Into<String>,
        tick_interval: Duration,
        models: Vec<(String, SharedModel)>,
        stop: StopSignal,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            context,
            publisher,
            channel: channel.into(),
            tick_interval,
            models,
            stop,
            stats,
        }
    }

    /// Updates every model once and packages the result.
    pub fn step(&self) -> TickMessage {
        let now = self.context.now().as_secs_f64();
        let ticks: Vec<(String, SimulationTick)> = self
            .models
            .iter()
            .map(|(site, model)| (site.clone(), with_model(model, |m| m.update(now))))
            .collect();

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        TickMessage::new(self.context.system_time(), ticks)
    }

    /// Runs until the stop signal is raised (checked at the top of each cycle).
    pub async fn run(self) {
        info!(
            "Scheduler started: {} site(s) every {:?} on '{}'",
            self.models.len(),
            self.tick_interval,
            self.channel
        );

        loop {
            if self.stop.is_stopped() {
                break;
            }

            let start = self.context.now();
            let message = self.step();
            self.publish(&message).await;
            let elapsed = self.context.now().saturating_sub(start);

            // A cycle that uses exactly its budget is on time, not an overrun.
            match self.tick_interval.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => self.context.sleep(remaining).await,
                Some(_) => tokio::task::yield_now().await,
                None => {
                    self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                    debug!("Tick overran its budget ({:?} > {:?})", elapsed, self.tick_interval);
                    tokio::task::yield_now().await;
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            "Scheduler stopped after {} cycles ({} published, {} failed, {} overruns)",
            stats.cycles, stats.published, stats.publish_failures, stats.overruns
        );
    }

    async fn publish(&self, message: &TickMessage) {
        let result = match message.to_bytes() {
            Ok(bytes) => self.publisher.send(&self.channel, bytes).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                if let Some((site, tick)) = message.sites.iter().next() {
                    debug!("[SIM] {}: r={} n={} ({:?})", site, tick.radius, tick.cellularity, tick.status);
                }
            }
            Err(e) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Tick publish failed, continuing: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GrowthParams, NoiseBand};
    use crate::testing::RecordingPublisher;
    use edgetwin_env::TokioContext;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::time::SystemTime;

    fn models(ctx: &TokioContext) -> Vec<(String, SharedModel)> {
        let params = GrowthParams::default().with_noise(NoiseBand::NONE);
        ["left", "right"]
            .iter()
            .enumerate()
            .map(|(i, site)| {
                let model = GrowthModel::new(
                    0.5 + i as f64,
                    10.0,
                    params.clone(),
                    ctx.now().as_secs_f64(),
                    ChaCha8Rng::seed_from_u64(i as u64),
                );
                (site.to_string(), Arc::new(Mutex::new(model)))
            })
            .collect()
    }

    #[test]
    fn test_stop_signal_first_caller_wins() {
        let stop = StopSignal::new();
        let clone = stop.clone();
        assert!(!clone.is_stopped());
        assert!(stop.stop());
        assert!(!clone.stop());
        assert!(clone.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_wakes_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        tokio::task::yield_now().await;
        stop.stop();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_covers_every_site() {
        let ctx = Arc::new(TokioContext::with_seed(1));
        let publisher = Arc::new(RecordingPublisher::new());
        let scheduler = Scheduler::new(
            ctx.clone(),
            publisher,
            "ticks",
            Duration::from_millis(100),
            models(&ctx),
            StopSignal::new(),
            Arc::new(SchedulerStats::default()),
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        let message = scheduler.step();

        assert_eq!(message.sites.len(), 2);
        assert!(message.sites["left"].cellularity > 10.0);
        assert!(message.timestamp > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_matches_tick_rate() {
        let ctx = Arc::new(TokioContext::with_seed(1));
        let publisher = Arc::new(RecordingPublisher::new());
        let stop = StopSignal::new();
        let stats = Arc::new(SchedulerStats::default());
        let scheduler = Scheduler::new(
            ctx.clone(),
            publisher.clone(),
            "ticks",
            Duration::from_millis(100),
            models(&ctx),
            stop.clone(),
            stats.clone(),
        );

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_secs(3)).await;
        stop.stop();
        handle.await.unwrap();

        let sent = publisher.sent_on("ticks").len() as i64;
        assert!((sent - 30).abs() <= 1, "published {} ticks in 3s at 10Hz", sent);
        assert_eq!(stats.snapshot().publish_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failures_do_not_stop_the_loop() {
        let ctx = Arc::new(TokioContext::with_seed(1));
        let publisher = Arc::new(RecordingPublisher::new());
        let stop = StopSignal::new();
        let stats = Arc::new(SchedulerStats::default());
        let scheduler = Scheduler::new(
            ctx.clone(),
            publisher.clone(),
            "ticks",
            Duration::from_millis(100),
            models(&ctx),
            stop.clone(),
            stats.clone(),
        );

        publisher.set_failing(true);
        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        publisher.set_failing(false);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        stop.stop();
        handle.await.unwrap();

        let snapshot = stats.snapshot();
        assert!(snapshot.publish_failures >= 10);
        assert!(snapshot.published >= 9);
        assert_eq!(snapshot.cycles, snapshot.published + snapshot.publish_failures);
    }

    /// Context whose clock jumps forward `step_ms` on every read. A cycle
    /// reads the clock three times, so it appears to take `2 * step_ms`.
    struct SlowContext {
        step_ms: u64,
        reads: AtomicU64,
        sleeps: AtomicU64,
    }

    impl SlowContext {
        fn new(step_ms: u64) -> Self {
            Self { step_ms, reads: AtomicU64::new(0), sleeps: AtomicU64::new(0) }
        }
    }

    type Solo<Ctx> = (Scheduler<Ctx, RecordingPublisher>, Arc<RecordingPublisher>, Arc<SchedulerStats>);

    /// One-site scheduler that stops itself after `cycles` publishes.
    fn solo_scheduler<Ctx: TwinContext>(ctx: Arc<Ctx>, cycles: usize) -> Solo<Ctx> {
        let stop = StopSignal::new();
        let publisher = Arc::new(RecordingPublisher::new().stop_after(cycles, stop.clone()));
        let stats = Arc::new(SchedulerStats::default());
        let model = GrowthModel::new(
            1.0,
            10.0,
            GrowthParams::default(),
            0.0,
            ChaCha8Rng::seed_from_u64(3),
        );
        let scheduler = Scheduler::new(
            ctx,
            publisher.clone(),
            "ticks",
            Duration::from_millis(100),
            vec![("solo".to_string(), Arc::new(Mutex::new(model)))],
            stop,
            stats.clone(),
        );
        (scheduler, publisher, stats)
    }

    #[async_trait::async_trait]
    impl TwinContext for SlowContext {
        fn now(&self) -> Duration {
            Duration::from_millis(self.step_ms * self.reads.fetch_add(1, Ordering::SeqCst))
        }

        fn system_time(&self) -> SystemTime {
            SystemTime::now()
        }

        async fn sleep(&self, _duration: Duration) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
        }

        fn spawn<F>(&self, _name: &str, future: F)
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
            tokio::spawn(future);
        }

        fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng {
            ChaCha8Rng::seed_from_u64(seed_extension)
        }

        fn seed(&self) -> u64 {
            0
        }
    }

    #[tokio::test]
    async fn test_overrun_runs_next_cycle_immediately() {
        let ctx = Arc::new(SlowContext::new(150));
        let (scheduler, publisher, stats) = solo_scheduler(ctx.clone(), 5);

        scheduler.run().await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cycles, 5);
        assert_eq!(snapshot.overruns, 5);
        assert_eq!(ctx.sleeps.load(Ordering::SeqCst), 0);
        assert_eq!(publisher.sent_on("ticks").len(), 5);
    }

    #[tokio::test]
    async fn test_cycle_using_exact_budget_is_not_an_overrun() {
        let ctx = Arc::new(SlowContext::new(50));
        let (scheduler, publisher, stats) = solo_scheduler(ctx.clone(), 4);

        scheduler.run().await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cycles, 4);
        assert_eq!(snapshot.overruns, 0);
        assert_eq!(ctx.sleeps.load(Ordering::SeqCst), 0);
        assert_eq!(publisher.sent_on("ticks").len(), 4);
    }
}
