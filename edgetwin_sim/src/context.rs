//! Virtual-clock context for deterministic runs of the edge node.

use async_trait::async_trait;
use edgetwin_env::{derive_seed, TwinContext};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cooperative yields granted to other tasks after each clock step.
const SETTLE_YIELDS: usize = 8;

/// Wall-clock instant that virtual time zero maps to (2026-01-01 00:00:00 UTC).
const SIM_EPOCH_SECS: u64 = 1_767_225_600;

/// Yields to the executor a few times so woken tasks get to run.
pub async fn settle() {
    for _ in 0..SETTLE_YIELDS {
        tokio::task::yield_now().await;
    }
}

/// [`TwinContext`] whose clock only moves when the harness moves it.
///
/// `sleep` parks the caller, yielding to the executor, until the clock
/// reaches its deadline; `drive` is what actually moves time forward. Clones
/// share one clock. Run on a current-thread runtime and a node is
/// reproducible for a given seed.
#[derive(Clone)]
pub struct SimContext {
    seed: u64,
    elapsed_ns: Arc<AtomicU64>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            elapsed_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.elapsed_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Puts the clock at `at`. Going backwards is allowed; growth models
    /// count it as a clock anomaly.
    pub fn jump_to(&self, at: Duration) {
        self.elapsed_ns.store(at.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Moves the clock forward by `duration` in increments of `step`,
    /// letting every runnable task catch up after each increment.
    pub async fn drive(&self, duration: Duration, step: Duration) {
        let target = self.now() + duration;
        while self.now() < target {
            self.jump_to((self.now() + step).min(target));
            settle().await;
        }
    }
}

#[async_trait]
impl TwinContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(SIM_EPOCH_SECS) + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        while self.now() < deadline {
            tokio::task::yield_now().await;
        }
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(derive_seed(self.seed, seed_extension))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
