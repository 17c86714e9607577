//! Production implementation of TwinContext using Tokio.

use crate::context::{derive_seed, TwinContext};
use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Production context backed by the Tokio clock.
///
/// Time comes from `tokio::time::Instant`, so tests running with a paused
/// runtime see the same virtual time as `sleep`.
pub struct TokioContext {
    /// Origin of `now()`
    start: Instant,

    /// Optional master seed for reproducible noise
    seed: Option<u64>,
}

impl TokioContext {
    /// Creates a new entropy-seeded TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            seed: None,
        }
    }

    /// Creates a TokioContext whose RNG streams derive from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed: Some(seed),
        }
    }

    /// Creates an Arc-wrapped context, seeded when `seed` is given.
    pub fn shared(seed: Option<u64>) -> Arc<Self> {
        Arc::new(match seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::new(),
        })
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TwinContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(derive_seed(seed, seed_extension)),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn seed(&self) -> u64 {
        self.seed.unwrap_or(0)
    }
}
