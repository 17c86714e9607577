//! Core environment context trait for EdgeTwin nodes.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// The session core never touches `std::time`, `tokio::spawn` or an OS RNG
/// directly; it asks the context. That keeps the real-time scheduler testable
/// under a virtual clock.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, entropy-seeded RNG
/// - **Simulation**: `SimContext` (in `edgetwin_sim`) - virtual clock, `ChaCha8Rng(seed)`
#[async_trait]
pub trait TwinContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// Growth models use this as their `now` so that `dt` never depends on
    /// wall-clock adjustments.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used to stamp outbound tick messages.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives a random number generator for one consumer.
    ///
    /// Seeded contexts combine their master seed with `seed_extension` so each
    /// consumer (e.g. each anatomical site) gets an independent but
    /// reproducible stream.
    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng;

    /// Returns the context's master seed (0 when entropy-seeded).
    fn seed(&self) -> u64;
}

/// Mixes a master seed with a per-consumer extension.
///
/// Every seeded context derives its streams through this, so one seed means
/// the same growth noise whichever context runs the node.
pub fn derive_seed(master: u64, seed_extension: u64) -> u64 {
    master.wrapping_mul(0x517cc1b727220a95) ^ seed_extension
}
