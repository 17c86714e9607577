//! EdgeTwin Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams that let the EdgeTwin session core
//! run unchanged in **Production** (tokio + a real message transport) and in
//! **Simulation** (virtual clock + in-process bus).
//!
//! # Core Concept
//!
//! Everything that would otherwise make a run non-reproducible is routed
//! through a trait:
//! - Time (`now()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - Randomness (`derive_rng()`)
//! - Messaging (`Publisher::send()`, `Subscriber::recv()`)
//!
//! Deriving all entropy from a single 64-bit seed means a simulated session
//! replays identically from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use edgetwin_env::{TwinContext, Publisher};
//!
//! async fn heartbeat<Ctx: TwinContext, P: Publisher>(ctx: &Ctx, out: &P) {
//!     loop {
//!         let _ = out.send("node/heartbeat", b"alive".to_vec()).await;
//!         ctx.sleep(Duration::from_secs(1)).await;
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::{derive_seed, TwinContext};
pub use network::{Publisher, Subscriber};
pub use types::Message;
pub use error::TransportError;
pub use tokio_impl::TokioContext;
