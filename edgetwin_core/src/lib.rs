//! EdgeTwin Core - Real-Time Tumor Digital Twin Session Engine
//!
//! An edge node that waits for a single patient bootstrap, then advances one
//! growth model per anatomical site at a fixed tick rate:
//! 1. **Handshake**: retained READY on the status channel, bootstrap intake
//! 2. **Model**: logistic proliferation, drug-driven death, first-order clearance
//! 3. **Scheduler**: fixed-rate ticks published to the tick channel
//!
//! All I/O goes through `edgetwin_env` capabilities, so the same session code
//! runs under tokio and under the deterministic simulator in `edgetwin_sim`.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod listener;
pub mod model;
pub mod scheduler;
pub mod session;
pub mod wire;

#[cfg(feature = "zmq")]
pub mod zmq_transport;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use bootstrap::{Morphology, PatientBootstrap, RiskFactors};
pub use config::{ChannelConfig, EdgeConfig, SiteConfig};
pub use error::{BootstrapError, ConfigError, ModelError, SessionError};
pub use listener::{BootstrapListener, Dispatch};
pub use model::{GrowthModel, GrowthParams, ModelState, NoiseBand, SimulationTick, TumorStatus};
pub use scheduler::{Scheduler, SchedulerStats, StatsSnapshot, StopSignal};
pub use session::{Phase, SessionController, SessionInfo};
pub use wire::{DrugCommand, TickMessage, OFFLINE_TOKEN, READY_TOKEN};

#[cfg(feature = "zmq")]
pub use zmq_transport::{ZmqPublisher, ZmqSubscriber};
