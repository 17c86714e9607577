//! EdgeTwin Deterministic Simulation Harness
//!
//! Runs the real session core against simulated counterparts:
//! - **Time**: a virtual clock that moves only when the harness drives it
//! - **Transport**: an in-process bus with retained values and outages
//! - **Twins**: a physical twin that bootstraps the node, a drug twin that doses it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScenarioRunner                        │
//! │   SimContext (virtual clock, seeded ChaCha8 per site)        │
//! │                                                              │
//! │  ┌──────────────┐   bootstrap    ┌──────────────────────┐    │
//! │  │ PhysicalTwin │ ─────────────► │  BootstrapListener   │    │
//! │  └──────────────┘ ◄───────────── │  SessionController   │    │
//! │         READY (retained)         │  Scheduler ──► ticks │    │
//! │  ┌──────────────┐   drug cmds    │                      │    │
//! │  │   DrugTwin   │ ─────────────► └──────────────────────┘    │
//! │  └──────────────┘        all over LocalBus                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use edgetwin_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_duration(3.0).run(ScenarioId::Handshake);
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod runner;
pub mod scenarios;
mod twin;

pub use context::{settle, SimContext};
pub use network::{BusStats, LocalBus, LocalEndpoint};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use twin::{sample_bootstrap, DrugTwin, PhysicalTwin, TwinError};
