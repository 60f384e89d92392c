//! InfoLattice Deterministic Simulation Testing (DST) Harness
//!
//! Drives the lattice engine through named scenarios. Every run is fully
//! determined by one 64-bit seed: the engine draws from a ChaCha8 stream
//! seeded with it, and auxiliary noise uses a sub-seed derived from it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   ScenarioRunner                     │
//! │   HarnessConfig ──► SimulationConfig per scenario    │
//! │        │                                             │
//! │   ┌────▼──────────────────────────────────────────┐  │
//! │   │ Simulation                                    │  │
//! │   │  rule ─► enforcer ─► detector ─► analytics    │  │
//! │   └────┬──────────────────────────────────────────┘  │
//! │        │ frames                                      │
//! │   ┌────▼─────┐                                       │
//! │   │SimExport │ ──► JSON                              │
//! │   └──────────┘                                       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use infolattice_sim::{HarnessConfig, ScenarioId, ScenarioRunner};
//!
//! let runner = ScenarioRunner::new(42, HarnessConfig::default()).with_steps(12);
//! let result = runner.run(ScenarioId::PhotonWindow);
//! assert!(result.passed);
//! ```

pub mod config;
pub mod exporter;
pub mod runner;
pub mod scenarios;

pub use config::{ConfigError, HarnessConfig};
pub use exporter::{LatticeInfo, SimExport, SimFrame};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
