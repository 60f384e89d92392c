//! InfoLattice Core - Informational Lattice Simulation Engine
//!
//! A discrete lattice whose nodes carry a binary spin and two energy
//! components that always sum to a conserved `E_0`. The engine provides:
//! 1. **Two evolution rules**: stochastic symmetry propagation and a
//!    deterministic, exactly reversible six-phase swap
//! 2. **Conservation enforcement**: soft invariant, rescaled after each step
//! 3. **Anomaly detection**: persistence windows producing stable-defect records
//! 4. **Reversibility validation**: the Photon Window forward/backward test
//! 5. **Analytics**: Welford correlation, energy drift, Fourier-mode amplitude
//!
//! # Usage
//!
//! ```
//! use infolattice_core::{LatticeConfig, PhotonWindowTest, Simulation, SimulationConfig};
//!
//! let config = SimulationConfig {
//!     lattice: LatticeConfig::cube(8, 6),
//!     ..Default::default()
//! };
//! let mut sim = Simulation::seeded(config, 42).unwrap();
//! let result = PhotonWindowTest::run(&mut sim, 100).unwrap();
//! assert_eq!(result.hamming_distance, 0);
//! ```

pub mod analytics;
pub mod anomaly;
pub mod conservation;
pub mod error;
pub mod evolution;
pub mod lattice;
pub mod node;
pub mod photon_window;
pub mod reversible;
pub mod simulation;
pub mod stochastic;

// Re-export key types for convenience
pub use analytics::{Analytics, DriftMonitor, ModeAmplitudeTracker, OnlineCorrelation};
pub use anomaly::{AnomalyDetector, AnomalyRecord, AnomalyReport, AnomalyStatistics, DetectorConfig};
pub use conservation::{ConservationEnforcer, ConservationReport, Granularity, Violation};
pub use error::{LatticeError, Result};
pub use evolution::{Evolution, EvolutionKind, StepOutcome};
pub use lattice::{hamming_distance, EnergyTotals, Lattice, LatticeConfig, LatticeStatistics, Topology};
pub use node::{Node, NodeState, Position, Spin};
pub use photon_window::{PhotonWindowResult, PhotonWindowTest};
pub use reversible::ReversibleSwap;
pub use simulation::{Bookmark, Direction, HistoryEntry, Simulation, SimulationConfig, SimulationParams, StepResult};
pub use stochastic::{StochasticConfig, StochasticPropagation};
