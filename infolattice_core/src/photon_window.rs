//! Photon Window reversibility test.
//!
//! Captures the spin vector, runs `N` forward steps of the reversible rule,
//! runs `N` backward steps, and compares:
//!
//! ```text
//! ratio = hamming(initial, final) / total_nodes      pass when ratio < 0.001
//! ```
//!
//! For the swap rule each phase is an involution, so a correct engine always
//! reports a distance of exactly zero.
//!
//! The test drives the simulation through ordinary steps, so it may be
//! stopped between any two of them. Resizing the simulation while a test is
//! in flight is a caller error and is not detected.

use crate::error::{LatticeError, Result};
use crate::lattice::hamming_distance;
use crate::simulation::{Direction, Simulation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Largest reversibility ratio that still passes.
pub const PASS_RATIO: f64 = 0.001;

/// Outcome of one forward/backward cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotonWindowResult {
    pub hamming_distance: usize,
    pub reversibility_ratio: f64,
    pub passed: bool,

    /// Forward steps (the same number of backward steps follow)
    pub steps: usize,

    pub total_nodes: usize,

    /// Lattice energy total is bit-identical before and after
    pub energy_preserved: bool,
}

/// Runs the forward/backward reversibility check.
pub struct PhotonWindowTest;

impl PhotonWindowTest {
    /// Runs `steps` forward then `steps` backward steps.
    pub fn run(sim: &mut Simulation, steps: usize) -> Result<PhotonWindowResult> {
        Self::run_with_progress(sim, steps, |_, _| true)
    }

    /// Like [`PhotonWindowTest::run`], calling `on_step(done, total)` after each
    /// step. Returning `false` cancels; the simulation is left after the last
    /// completed step.
    pub fn run_with_progress<F>(sim: &mut Simulation, steps: usize, mut on_step: F) -> Result<PhotonWindowResult>
    where
        F: FnMut(usize, usize) -> bool,
    {
        if !sim.evolution().is_reversible() {
            return Err(LatticeError::NotReversible(sim.evolution().name()));
        }

        let initial = sim.lattice().spins();
        let initial_energy = sim.lattice().total_energy().total();
        let dt = sim.params().time_step;
        let total = 2 * steps;

        for (done, direction) in std::iter::repeat(Direction::Forward)
            .take(steps)
            .chain(std::iter::repeat(Direction::Backward).take(steps))
            .enumerate()
        {
            sim.step_in(direction, dt)?;
            if !on_step(done + 1, total) {
                debug!(completed = done + 1, total, "photon window cancelled");
                return Err(LatticeError::Cancelled {
                    completed: done + 1,
                    total,
                });
            }
        }

        let final_spins = sim.lattice().spins();
        let distance = hamming_distance(&initial, &final_spins);
        let total_nodes = initial.len();
        let ratio = if total_nodes == 0 {
            0.0
        } else {
            distance as f64 / total_nodes as f64
        };
        let final_energy = sim.lattice().total_energy().total();

        let result = PhotonWindowResult {
            hamming_distance: distance,
            reversibility_ratio: ratio,
            passed: ratio < PASS_RATIO,
            steps,
            total_nodes,
            energy_preserved: initial_energy.to_bits() == final_energy.to_bits(),
        };
        info!(
            steps,
            hamming = result.hamming_distance,
            ratio = result.reversibility_ratio,
            passed = result.passed,
            "photon window complete"
        );
        Ok(result)
    }
}
