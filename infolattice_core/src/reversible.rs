//! Deterministic reversible swap rule (Margolus-style pair exchange).
//!
//! A six-phase counter cycles through
//! `x-even, y-odd, z-even, x-odd, y-even, z-odd`. In phase `(axis, parity)`
//! every node with `(x + y + z) mod 2 == parity` exchanges its spin with the
//! node one unit along `axis`, wrapping periodically.
//!
//! A forward step applies the exchanges and advances the phase; a reverse
//! step regresses the phase and replays the same exchanges in the opposite
//! order. On odd-sized axes the wrap can chain exchanges together, so the
//! replay order matters: a sequence of transpositions is undone exactly by
//! the same transpositions applied back to front.

use crate::error::{LatticeError, Result};
use crate::lattice::{Lattice, Topology};
use serde::{Deserialize, Serialize};

/// Number of phases in one full cycle.
pub const PHASE_COUNT: usize = 6;

/// Lattice axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// `(axis, parity)` for each phase index.
pub const PHASES: [(Axis, usize); PHASE_COUNT] = [
    (Axis::X, 0),
    (Axis::Y, 1),
    (Axis::Z, 0),
    (Axis::X, 1),
    (Axis::Y, 0),
    (Axis::Z, 1),
];

/// The reversible swap rule and its phase counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversibleSwap {
    phase: usize,
}

impl ReversibleSwap {
    pub const NAME: &'static str = "reversible_swap";

    pub fn new() -> Self {
        Self { phase: 0 }
    }

    /// Starts the counter at `phase mod 6`.
    pub fn with_phase(phase: usize) -> Self {
        Self {
            phase: phase % PHASE_COUNT,
        }
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Fails unless the lattice wraps periodically.
    pub fn check_topology(lattice: &Lattice) -> Result<()> {
        if lattice.topology() != Topology::Periodic {
            return Err(LatticeError::UnsupportedTopology { strategy: Self::NAME });
        }
        Ok(())
    }

    /// Exchange pairs for a phase, in application order.
    pub fn pairs(lattice: &Lattice, phase: usize) -> Vec<(usize, usize)> {
        let (axis, parity) = PHASES[phase % PHASE_COUNT];
        let (dx, dy, dz) = match axis {
            Axis::X => (1, 0, 0),
            Axis::Y => (0, 1, 0),
            Axis::Z => (0, 0, 1),
        };

        lattice
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.position().parity() == parity)
            .filter_map(|(index, _)| {
                lattice
                    .offset_index(index, dx, dy, dz)
                    .filter(|&partner| partner != index)
                    .map(|partner| (index, partner))
            })
            .collect()
    }

    /// Applies the current phase and advances the counter.
    pub fn step(&mut self, lattice: &mut Lattice) -> Result<()> {
        Self::check_topology(lattice)?;
        for (a, b) in Self::pairs(lattice, self.phase) {
            lattice.swap_spins(a, b);
        }
        self.phase = (self.phase + 1) % PHASE_COUNT;
        Ok(())
    }

    /// Regresses the counter and undoes that phase's exchanges.
    pub fn reverse_step(&mut self, lattice: &mut Lattice) -> Result<()> {
        Self::check_topology(lattice)?;
        self.phase = (self.phase + PHASE_COUNT - 1) % PHASE_COUNT;
        for (a, b) in Self::pairs(lattice, self.phase).into_iter().rev() {
            lattice.swap_spins(a, b);
        }
        Ok(())
    }
}
