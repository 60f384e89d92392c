//! Step-evolution strategies, selected once per simulation.

use crate::error::{LatticeError, Result};
use crate::lattice::Lattice;
use crate::reversible::ReversibleSwap;
use crate::stochastic::{StochasticConfig, StochasticPropagation, StochasticStepSummary};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-step inputs shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct EvolutionContext {
    pub coupling_strength: f64,
    pub dt: f64,
    pub interaction_range: usize,
}

/// Which rule to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionKind {
    Stochastic,
    ReversibleSwap,
}

impl std::fmt::Display for EvolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvolutionKind::Stochastic => write!(f, "{}", Evolution::STOCHASTIC),
            EvolutionKind::ReversibleSwap => write!(f, "{}", ReversibleSwap::NAME),
        }
    }
}

/// What a forward step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Stochastic(StochasticStepSummary),
    Swapped { phase: usize },
}

/// The active evolution rule.
#[derive(Debug, Clone)]
pub enum Evolution {
    Stochastic(StochasticPropagation),
    ReversibleSwap(ReversibleSwap),
}

impl Evolution {
    pub const STOCHASTIC: &'static str = "stochastic";

    /// Builds a rule of the given kind.
    pub fn build(kind: EvolutionKind, stochastic: &StochasticConfig) -> Result<Self> {
        Ok(match kind {
            EvolutionKind::Stochastic => Evolution::Stochastic(StochasticPropagation::new(stochastic.clone())?),
            EvolutionKind::ReversibleSwap => Evolution::ReversibleSwap(ReversibleSwap::new()),
        })
    }

    pub fn kind(&self) -> EvolutionKind {
        match self {
            Evolution::Stochastic(_) => EvolutionKind::Stochastic,
            Evolution::ReversibleSwap(_) => EvolutionKind::ReversibleSwap,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Evolution::Stochastic(_) => Self::STOCHASTIC,
            Evolution::ReversibleSwap(_) => ReversibleSwap::NAME,
        }
    }

    /// True when `reverse_step` exactly undoes `step`.
    pub fn is_reversible(&self) -> bool {
        matches!(self, Evolution::ReversibleSwap(_))
    }

    /// Checks the rule's preconditions against a lattice.
    pub fn check(&self, lattice: &Lattice) -> Result<()> {
        match self {
            Evolution::Stochastic(_) => Ok(()),
            Evolution::ReversibleSwap(_) => ReversibleSwap::check_topology(lattice),
        }
    }

    pub fn step<R: Rng + ?Sized>(
        &mut self,
        lattice: &mut Lattice,
        ctx: &EvolutionContext,
        rng: &mut R,
    ) -> Result<StepOutcome> {
        match self {
            Evolution::Stochastic(rule) => Ok(StepOutcome::Stochastic(rule.step(lattice, ctx, rng))),
            Evolution::ReversibleSwap(rule) => {
                let phase = rule.phase();
                rule.step(lattice)?;
                Ok(StepOutcome::Swapped { phase })
            }
        }
    }

    pub fn reverse_step(&mut self, lattice: &mut Lattice) -> Result<()> {
        match self {
            Evolution::Stochastic(_) => Err(LatticeError::NotReversible(Self::STOCHASTIC)),
            Evolution::ReversibleSwap(rule) => rule.reverse_step(lattice),
        }
    }

    /// Phase counter of the swap rule.
    pub fn phase(&self) -> Option<usize> {
        match self {
            Evolution::Stochastic(_) => None,
            Evolution::ReversibleSwap(rule) => Some(rule.phase()),
        }
    }

    /// Restores a saved phase counter; ignored by the stochastic rule.
    pub fn restore_phase(&mut self, phase: Option<usize>) {
        if let (Evolution::ReversibleSwap(rule), Some(phase)) = (self, phase) {
            *rule = ReversibleSwap::with_phase(phase);
        }
    }

    /// Resets internal counters.
    pub fn reset(&mut self) {
        if let Evolution::ReversibleSwap(rule) = self {
            *rule = ReversibleSwap::new();
        }
    }
}
