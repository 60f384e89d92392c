//! Stochastic symmetry propagation.
//!
//! Each node restores or breaks symmetry with a probability driven by its
//! neighborhood:
//!
//! ```text
//! p = clamp(strength * localSymmetry - anomalyProbability * energyGradient, 0, 1)
//! ```
//!
//! Anomalous nodes occasionally radiate a decaying wave
//! `exp(-d / range) * cos(d * waveSpeed)` into their surroundings. The rule
//! draws from an injected random source and is not invertible.

use crate::error::{LatticeError, Result};
use crate::evolution::EvolutionContext;
use crate::lattice::Lattice;
use crate::node::{NodeState, SYMMETRY_BREAK_RATIO};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fraction of `E_0 * coupling * dt` moved per step.
const TRANSFER_RATE: f64 = 0.05;

/// Scale of the energy bump deposited by a propagating wave.
const ENERGY_BUMP: f64 = 0.1;

/// Minimum asymmetric share of a node forced anomalous by a wave.
const ANOMALY_FLOOR: f64 = 0.5;

/// Parameters of the stochastic rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StochasticConfig {
    /// Weight of local symmetry in the restore probability
    pub strength: f64,

    /// Weight of the energy gradient, and per-step emission chance of an anomalous node
    pub anomaly_probability: f64,

    /// Spatial frequency of the propagating wave
    pub wave_speed: f64,

    /// Radius of a propagating wave, in lattice units
    pub propagation_range: f64,
}

impl Default for StochasticConfig {
    fn default() -> Self {
        Self {
            strength: 0.95,
            anomaly_probability: 0.05,
            wave_speed: 1.0,
            propagation_range: 3.0,
        }
    }
}

impl StochasticConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || self.strength < 0.0 {
            return Err(LatticeError::parameter(format!("strength must be >= 0, got {}", self.strength)));
        }
        if !(0.0..=1.0).contains(&self.anomaly_probability) {
            return Err(LatticeError::parameter(format!(
                "anomaly_probability must be in [0, 1], got {}",
                self.anomaly_probability
            )));
        }
        if !self.wave_speed.is_finite() {
            return Err(LatticeError::parameter("wave_speed must be finite"));
        }
        if !self.propagation_range.is_finite() || self.propagation_range <= 0.0 {
            return Err(LatticeError::parameter("propagation_range must be positive"));
        }
        Ok(())
    }
}

/// Counts from one stochastic step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StochasticStepSummary {
    pub restored: usize,
    pub broken: usize,
    pub flipped: usize,
    pub emissions: usize,
}

/// Effect of one propagating wave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationSummary {
    /// Nodes within 30% of the range, forced anomalous
    pub forced: usize,

    /// Vacuum nodes within 70% of the range that broke symmetry
    pub transitioned: usize,

    /// Nodes that only received an energy bump
    pub bumped: usize,
}

/// The stochastic propagation rule.
#[derive(Debug, Clone)]
pub struct StochasticPropagation {
    config: StochasticConfig,
}

impl StochasticPropagation {
    pub fn new(config: StochasticConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StochasticConfig {
        &self.config
    }

    /// Weighted fraction of symmetric neighbors (1.0 with no neighbors).
    pub fn local_symmetry(&self, lattice: &Lattice, index: usize, range: usize) -> f64 {
        let neighbors = lattice.neighbors(index, range);
        if neighbors.is_empty() {
            return 1.0;
        }
        neighbors.iter().map(|n| n.state.symmetry_weight()).sum::<f64>() / neighbors.len() as f64
    }

    /// `|E_asym - mean neighbor E_asym| / E_0`, clamped to [0, 1].
    pub fn energy_gradient(&self, lattice: &Lattice, index: usize, range: usize) -> f64 {
        let Some(node) = lattice.node_at_index(index) else {
            return 0.0;
        };
        let neighbors = lattice.neighbors(index, range);
        if neighbors.is_empty() {
            return 0.0;
        }
        let mean = neighbors.iter().map(|n| n.e_asym).sum::<f64>() / neighbors.len() as f64;
        ((node.e_asym - mean).abs() / lattice.e_0()).clamp(0.0, 1.0)
    }

    /// Probability that the node relaxes toward symmetry this step.
    pub fn transition_probability(&self, lattice: &Lattice, index: usize, range: usize) -> f64 {
        let symmetry = self.local_symmetry(lattice, index, range);
        let gradient = self.energy_gradient(lattice, index, range);
        (self.config.strength * symmetry - self.config.anomaly_probability * gradient).clamp(0.0, 1.0)
    }

    /// Advances the lattice by one stochastic step.
    ///
    /// Probabilities are taken from the pre-step lattice so the result does
    /// not depend on node iteration order. Energy moves between components
    /// only; waves emitted by anomalous nodes deposit extra energy that the
    /// conservation enforcer later rescales.
    pub fn step<R: Rng + ?Sized>(
        &self,
        lattice: &mut Lattice,
        ctx: &EvolutionContext,
        rng: &mut R,
    ) -> StochasticStepSummary {
        let e_0 = lattice.e_0();
        let transfer = ctx.coupling_strength * ctx.dt.abs() * e_0 * TRANSFER_RATE;
        let probabilities: Vec<f64> = (0..lattice.len())
            .map(|i| self.transition_probability(lattice, i, ctx.interaction_range))
            .collect();

        let mut summary = StochasticStepSummary::default();

        for (node, p) in lattice.nodes_mut().iter_mut().zip(probabilities) {
            if rng.gen::<f64>() < p {
                node.transfer_to_asym(-transfer);
                summary.restored += 1;
            } else {
                node.transfer_to_asym(transfer);
                summary.broken += 1;
                if rng.gen::<f64>() < 0.5 {
                    node.flip_spin();
                    summary.flipped += 1;
                }
            }
            if node.state == NodeState::Anomalous {
                node.set_phase(node.phase + node.omega * ctx.dt);
            }
            node.reclassify(e_0);
        }

        let sources: Vec<usize> = lattice
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| n.state == NodeState::Anomalous)
            .map(|(i, _)| i)
            .collect();

        for source in sources {
            if rng.gen::<f64>() < self.config.anomaly_probability {
                self.propagate_anomaly(lattice, source, rng);
                summary.emissions += 1;
            }
        }

        debug!(
            restored = summary.restored,
            broken = summary.broken,
            emissions = summary.emissions,
            "stochastic step"
        );
        summary
    }

    /// Radiates a decaying wave from `source`.
    ///
    /// Nodes within 30% of the range become anomalous, vacuum nodes within
    /// 70% may break symmetry with probability `|amplitude|`, and all nodes
    /// in range receive an energy bump proportional to `|amplitude|`.
    pub fn propagate_anomaly<R: Rng + ?Sized>(
        &self,
        lattice: &mut Lattice,
        source: usize,
        rng: &mut R,
    ) -> PropagationSummary {
        let mut summary = PropagationSummary::default();
        if source >= lattice.len() {
            return summary;
        }

        let range = self.config.propagation_range;
        let e_0 = lattice.e_0();
        let mut targets = vec![source];
        targets.extend(lattice.neighbor_indices(source, range.ceil() as usize));

        for target in targets {
            let distance = lattice.distance(source, target);
            if distance > range {
                continue;
            }
            let amplitude = (-distance / range).exp() * (distance * self.config.wave_speed).cos();
            let strength = amplitude.abs();
            let bump = strength * e_0 * ENERGY_BUMP;

            let Some(node) = lattice.node_at_index_mut(target) else {
                continue;
            };

            if distance <= 0.3 * range {
                node.e_asym = (node.e_asym + bump).max(ANOMALY_FLOOR * e_0);
                node.mark_anomalous(0.5 + 4.5 * strength);
                summary.forced += 1;
            } else if distance <= 0.7 * range
                && node.state == NodeState::Vacuum
                && rng.gen::<f64>() < strength
            {
                node.transfer_to_asym(2.0 * SYMMETRY_BREAK_RATIO * e_0);
                node.e_asym += bump;
                node.state = NodeState::Broken;
                summary.transitioned += 1;
            } else {
                node.e_asym += bump;
                summary.bumped += 1;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ctx() -> EvolutionContext {
        EvolutionContext {
            coupling_strength: 1.0,
            dt: 1.0,
            interaction_range: 1,
        }
    }

    #[test]
    fn test_vacuum_neighborhood_probability() {
        let lattice = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        let rule = StochasticPropagation::new(StochasticConfig::default()).unwrap();

        assert_eq!(rule.local_symmetry(&lattice, 0, 1), 1.0);
        assert_eq!(rule.energy_gradient(&lattice, 0, 1), 0.0);
        assert!((rule.transition_probability(&lattice, 0, 1) - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_anomalous_neighbors_lower_symmetry() {
        let mut lattice = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        for i in lattice.neighbor_indices(0, 1) {
            lattice.nodes_mut()[i].mark_anomalous(1.0);
        }
        let rule = StochasticPropagation::new(StochasticConfig::default()).unwrap();
        assert_eq!(rule.local_symmetry(&lattice, 0, 1), 0.0);
        assert_eq!(rule.transition_probability(&lattice, 0, 1), 0.0);
    }

    #[test]
    fn test_step_is_reproducible_with_same_seed() {
        let rule = StochasticPropagation::new(StochasticConfig::default()).unwrap();
        let mut a = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        let mut b = a.clone();
        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..10 {
            rule.step(&mut a, &ctx(), &mut rng_a);
            rule.step(&mut b, &ctx(), &mut rng_b);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_step_conserves_node_energy() {
        let rule = StochasticPropagation::new(StochasticConfig {
            anomaly_probability: 0.0,
            ..Default::default()
        })
        .unwrap();
        let mut lattice = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..20 {
            rule.step(&mut lattice, &ctx(), &mut rng);
        }
        for node in lattice.nodes() {
            assert!((node.total_energy() - 1.0).abs() < 1e-12);
            assert!(node.e_sym >= 0.0 && node.e_asym >= 0.0);
        }
    }

    #[test]
    fn test_propagation_zones() {
        let rule = StochasticPropagation::new(StochasticConfig::default()).unwrap();
        let mut lattice = Lattice::new(&LatticeConfig::cube(9, 1), 1.0).unwrap();
        let source = lattice.index_of(4, 4, 4).unwrap();
        let far = lattice.index_of(4, 4, 7).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let summary = rule.propagate_anomaly(&mut lattice, source, &mut rng);

        assert_eq!(summary.forced, 1);
        assert_eq!(lattice.nodes()[source].state, NodeState::Anomalous);
        assert!(lattice.nodes()[source].e_asym >= 0.5);
        // Distance 3 is beyond 70% of the range: bump only
        assert_eq!(lattice.nodes()[far].state, NodeState::Vacuum);
        assert!(lattice.nodes()[far].e_asym > 0.0);
        assert!(summary.bumped > 0);
    }

    #[test]
    fn test_vacuum_breaks_in_middle_band() {
        let rule = StochasticPropagation::new(StochasticConfig::default()).unwrap();
        let mut total = 0;

        for seed in 0..16 {
            let mut lattice = Lattice::new(&LatticeConfig::cube(9, 1), 1.0).unwrap();
            let source = lattice.index_of(4, 4, 4).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let summary = rule.propagate_anomaly(&mut lattice, source, &mut rng);

            // Between 30% and 70% of range 3: distances 1 to 2
            let broken: Vec<usize> = (0..lattice.len())
                .filter(|&i| lattice.nodes()[i].state == NodeState::Broken)
                .collect();
            assert_eq!(broken.len(), summary.transitioned);
            for i in broken {
                let d = lattice.distance(source, i);
                assert!(d > 0.9 && d <= 2.1, "broken node at distance {}", d);
                assert!(lattice.nodes()[i].e_asym >= 2.0 * SYMMETRY_BREAK_RATIO);
            }
            total += summary.transitioned;
        }
        assert!(total > 0);
    }

    #[test]
    fn test_huge_range_stays_bounded() {
        let rule = StochasticPropagation::new(StochasticConfig {
            propagation_range: 1e9,
            ..Default::default()
        })
        .unwrap();
        let mut lattice = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let summary = rule.propagate_anomaly(&mut lattice, 0, &mut rng);
        assert_eq!(summary.forced, 64);
        assert_eq!(summary.transitioned + summary.bumped, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StochasticConfig {
            anomaly_probability: 1.5,
            ..Default::default()
        };
        assert!(StochasticPropagation::new(config).is_err());
    }
}
