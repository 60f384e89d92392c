//! Conservation enforcer.
//!
//! After every step the enforcer compares `E_sym + E_asym` against `E_0` and,
//! where the deviation exceeds the tolerance, rescales both components by the
//! same factor so their sum is `E_0` again. Each component keeps its sign and
//! their ratio is preserved; only the sum is corrected.
//!
//! Violations are soft: they are corrected, logged and reported, never
//! returned as errors.

use crate::error::{LatticeError, Result};
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Where the invariant is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Every node must hold exactly `E_0`
    #[default]
    PerNode,

    /// Only the lattice total must equal `node_count * E_0`
    Global,
}

/// A single correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Corrected node, or `None` for a lattice-wide correction
    pub node_index: Option<usize>,

    /// Energy the node (or lattice) should hold
    pub expected: f64,

    /// Energy found before correction
    pub actual: f64,

    /// `actual - expected`
    pub deviation: f64,

    /// Simulation time of the correction
    pub timestamp: f64,
}

/// Outcome of one enforcement (or verification) pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConservationReport {
    pub violations: Vec<Violation>,
    pub max_deviation: f64,
    pub avg_deviation: f64,

    /// True when nothing exceeded the tolerance
    pub is_conserved: bool,
}

/// Restores the energy invariant after each step.
#[derive(Debug, Clone)]
pub struct ConservationEnforcer {
    tolerance: f64,
    granularity: Granularity,

    /// Every correction made since the last `clear_log`
    log: Vec<Violation>,
}

impl ConservationEnforcer {
    pub fn new(tolerance: f64) -> Result<Self> {
        Self::with_granularity(tolerance, Granularity::PerNode)
    }

    pub fn with_granularity(tolerance: f64, granularity: Granularity) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(LatticeError::parameter(format!("tolerance must be >= 0, got {}", tolerance)));
        }
        Ok(Self {
            tolerance,
            granularity,
            log: Vec::new(),
        })
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Corrections recorded so far.
    pub fn log(&self) -> &[Violation] {
        &self.log
    }

    pub fn total_corrections(&self) -> usize {
        self.log.len()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Checks and corrects the lattice.
    pub fn enforce(&mut self, lattice: &mut Lattice, e_0: f64, timestamp: f64) -> ConservationReport {
        let report = match self.granularity {
            Granularity::PerNode => self.enforce_per_node(lattice, e_0, timestamp),
            Granularity::Global => self.enforce_global(lattice, e_0, timestamp),
        };

        if !report.is_conserved {
            warn!(
                corrections = report.violations.len(),
                max_deviation = report.max_deviation,
                "energy conservation restored"
            );
        }
        self.log.extend(report.violations.iter().cloned());
        report
    }

    /// Checks the lattice without modifying it.
    pub fn verify(&self, lattice: &Lattice, e_0: f64, timestamp: f64) -> ConservationReport {
        match self.granularity {
            Granularity::PerNode => {
                let deviations: Vec<(usize, f64, f64)> = lattice
                    .nodes()
                    .iter()
                    .enumerate()
                    .map(|(i, n)| (i, n.total_energy(), n.total_energy() - e_0))
                    .collect();
                self.summarize(&deviations, e_0, timestamp)
            }
            Granularity::Global => {
                let totals = lattice.total_energy();
                let expected = e_0 * lattice.len() as f64;
                let mut report = self.summarize(&[(0, totals.total(), totals.total() - expected)], expected, timestamp);
                for v in &mut report.violations {
                    v.node_index = None;
                }
                report
            }
        }
    }

    fn summarize(&self, deviations: &[(usize, f64, f64)], expected: f64, timestamp: f64) -> ConservationReport {
        let mut report = ConservationReport::default();
        let mut sum = 0.0;

        for &(index, actual, deviation) in deviations {
            let magnitude = deviation.abs();
            sum += magnitude;
            report.max_deviation = report.max_deviation.max(magnitude);
            if magnitude > self.tolerance {
                report.violations.push(Violation {
                    node_index: Some(index),
                    expected,
                    actual,
                    deviation,
                    timestamp,
                });
            }
        }

        if !deviations.is_empty() {
            report.avg_deviation = sum / deviations.len() as f64;
        }
        report.is_conserved = report.violations.is_empty();
        report
    }

    fn enforce_per_node(&mut self, lattice: &mut Lattice, e_0: f64, timestamp: f64) -> ConservationReport {
        let report = self.verify(lattice, e_0, timestamp);

        for violation in &report.violations {
            if let Some(node) = violation.node_index.and_then(|i| lattice.node_at_index_mut(i)) {
                let (e_sym, e_asym) = rescale(node.e_sym, node.e_asym, e_0);
                node.e_sym = e_sym;
                node.e_asym = e_asym;
                debug!(node = violation.node_index, deviation = violation.deviation, "rescaled node energy");
            }
        }

        report
    }

    fn enforce_global(&mut self, lattice: &mut Lattice, e_0: f64, timestamp: f64) -> ConservationReport {
        let report = self.verify(lattice, e_0, timestamp);
        if report.is_conserved {
            return report;
        }

        let total = lattice.total_energy().total();
        let count = lattice.len() as f64;
        let expected = e_0 * count;
        for node in lattice.nodes_mut() {
            if total > 0.0 {
                let factor = expected / total;
                node.e_sym = node.e_sym.max(0.0) * factor;
                node.e_asym = node.e_asym.max(0.0) * factor;
            } else {
                node.e_sym = e_0;
                node.e_asym = 0.0;
            }
        }

        report
    }
}

/// Scales `(e_sym, e_asym)` so the pair sums to `e_0`, keeping their ratio.
///
/// Negative components are clamped to zero first. A pair with no energy is
/// returned as pure vacuum `(e_0, 0)`.
pub fn rescale(e_sym: f64, e_asym: f64, e_0: f64) -> (f64, f64) {
    let e_sym = e_sym.max(0.0);
    let e_asym = e_asym.max(0.0);
    let sum = e_sym + e_asym;
    if sum <= 0.0 {
        return (e_0, 0.0);
    }
    let scaled_sym = e_sym * e_0 / sum;
    (scaled_sym, (e_0 - scaled_sym).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_rescale_preserves_ratio() {
        let (sym, asym) = rescale(0.9, 0.3, 1.0);
        assert_relative_eq!(sym, 0.75, epsilon = 1e-15);
        assert_relative_eq!(asym, 0.25, epsilon = 1e-15);
        assert_eq!(sym + asym, 1.0);
    }

    #[test]
    fn test_rescale_empty_node() {
        assert_eq!(rescale(0.0, 0.0, 2.0), (2.0, 0.0));
        assert_eq!(rescale(-1.0, 0.5, 1.0), (0.0, 1.0));
    }

    #[test]
    fn test_enforce_corrects_and_logs() {
        let mut lattice = Lattice::new(&LatticeConfig::cube(2, 1), 1.0).unwrap();
        {
            let node = lattice.node_at_index_mut(3).unwrap();
            node.e_sym = 0.9;
            node.e_asym = 0.3;
        }
        let mut enforcer = ConservationEnforcer::new(1e-6).unwrap();

        let report = enforcer.enforce(&mut lattice, 1.0, 4.0);

        assert!(!report.is_conserved);
        assert_eq!(report.violations.len(), 1);
        let violation = &report.violations[0];
        assert_eq!(violation.node_index, Some(3));
        assert_relative_eq!(violation.actual, 1.2, epsilon = 1e-12);
        assert_relative_eq!(violation.deviation, 0.2, epsilon = 1e-12);
        assert_eq!(violation.timestamp, 4.0);
        assert_relative_eq!(report.max_deviation, 0.2, epsilon = 1e-12);
        assert_relative_eq!(report.avg_deviation, 0.025, epsilon = 1e-12);

        let node = lattice.node_at_index(3).unwrap();
        assert_eq!(node.total_energy(), 1.0);
        assert_relative_eq!(node.e_sym / node.e_asym, 3.0, epsilon = 1e-12);
        assert_eq!(enforcer.total_corrections(), 1);

        let second = enforcer.enforce(&mut lattice, 1.0, 5.0);
        assert!(second.is_conserved);
        assert_eq!(enforcer.total_corrections(), 1);

        enforcer.clear_log();
        assert!(enforcer.log().is_empty());
    }

    #[test]
    fn test_within_tolerance_is_left_alone() {
        let mut lattice = Lattice::new(&LatticeConfig::cube(2, 1), 1.0).unwrap();
        lattice.node_at_index_mut(0).unwrap().e_asym = 1e-9;
        let mut enforcer = ConservationEnforcer::new(1e-6).unwrap();

        let report = enforcer.enforce(&mut lattice, 1.0, 0.0);
        assert!(report.is_conserved);
        assert_eq!(lattice.node_at_index(0).unwrap().e_asym, 1e-9);
    }

    #[test]
    fn test_global_granularity() {
        let mut lattice = Lattice::new(&LatticeConfig::cube(2, 1), 1.0).unwrap();
        lattice.node_at_index_mut(0).unwrap().e_asym = 0.8;
        let mut enforcer = ConservationEnforcer::with_granularity(1e-6, Granularity::Global).unwrap();

        let report = enforcer.enforce(&mut lattice, 1.0, 1.0);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].node_index, None);
        assert_relative_eq!(report.violations[0].expected, 8.0);
        assert_relative_eq!(lattice.total_energy().total(), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_verify_does_not_mutate() {
        let mut lattice = Lattice::new(&LatticeConfig::cube(2, 1), 1.0).unwrap();
        lattice.node_at_index_mut(1).unwrap().e_sym = 0.5;
        let enforcer = ConservationEnforcer::new(1e-6).unwrap();

        let report = enforcer.verify(&lattice, 1.0, 0.0);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(lattice.node_at_index(1).unwrap().e_sym, 0.5);
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        assert!(ConservationEnforcer::new(-1.0).is_err());
    }
}
