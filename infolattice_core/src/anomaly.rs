//! Persistence-based anomaly detection.
//!
//! The detector keeps a bounded `(state, E_asym)` history per node, outside
//! the node itself. A node is flagged persistently broken when:
//!
//! ```text
//! samples >= persistence_threshold
//! (broken + anomalous) / history_depth > persistence_ratio
//! mean(E_asym) > energy_threshold
//! current state != vacuum
//! ```
//!
//! A flagged node yields an [`AnomalyRecord`] with
//! `omega = 0.5 + 4.5 * min(duration / depth, 1) * min(mean E_asym, 1)` and
//! `mass = ħ * omega`. Records accumulate until explicitly cleared.

use crate::error::{LatticeError, Result};
use crate::lattice::Lattice;
use crate::node::{NodeState, Position};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write;
use tracing::info;

/// Reduced Planck constant in simulation units.
pub const HBAR: f64 = 1.0;

/// Header of the CSV export.
pub const CSV_HEADER: &str = "nodeIndex,x,y,z,persistenceDuration,omega,mass,E_asym_avg,timestamp";

/// Detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Samples kept per node
    pub history_depth: usize,

    /// Samples required before a node may be flagged
    pub persistence_threshold: usize,

    /// Required share of non-vacuum samples, relative to `history_depth`
    pub persistence_ratio: f64,

    /// Required mean `E_asym` over the window
    pub energy_threshold: f64,

    /// Mark flagged nodes anomalous and copy `omega` onto them
    pub auto_mark: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history_depth: 50,
            persistence_threshold: 30,
            persistence_ratio: 0.8,
            energy_threshold: 0.3,
            auto_mark: true,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_depth == 0 {
            return Err(LatticeError::InvalidDetectorConfig("history_depth must be at least 1".into()));
        }
        if self.persistence_threshold == 0 || self.persistence_threshold > self.history_depth {
            return Err(LatticeError::InvalidDetectorConfig(format!(
                "persistence_threshold {} must be in 1..={}",
                self.persistence_threshold, self.history_depth
            )));
        }
        if !(0.0..1.0).contains(&self.persistence_ratio) {
            return Err(LatticeError::InvalidDetectorConfig(format!(
                "persistence_ratio {} must be in [0, 1)",
                self.persistence_ratio
            )));
        }
        if !self.energy_threshold.is_finite() {
            return Err(LatticeError::InvalidDetectorConfig("energy_threshold must be finite".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    state: NodeState,
    e_asym: f64,
}

/// A detected stable defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub node_index: usize,
    pub position: Position,

    /// Trailing run of non-vacuum samples
    pub persistence_duration: usize,

    pub omega: f64,

    /// `ħ * omega`
    pub mass: f64,

    /// Mean `E_asym` over the window
    pub e_asym_avg: f64,

    /// Simulation time of detection
    pub timestamp: f64,
}

impl AnomalyRecord {
    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.node_index,
            self.position.x,
            self.position.y,
            self.position.z,
            self.persistence_duration,
            self.omega,
            self.mass,
            self.e_asym_avg,
            self.timestamp
        )
    }
}

/// Result of one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Records created by this pass
    pub new_anomalies: Vec<AnomalyRecord>,

    /// Nodes currently flagged
    pub active: usize,

    /// All records accumulated so far
    pub total_recorded: usize,

    pub timestamp: f64,
}

/// Aggregates over the accumulated records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyStatistics {
    pub count: usize,
    pub avg_omega: f64,
    pub min_omega: f64,
    pub max_omega: f64,
    pub avg_mass: f64,
    pub avg_persistence: f64,
    pub max_persistence: usize,
}

/// Tracks per-node persistence and records anomalies.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,

    /// Sample window per node
    histories: Vec<VecDeque<Sample>>,

    /// Nodes flagged in the latest pass; one record per episode
    active: Vec<bool>,

    records: Vec<AnomalyRecord>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            histories: Vec::new(),
            active: Vec::new(),
            records: Vec::new(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Number of samples held for a node.
    pub fn history_len(&self, index: usize) -> usize {
        self.histories.get(index).map_or(0, VecDeque::len)
    }

    pub fn is_flagged(&self, index: usize) -> bool {
        self.active.get(index).copied().unwrap_or(false)
    }

    /// Samples every node and records newly persistent ones.
    ///
    /// Histories are rebuilt from scratch when the lattice size changes.
    pub fn detect_anomalies(&mut self, lattice: &mut Lattice, timestamp: f64) -> AnomalyReport {
        if self.histories.len() != lattice.len() {
            self.histories = vec![VecDeque::with_capacity(self.config.history_depth); lattice.len()];
            self.active = vec![false; lattice.len()];
        }

        let mut new_anomalies = Vec::new();
        let depth = self.config.history_depth;

        for index in 0..lattice.len() {
            let Some(node) = lattice.node_at_index_mut(index) else {
                continue;
            };
            let history = &mut self.histories[index];
            history.push_back(Sample {
                state: node.state,
                e_asym: node.e_asym,
            });
            while history.len() > depth {
                history.pop_front();
            }

            match Self::evaluate(&self.config, history, node.state) {
                Some((duration, mean_e_asym)) => {
                    let persistence_factor = (duration as f64 / depth as f64).min(1.0);
                    let energy_factor = mean_e_asym.clamp(0.0, 1.0);
                    let omega = 0.5 + 4.5 * persistence_factor * energy_factor;

                    if self.config.auto_mark {
                        node.mark_anomalous(omega);
                    }

                    if !self.active[index] {
                        self.active[index] = true;
                        let record = AnomalyRecord {
                            node_index: index,
                            position: node.position(),
                            persistence_duration: duration,
                            omega,
                            mass: HBAR * omega,
                            e_asym_avg: mean_e_asym,
                            timestamp,
                        };
                        info!(node = index, omega, duration, "persistent anomaly detected");
                        new_anomalies.push(record);
                    }
                }
                None => self.active[index] = false,
            }
        }

        self.records.extend(new_anomalies.iter().cloned());

        AnomalyReport {
            new_anomalies,
            active: self.active.iter().filter(|&&a| a).count(),
            total_recorded: self.records.len(),
            timestamp,
        }
    }

    /// Returns `(persistence duration, mean E_asym)` when the window qualifies.
    fn evaluate(config: &DetectorConfig, history: &VecDeque<Sample>, current: NodeState) -> Option<(usize, f64)> {
        if history.len() < config.persistence_threshold || current == NodeState::Vacuum {
            return None;
        }

        let broken = history.iter().filter(|s| s.state.is_broken()).count();
        if broken as f64 / config.history_depth as f64 <= config.persistence_ratio {
            return None;
        }

        let mean = history.iter().map(|s| s.e_asym).sum::<f64>() / history.len() as f64;
        if mean <= config.energy_threshold {
            return None;
        }

        let duration = history.iter().rev().take_while(|s| s.state.is_broken()).count();
        Some((duration, mean))
    }

    pub fn records(&self) -> &[AnomalyRecord] {
        &self.records
    }

    /// Latest record for a node.
    pub fn record_for(&self, index: usize) -> Option<&AnomalyRecord> {
        self.records.iter().rev().find(|r| r.node_index == index)
    }

    /// Derived on demand from the records.
    pub fn statistics(&self) -> AnomalyStatistics {
        if self.records.is_empty() {
            return AnomalyStatistics::default();
        }
        let count = self.records.len() as f64;
        let mut stats = AnomalyStatistics {
            count: self.records.len(),
            min_omega: f64::MAX,
            max_omega: f64::MIN,
            ..Default::default()
        };

        for record in &self.records {
            stats.avg_omega += record.omega;
            stats.avg_mass += record.mass;
            stats.avg_persistence += record.persistence_duration as f64;
            stats.min_omega = stats.min_omega.min(record.omega);
            stats.max_omega = stats.max_omega.max(record.omega);
            stats.max_persistence = stats.max_persistence.max(record.persistence_duration);
        }

        stats.avg_omega /= count;
        stats.avg_mass /= count;
        stats.avg_persistence /= count;
        stats
    }

    /// All records as CSV, header first.
    pub fn export_to_csv(&self) -> String {
        let mut csv = String::from(CSV_HEADER);
        csv.push('\n');
        for record in &self.records {
            // Writing to a String cannot fail
            let _ = writeln!(csv, "{}", record.csv_row());
        }
        csv
    }

    /// Drops accumulated records, keeping the persistence windows.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Empties every persistence window and flag, keeping the records.
    ///
    /// Used when the lattice jumps to a restored state, so samples from an
    /// abandoned timeline cannot count towards persistence.
    pub fn clear_windows(&mut self) {
        for window in &mut self.histories {
            window.clear();
        }
        self.active.iter_mut().for_each(|flag| *flag = false);
    }

    /// Drops records, windows and flags.
    pub fn reset(&mut self) {
        self.records.clear();
        self.histories.clear();
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeConfig;
    use approx::assert_relative_eq;

    fn broken_lattice(e_asym: f64) -> Lattice {
        let mut lattice = Lattice::new(&LatticeConfig::cube(2, 1), 1.0).unwrap();
        let node = lattice.node_at_index_mut(5).unwrap();
        node.transfer_to_asym(e_asym);
        node.reclassify(1.0);
        lattice
    }

    #[test]
    fn test_not_flagged_before_threshold() {
        let mut lattice = broken_lattice(0.6);
        let mut detector = AnomalyDetector::new(DetectorConfig::default()).unwrap();

        for step in 0..40 {
            let report = detector.detect_anomalies(&mut lattice, step as f64);
            assert!(report.new_anomalies.is_empty(), "flagged at step {}", step);
        }
        assert_eq!(detector.history_len(5), 40);

        // 41 of 50 slots broken crosses the 0.8 ratio
        let report = detector.detect_anomalies(&mut lattice, 40.0);
        assert_eq!(report.new_anomalies.len(), 1);
        let record = &report.new_anomalies[0];
        assert_eq!(record.node_index, 5);
        assert_eq!(record.persistence_duration, 41);
        assert_relative_eq!(record.e_asym_avg, 0.6, epsilon = 1e-12);
        assert_relative_eq!(record.omega, 0.5 + 4.5 * (41.0 / 50.0) * 0.6, epsilon = 1e-12);
        assert_eq!(record.mass, record.omega);
        assert_eq!(record.timestamp, 40.0);
    }

    #[test]
    fn test_auto_mark_and_single_record_per_episode() {
        let mut lattice = broken_lattice(0.6);
        let mut detector = AnomalyDetector::new(DetectorConfig::default()).unwrap();

        for step in 0..60 {
            detector.detect_anomalies(&mut lattice, step as f64);
        }

        let node = lattice.node_at_index(5).unwrap();
        assert_eq!(node.state, NodeState::Anomalous);
        assert!(node.omega > 0.5);
        assert_eq!(detector.records().len(), 1);
        assert!(detector.is_flagged(5));
        assert_eq!(detector.history_len(5), 50);
    }

    #[test]
    fn test_clear_windows_restarts_persistence() {
        let mut lattice = broken_lattice(0.6);
        let mut detector = AnomalyDetector::new(DetectorConfig::default()).unwrap();
        for step in 0..45 {
            detector.detect_anomalies(&mut lattice, step as f64);
        }
        assert!(detector.is_flagged(5));

        detector.clear_windows();
        assert_eq!(detector.history_len(5), 0);
        assert!(!detector.is_flagged(5));
        assert_eq!(detector.records().len(), 1);

        for step in 0..40 {
            let report = detector.detect_anomalies(&mut lattice, step as f64);
            assert!(report.new_anomalies.is_empty());
        }
        assert_eq!(detector.detect_anomalies(&mut lattice, 40.0).new_anomalies.len(), 1);
        assert_eq!(detector.records().len(), 2);
    }

    #[test]
    fn test_low_energy_never_flags() {
        let mut lattice = broken_lattice(0.2);
        let mut detector = AnomalyDetector::new(DetectorConfig::default()).unwrap();
        for step in 0..100 {
            detector.detect_anomalies(&mut lattice, step as f64);
        }
        assert!(detector.records().is_empty());
    }

    #[test]
    fn test_vacuum_breaks_persistence_run() {
        let config = DetectorConfig {
            history_depth: 10,
            persistence_threshold: 10,
            persistence_ratio: 0.5,
            auto_mark: false,
            ..Default::default()
        };
        let mut detector = AnomalyDetector::new(config).unwrap();
        let mut lattice = broken_lattice(0.8);

        for step in 0..6 {
            detector.detect_anomalies(&mut lattice, step as f64);
        }
        {
            let node = lattice.node_at_index_mut(5).unwrap();
            node.transfer_to_asym(-1.0);
            node.reclassify(1.0);
        }
        detector.detect_anomalies(&mut lattice, 6.0);
        {
            let node = lattice.node_at_index_mut(5).unwrap();
            node.transfer_to_asym(0.8);
            node.reclassify(1.0);
        }
        let mut found = None;
        for step in 7..10 {
            let report = detector.detect_anomalies(&mut lattice, step as f64);
            if let Some(record) = report.new_anomalies.into_iter().next() {
                found = Some(record);
            }
        }

        let record = found.expect("node should be flagged once the window fills");
        assert_eq!(record.persistence_duration, 3);
        assert_eq!(lattice.node_at_index(5).unwrap().state, NodeState::Broken);
    }

    #[test]
    fn test_statistics_and_csv() {
        let mut lattice = broken_lattice(0.6);
        let mut detector = AnomalyDetector::new(DetectorConfig::default()).unwrap();
        assert_eq!(detector.statistics().count, 0);

        for step in 0..45 {
            detector.detect_anomalies(&mut lattice, step as f64);
        }

        let stats = detector.statistics();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min_omega, stats.max_omega);
        assert_eq!(stats.max_persistence, 41);

        let csv = detector.export_to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let row = lines.next().unwrap();
        assert!(row.starts_with("5,1,0,1,41,"));
        assert!(lines.next().is_none());

        detector.clear();
        assert!(detector.records().is_empty());
        assert_eq!(detector.history_len(5), 45);

        detector.reset();
        assert_eq!(detector.history_len(5), 0);
    }

    #[test]
    fn test_config_validation() {
        let config = DetectorConfig {
            history_depth: 20,
            persistence_threshold: 30,
            ..Default::default()
        };
        assert!(matches!(
            AnomalyDetector::new(config),
            Err(LatticeError::InvalidDetectorConfig(_))
        ));
    }
}
