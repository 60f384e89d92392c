//! JSON exporter for offline visualization.
//!
//! Exports sampled simulation frames as JSON. Rendering is left to external
//! tools; frames only carry snapshot accessors of the engine.

use infolattice_core::{AnomalyRecord, EnergyTotals, Lattice, LatticeStatistics, Simulation, Topology};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

use crate::runner::ScenarioMetrics;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time
    pub time: f64,

    /// Steps executed so far
    pub step: u64,

    /// Node state counts and E_asym extremes
    pub statistics: LatticeStatistics,

    /// Energy sums
    pub energy: EnergyTotals,

    /// Swap-rule phase, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<usize>,

    /// Latest mode amplitude, if tracked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_amplitude: Option<f64>,

    /// Anomalies detected since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<AnomalyRecord>,
}

impl SimFrame {
    /// Captures the current state of a simulation.
    pub fn capture(sim: &Simulation, anomalies: Vec<AnomalyRecord>) -> Self {
        Self {
            time: sim.time(),
            step: sim.step_count(),
            statistics: sim.statistics(),
            energy: sim.lattice().total_energy(),
            phase: sim.evolution().phase(),
            mode_amplitude: sim.analytics().mode.as_ref().map(|m| m.last()),
            anomalies,
        }
    }
}

/// Shape of the exported lattice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeInfo {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub topology: Topology,
    pub scale: u32,
    pub e_0: f64,
}

impl LatticeInfo {
    pub fn of(lattice: &Lattice) -> Self {
        let (width, height, depth) = lattice.dimensions();
        Self {
            width,
            height,
            depth,
            topology: lattice.topology(),
            scale: lattice.scale(),
            e_0: lattice.e_0(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Time of the last frame
    pub duration: f64,

    /// Lattice shape, taken from the first captured frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lattice: Option<LatticeInfo>,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration: 0.0,
            lattice: None,
            frames: Vec::new(),
            passed: false,
            metrics: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration = frame.time;
        self.frames.push(frame);
    }

    /// Captures a frame from a running simulation.
    pub fn capture(&mut self, sim: &Simulation, anomalies: Vec<AnomalyRecord>) {
        if self.lattice.is_none() {
            self.lattice = Some(LatticeInfo::of(sim.lattice()));
        }
        self.add_frame(SimFrame::capture(sim, anomalies));
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, metrics: ScenarioMetrics) {
        self.passed = passed;
        self.metrics = Some(metrics);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
