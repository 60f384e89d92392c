//! Simulation orchestration.
//!
//! A [`Simulation`] owns one lattice and composes, per step:
//!
//! ```text
//! evolution rule -> conservation enforcer -> anomaly detector -> analytics -> history
//! ```
//!
//! Every call to [`Simulation::step`] is a complete mutation; callers never see
//! a half-applied step.
//!
//! History is a single timeline with a cursor on the entry matching the
//! current state. Seeks and bookmark jumps move the cursor; a forward step
//! from a cursor in the middle drops the entries after it, and a backward
//! step moves to the entry before it. Simulations share no state, so several may run side by
//! side without locking.

use crate::analytics::{Analytics, ModeAmplitudeTracker};
use crate::anomaly::{AnomalyDetector, AnomalyRecord, DetectorConfig};
use crate::conservation::{ConservationEnforcer, ConservationReport, Granularity};
use crate::error::{LatticeError, Result};
use crate::evolution::{Evolution, EvolutionContext, EvolutionKind, StepOutcome};
use crate::lattice::{Lattice, LatticeConfig, LatticeStatistics};
use crate::stochastic::{PropagationSummary, StochasticConfig, StochasticPropagation};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Physical parameters of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Scales energy transfer in the stochastic rule
    pub coupling_strength: f64,

    /// Default `dt` used by `advance()`
    pub time_step: f64,

    /// Neighbor shells considered by the stochastic rule
    pub interaction_range: usize,

    /// Allowed `|E_sym + E_asym - E_0|` before correction
    pub conservation_tolerance: f64,

    /// Conserved energy per node (`E_0`)
    pub total_energy: f64,

    /// Maximum retained history entries (FIFO)
    pub max_history: usize,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            coupling_strength: 1.0,
            time_step: 1.0,
            interaction_range: 1,
            conservation_tolerance: 1e-6,
            total_energy: 1.0,
            max_history: 256,
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(LatticeError::parameter(format!("{} must be positive, got {}", name, value)))
            }
        };
        positive("time_step", self.time_step)?;
        positive("total_energy", self.total_energy)?;
        if !self.coupling_strength.is_finite() || self.coupling_strength < 0.0 {
            return Err(LatticeError::parameter("coupling_strength must be >= 0"));
        }
        if !self.conservation_tolerance.is_finite() || self.conservation_tolerance < 0.0 {
            return Err(LatticeError::parameter("conservation_tolerance must be >= 0"));
        }
        if self.interaction_range == 0 {
            return Err(LatticeError::parameter("interaction_range must be at least 1"));
        }
        if self.max_history == 0 {
            return Err(LatticeError::parameter("max_history must be at least 1"));
        }
        Ok(())
    }
}

/// Everything needed to build a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub lattice: LatticeConfig,
    pub params: SimulationParams,
    pub evolution: EvolutionKind,
    pub stochastic: StochasticConfig,
    pub detector: DetectorConfig,
    pub granularity: Granularity,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            lattice: LatticeConfig::default(),
            params: SimulationParams::default(),
            evolution: EvolutionKind::ReversibleSwap,
            stochastic: StochasticConfig::default(),
            detector: DetectorConfig::default(),
            granularity: Granularity::PerNode,
        }
    }
}

/// Arrow of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// +1 or -1.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// A retained snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic id, never reused
    pub id: u64,
    pub time: f64,
    pub step_count: u64,

    /// Swap-rule phase at this point
    pub phase: Option<usize>,

    pub lattice: Lattice,
}

/// Named pointer at a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub label: String,
    pub entry_id: u64,
    pub time: f64,
}

/// What one call to `step` did.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: u64,
    pub time: f64,
    pub direction: Direction,

    /// Evolution outcome; `None` for backward steps
    pub outcome: Option<StepOutcome>,

    /// True when a backward step was served from history
    pub rewound: bool,

    pub conservation: ConservationReport,
    pub new_anomalies: Vec<AnomalyRecord>,
    pub statistics: LatticeStatistics,
}

/// The simulation.
pub struct Simulation {
    config: SimulationConfig,
    lattice: Lattice,
    evolution: Evolution,
    enforcer: ConservationEnforcer,
    detector: AnomalyDetector,
    analytics: Analytics,

    /// Injected random source (only the stochastic rule draws from it)
    rng: Box<dyn RngCore + Send>,

    time: f64,
    step_count: u64,
    direction: Direction,
    history: VecDeque<HistoryEntry>,
    next_entry_id: u64,

    /// Id of the history entry the current state belongs to
    cursor: u64,
    bookmarks: Vec<Bookmark>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("evolution", &self.evolution.name())
            .field("dimensions", &self.lattice.dimensions())
            .field("time", &self.time)
            .field("step_count", &self.step_count)
            .field("direction", &self.direction)
            .field("history", &self.history.len())
            .finish()
    }
}

impl Simulation {
    /// Builds a simulation with the given random source.
    ///
    /// Fails fast on invalid parameters or when the evolution rule cannot run
    /// on the configured topology.
    pub fn new(config: SimulationConfig, rng: Box<dyn RngCore + Send>) -> Result<Self> {
        config.params.validate()?;
        let lattice = Lattice::new(&config.lattice, config.params.total_energy)?;
        let evolution = Evolution::build(config.evolution, &config.stochastic)?;
        evolution.check(&lattice)?;
        let enforcer = ConservationEnforcer::with_granularity(config.params.conservation_tolerance, config.granularity)?;
        let detector = AnomalyDetector::new(config.detector.clone())?;
        let analytics = Analytics::new(&lattice);

        let mut sim = Self {
            config,
            lattice,
            evolution,
            enforcer,
            detector,
            analytics,
            rng,
            time: 0.0,
            step_count: 0,
            direction: Direction::Forward,
            history: VecDeque::new(),
            next_entry_id: 0,
            cursor: 0,
            bookmarks: Vec::new(),
        };
        sim.push_history();

        info!(
            rule = sim.evolution.name(),
            nodes = sim.lattice.len(),
            "simulation created"
        );
        Ok(sim)
    }

    /// Builds a simulation driven by a ChaCha8 stream seeded from `seed`.
    pub fn seeded(config: SimulationConfig, seed: u64) -> Result<Self> {
        Self::new(config, Box::new(ChaCha8Rng::seed_from_u64(seed)))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn params(&self) -> &SimulationParams {
        &self.config.params
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Direct lattice access for collaborators that seed custom states.
    ///
    /// Changing dimensions through this handle is not possible; use `resize`.
    pub fn lattice_mut(&mut self) -> &mut Lattice {
        &mut self.lattice
    }

    pub fn evolution(&self) -> &Evolution {
        &self.evolution
    }

    pub fn enforcer(&self) -> &ConservationEnforcer {
        &self.enforcer
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut AnomalyDetector {
        &mut self.detector
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Flips the arrow of time and returns the new direction.
    pub fn reverse(&mut self) -> Direction {
        self.direction = self.direction.opposite();
        debug!(direction = ?self.direction, "direction reversed");
        self.direction
    }

    pub fn history(&self) -> &VecDeque<HistoryEntry> {
        &self.history
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn statistics(&self) -> LatticeStatistics {
        self.lattice.statistics()
    }

    /// One step of length `dt` in the current direction.
    pub fn step(&mut self, dt: f64) -> Result<StepResult> {
        self.step_in(self.direction, dt)
    }

    /// One step with the configured `time_step`.
    pub fn advance(&mut self) -> Result<StepResult> {
        self.step(self.config.params.time_step)
    }

    /// One backward step with the configured `time_step`, whatever the direction.
    ///
    /// Restoring from history rolls back the lattice, time and phase. The
    /// detector windows are emptied; the conservation log and analytics
    /// accumulators keep the samples of the undone steps.
    pub fn reverse_step(&mut self) -> Result<StepResult> {
        self.step_in(Direction::Backward, self.config.params.time_step)
    }

    /// One step of length `dt` in an explicit direction.
    ///
    /// Backward steps undo the swap rule exactly. The stochastic rule cannot
    /// be inverted, so its backward steps restore the previous history entry.
    pub fn step_in(&mut self, direction: Direction, dt: f64) -> Result<StepResult> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(LatticeError::parameter(format!("dt must be finite and >= 0, got {}", dt)));
        }

        let mut outcome = None;
        let mut rewound = false;

        match direction {
            Direction::Forward => {
                let ctx = EvolutionContext {
                    coupling_strength: self.config.params.coupling_strength,
                    dt,
                    interaction_range: self.config.params.interaction_range,
                };
                outcome = Some(self.evolution.step(&mut self.lattice, &ctx, &mut *self.rng)?);
                self.time += direction.sign() * dt;
                self.step_count += 1;
            }
            Direction::Backward if self.evolution.is_reversible() => {
                self.evolution.reverse_step(&mut self.lattice)?;
                self.time += direction.sign() * dt;
                self.step_count += 1;
            }
            Direction::Backward => {
                self.rewind()?;
                rewound = true;
            }
        }

        let e_0 = self.config.params.total_energy;
        let conservation = self.enforcer.enforce(&mut self.lattice, e_0, self.time);
        let anomalies = self.detector.detect_anomalies(&mut self.lattice, self.time);
        self.analytics.observe(&self.lattice)?;
        match direction {
            Direction::Forward => {
                self.truncate_after_cursor();
                self.push_history();
            }
            Direction::Backward if !rewound => self.retreat_history(),
            Direction::Backward => {}
        }

        Ok(StepResult {
            step: self.step_count,
            time: self.time,
            direction,
            outcome,
            rewound,
            conservation,
            new_anomalies: anomalies.new_anomalies,
            statistics: self.lattice.statistics(),
        })
    }

    fn cursor_position(&self) -> Option<usize> {
        self.history.iter().position(|e| e.id == self.cursor)
    }

    /// Drops the cursor entry and everything after it, then restores the
    /// entry before the cursor.
    fn rewind(&mut self) -> Result<()> {
        let pos = self.cursor_position().ok_or(LatticeError::HistoryExhausted)?;
        if pos == 0 {
            return Err(LatticeError::HistoryExhausted);
        }
        self.history.truncate(pos);
        let entry = self.history.back().cloned().ok_or(LatticeError::HistoryExhausted)?;
        self.restore(&entry);
        Ok(())
    }

    /// Drops the entries after the cursor, abandoning that future.
    fn truncate_after_cursor(&mut self) {
        if let Some(pos) = self.cursor_position() {
            let dropped = self.history.len() - pos - 1;
            if dropped > 0 {
                self.history.truncate(pos + 1);
                debug!(dropped, "history branched");
            }
        }
    }

    /// Moves the cursor back after an exact reverse step.
    ///
    /// The previous entry is reused when it holds the state just reached;
    /// otherwise the state is recorded as a new entry.
    fn retreat_history(&mut self) {
        self.truncate_after_cursor();
        self.history.pop_back();

        let tolerance = 1e-9 * self.time.abs().max(1.0);
        let phase = self.evolution.phase();
        let previous = self
            .history
            .back()
            .filter(|prev| {
                (prev.time - self.time).abs() <= tolerance && prev.phase == phase && prev.lattice == self.lattice
            })
            .map(|prev| (prev.id, prev.time));

        match previous {
            Some((id, time)) => {
                self.cursor = id;
                self.time = time;
            }
            None => self.push_history(),
        }
    }

    fn restore(&mut self, entry: &HistoryEntry) {
        self.lattice = entry.lattice.clone();
        self.time = entry.time;
        self.step_count = entry.step_count;
        self.cursor = entry.id;
        self.evolution.restore_phase(entry.phase);
        self.detector.clear_windows();
    }

    fn push_history(&mut self) {
        let entry = HistoryEntry {
            id: self.next_entry_id,
            time: self.time,
            step_count: self.step_count,
            phase: self.evolution.phase(),
            lattice: self.lattice.clone(),
        };
        self.cursor = entry.id;
        self.next_entry_id += 1;
        self.history.push_back(entry);
        while self.history.len() > self.config.params.max_history {
            self.history.pop_front();
        }
    }

    /// Restores the history entry closest to `target` and returns its time.
    ///
    /// History is left intact until the next step: a forward step drops every
    /// entry after the restored one, and bookmarks on those entries then
    /// report `BookmarkEvicted`. Detector windows are emptied; the
    /// conservation log and analytics keep their samples.
    pub fn seek_to_time(&mut self, target: f64) -> Result<f64> {
        let entry = self
            .history
            .iter()
            .min_by(|a, b| {
                (a.time - target)
                    .abs()
                    .partial_cmp(&(b.time - target).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
            .ok_or(LatticeError::HistoryExhausted)?;
        self.restore(&entry);
        debug!(target, restored = entry.time, "seeked");
        Ok(entry.time)
    }

    /// Bookmarks the history entry of the current state. Re-using a label
    /// moves it.
    pub fn add_bookmark(&mut self, label: &str) -> Result<u64> {
        let entry = self
            .history
            .iter()
            .find(|e| e.id == self.cursor)
            .ok_or(LatticeError::HistoryExhausted)?;
        let bookmark = Bookmark {
            label: label.to_string(),
            entry_id: entry.id,
            time: entry.time,
        };
        self.bookmarks.retain(|b| b.label != label);
        self.bookmarks.push(bookmark);
        Ok(entry.id)
    }

    pub fn remove_bookmark(&mut self, label: &str) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|b| b.label != label);
        self.bookmarks.len() != before
    }

    /// Restores the entry a bookmark points at.
    pub fn jump_to_bookmark(&mut self, label: &str) -> Result<f64> {
        let bookmark = self
            .bookmarks
            .iter()
            .find(|b| b.label == label)
            .ok_or_else(|| LatticeError::BookmarkNotFound(label.to_string()))?;
        let entry = self
            .history
            .iter()
            .find(|e| e.id == bookmark.entry_id)
            .cloned()
            .ok_or_else(|| LatticeError::BookmarkEvicted(label.to_string()))?;
        self.restore(&entry);
        Ok(entry.time)
    }

    /// Starts a mode tracker at wave number `kx` along the lattice width.
    pub fn track_mode(&mut self, kx: usize) -> Result<f64> {
        let mut tracker = ModeAmplitudeTracker::new(kx, self.lattice.width())?;
        let amplitude = tracker.sample(&self.lattice)?;
        self.analytics.mode = Some(tracker);
        Ok(amplitude)
    }

    /// Radiates an anomaly wave from `(x, y, z)` and restores conservation.
    ///
    /// Returns `None` when the coordinate is outside the lattice.
    pub fn inject_anomaly(&mut self, x: i64, y: i64, z: i64) -> Result<Option<PropagationSummary>> {
        let Some(source) = self.lattice.index_of(x, y, z) else {
            return Ok(None);
        };
        let summary = match &self.evolution {
            Evolution::Stochastic(rule) => rule.propagate_anomaly(&mut self.lattice, source, &mut *self.rng),
            Evolution::ReversibleSwap(_) => StochasticPropagation::new(self.config.stochastic.clone())?
                .propagate_anomaly(&mut self.lattice, source, &mut *self.rng),
        };
        self.enforcer
            .enforce(&mut self.lattice, self.config.params.total_energy, self.time);
        info!(source, forced = summary.forced, bumped = summary.bumped, "anomaly injected");
        Ok(Some(summary))
    }

    /// Rebuilds the lattice from its seed and clears all bookkeeping.
    pub fn reset(&mut self) {
        self.lattice.reseed();
        self.evolution.reset();
        self.clear_bookkeeping();
    }

    /// Replaces the lattice with one of new dimensions.
    ///
    /// Destructive: node state, history, bookmarks, detector windows and
    /// records are discarded, and a mode tracker is dropped because its
    /// lookup table depends on the width. Must not be called while a photon
    /// window test is running against this simulation.
    pub fn resize(&mut self, width: usize, height: usize, depth: usize) -> Result<()> {
        self.lattice.resize(width, height, depth)?;
        self.config.lattice.width = width;
        self.config.lattice.height = height;
        self.config.lattice.depth = depth;
        self.evolution.reset();
        if self.analytics.mode.take().is_some() {
            warn!("mode tracker dropped by resize");
        }
        self.clear_bookkeeping();
        info!(width, height, depth, "lattice resized");
        Ok(())
    }

    /// Serializes the current lattice.
    pub fn snapshot_json(&self) -> Result<String> {
        self.lattice.to_json()
    }

    /// Replaces the lattice with a snapshot and clears all bookkeeping.
    pub fn load_snapshot(&mut self, json: &str) -> Result<()> {
        let lattice = Lattice::from_json(json)?;
        self.evolution.check(&lattice)?;
        if lattice.e_0().to_bits() != self.config.params.total_energy.to_bits() {
            return Err(LatticeError::snapshot(format!(
                "snapshot E_0 {} differs from configured {}",
                lattice.e_0(),
                self.config.params.total_energy
            )));
        }
        if lattice.width() != self.lattice.width() {
            self.analytics.mode = None;
        }
        self.lattice = lattice;
        self.evolution.reset();
        self.clear_bookkeeping();
        Ok(())
    }

    fn clear_bookkeeping(&mut self) {
        self.enforcer.clear_log();
        self.detector.reset();
        self.analytics.reset(&self.lattice);
        self.time = 0.0;
        self.step_count = 0;
        self.direction = Direction::Forward;
        self.history.clear();
        self.bookmarks.clear();
        self.push_history();
    }
}
