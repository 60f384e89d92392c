//! Streaming analytics over simulation steps.
//!
//! - **Online correlation**: Welford single-pass mean/variance/covariance of
//!   `E_sym` and `E_asym`
//! - **Drift monitor**: mean and max of `|E_current - E_ref|`
//! - **Mode amplitude**: projection of the spin field onto `cos(2π k_x x / N)`
//!
//! None of these are needed for the engine's correctness; they are read by
//! collaborators and by the harness scenarios.

use crate::error::{LatticeError, Result};
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

// =============================================================================
// ONLINE CORRELATION
// =============================================================================

/// Welford accumulator for two paired series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnlineCorrelation {
    n: u64,
    mean_sym: f64,
    mean_asym: f64,
    m2_sym: f64,
    m2_asym: f64,

    /// Co-moment Σ (x - mean_x)(y - mean_y)
    c: f64,
}

impl OnlineCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one `(E_sym, E_asym)` pair.
    pub fn push(&mut self, e_sym: f64, e_asym: f64) {
        self.n += 1;
        let n = self.n as f64;

        let delta_sym = e_sym - self.mean_sym;
        self.mean_sym += delta_sym / n;
        let delta_asym = e_asym - self.mean_asym;
        self.mean_asym += delta_asym / n;

        self.m2_sym += delta_sym * (e_sym - self.mean_sym);
        self.m2_asym += delta_asym * (e_asym - self.mean_asym);
        self.c += delta_sym * (e_asym - self.mean_asym);
    }

    /// Adds the lattice-wide totals of one step.
    pub fn observe(&mut self, lattice: &Lattice) {
        let totals = lattice.total_energy();
        self.push(totals.symmetric, totals.asymmetric);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean_sym(&self) -> f64 {
        self.mean_sym
    }

    pub fn mean_asym(&self) -> f64 {
        self.mean_asym
    }

    /// Sample variance of `E_sym` (0 with fewer than two samples).
    pub fn variance_sym(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2_sym / (self.n - 1) as f64
        }
    }

    pub fn variance_asym(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2_asym / (self.n - 1) as f64
        }
    }

    pub fn covariance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.c / (self.n - 1) as f64
        }
    }

    /// Pearson correlation in [-1, 1]; 0 when undefined.
    pub fn correlation(&self) -> f64 {
        let var_sym = self.variance_sym();
        let var_asym = self.variance_asym();
        if self.n < 2 || var_sym <= 0.0 || var_asym <= 0.0 {
            return 0.0;
        }
        (self.covariance() / (var_sym * var_asym).sqrt()).clamp(-1.0, 1.0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// DRIFT MONITOR
// =============================================================================

/// Tracks how far the total energy wanders from a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMonitor {
    reference: f64,
    sum: f64,
    max: f64,
    samples: u64,
}

impl DriftMonitor {
    pub fn new(reference: f64) -> Self {
        Self {
            reference,
            sum: 0.0,
            max: 0.0,
            samples: 0,
        }
    }

    pub fn reference(&self) -> f64 {
        self.reference
    }

    /// Records one observed total.
    pub fn observe(&mut self, current: f64) {
        let drift = (current - self.reference).abs();
        self.sum += drift;
        self.max = self.max.max(drift);
        self.samples += 1;
    }

    pub fn observe_lattice(&mut self, lattice: &Lattice) {
        self.observe(lattice.total_energy().total());
    }

    pub fn mean_drift(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }

    pub fn max_drift(&self) -> f64 {
        self.max
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Clears samples and adopts a new reference.
    pub fn reset(&mut self, reference: f64) {
        *self = Self::new(reference);
    }
}

// =============================================================================
// MODE AMPLITUDE
// =============================================================================

/// Amplitude of the `k_x` Fourier mode of the spin field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeAmplitudeTracker {
    kx: usize,
    width: usize,

    /// `cos(2π k_x x / N)` per column
    cos_lut: Vec<f64>,

    /// Amplitude of a perfect square wave at `k_x`
    ideal: f64,

    sum_squares: f64,
    samples: u64,
    last: f64,
}

impl ModeAmplitudeTracker {
    /// Fails for an empty width or a wave number that aliases to the uniform mode.
    pub fn new(kx: usize, width: usize) -> Result<Self> {
        if width == 0 || kx % width == 0 {
            return Err(LatticeError::InvalidWaveNumber { kx, width });
        }

        let cos_lut: Vec<f64> = (0..width)
            .map(|x| (TAU * kx as f64 * x as f64 / width as f64).cos())
            .collect();
        let ideal = cos_lut.iter().map(|c| c.abs()).sum::<f64>() / width as f64;

        Ok(Self {
            kx,
            width,
            cos_lut,
            ideal,
            sum_squares: 0.0,
            samples: 0,
            last: 0.0,
        })
    }

    pub fn kx(&self) -> usize {
        self.kx
    }

    /// `|Σ spin_i cos[x_i]| / node_count` without recording a sample.
    pub fn amplitude(&self, lattice: &Lattice) -> Result<f64> {
        if lattice.width() != self.width {
            return Err(LatticeError::InvalidWaveNumber {
                kx: self.kx,
                width: lattice.width(),
            });
        }
        if lattice.is_empty() {
            return Ok(0.0);
        }
        let projection: f64 = lattice
            .nodes()
            .iter()
            .map(|n| n.spin.value() as f64 * self.cos_lut[n.position().x])
            .sum();
        Ok(projection.abs() / lattice.len() as f64)
    }

    /// Amplitude relative to a perfect square wave of the same mode.
    pub fn normalized(&self, amplitude: f64) -> f64 {
        if self.ideal <= 0.0 {
            0.0
        } else {
            amplitude / self.ideal
        }
    }

    /// Measures and accumulates one sample.
    pub fn sample(&mut self, lattice: &Lattice) -> Result<f64> {
        let amplitude = self.amplitude(lattice)?;
        self.sum_squares += amplitude * amplitude;
        self.samples += 1;
        self.last = amplitude;
        Ok(amplitude)
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn rms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            (self.sum_squares / self.samples as f64).sqrt()
        }
    }

    pub fn reset(&mut self) {
        self.sum_squares = 0.0;
        self.samples = 0;
        self.last = 0.0;
    }
}

// =============================================================================
// AGGREGATE
// =============================================================================

/// Analytics bundle observed once per simulation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub correlation: OnlineCorrelation,
    pub drift: DriftMonitor,
    pub mode: Option<ModeAmplitudeTracker>,
}

impl Analytics {
    /// Uses the lattice's current total as the drift reference.
    pub fn new(lattice: &Lattice) -> Self {
        Self {
            correlation: OnlineCorrelation::new(),
            drift: DriftMonitor::new(lattice.total_energy().total()),
            mode: None,
        }
    }

    pub fn observe(&mut self, lattice: &Lattice) -> Result<()> {
        self.correlation.observe(lattice);
        self.drift.observe_lattice(lattice);
        if let Some(mode) = self.mode.as_mut() {
            mode.sample(lattice)?;
        }
        Ok(())
    }

    pub fn reset(&mut self, lattice: &Lattice) {
        self.correlation.reset();
        self.drift.reset(lattice.total_energy().total());
        if let Some(mode) = self.mode.as_mut() {
            mode.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_correlation_of_linear_series() {
        let mut stats = OnlineCorrelation::new();
        for i in 0..10 {
            let x = i as f64;
            stats.push(x, 10.0 - 2.0 * x);
        }
        assert_relative_eq!(stats.correlation(), -1.0, epsilon = 1e-12);
        assert_relative_eq!(stats.mean_sym(), 4.5, epsilon = 1e-12);
        assert_relative_eq!(stats.variance_sym(), 55.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_degenerate_cases() {
        let mut stats = OnlineCorrelation::new();
        assert_eq!(stats.correlation(), 0.0);
        stats.push(1.0, 2.0);
        assert_eq!(stats.correlation(), 0.0);
        stats.push(1.0, 3.0);
        // Zero variance in E_sym
        assert_eq!(stats.correlation(), 0.0);
    }

    #[test]
    fn test_drift_monitor() {
        let mut drift = DriftMonitor::new(10.0);
        drift.observe(10.5);
        drift.observe(9.0);
        drift.observe(10.0);
        assert_relative_eq!(drift.mean_drift(), 0.5);
        assert_relative_eq!(drift.max_drift(), 1.0);
        assert_eq!(drift.samples(), 3);
    }

    #[test]
    fn test_mode_amplitude_matches_seed() {
        let lattice = Lattice::new(&LatticeConfig::cube(8, 6), 1.0).unwrap();
        let mut tracker = ModeAmplitudeTracker::new(6, 8).unwrap();

        let amplitude = tracker.sample(&lattice).unwrap();
        assert!(amplitude > 0.0);
        assert_relative_eq!(amplitude, 0.5, epsilon = 1e-9);
        assert!(tracker.normalized(amplitude) > 0.3);
        assert_relative_eq!(tracker.rms(), amplitude);
    }

    #[test]
    fn test_mode_amplitude_is_small_for_other_modes() {
        let lattice = Lattice::new(&LatticeConfig::cube(8, 1), 1.0).unwrap();
        let tracker = ModeAmplitudeTracker::new(2, 8).unwrap();
        assert!(tracker.amplitude(&lattice).unwrap() < 1e-9);
    }

    #[test]
    fn test_degenerate_wave_number_rejected() {
        assert!(ModeAmplitudeTracker::new(8, 8).is_err());
        assert!(ModeAmplitudeTracker::new(0, 8).is_err());
        assert!(ModeAmplitudeTracker::new(1, 0).is_err());

        let tracker = ModeAmplitudeTracker::new(1, 4).unwrap();
        let lattice = Lattice::new(&LatticeConfig::cube(8, 1), 1.0).unwrap();
        assert!(tracker.amplitude(&lattice).is_err());
    }

    #[test]
    fn test_rms_accumulates() {
        let lattice = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        let mut tracker = ModeAmplitudeTracker::new(1, 4).unwrap();
        let a = tracker.sample(&lattice).unwrap();
        tracker.sample(&lattice).unwrap();
        assert_eq!(tracker.samples(), 2);
        assert_relative_eq!(tracker.rms(), a, epsilon = 1e-12);
    }
}
