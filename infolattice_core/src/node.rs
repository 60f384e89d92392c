//! Single lattice cell.
//!
//! A node carries a binary spin, a phase, and two energy components
//! (`e_sym`, `e_asym`) whose sum must equal the simulation-wide `E_0`.
//! Its symmetry [`NodeState`] is derived from the energies and is only ever
//! forced to `Anomalous` by anomaly propagation or the detector's auto-mark.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// `E_asym / E_0` at or above which a node is no longer vacuum.
pub const SYMMETRY_BREAK_RATIO: f64 = 0.1;

/// Binary spin value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spin {
    Up,
    Down,
}

impl Spin {
    /// Returns +1 or -1.
    pub fn value(self) -> i8 {
        match self {
            Spin::Up => 1,
            Spin::Down => -1,
        }
    }

    /// Returns the opposite spin.
    pub fn flipped(self) -> Self {
        match self {
            Spin::Up => Spin::Down,
            Spin::Down => Spin::Up,
        }
    }

    /// Spin from the sign of a real value (zero maps to `Up`).
    pub fn from_sign(value: f64) -> Self {
        if value >= 0.0 {
            Spin::Up
        } else {
            Spin::Down
        }
    }
}

/// Symmetry state, in increasing order of persistent asymmetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Vacuum,
    Broken,
    Anomalous,
}

impl NodeState {
    /// Weight used by the local-symmetry measure.
    pub fn symmetry_weight(self) -> f64 {
        match self {
            NodeState::Vacuum => 1.0,
            NodeState::Broken => 0.5,
            NodeState::Anomalous => 0.0,
        }
    }

    /// True for `Broken` and `Anomalous`.
    pub fn is_broken(self) -> bool {
        !matches!(self, NodeState::Vacuum)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeState::Vacuum => "vacuum",
            NodeState::Broken => "broken",
            NodeState::Anomalous => "anomalous",
        }
    }
}

/// Integer lattice coordinate. Immutable once a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Position {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Parity of `x + y + z`.
    pub fn parity(&self) -> usize {
        (self.x + self.y + self.z) % 2
    }

    pub fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// A single cell of the lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Lattice coordinate
    position: Position,

    /// Binary spin
    pub spin: Spin,

    /// Symmetric energy component (>= 0)
    pub e_sym: f64,

    /// Asymmetric energy component (>= 0)
    pub e_asym: f64,

    /// Phase in [0, 2π)
    pub phase: f64,

    /// Internal oscillation frequency, meaningful only when anomalous
    pub omega: f64,

    /// Derived symmetry state
    pub state: NodeState,
}

impl Node {
    /// Creates a vacuum node holding all of `e_0` in its symmetric component.
    pub fn new(position: Position, spin: Spin, e_0: f64) -> Self {
        Self {
            position,
            spin,
            e_sym: e_0,
            e_asym: 0.0,
            phase: 0.0,
            omega: 0.0,
            state: NodeState::Vacuum,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// `e_sym + e_asym`.
    pub fn total_energy(&self) -> f64 {
        self.e_sym + self.e_asym
    }

    /// Fraction of `e_0` held asymmetrically, clamped to [0, 1].
    pub fn asymmetry_ratio(&self, e_0: f64) -> f64 {
        if e_0 <= 0.0 {
            return 0.0;
        }
        (self.e_asym / e_0).clamp(0.0, 1.0)
    }

    pub fn flip_spin(&mut self) {
        self.spin = self.spin.flipped();
    }

    /// Sets the phase, wrapped into [0, 2π).
    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase.rem_euclid(TAU);
    }

    /// Moves up to `amount` from the symmetric to the asymmetric component.
    /// Returns the amount actually moved. Negative amounts move energy back.
    pub fn transfer_to_asym(&mut self, amount: f64) -> f64 {
        let moved = if amount >= 0.0 {
            amount.min(self.e_sym)
        } else {
            -(-amount).min(self.e_asym)
        };
        self.e_sym -= moved;
        self.e_asym += moved;
        moved
    }

    /// Recomputes the derived state from the energies.
    ///
    /// `Anomalous` persists while the node stays broken; dropping back to
    /// vacuum clears `omega`.
    pub fn reclassify(&mut self, e_0: f64) {
        if self.asymmetry_ratio(e_0) < SYMMETRY_BREAK_RATIO {
            self.state = NodeState::Vacuum;
            self.omega = 0.0;
        } else if self.state != NodeState::Anomalous {
            self.state = NodeState::Broken;
        }
    }

    /// Forces the node into the anomalous state with the given frequency.
    pub fn mark_anomalous(&mut self, omega: f64) {
        self.state = NodeState::Anomalous;
        self.omega = omega.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_vacuum() {
        let node = Node::new(Position::new(1, 2, 3), Spin::Up, 1.0);
        assert_eq!(node.state, NodeState::Vacuum);
        assert_eq!(node.total_energy(), 1.0);
        assert_eq!(node.position().parity(), 0);
    }

    #[test]
    fn test_transfer_is_clamped_and_conserving() {
        let mut node = Node::new(Position::new(0, 0, 0), Spin::Down, 1.0);

        assert_eq!(node.transfer_to_asym(0.25), 0.25);
        assert_eq!(node.transfer_to_asym(5.0), 0.75);
        assert_eq!(node.e_sym, 0.0);
        assert_eq!(node.transfer_to_asym(-2.0), -1.0);
        assert_eq!(node.e_asym, 0.0);
        assert_eq!(node.total_energy(), 1.0);
    }

    #[test]
    fn test_reclassify() {
        let mut node = Node::new(Position::new(0, 0, 0), Spin::Up, 1.0);
        node.transfer_to_asym(0.5);
        node.reclassify(1.0);
        assert_eq!(node.state, NodeState::Broken);

        node.mark_anomalous(2.0);
        node.reclassify(1.0);
        assert_eq!(node.state, NodeState::Anomalous);

        node.transfer_to_asym(-0.5);
        node.reclassify(1.0);
        assert_eq!(node.state, NodeState::Vacuum);
        assert_eq!(node.omega, 0.0);
    }

    #[test]
    fn test_phase_wraps() {
        let mut node = Node::new(Position::new(0, 0, 0), Spin::Up, 1.0);
        node.set_phase(-0.5);
        assert!(node.phase >= 0.0 && node.phase < TAU);
        assert!((node.phase - (TAU - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_spin_helpers() {
        assert_eq!(Spin::Up.value(), 1);
        assert_eq!(Spin::Up.flipped(), Spin::Down);
        assert_eq!(Spin::from_sign(-0.1), Spin::Down);
        assert_eq!(Spin::from_sign(0.0), Spin::Up);
    }
}
