//! The lattice: a flat, row-major collection of nodes plus topology.
//!
//! Nodes are stored at `z * H * W + y * W + x`. Neighbor queries honor the
//! topology: periodic lattices wrap coordinates, open lattices clip them.

use crate::error::{LatticeError, Result};
use crate::node::{Node, NodeState, Position, Spin};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::TAU;

/// Boundary behavior of the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Coordinates wrap modulo each dimension
    Periodic,

    /// Out-of-range coordinates have no neighbor
    Open,
}

/// Construction parameters for a lattice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub topology: Topology,

    /// Hierarchical resolution level (carried, not interpreted)
    pub scale: u32,

    /// Wave number of the cosine spin seed along x
    pub seed_wavenumber: usize,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
            depth: 8,
            topology: Topology::Periodic,
            scale: 0,
            seed_wavenumber: 1,
        }
    }
}

impl LatticeConfig {
    /// Cubic periodic lattice seeded at wave number `kx`.
    pub fn cube(size: usize, kx: usize) -> Self {
        Self {
            width: size,
            height: size,
            depth: size,
            seed_wavenumber: kx,
            ..Default::default()
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
}

/// Lattice-wide energy sums.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyTotals {
    /// Σ E_sym
    pub symmetric: f64,

    /// Σ E_asym
    pub asymmetric: f64,

    /// Per-node conserved total
    pub e_0: f64,

    /// `node_count * e_0`
    pub expected: f64,
}

impl EnergyTotals {
    pub fn total(&self) -> f64 {
        self.symmetric + self.asymmetric
    }

    /// `total - expected`.
    pub fn deviation(&self) -> f64 {
        self.total() - self.expected
    }
}

/// Snapshot statistics for collaborators. Energy figures refer to `E_asym`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeStatistics {
    pub symmetric: usize,
    pub broken: usize,
    pub anomalous: usize,
    pub total: usize,
    pub avg_energy: f64,
    pub max_energy: f64,
    pub min_energy: f64,
}

/// The simulation lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    width: usize,
    height: usize,
    depth: usize,
    topology: Topology,
    scale: u32,
    seed_wavenumber: usize,

    /// Conserved energy per node
    e_0: f64,

    nodes: Vec<Node>,
}

impl Lattice {
    /// Builds a lattice and seeds it with a cosine spin wave along x.
    pub fn new(config: &LatticeConfig, e_0: f64) -> Result<Self> {
        if config.width == 0 || config.height == 0 || config.depth == 0 {
            return Err(LatticeError::InvalidDimensions {
                width: config.width,
                height: config.height,
                depth: config.depth,
            });
        }
        if !e_0.is_finite() || e_0 <= 0.0 {
            return Err(LatticeError::parameter(format!("total energy must be positive, got {}", e_0)));
        }

        let mut lattice = Self {
            width: config.width,
            height: config.height,
            depth: config.depth,
            topology: config.topology,
            scale: config.scale,
            seed_wavenumber: config.seed_wavenumber,
            e_0,
            nodes: Vec::new(),
        };
        lattice.reseed();
        Ok(lattice)
    }

    /// Discards every node and rebuilds the cosine-wave seed.
    ///
    /// Spin, energy, phase and state of all nodes are lost.
    pub fn reseed(&mut self) {
        let count = self.width * self.height * self.depth;
        let mut nodes = Vec::with_capacity(count);

        for index in 0..count {
            let position = self.position_of(index);
            let wave = TAU * self.seed_wavenumber as f64 * position.x as f64 / self.width as f64;
            let mut node = Node::new(position, Spin::from_sign(wave.cos()), self.e_0);
            node.set_phase(wave);
            nodes.push(node);
        }

        self.nodes = nodes;
    }

    /// Replaces the lattice with a freshly seeded one of new dimensions.
    ///
    /// Destructive: all node state is discarded. Callers holding indices,
    /// detector histories or validation runs against the old lattice must
    /// drop them.
    pub fn resize(&mut self, width: usize, height: usize, depth: usize) -> Result<()> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(LatticeError::InvalidDimensions { width, height, depth });
        }
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.reseed();
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn seed_wavenumber(&self) -> usize {
        self.seed_wavenumber
    }

    pub fn e_0(&self) -> f64 {
        self.e_0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Row-major index of an in-bounds coordinate.
    pub fn index_of(&self, x: i64, y: i64, z: i64) -> Option<usize> {
        let in_bounds = |c: i64, dim: usize| c >= 0 && (c as usize) < dim;
        if !(in_bounds(x, self.width) && in_bounds(y, self.height) && in_bounds(z, self.depth)) {
            return None;
        }
        Some(z as usize * self.height * self.width + y as usize * self.width + x as usize)
    }

    /// Coordinate of a row-major index.
    pub fn position_of(&self, index: usize) -> Position {
        let plane = self.width * self.height;
        Position::new(index % self.width, (index % plane) / self.width, index / plane)
    }

    /// Node at a coordinate; `None` outside the bounds (no wrapping).
    pub fn node(&self, x: i64, y: i64, z: i64) -> Option<&Node> {
        self.index_of(x, y, z).map(|i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, x: i64, y: i64, z: i64) -> Option<&mut Node> {
        self.index_of(x, y, z).map(move |i| &mut self.nodes[i])
    }

    pub fn node_at_index(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn node_at_index_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index)
    }

    fn resolve_axis(&self, coord: i64, dim: usize) -> Option<usize> {
        match self.topology {
            Topology::Periodic => Some(coord.rem_euclid(dim as i64) as usize),
            Topology::Open => (coord >= 0 && (coord as usize) < dim).then_some(coord as usize),
        }
    }

    /// Index reached from `index` by an offset, respecting topology.
    pub fn offset_index(&self, index: usize, dx: i64, dy: i64, dz: i64) -> Option<usize> {
        let p = self.position_of(index);
        let x = self.resolve_axis(p.x as i64 + dx, self.width)?;
        let y = self.resolve_axis(p.y as i64 + dy, self.height)?;
        let z = self.resolve_axis(p.z as i64 + dz, self.depth)?;
        Some(z * self.height * self.width + y * self.width + x)
    }

    /// Neighbor indices ordered by concentric Chebyshev shells `1..=range`.
    ///
    /// Within a shell the order is z, then y, then x offset ascending. The
    /// node itself and duplicates produced by wrapping on small periodic
    /// lattices are excluded. Shells beyond the lattice extent add nothing,
    /// so `range` is capped at [`Lattice::max_shell`].
    pub fn neighbor_indices(&self, index: usize, range: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        seen.insert(index);
        let mut out = Vec::new();

        for shell in 1..=range.min(self.max_shell()) as i64 {
            if out.len() + 1 >= self.nodes.len() {
                break;
            }
            for dz in -shell..=shell {
                for dy in -shell..=shell {
                    for dx in -shell..=shell {
                        if dx.abs().max(dy.abs()).max(dz.abs()) != shell {
                            continue;
                        }
                        if let Some(n) = self.offset_index(index, dx, dy, dz) {
                            if seen.insert(n) {
                                out.push(n);
                            }
                        }
                    }
                }
            }
        }

        out
    }

    /// Largest Chebyshev shell that can reach a node not already reached.
    pub fn max_shell(&self) -> usize {
        let extent = self.width.max(self.height).max(self.depth);
        match self.topology {
            Topology::Periodic => extent.div_ceil(2),
            Topology::Open => extent - 1,
        }
    }

    /// Neighbor nodes of `index` within `range` shells.
    pub fn neighbors(&self, index: usize, range: usize) -> Vec<&Node> {
        if index >= self.nodes.len() {
            return Vec::new();
        }
        self.neighbor_indices(index, range)
            .into_iter()
            .map(|i| &self.nodes[i])
            .collect()
    }

    /// Nodes inside the inclusive box, clipped to the lattice bounds.
    pub fn region(&self, min: [i64; 3], max: [i64; 3]) -> Vec<&Node> {
        let dims = [self.width as i64, self.height as i64, self.depth as i64];
        let lo: Vec<i64> = (0..3).map(|a| min[a].max(0)).collect();
        let hi: Vec<i64> = (0..3).map(|a| max[a].min(dims[a] - 1)).collect();

        let mut out = Vec::new();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    if let Some(node) = self.node(x, y, z) {
                        out.push(node);
                    }
                }
            }
        }
        out
    }

    /// Euclidean distance between two nodes (minimum image when periodic).
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        let pa = self.position_of(a).as_vector();
        let pb = self.position_of(b).as_vector();
        let mut delta: Vector3<f64> = (pa - pb).abs();

        if self.topology == Topology::Periodic {
            let dims = [self.width as f64, self.height as f64, self.depth as f64];
            for (axis, dim) in dims.iter().enumerate() {
                delta[axis] = delta[axis].min(dim - delta[axis]);
            }
        }

        delta.norm()
    }

    /// Exchanges the spins of two nodes.
    pub fn swap_spins(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let spin_a = self.nodes[a].spin;
        self.nodes[a].spin = self.nodes[b].spin;
        self.nodes[b].spin = spin_a;
    }

    /// Full spin vector in index order.
    pub fn spins(&self) -> Vec<Spin> {
        self.nodes.iter().map(|n| n.spin).collect()
    }

    /// Sum of spin values.
    pub fn net_spin(&self) -> i64 {
        self.nodes.iter().map(|n| n.spin.value() as i64).sum()
    }

    /// Σ E_sym, Σ E_asym and the expected total.
    pub fn total_energy(&self) -> EnergyTotals {
        let (symmetric, asymmetric) = self
            .nodes
            .iter()
            .fold((0.0, 0.0), |(s, a), n| (s + n.e_sym, a + n.e_asym));

        EnergyTotals {
            symmetric,
            asymmetric,
            e_0: self.e_0,
            expected: self.e_0 * self.nodes.len() as f64,
        }
    }

    pub fn statistics(&self) -> LatticeStatistics {
        let mut stats = LatticeStatistics {
            symmetric: 0,
            broken: 0,
            anomalous: 0,
            total: self.nodes.len(),
            avg_energy: 0.0,
            max_energy: 0.0,
            min_energy: 0.0,
        };
        if self.nodes.is_empty() {
            return stats;
        }

        let mut sum = 0.0;
        let mut max = f64::MIN;
        let mut min = f64::MAX;
        for node in &self.nodes {
            match node.state {
                NodeState::Vacuum => stats.symmetric += 1,
                NodeState::Broken => stats.broken += 1,
                NodeState::Anomalous => stats.anomalous += 1,
            }
            sum += node.e_asym;
            max = max.max(node.e_asym);
            min = min.min(node.e_asym);
        }

        stats.avg_energy = sum / self.nodes.len() as f64;
        stats.max_energy = max;
        stats.min_energy = min;
        stats
    }

    /// Serializes the lattice to a JSON snapshot.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a lattice from a JSON snapshot, validating its shape.
    pub fn from_json(json: &str) -> Result<Self> {
        let lattice: Lattice = serde_json::from_str(json)?;
        lattice.validate()?;
        Ok(lattice)
    }

    fn validate(&self) -> Result<()> {
        let expected = self.width * self.height * self.depth;
        if expected == 0 {
            return Err(LatticeError::snapshot("zero-sized lattice"));
        }
        if self.nodes.len() != expected {
            return Err(LatticeError::snapshot(format!(
                "expected {} nodes, found {}",
                expected,
                self.nodes.len()
            )));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.position() != self.position_of(index) {
                return Err(LatticeError::snapshot(format!("node {} has a misplaced position", index)));
            }
        }
        Ok(())
    }
}

/// Number of positions at which two spin vectors differ.
///
/// Length mismatches count every unmatched position as different.
pub fn hamming_distance(a: &[Spin], b: &[Spin]) -> usize {
    let differing = a.iter().zip(b).filter(|(x, y)| x != y).count();
    differing + a.len().abs_diff(b.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small(topology: Topology) -> Lattice {
        let config = LatticeConfig {
            width: 4,
            height: 3,
            depth: 2,
            topology,
            ..Default::default()
        };
        Lattice::new(&config, 1.0).unwrap()
    }

    #[test]
    fn test_indexing_is_row_major() {
        let lattice = small(Topology::Periodic);
        assert_eq!(lattice.len(), 24);
        assert_eq!(lattice.index_of(1, 2, 1), Some(12 + 8 + 1));
        assert_eq!(lattice.position_of(21), Position::new(1, 2, 1));

        for (i, node) in lattice.nodes().iter().enumerate() {
            assert_eq!(lattice.index_of(node.position().x as i64, node.position().y as i64, node.position().z as i64), Some(i));
        }
    }

    #[test]
    fn test_out_of_range_queries_are_absent() {
        let lattice = small(Topology::Periodic);
        assert!(lattice.node(-1, 0, 0).is_none());
        assert!(lattice.node(4, 0, 0).is_none());
        assert!(lattice.region([10, 10, 10], [20, 20, 20]).is_empty());
        assert!(lattice.neighbors(999, 1).is_empty());
    }

    #[test]
    fn test_region_is_clipped() {
        let lattice = small(Topology::Open);
        let region = lattice.region([-5, 1, 0], [1, 10, 0]);
        // x in 0..=1, y in 1..=2, z = 0
        assert_eq!(region.len(), 4);
    }

    #[test]
    fn test_neighbors_periodic_vs_open() {
        let config = LatticeConfig::cube(5, 1);
        let periodic = Lattice::new(&config, 1.0).unwrap();
        let open = Lattice::new(&config.clone().with_topology(Topology::Open), 1.0).unwrap();

        let corner = 0;
        assert_eq!(periodic.neighbor_indices(corner, 1).len(), 26);
        assert_eq!(open.neighbor_indices(corner, 1).len(), 7);

        // Second shell adds the 5^3 - 3^3 ring around the first
        assert_eq!(periodic.neighbor_indices(corner, 2).len(), 124);
        assert!(!periodic.neighbor_indices(corner, 2).contains(&corner));
    }

    #[test]
    fn test_neighbors_are_shell_ordered() {
        let lattice = Lattice::new(&LatticeConfig::cube(7, 1), 1.0).unwrap();
        let center = lattice.index_of(3, 3, 3).unwrap();
        let neighbors = lattice.neighbor_indices(center, 2);

        assert_eq!(neighbors.len(), 124);
        for &n in &neighbors[..26] {
            assert!(lattice.distance(center, n) < 2.0);
        }
        for &n in &neighbors[26..] {
            assert!(lattice.distance(center, n) >= 2.0);
        }
    }

    #[test]
    fn test_huge_range_is_capped_at_extent() {
        let periodic = Lattice::new(&LatticeConfig::cube(4, 1), 1.0).unwrap();
        assert_eq!(periodic.max_shell(), 2);
        assert_eq!(periodic.neighbor_indices(0, usize::MAX).len(), 63);
        assert_eq!(periodic.neighbor_indices(0, 1_000_000), periodic.neighbor_indices(0, 2));

        let open = Lattice::new(&LatticeConfig::cube(5, 1).with_topology(Topology::Open), 1.0).unwrap();
        assert_eq!(open.max_shell(), 4);
        assert_eq!(open.neighbor_indices(0, 1_000_000).len(), 124);
        assert_eq!(open.neighbor_indices(0, 1_000_000), open.neighbor_indices(0, 4));
    }

    #[test]
    fn test_small_periodic_dedupes() {
        let config = LatticeConfig {
            width: 2,
            height: 2,
            depth: 1,
            ..Default::default()
        };
        let lattice = Lattice::new(&config, 1.0).unwrap();
        assert_eq!(lattice.neighbor_indices(0, 1).len(), 3);
    }

    #[test]
    fn test_minimum_image_distance() {
        let lattice = Lattice::new(&LatticeConfig::cube(8, 1), 1.0).unwrap();
        let a = lattice.index_of(0, 0, 0).unwrap();
        let b = lattice.index_of(7, 0, 0).unwrap();
        assert_relative_eq!(lattice.distance(a, b), 1.0);
    }

    #[test]
    fn test_cosine_seed() {
        let lattice = Lattice::new(&LatticeConfig::cube(8, 1), 1.0).unwrap();
        assert_eq!(lattice.node(0, 0, 0).unwrap().spin, Spin::Up);
        assert_eq!(lattice.node(4, 5, 6).unwrap().spin, Spin::Down);
        assert_eq!(lattice.net_spin(), 0);
    }

    #[test]
    fn test_energy_totals() {
        let lattice = small(Topology::Periodic);
        let totals = lattice.total_energy();
        assert_relative_eq!(totals.symmetric, 24.0);
        assert_eq!(totals.asymmetric, 0.0);
        assert_eq!(totals.e_0, 1.0);
        assert_relative_eq!(totals.deviation(), 0.0);
    }

    #[test]
    fn test_statistics() {
        let mut lattice = small(Topology::Periodic);
        lattice.nodes_mut()[0].transfer_to_asym(0.5);
        lattice.nodes_mut()[0].reclassify(1.0);
        lattice.nodes_mut()[1].mark_anomalous(1.0);

        let stats = lattice.statistics();
        assert_eq!(stats.total, 24);
        assert_eq!(stats.symmetric, 22);
        assert_eq!(stats.broken, 1);
        assert_eq!(stats.anomalous, 1);
        assert_relative_eq!(stats.max_energy, 0.5);
        assert_eq!(stats.min_energy, 0.0);
    }

    #[test]
    fn test_resize_rebuilds() {
        let mut lattice = small(Topology::Periodic);
        lattice.nodes_mut()[0].flip_spin();
        lattice.resize(3, 3, 3).unwrap();

        assert_eq!(lattice.len(), 27);
        assert_eq!(lattice.node(0, 0, 0).unwrap().spin, Spin::Up);
        assert!(lattice.resize(0, 3, 3).is_err());
    }

    #[test]
    fn test_json_roundtrip_and_validation() {
        let lattice = small(Topology::Open);
        let json = lattice.to_json().unwrap();
        let restored = Lattice::from_json(&json).unwrap();
        assert_eq!(restored, lattice);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["width"] = serde_json::json!(5);
        assert!(matches!(
            Lattice::from_json(&value.to_string()),
            Err(LatticeError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let config = LatticeConfig {
            depth: 0,
            ..Default::default()
        };
        assert!(matches!(
            Lattice::new(&config, 1.0),
            Err(LatticeError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_hamming_distance() {
        let a = [Spin::Up, Spin::Down, Spin::Up];
        let b = [Spin::Up, Spin::Up, Spin::Up, Spin::Down];
        assert_eq!(hamming_distance(&a, &a), 0);
        assert_eq!(hamming_distance(&a, &b), 2);
    }
}
