//! Error types for the lattice engine.

use thiserror::Error;

/// Errors that can occur while configuring or driving a simulation.
///
/// Conservation violations are not errors: the enforcer corrects them in place
/// and reports them through [`crate::conservation::ConservationReport`].
#[derive(Debug, Error)]
pub enum LatticeError {
    /// A lattice dimension was zero
    #[error("Invalid lattice dimensions {width}x{height}x{depth}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        depth: usize,
    },

    /// Evolution rule cannot run on this topology
    #[error("{strategy} requires a periodic lattice")]
    UnsupportedTopology { strategy: &'static str },

    /// Wave number incompatible with the lattice width
    #[error("Wave number {kx} is degenerate for width {width}")]
    InvalidWaveNumber { kx: usize, width: usize },

    /// Anomaly detector configuration is inconsistent
    #[error("Invalid detector config: {0}")]
    InvalidDetectorConfig(String),

    /// A simulation parameter is out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation needs the deterministic swap rule
    #[error("Evolution rule '{0}' is not reversible")]
    NotReversible(&'static str),

    /// No history left to rewind through
    #[error("History exhausted")]
    HistoryExhausted,

    /// Bookmark label is unknown
    #[error("Bookmark not found: {0}")]
    BookmarkNotFound(String),

    /// Bookmark points at a history entry that was evicted
    #[error("Bookmark '{0}' refers to an evicted history entry")]
    BookmarkEvicted(String),

    /// Snapshot does not describe a consistent lattice
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// JSON encoding/decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A long-running validation was cancelled by its caller
    #[error("Cancelled after {completed} of {total} steps")]
    Cancelled { completed: usize, total: usize },
}

impl LatticeError {
    /// Creates a parameter error.
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Creates a snapshot error.
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::InvalidSnapshot(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LatticeError>;
