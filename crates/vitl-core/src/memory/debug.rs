use serde::{Deserialize, Serialize};

/// Counters kept by an [`Arena`](super::Arena) built with `stats = true`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    /// Highest cursor value ever reached
    pub peak: usize,
    /// Bytes handed out over the arena's lifetime, padding excluded
    pub total_bytes: u64,
    /// Successful allocation calls
    pub allocations: u64,
    pub resets: u64,
}

impl ArenaStats {
    pub(crate) fn record_alloc(&mut self, bytes: usize, offset: usize) {
        self.allocations = self.allocations.saturating_add(1);
        self.total_bytes = self.total_bytes.saturating_add(bytes as u64);
        self.peak = self.peak.max(offset);
    }
}

/// Point-in-time shape of a Robin-Hood table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapStats {
    pub len: usize,
    /// Occupied plus tombstoned slots
    pub used: usize,
    pub capacity: usize,
    pub tombstones: usize,
    /// Longest distance any live entry sits from its ideal bucket
    pub max_displacement: usize,
    /// Sum of every live entry's displacement
    pub total_displacement: usize,
    /// `used / capacity`, 0.0 before the table exists
    pub load_factor: f64,
}

impl MapStats {
    /// Mean number of slots a live entry sits past its ideal bucket.
    pub fn mean_displacement(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            self.total_displacement as f64 / self.len as f64
        }
    }
}
