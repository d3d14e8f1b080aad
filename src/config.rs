//! Scoring configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Consecutive window size used when a format does not override it.
pub const DEFAULT_CONSECUTIVES_COUNT: usize = 3;

/// Knobs for ranking and the result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Global consecutive window size (K).
    pub consecutives_count: usize,
    /// Longest a caller waits on an in-flight build before proceeding anyway.
    pub single_flight_timeout_ms: u64,
    /// Builds attempted per `get` when commits keep losing to invalidations.
    pub max_build_attempts: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            consecutives_count: DEFAULT_CONSECUTIVES_COUNT,
            single_flight_timeout_ms: 30_000,
            max_build_attempts: 8,
        }
    }
}

impl ScoringConfig {
    /// Single-flight wait bound as a [`Duration`].
    pub fn single_flight_timeout(&self) -> Duration {
        Duration::from_millis(self.single_flight_timeout_ms)
    }
}
