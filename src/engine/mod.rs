//! Scoring computations: ranking, roll-up merge, team aggregation, win
//! conditions and display projections.

/// Gap-to-rank projection for overlays.
pub mod gap;
/// Incremental roll-up of child leaderboards.
pub mod merge;
/// Points and class ranking methods.
pub mod points;
/// Per-pilot lap accounting and ranked views.
pub mod ranking;
/// Team and co-op aggregation.
pub mod team;
/// Record-layer, race-signal and plugin traits.
pub mod traits;
/// Win-condition evaluator.
pub mod win;
