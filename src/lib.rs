//! Scoring core for an FPV drone race timer: leaderboards, cached roll-ups,
//! and win-condition evaluation.
//!
//! # Examples
//!
//! Ranking one race directly with [`engine::ranking::build_leaderboard`]:
//! ```
//! use heatboard::{
//!     engine::ranking::{PilotInput, RankingInput, RunInput, build_leaderboard, meta_for_format},
//!     lap::{LapSource, Pilot, RaceFormat, append_lap},
//! };
//!
//! let format = RaceFormat::new("Open");
//! let mut laps = Vec::new();
//! for ts in [1_200, 21_000, 40_500] {
//!     append_lap(&mut laps, 1, 0, ts, LapSource::Realtime);
//! }
//! let input = RankingInput {
//!     pilots: vec![PilotInput {
//!         pilot: Pilot { id: 1, callsign: "ACE".to_string(), team: "A".to_string() },
//!         node: Some(0),
//!         runs: vec![RunInput { laps, start_behavior: format.start_behavior, source: None }],
//!     }],
//!     meta: meta_for_format(Some(&format), 3),
//!     live: true,
//! };
//! let board = build_leaderboard(&input, None);
//! assert_eq!(board.by_race_time[0].laps, 2);
//! assert_eq!(board.by_race_time[0].fastest_lap_raw, 19_500);
//! ```
//!
//! Runtime usage with a SQLite cache sink:
//! ```no_run
//! use std::sync::Arc;
//!
//! use heatboard::{
//!     config::ScoringConfig,
//!     core::{race::RaceState, source::StoreSource, store::RecordStore},
//!     lap::{LapSource, RaceFormat},
//!     persist::sqlite::SqliteCacheSink,
//!     runtime::handle::{RaceSetup, RuntimeConfig, spawn_race_control},
//! };
//! use parking_lot::RwLock;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut store = RecordStore::new();
//! let (pilot, _) = store.add_pilot("ACE", "");
//! let (format, _) = store.add_format(RaceFormat::new("Open"));
//! let (heat, _) = store.add_heat(None, None).expect("heat");
//!
//! let source = StoreSource::new(
//!     Arc::new(RwLock::new(store)),
//!     Arc::new(RwLock::new(RaceState::new(8, RaceFormat::new("Open")))),
//!     3,
//! );
//! let sink = SqliteCacheSink::open("heatboard.db").expect("open sqlite");
//! let handle = spawn_race_control(source, ScoringConfig::default(), Some(Box::new(sink)), RuntimeConfig::default());
//!
//! handle
//!     .stage_race(RaceSetup { heat_id: Some(heat), format_id: Some(format), seats: vec![(0, pilot)] })
//!     .await
//!     .expect("stage");
//! handle.start_race().await.expect("start");
//! handle.record_crossing(0, 1_500, LapSource::Realtime).await.expect("lap");
//! let _board = handle.current_results().await.expect("results");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Result cache: tokens, single-flight and roll-up reads.
pub mod cache;
/// Scoring configuration.
pub mod config;
/// Record store, live race state and results source.
pub mod core;
/// Ranking, merge, team, win and gap computations.
pub mod engine;
/// Lap, pilot, format and race records.
pub mod lap;
/// Leaderboard rows and views.
pub mod leaderboard;
/// Record mutation op model.
pub mod op;
/// Cache persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Log subscriber setup.
pub mod telemetry;
/// Shared primitive types and enums.
pub mod types;
