//! [`ResultsSource`] over the in-memory records and the live race.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::{
    engine::{
        points::{LastHeatPosition, Ranking},
        ranking::{PilotInput, RankingInput, RunInput, build_leaderboard, meta_for_format},
        traits::{BuildPlan, ClassRankMethod, PointsMethod, ResultsSource},
    },
    lap::{Heat, Pilot, SavedRace},
    leaderboard::{Leaderboard, ScoreSource},
    types::{ClassId, FormatId, HeatId, PilotId, Scope},
};

use super::{race::RaceState, store::RecordStore};

/// Reads [`RecordStore`] and [`RaceState`] to plan and rank scopes.
pub struct StoreSource {
    store: Arc<RwLock<RecordStore>>,
    race: Arc<RwLock<RaceState>>,
    consecutives_count: usize,
    points: HashMap<FormatId, Arc<dyn PointsMethod>>,
    class_rank: Arc<dyn ClassRankMethod>,
}

impl StoreSource {
    /// Source ranking classes by last heat position.
    pub fn new(store: Arc<RwLock<RecordStore>>, race: Arc<RwLock<RaceState>>, consecutives_count: usize) -> Self {
        Self {
            store,
            race,
            consecutives_count,
            points: HashMap::new(),
            class_rank: Arc::new(LastHeatPosition),
        }
    }

    /// Awards points with `method` on every race flown under `format_id`.
    pub fn with_points(mut self, format_id: FormatId, method: Arc<dyn PointsMethod>) -> Self {
        self.points.insert(format_id, method);
        self
    }

    /// Swaps the class ranking method.
    pub fn with_class_rank(mut self, method: Arc<dyn ClassRankMethod>) -> Self {
        self.class_rank = method;
        self
    }

    /// Shared record store.
    pub fn store(&self) -> &Arc<RwLock<RecordStore>> {
        &self.store
    }

    /// Shared live race.
    pub fn race(&self) -> &Arc<RwLock<RaceState>> {
        &self.race
    }

    fn rank_current(&self, previous: Option<&Leaderboard>) -> Option<Leaderboard> {
        let race = self.race.read();
        let format = race.format();
        let pilots: Vec<PilotInput> = race
            .active_nodes()
            .filter_map(|(node, slot)| {
                slot.pilot.as_ref().map(|pilot| PilotInput {
                    pilot: pilot.clone(),
                    node: Some(node),
                    runs: vec![RunInput {
                        laps: slot.laps.clone(),
                        start_behavior: format.start_behavior,
                        source: None,
                    }],
                })
            })
            .collect();
        if pilots.is_empty() {
            return None;
        }

        let input = RankingInput {
            pilots,
            meta: meta_for_format(Some(format), self.consecutives_count),
            live: true,
        };
        Some(build_leaderboard(&input, previous))
    }

    fn rank_race(&self, race: &SavedRace, previous: Option<&Leaderboard>) -> Leaderboard {
        let store = self.store.read();
        let format = race.format_id.and_then(|id| store.format(id));
        let meta = meta_for_format(format, self.consecutives_count);
        let start_behavior = meta.start_behavior.unwrap_or_default();
        let label = match store.heat(race.heat_id) {
            Some(heat) => format!("{} / Round {}", heat.display_name(), race.round_id),
            None => format!("Heat {} / Round {}", race.heat_id, race.round_id),
        };
        let source = ScoreSource {
            race_id: Some(race.id),
            heat_id: Some(race.heat_id),
            round_id: Some(race.round_id),
            label,
        };

        let pilots = race
            .runs
            .iter()
            .map(|run| PilotInput {
                pilot: pilot_or_placeholder(store.pilot(run.pilot_id), run.pilot_id),
                node: Some(run.node_index),
                runs: vec![RunInput {
                    laps: run.laps.clone(),
                    start_behavior,
                    source: Some(source.clone()),
                }],
            })
            .collect();

        let input = RankingInput {
            pilots,
            meta,
            live: false,
        };
        let mut leaderboard = build_leaderboard(&input, previous);
        if let Some(method) = race.format_id.and_then(|id| self.points.get(&id)) {
            method.apply(&mut leaderboard);
        }
        leaderboard
    }
}

fn pilot_or_placeholder(pilot: Option<&Pilot>, id: PilotId) -> Pilot {
    pilot.cloned().unwrap_or_else(|| Pilot {
        id,
        callsign: format!("Pilot {id}"),
        team: String::new(),
    })
}

impl ResultsSource for StoreSource {
    fn plan(&self, scope: Scope) -> BuildPlan {
        let store = self.store.read();
        let heat_has_data = |heat: &Heat| !store.races_by_heat(heat.id).is_empty();
        let children = match scope {
            Scope::Current => {
                let race = self.race.read();
                return if race.active_nodes().next().is_some() {
                    BuildPlan::Rank
                } else {
                    BuildPlan::NoData
                };
            }
            Scope::Race(id) => {
                return if store.race(id).is_some() {
                    BuildPlan::Rank
                } else {
                    BuildPlan::NoData
                };
            }
            Scope::Heat(id) => store.races_by_heat(id).iter().map(|race| Scope::Race(race.id)).collect(),
            Scope::Class(id) => store
                .heats_by_class(id)
                .into_iter()
                .filter(|heat| heat_has_data(heat))
                .map(|heat| Scope::Heat(heat.id))
                .collect(),
            Scope::Event => {
                let mut scopes: Vec<Scope> = store
                    .classes()
                    .into_iter()
                    .filter(|class| store.heats_by_class(class.id).into_iter().any(|heat| heat_has_data(heat)))
                    .map(|class| Scope::Class(class.id))
                    .collect();
                scopes.extend(
                    store
                        .unclassified_heats()
                        .into_iter()
                        .filter(|heat| heat_has_data(heat))
                        .map(|heat| Scope::Heat(heat.id)),
                );
                scopes
            }
        };

        if children.is_empty() {
            BuildPlan::NoData
        } else {
            BuildPlan::Merge(children)
        }
    }

    fn rank(&self, scope: Scope, previous: Option<&Leaderboard>) -> Option<Leaderboard> {
        match scope {
            Scope::Current => self.rank_current(previous),
            Scope::Race(id) => {
                let race = self.store.read().race(id).cloned()?;
                Some(self.rank_race(&race, previous))
            }
            Scope::Heat(_) | Scope::Class(_) | Scope::Event => None,
        }
    }

    fn parents(&self, scope: Scope) -> Vec<Scope> {
        let store = self.store.read();
        match scope {
            Scope::Current | Scope::Event => Vec::new(),
            Scope::Race(id) => store.race(id).map(|race| Scope::Heat(race.heat_id)).into_iter().collect(),
            Scope::Heat(id) => match store.heat(id).and_then(|heat| heat.class_id) {
                Some(class_id) => vec![Scope::Class(class_id)],
                None => vec![Scope::Event],
            },
            Scope::Class(_) => vec![Scope::Event],
        }
    }

    fn rank_class(&self, _class_id: ClassId, heats: &[(HeatId, Arc<Leaderboard>)]) -> Option<Ranking> {
        let store = self.store.read();
        let resolved: Vec<(&Heat, &Leaderboard)> = heats
            .iter()
            .filter_map(|(id, leaderboard)| store.heat(*id).map(|heat| (heat, leaderboard.as_ref())))
            .collect();
        if resolved.is_empty() {
            return None;
        }
        Some(self.class_rank.rank(&resolved))
    }
}
