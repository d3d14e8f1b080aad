//! Result cache manager.
//!
//! Each scope holds a results slot and a class-ranking slot. Readers get
//! the committed value when it is fresh; otherwise they capture the
//! current data token, build, and commit only if no invalidation landed in
//! between. Roll-up scopes are built from their children's cached
//! leaderboards.

use std::{future::Future, pin::Pin, sync::Arc, time::Instant};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::ScoringConfig,
    engine::{
        merge::merge_leaderboards,
        points::Ranking,
        traits::{BuildPlan, ResultsSource},
    },
    leaderboard::Leaderboard,
    persist::normalize_entries,
    types::{ClassId, Scope},
};

use super::{
    entry::{EntryStatus, ResultsCacheEntry, Token, TokenClock},
    flight::{ScopeFlights, SingleFlight},
};

/// Boxed future returned by recursive cache reads.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Option<T>> + Send + 'a>>;

/// Which value of a scope an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// The scope's leaderboard.
    Results,
    /// The class ranking (class scopes only).
    Ranking,
}

impl Slot {
    /// Stable storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Results => "results",
            Slot::Ranking => "ranking",
        }
    }
}

/// One persisted slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotEntry {
    /// Leaderboard entry.
    Results(ResultsCacheEntry<Arc<Leaderboard>>),
    /// Class ranking entry.
    Ranking(ResultsCacheEntry<Arc<Ranking>>),
}

impl SlotEntry {
    /// Slot this entry belongs in.
    pub fn slot(&self) -> Slot {
        match self {
            SlotEntry::Results(_) => Slot::Results,
            SlotEntry::Ranking(_) => Slot::Ranking,
        }
    }

    /// `(data_ver, build_ver)` of the entry.
    pub fn tokens(&self) -> (Option<Token>, Option<Token>) {
        match self {
            SlotEntry::Results(entry) => (entry.data_ver, entry.build_ver),
            SlotEntry::Ranking(entry) => (entry.data_ver, entry.build_ver),
        }
    }

    /// See [`ResultsCacheEntry::normalize`].
    pub fn normalize(&mut self, token: Token) -> bool {
        match self {
            SlotEntry::Results(entry) => entry.normalize(token),
            SlotEntry::Ranking(entry) => entry.normalize(token),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ScopeEntries {
    results: ResultsCacheEntry<Arc<Leaderboard>>,
    ranking: ResultsCacheEntry<Arc<Ranking>>,
}

impl ScopeEntries {
    fn export(&self, slot: Slot) -> SlotEntry {
        match slot {
            Slot::Results => SlotEntry::Results(self.results.clone()),
            Slot::Ranking => SlotEntry::Ranking(self.ranking.clone()),
        }
    }
}

type Pick<T> = fn(&mut ScopeEntries) -> &mut ResultsCacheEntry<T>;

fn results_slot(entries: &mut ScopeEntries) -> &mut ResultsCacheEntry<Arc<Leaderboard>> {
    &mut entries.results
}

fn ranking_slot(entries: &mut ScopeEntries) -> &mut ResultsCacheEntry<Arc<Ranking>> {
    &mut entries.ranking
}

enum Prepared<T> {
    Fresh(Option<T>),
    Build { token: Token, previous: Option<T> },
}

/// Token-validated result cache over a [`ResultsSource`].
pub struct ResultsCache<S: ResultsSource> {
    source: Arc<S>,
    entries: Mutex<HashMap<Scope, ScopeEntries>>,
    clock: TokenClock,
    single_flight: SingleFlight,
    flights: ScopeFlights,
    dirty: Mutex<HashSet<(Scope, Slot)>>,
    config: ScoringConfig,
}

impl<S: ResultsSource> ResultsCache<S> {
    /// Empty cache over `source`.
    pub fn new(source: Arc<S>, config: ScoringConfig) -> Self {
        let timeout = config.single_flight_timeout();
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
            clock: TokenClock::new(),
            single_flight: SingleFlight::new(timeout),
            flights: ScopeFlights::new(timeout),
            dirty: Mutex::new(HashSet::new()),
            config,
        }
    }

    /// Source the cache builds from.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Scoring settings in force.
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Top-level read: one traversal at a time across the whole cache.
    pub async fn results(&self, scope: Scope) -> Option<Arc<Leaderboard>> {
        let _flight = self.single_flight.enter().await;
        self.get(scope).await
    }

    /// Returns the scope's leaderboard, building and committing it when it
    /// is not fresh. `None` means no data.
    ///
    /// When invalidations beat every commit for `max_build_attempts` builds,
    /// the last build is handed back provisionally. It is never committed,
    /// the entry stays stale and the next read rebuilds.
    pub fn get(&self, scope: Scope) -> CacheFuture<'_, Arc<Leaderboard>> {
        Box::pin(async move {
            if let Some(value) = self.fresh(scope, results_slot) {
                debug!(scope = %scope, "cache hit");
                return value;
            }

            let _guard = self.flights.enter(scope).await;
            let mut attempts = 0;
            loop {
                attempts += 1;
                let (token, previous) = match self.prepare(scope, results_slot) {
                    Prepared::Fresh(value) => return value,
                    Prepared::Build { token, previous } => (token, previous),
                };

                let started = Instant::now();
                let built = self.build(scope, previous.as_deref()).await;
                debug!(
                    scope = %scope,
                    token = token.0,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "built results"
                );

                if self.commit_slot(scope, results_slot, Slot::Results, token, built.clone()) {
                    return built;
                }
                if attempts >= self.config.max_build_attempts.max(1) {
                    warn!(
                        scope = %scope,
                        attempts,
                        provisional = true,
                        "results kept changing during build, returning provisional board"
                    );
                    return built;
                }
            }
        })
    }

    /// Commits `value` built from `token`. Discarded when the scope was
    /// invalidated after `token` was captured.
    pub fn commit(&self, scope: Scope, token: Token, value: Option<Arc<Leaderboard>>) -> bool {
        self.commit_slot(scope, results_slot, Slot::Results, token, value)
    }

    /// Marks both slots of `scope` stale. Returns the data token now in
    /// force for the results slot.
    pub fn invalidate(&self, scope: Scope, token: Option<Token>) -> Token {
        let token = token.unwrap_or_else(|| self.clock.mint());
        let data_ver = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(scope).or_default();
            entry.ranking.invalidate(token);
            entry.results.invalidate(token)
        };
        self.mark_dirty(scope, Slot::Results);
        self.mark_dirty(scope, Slot::Ranking);
        debug!(scope = %scope, token = data_ver.0, "invalidated");
        data_ver
    }

    /// Invalidates `scope` and every scope that aggregates it, under one
    /// token. Returns the scopes touched.
    pub fn invalidate_with_dependents(&self, scope: Scope) -> Vec<Scope> {
        self.invalidate_scopes(&[scope])
    }

    /// Invalidates each of `scopes` and all their dependents under one token.
    pub fn invalidate_scopes(&self, scopes: &[Scope]) -> Vec<Scope> {
        let token = self.clock.mint();
        let mut seen: HashSet<Scope> = HashSet::new();
        let mut queue: Vec<Scope> = scopes.to_vec();
        let mut touched = Vec::new();

        while let Some(scope) = queue.pop() {
            if !seen.insert(scope) {
                continue;
            }
            self.invalidate(scope, Some(token));
            touched.push(scope);
            queue.extend(self.source.parents(scope));
        }

        if !touched.is_empty() {
            info!(count = touched.len(), token = token.0, "results invalidated");
        }
        touched
    }

    /// Invalidates every scope the cache knows about.
    pub fn invalidate_all(&self) -> usize {
        let token = self.clock.mint();
        let scopes: Vec<Scope> = self.entries.lock().keys().copied().collect();
        for scope in &scopes {
            self.invalidate(*scope, Some(token));
        }
        info!(count = scopes.len(), "all results invalidated");
        scopes.len()
    }

    /// Class ranking for `class_id`, built from the class's heat results
    /// and cached in the class's ranking slot.
    pub async fn class_ranking(&self, class_id: ClassId) -> Option<Arc<Ranking>> {
        let scope = Scope::Class(class_id);
        if let Some(value) = self.fresh(scope, ranking_slot) {
            return value;
        }

        let _flight = self.single_flight.enter().await;
        let _guard = self.flights.enter(scope).await;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let token = match self.prepare(scope, ranking_slot) {
                Prepared::Fresh(value) => return value,
                Prepared::Build { token, .. } => token,
            };

            let built = self.build_ranking(class_id).await;
            if self.commit_slot(scope, ranking_slot, Slot::Ranking, token, built.clone()) {
                return built;
            }
            if attempts >= self.config.max_build_attempts.max(1) {
                warn!(
                    scope = %scope,
                    attempts,
                    provisional = true,
                    "ranking kept changing during build, returning provisional ranking"
                );
                return built;
            }
        }
    }

    /// Validity of the scope's results slot.
    pub fn status(&self, scope: Scope) -> EntryStatus {
        self.entries
            .lock()
            .get(&scope)
            .map_or(EntryStatus::Missing, |entry| entry.results.status())
    }

    /// Snapshot of the scope's results slot.
    pub fn entry(&self, scope: Scope) -> Option<ResultsCacheEntry<Arc<Leaderboard>>> {
        self.entries.lock().get(&scope).map(|entry| entry.results.clone())
    }

    /// Every slot of every scope, in scope order.
    pub fn export_entries(&self) -> Vec<(Scope, SlotEntry)> {
        let entries = self.entries.lock();
        let mut scopes: Vec<Scope> = entries.keys().copied().collect();
        scopes.sort();
        scopes
            .into_iter()
            .filter_map(|scope| entries.get(&scope).map(|entry| (scope, entry)))
            .flat_map(|(scope, entry)| {
                [(scope, entry.export(Slot::Results)), (scope, entry.export(Slot::Ranking))]
            })
            .collect()
    }

    /// Loads persisted entries. Anything not fresh is demoted so the next
    /// reader rebuilds it. Returns the number demoted.
    pub fn restore(&self, mut loaded: Vec<(Scope, SlotEntry)>) -> usize {
        for (_, slot_entry) in &loaded {
            let (data_ver, build_ver) = slot_entry.tokens();
            for token in [data_ver, build_ver].into_iter().flatten() {
                self.clock.observe(token);
            }
        }
        let demoted = normalize_entries(&mut loaded, self.clock.mint());

        let mut entries = self.entries.lock();
        for (scope, slot_entry) in loaded {
            let entry = entries.entry(scope).or_default();
            match slot_entry {
                SlotEntry::Results(results) => entry.results = results,
                SlotEntry::Ranking(ranking) => entry.ranking = ranking,
            }
        }
        if demoted > 0 {
            info!(demoted, "restored cache entries needing rebuild");
        }
        demoted
    }

    /// Slots changed since the last drain, with their current contents.
    pub fn drain_dirty(&self) -> Vec<(Scope, SlotEntry)> {
        let mut dirty: Vec<(Scope, Slot)> = self.dirty.lock().drain().collect();
        dirty.sort_by_key(|(scope, slot)| (*scope, slot.as_str()));
        let entries = self.entries.lock();
        dirty
            .into_iter()
            .filter_map(|(scope, slot)| entries.get(&scope).map(|entry| (scope, entry.export(slot))))
            .collect()
    }

    async fn build(&self, scope: Scope, previous: Option<&Leaderboard>) -> Option<Arc<Leaderboard>> {
        match self.source.plan(scope) {
            BuildPlan::NoData => None,
            BuildPlan::Rank => self.source.rank(scope, previous).map(Arc::new),
            BuildPlan::Merge(children) => {
                let mut boards = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(board) = self.get(child).await {
                        boards.push(board);
                    }
                    tokio::task::yield_now().await;
                }
                if boards.is_empty() {
                    return None;
                }
                let refs: Vec<&Leaderboard> = boards.iter().map(Arc::as_ref).collect();
                Some(Arc::new(merge_leaderboards(
                    &refs,
                    self.config.consecutives_count,
                    previous,
                )))
            }
        }
    }

    async fn build_ranking(&self, class_id: ClassId) -> Option<Arc<Ranking>> {
        let BuildPlan::Merge(children) = self.source.plan(Scope::Class(class_id)) else {
            return None;
        };
        let mut heats = Vec::with_capacity(children.len());
        for child in children {
            if let Scope::Heat(heat_id) = child {
                if let Some(board) = self.get(child).await {
                    heats.push((heat_id, board));
                }
            }
            tokio::task::yield_now().await;
        }
        self.source.rank_class(class_id, &heats).map(Arc::new)
    }

    fn fresh<T: Clone>(&self, scope: Scope, pick: Pick<T>) -> Option<Option<T>> {
        let mut entries = self.entries.lock();
        entries.get_mut(&scope).and_then(|entry| pick(entry).fresh_value())
    }

    fn prepare<T: Clone>(&self, scope: Scope, pick: Pick<T>) -> Prepared<T> {
        let mut entries = self.entries.lock();
        let entry = pick(entries.entry(scope).or_default());
        let token = match entry.status() {
            EntryStatus::Fresh => return Prepared::Fresh(entry.value.clone()),
            EntryStatus::Stale => entry.data_ver,
            EntryStatus::Missing => {
                debug!(scope = %scope, "cache miss");
                None
            }
            EntryStatus::Corrupt => {
                warn!(scope = %scope, "corrupt cache entry, rebuilding");
                entry.build_ver = None;
                None
            }
        };
        let token = match token {
            Some(token) => token,
            None => entry.invalidate(self.clock.mint()),
        };
        Prepared::Build {
            token,
            previous: entry.value.clone(),
        }
    }

    fn commit_slot<T: Clone>(&self, scope: Scope, pick: Pick<T>, slot: Slot, token: Token, value: Option<T>) -> bool {
        let committed = {
            let mut entries = self.entries.lock();
            pick(entries.entry(scope).or_default()).try_commit(token, value)
        };
        if !committed {
            debug!(scope = %scope, token = token.0, "commit discarded, data changed during build");
            return false;
        }
        self.mark_dirty(scope, slot);
        true
    }

    fn mark_dirty(&self, scope: Scope, slot: Slot) {
        self.dirty.lock().insert((scope, slot));
    }
}
