//! The fate registry: a cached, versioned snapshot of the rulebook.
//!
//! Fates live in an arena ordered by id. `follows` is stored as an id and
//! `precedes` is rebuilt from it whenever a snapshot is built, so the graph
//! never holds references into itself. Snapshots are immutable and shared
//! through `Arc`; committing a new fate invalidates the cached one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::Result;
use crate::model::{EventTypeId, Fate, FateId};
use crate::telemetry::metrics;

pub(crate) const FATE_COLUMNS: &str =
    "id, creation_type_id, completion_type_id, follows_id, description, for_owner, for_creator";

/// Point-in-time view of every fate.
#[derive(Debug, Clone, Default)]
pub struct FateSnapshot {
    generation: u64,
    fates: Vec<Fate>,
    index: HashMap<FateId, usize>,
}

impl FateSnapshot {
    /// Build a snapshot from stored rows, deriving `precedes` for each fate.
    pub fn build(generation: u64, mut fates: Vec<Fate>) -> Self {
        fates.sort_by_key(|f| f.id);
        let index: HashMap<FateId, usize> = fates
            .iter()
            .enumerate()
            .map(|(i, fate)| (fate.id, i))
            .collect();

        for fate in &mut fates {
            fate.precedes.clear();
        }
        let edges: Vec<(usize, FateId)> = fates
            .iter()
            .filter_map(|fate| {
                let parent = fate.follows_id?;
                index.get(&parent).map(|&i| (i, fate.id))
            })
            .collect();
        for (parent, child) in edges {
            fates[parent].precedes.push(child);
        }

        Self {
            generation,
            fates,
            index,
        }
    }

    /// Registry generation this snapshot was built at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn all(&self) -> &[Fate] {
        &self.fates
    }

    pub fn get(&self, id: FateId) -> Option<&Fate> {
        self.index.get(&id).map(|&i| &self.fates[i])
    }

    pub fn starting(&self) -> impl Iterator<Item = &Fate> {
        self.fates.iter().filter(|f| f.is_starting())
    }

    pub fn intermediate(&self) -> impl Iterator<Item = &Fate> {
        self.fates.iter().filter(|f| f.is_intermediate())
    }

    /// Starting fates opened by an event of `event_type`.
    pub fn starting_created_by(&self, event_type: EventTypeId) -> impl Iterator<Item = &Fate> {
        self.starting()
            .filter(move |f| f.creation_type_id == event_type)
    }

    /// Fates, starting or intermediate, closed by an event of `event_type`.
    pub fn completed_by(&self, event_type: EventTypeId) -> impl Iterator<Item = &Fate> {
        self.fates
            .iter()
            .filter(move |f| f.completion_type_id == event_type)
    }

    pub fn len(&self) -> usize {
        self.fates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fates.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    generation: u64,
    snapshot: Option<Arc<FateSnapshot>>,
}

/// Owner of the cached [`FateSnapshot`].
///
/// Loading and installing a snapshot races with invalidation: a loader only
/// installs what it read if the generation has not moved since it started.
#[derive(Debug, Default)]
pub struct FateRegistry {
    state: RwLock<RegistryState>,
}

impl FateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, loading it from `pool` if the cache is cold.
    ///
    /// Loads on its own pooled connection, never inside a transaction: a
    /// transaction may read from before the latest fate commit, and a
    /// snapshot cached from that view would hide the fate until the next
    /// invalidation. Callers that match inside a transaction take the
    /// snapshot before `begin`.
    pub async fn snapshot(&self, pool: &SqlitePool) -> Result<Arc<FateSnapshot>> {
        let generation = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let Some(snapshot) = &state.snapshot {
                return Ok(Arc::clone(snapshot));
            }
            state.generation
        };

        let rows = {
            let mut conn = pool.acquire().await?;
            load_fates_on(&mut conn).await?
        };

        let snapshot = Arc::new(FateSnapshot::build(generation, rows));
        metrics::fate_snapshot_loads().add(1, &[]);
        debug!(generation, fates = snapshot.len(), "fate snapshot loaded");

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.generation == generation && state.snapshot.is_none() {
            state.snapshot = Some(Arc::clone(&snapshot));
        }
        Ok(snapshot)
    }

    /// Drop the cached snapshot. Called once a fate change has been committed.
    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.generation += 1;
        state.snapshot = None;
        debug!(generation = state.generation, "fate snapshot invalidated");
    }

    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .generation
    }
}

async fn load_fates_on(conn: &mut SqliteConnection) -> Result<Vec<Fate>> {
    let rows = sqlx::query_as(&format!("SELECT {FATE_COLUMNS} FROM fates ORDER BY id"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}
