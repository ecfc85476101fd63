//! Bounded, time-limited cache of planned paths.

use dashmap::DashMap;
use fleet_core::{PlanMode, PlannedPath, Position, VehicleKind};
use std::time::{Duration, Instant};

/// Quantization applied to coordinates in cache keys (about 1.1 m of latitude).
const COORD_SCALE: f64 = 1e5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathKey {
    start: (i64, i64, i64),
    end: (i64, i64, i64),
    mode: PlanMode,
    kind: VehicleKind,
    world_version: u64,
}

impl PathKey {
    pub fn new(start: &Position, end: &Position, mode: PlanMode, kind: VehicleKind, world_version: u64) -> Self {
        Self {
            start: quantize(start),
            end: quantize(end),
            mode,
            kind,
            world_version,
        }
    }
}

fn quantize(position: &Position) -> (i64, i64, i64) {
    (
        (position.lat * COORD_SCALE).round() as i64,
        (position.lon * COORD_SCALE).round() as i64,
        position.altitude_m.round() as i64,
    )
}

#[derive(Debug, Clone)]
struct CachedPath {
    path: PlannedPath,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct PathCache {
    entries: DashMap<PathKey, CachedPath>,
    ttl: Duration,
    max_entries: usize,
}

impl PathCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &PathKey) -> Option<PlannedPath> {
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() <= self.ttl).then(|| entry.path.clone()))?;
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    pub fn insert(&self, key: PathKey, path: PlannedPath) {
        self.entries.insert(key, CachedPath { path, stored_at: Instant::now() });
        if self.entries.len() > self.max_entries {
            self.prune();
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the oldest ones until the bound holds.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut stamps: Vec<(PathKey, Instant)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().stored_at))
            .collect();

        for (key, stored_at) in &stamps {
            if now.duration_since(*stored_at) > self.ttl {
                self.entries.remove(key);
            }
        }
        if self.entries.len() <= self.max_entries {
            return;
        }

        stamps.sort_by_key(|(_, stored_at)| *stored_at);
        for (key, _) in stamps {
            if self.entries.len() <= self.max_entries {
                break;
            }
            self.entries.remove(&key);
        }
    }
}
