//! Planner front end for the orchestrator.
//!
//! Holds the current world snapshot behind an `Arc` so planning can run on
//! the blocking pool without holding any lock, and memoizes results in a
//! [`PathCache`] tagged with the world version.

use crate::cache::{PathCache, PathKey};
use fleet_core::{
    FleetError, FleetResult, PathPlanner, PlanMode, PlannedPath, PlannerConfig, Position, RoutePlan,
    Separation, VehicleKind, World,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Vehicles closer than this to a stage start skip the approach leg.
const APPROACH_SKIP_M: f64 = 1.0;

pub struct PlannerService {
    config: PlannerConfig,
    world: RwLock<Arc<World>>,
    version: AtomicU64,
    cache: PathCache,
}

impl PlannerService {
    pub fn new(config: PlannerConfig, world: World, cache_ttl: Duration, cache_max_entries: usize) -> Self {
        Self {
            config,
            world: RwLock::new(Arc::new(world)),
            version: AtomicU64::new(1),
            cache: PathCache::new(cache_ttl, cache_max_entries),
        }
    }

    pub fn world(&self) -> Arc<World> {
        match self.world.read() {
            Ok(world) => world.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn cached_paths(&self) -> usize {
        self.cache.len()
    }

    pub fn prune_cache(&self) {
        self.cache.prune();
    }

    /// Swap in a new world; every cached path becomes stale.
    pub fn replace_world(&self, world: World) -> u64 {
        let world = Arc::new(world);
        match self.world.write() {
            Ok(mut slot) => *slot = world,
            Err(poisoned) => *poisoned.into_inner() = world,
        }
        self.cache.clear();
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Plan one leg for a vehicle of `kind` on the blocking pool.
    pub async fn plan(
        &self,
        kind: VehicleKind,
        start: Position,
        goal: Position,
        active: Arc<Vec<RoutePlan>>,
        separation: Separation,
    ) -> FleetResult<PlannedPath> {
        let world = self.world();
        let mode = PlanMode::for_vehicle(kind, &world);
        // Hybrid scores depend on live traffic; only traffic-free results are reusable.
        let cacheable = mode != PlanMode::Hybrid || active.is_empty();
        let key = PathKey::new(&start, &goal, mode, kind, self.version());

        if cacheable {
            if let Some(path) = self.cache.get(&key) {
                tracing::debug!(?mode, %kind, "path cache hit");
                return Ok(path);
            }
        }

        let config = self.config.clone();
        let path = tokio::task::spawn_blocking(move || {
            PathPlanner::new(&world, &config).plan(mode, &start, &goal, Utc::now(), &active, separation)
        })
        .await
        .map_err(|err| FleetError::NoPath(format!("planner worker failed: {err}")))??;

        if cacheable {
            self.cache.insert(key, path.clone());
        }
        Ok(path)
    }

    /// Route for a whole stage: vehicle position to stage start, then on to stage end.
    pub async fn plan_stage(
        &self,
        kind: VehicleKind,
        vehicle_at: Position,
        stage_start: Position,
        stage_end: Position,
        active: Arc<Vec<RoutePlan>>,
        separation: Separation,
    ) -> FleetResult<PlannedPath> {
        let leg = self.plan(kind, stage_start, stage_end, active.clone(), separation).await?;
        if fleet_core::spatial::ground_distance(&vehicle_at, &stage_start) < APPROACH_SKIP_M {
            return Ok(leg);
        }
        let approach = self.plan(kind, vehicle_at, stage_start, active, separation).await?;
        let path_type = leg.path_type;
        let mut joined = approach.concat(leg);
        joined.path_type = path_type;
        Ok(joined)
    }
}
