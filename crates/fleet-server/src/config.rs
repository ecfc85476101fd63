//! Server configuration from environment.

use fleet_core::{FlightConfig, PlannerConfig, SchedulerConfig};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where snapshots are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotBackend {
    /// Pretty-printed JSON, one file plus rotated copies
    File,
    Sqlite,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub schedule_interval: Duration,
    pub monitor_interval: Duration,
    pub snapshot_interval: Duration,
    pub snapshot_backend: SnapshotBackend,
    pub snapshot_path: PathBuf,
    pub max_snapshot_files: usize,
    pub database_max_connections: u32,
    /// Vehicle gateway base URL; commands are only logged when unset
    pub gateway_url: Option<String>,
    pub gateway_timeout: Duration,
    pub world_path: Option<PathBuf>,
    pub world_refresh_interval: Duration,
    pub command_channel_capacity: usize,
    pub path_cache_ttl: Duration,
    pub path_cache_max_entries: usize,
    /// Archived routes older than this are dropped
    pub route_archive_retention: Duration,
    pub log_json: bool,
    pub scheduler: SchedulerConfig,
    pub flight: FlightConfig,
    pub planner: PlannerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            schedule_interval: Duration::from_millis(2000),
            monitor_interval: Duration::from_millis(1000),
            snapshot_interval: Duration::from_secs(300),
            snapshot_backend: SnapshotBackend::File,
            snapshot_path: PathBuf::from("data/fleet_state.json"),
            max_snapshot_files: 5,
            database_max_connections: 4,
            gateway_url: None,
            gateway_timeout: Duration::from_secs(5),
            world_path: None,
            world_refresh_interval: Duration::from_secs(30),
            command_channel_capacity: 1024,
            path_cache_ttl: Duration::from_secs(600),
            path_cache_max_entries: 2000,
            route_archive_retention: Duration::from_secs(3600),
            log_json: false,
            scheduler: SchedulerConfig::default(),
            flight: FlightConfig::default(),
            planner: PlannerConfig::default(),
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let snapshot_backend = match non_empty("FLEET_SNAPSHOT_BACKEND").as_deref() {
            Some("sqlite") => SnapshotBackend::Sqlite,
            Some("none") | Some("off") => SnapshotBackend::Disabled,
            _ => SnapshotBackend::File,
        };
        let snapshot_path = non_empty("FLEET_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| match snapshot_backend {
                SnapshotBackend::Sqlite => PathBuf::from("data/fleet.db"),
                _ => defaults.snapshot_path.clone(),
            });

        let mut scheduler = defaults.scheduler.clone();
        if let Some(value) = parsed("FLEET_MIN_BATTERY") {
            scheduler.min_battery_level = value;
        }
        if let Some(value) = parsed("FLEET_LOW_BATTERY") {
            scheduler.low_battery_threshold = value;
        }
        if let Some(value) = parsed("FLEET_VEHICLE_TIMEOUT_SECS") {
            scheduler.vehicle_timeout_secs = value;
        }
        if let Some(value) = parsed("FLEET_TASK_RETRY_LIMIT") {
            scheduler.task_retry_limit = value;
        }
        if let Some(value) = parsed("FLEET_AGING_PER_HOUR") {
            scheduler.aging_per_hour = value;
        }
        if let Some(value) = parsed("FLEET_MAX_CONCURRENT_TASKS") {
            scheduler.max_concurrent_tasks = value;
        }
        if let Some(value) = parsed("FLEET_QUEUE_SIZE_LIMIT") {
            scheduler.queue_size_limit = value;
        }

        let mut flight = defaults.flight.clone();
        if let Some(value) = parsed("FLEET_MIN_ALTITUDE_M") {
            flight.min_altitude_m = value;
        }
        if let Some(value) = parsed("FLEET_MAX_ALTITUDE_M") {
            flight.max_altitude_m = value;
        }
        if let Some(value) = parsed("FLEET_MIN_SEPARATION_M") {
            flight.min_separation_m = value;
        }
        if let Some(value) = parsed("FLEET_VERTICAL_SEPARATION_M") {
            flight.vertical_separation_m = value;
        }
        if let Some(value) = parsed("FLEET_MAX_ROUTES_PER_CELL") {
            flight.max_routes_per_cell = value;
        }

        let mut planner = defaults.planner.clone();
        planner.min_altitude_m = flight.min_altitude_m;
        planner.max_altitude_m = flight.max_altitude_m;
        if let Some(value) = parsed("FLEET_GRID_SIZE_M") {
            planner.grid_size_m = value;
        }
        if let Some(value) = parsed("FLEET_SAFETY_MARGIN_M") {
            planner.safety_margin_m = value;
        }
        planner.rrt_seed = parsed("FLEET_RRT_SEED");

        Self {
            server_port: parsed("FLEET_PORT").unwrap_or(defaults.server_port),
            schedule_interval: parsed("FLEET_SCHEDULE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.schedule_interval),
            monitor_interval: parsed("FLEET_MONITOR_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.monitor_interval),
            snapshot_interval: parsed("FLEET_SNAPSHOT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.snapshot_interval),
            snapshot_backend,
            snapshot_path,
            max_snapshot_files: parsed("FLEET_MAX_SNAPSHOT_FILES").unwrap_or(defaults.max_snapshot_files),
            database_max_connections: parsed("FLEET_DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            gateway_url: non_empty("FLEET_GATEWAY_URL").map(|url| url.trim_end_matches('/').to_string()),
            gateway_timeout: parsed("FLEET_GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            world_path: non_empty("FLEET_WORLD_PATH").map(PathBuf::from),
            world_refresh_interval: parsed("FLEET_WORLD_REFRESH_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.world_refresh_interval),
            command_channel_capacity: parsed("FLEET_COMMAND_CHANNEL_CAPACITY")
                .unwrap_or(defaults.command_channel_capacity),
            path_cache_ttl: parsed("FLEET_PATH_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.path_cache_ttl),
            path_cache_max_entries: parsed("FLEET_PATH_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.path_cache_max_entries),
            route_archive_retention: parsed("FLEET_ROUTE_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.route_archive_retention),
            log_json: matches!(non_empty("FLEET_LOG_FORMAT").as_deref(), Some("json")),
            scheduler,
            flight,
            planner,
        }
    }
}
