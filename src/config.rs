use std::time::Duration;

/// Per-shard tuning knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// When false, edge property writes fail with `PropertiesDisabled` and
    /// edges carry no property storage.
    pub properties_on_edges: bool,
    /// Vertex count past which `should_split` starts suggesting a split.
    pub split_vertex_threshold: usize,
    /// How long the garbage collector waits between passes when driven by
    /// the worker cron.
    pub gc_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            properties_on_edges: true,
            split_vertex_threshold: 100_000,
            gc_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Small thresholds so tests exercise splits and GC quickly.
    pub fn for_testing() -> Self {
        Self {
            properties_on_edges: true,
            split_vertex_threshold: 8,
            gc_interval: Duration::from_millis(10),
        }
    }

    pub fn without_edge_properties() -> Self {
        Self {
            properties_on_edges: false,
            ..Self::default()
        }
    }
}

/// Shard-manager tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub worker_threads: usize,
    /// Reconciliation happens at a random point inside this interval.
    pub cron_interval_min: Duration,
    pub cron_interval_max: Duration,
    /// Deadline after which an in-flight heartbeat is abandoned and
    /// re-issued against the current leader guess.
    pub heartbeat_deadline: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            cron_interval_min: Duration::from_millis(100),
            cron_interval_max: Duration::from_millis(200),
            heartbeat_deadline: Duration::from_millis(200),
        }
    }
}
