use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSysConfig {
    /// Column height in blocks; must be a multiple of 16.
    pub z_size: usize,
    pub world_radius: i32,
    /// Extra rings loaded around each player so edge columns can become sendable.
    pub border_margin: i32,
    pub max_loads_per_tick: usize,
    pub max_evictions_per_tick: usize,
    pub tick_interval_ms: u64,
    pub max_outstanding_requests: usize,
    pub view_radius: i32,
    pub region_dir: PathBuf,
}

impl Default for ChunkSysConfig {
    fn default() -> Self {
        Self {
            z_size: 256,
            world_radius: 1_875_000,
            border_margin: 2,
            max_loads_per_tick: 32,
            max_evictions_per_tick: 64,
            tick_interval_ms: 50,
            max_outstanding_requests: 3,
            view_radius: 8,
            region_dir: PathBuf::from("world/regions"),
        }
    }
}
