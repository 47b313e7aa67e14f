use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Keep meshes of sections that left the visible set.
    pub keep_invisible_meshes: bool,
    /// Squared camera distance beyond which sections use the reduced mesh.
    pub lod_distance_sq: f32,
    pub worker_idle_ms: u64,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            keep_invisible_meshes: false,
            lod_distance_sq: 9216.0,
            worker_idle_ms: 5,
            fov: 70.0,
            near: 0.1,
            far: 512.0,
        }
    }
}
