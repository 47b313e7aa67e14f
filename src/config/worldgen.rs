use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorKind {
    Flat,
    Noise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldGenConfig {
    pub world_seed: u64,
    pub generator: GeneratorKind,
    pub sea_level: usize,
    pub terrain_amplitude: f64,
    pub noise_scale: f64,
    pub noise_octaves: usize,
    pub tree_density: f64,
}

impl Default for WorldGenConfig {
    fn default() -> Self {
        Self {
            world_seed: 0,
            generator: GeneratorKind::Noise,
            sea_level: 64,
            terrain_amplitude: 24.0,
            noise_scale: 0.01,
            noise_octaves: 4,
            tree_density: 0.01,
        }
    }
}
