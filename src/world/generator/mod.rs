pub mod flat;
pub mod terrain;

pub use flat::FlatGenerator;
pub use terrain::NoiseGenerator;

use crate::config::{GeneratorKind, WorldGenConfig};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::column::VoxelColumn;
use std::sync::Arc;

/// Terrain source consulted by the server when a column is neither resident nor persisted.
pub trait TerrainGenerator: Send + Sync {
    /// Shapes a freshly created column.
    fn generate(&self, coord: ChunkCoord, column: &mut VoxelColumn);

    /// Decorates the `width` x `height` block area starting at world (x, y).
    /// Runs once, while the column is exclusively held by the caller.
    fn populate(&self, column: &mut VoxelColumn, x: i32, y: i32, width: usize, height: usize);
}

pub fn from_config(config: &WorldGenConfig) -> Arc<dyn TerrainGenerator> {
    match config.generator {
        GeneratorKind::Flat => Arc::new(FlatGenerator::default()),
        GeneratorKind::Noise => Arc::new(NoiseGenerator::new(config.clone())),
    }
}
