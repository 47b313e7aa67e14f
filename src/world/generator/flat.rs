use crate::world::block_id::BlockId;
use crate::world::blocks_data::{BEDROCK, DIRT, GRASS, STONE};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::column::{VoxelColumn, SECTION_SIZE};
use crate::world::generator::TerrainGenerator;

/// Horizontal layers stacked from z = 0 upward.
#[derive(Debug, Clone)]
pub struct FlatGenerator {
    layers: Vec<(BlockId, usize)>,
}

impl FlatGenerator {
    pub fn new(layers: Vec<(BlockId, usize)>) -> Self {
        Self { layers }
    }

    pub fn surface_height(&self) -> usize {
        self.layers.iter().map(|(_, depth)| depth).sum()
    }
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self::new(vec![(BEDROCK, 1), (STONE, 58), (DIRT, 4), (GRASS, 1)])
    }
}

impl TerrainGenerator for FlatGenerator {
    fn generate(&self, _coord: ChunkCoord, column: &mut VoxelColumn) {
        let mut z = 0;
        for &(id, depth) in &self.layers {
            for _ in 0..depth {
                if z >= column.z_size() {
                    return;
                }
                for y in 0..SECTION_SIZE {
                    for x in 0..SECTION_SIZE {
                        column.set_block(x, y, z, id);
                    }
                }
                z += 1;
            }
        }
    }

    fn populate(&self, _column: &mut VoxelColumn, _x: i32, _y: i32, _w: usize, _h: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers() {
        let generator = FlatGenerator::new(vec![(BEDROCK, 1), (DIRT, 2)]);
        let mut column = VoxelColumn::new(ChunkCoord::new(0, 0), 16);
        generator.generate(column.coord(), &mut column);
        assert_eq!(column.block(4, 4, 0), BEDROCK);
        assert_eq!(column.block(4, 4, 2), DIRT);
        assert!(column.block(4, 4, 3).is_air());
        assert_eq!(column.height(15, 15), generator.surface_height());
    }
}
