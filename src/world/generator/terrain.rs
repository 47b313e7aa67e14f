use crate::config::WorldGenConfig;
use crate::world::block_id::BlockId;
use crate::world::blocks_data::{BEDROCK, DIRT, GRASS, LEAVES, LOG, SAND, STONE, TALL_GRASS, WATER};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::column::{VoxelColumn, SECTION_SIZE};
use crate::world::generator::TerrainGenerator;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;

const TRUNK_HEIGHT: usize = 5;

/// Perlin height field with grass, beaches, oceans and scattered trees.
pub struct NoiseGenerator {
    config: WorldGenConfig,
    height_noise: Fbm<Perlin>,
}

impl NoiseGenerator {
    pub fn new(config: WorldGenConfig) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.world_seed as u32)
            .set_octaves(config.noise_octaves)
            .set_frequency(config.noise_scale);
        Self {
            config,
            height_noise,
        }
    }

    /// Surface height (one past the top solid block) at a world position.
    pub fn surface_height(&self, wx: i32, wy: i32, z_size: usize) -> usize {
        let n = self.height_noise.get([wx as f64, wy as f64]);
        let h = self.config.sea_level as f64 + n * self.config.terrain_amplitude;
        let ceiling = (z_size as i64 - TRUNK_HEIGHT as i64 - 4).max(2);
        (h.round() as i64).clamp(2, ceiling) as usize
    }

    fn column_rng(&self, coord: ChunkCoord) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(
            self.config
                .world_seed
                .wrapping_add((coord.x() as i64 as u64).wrapping_mul(341_873_128_712))
                .wrapping_add((coord.y() as i64 as u64).wrapping_mul(132_897_987_541)),
        )
    }

    fn place_tree(column: &mut VoxelColumn, x: usize, y: usize, base: usize) {
        for dz in 0..TRUNK_HEIGHT {
            column.set_block(x, y, base + dz, LOG);
        }
        let crown = base + TRUNK_HEIGHT - 2;
        for dz in 0..3 {
            let radius: i32 = if dz == 2 { 1 } else { 2 };
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (lx, ly) = (x as i32 + dx, y as i32 + dy);
                    if !(0..SECTION_SIZE as i32).contains(&lx) || !(0..SECTION_SIZE as i32).contains(&ly) {
                        continue;
                    }
                    let (lx, ly, lz) = (lx as usize, ly as usize, crown + dz);
                    if column.block(lx, ly, lz).is_air() {
                        column.set_block(lx, ly, lz, LEAVES);
                    }
                }
            }
        }
    }
}

impl TerrainGenerator for NoiseGenerator {
    fn generate(&self, coord: ChunkCoord, column: &mut VoxelColumn) {
        let z_size = column.z_size();
        let sea = self.config.sea_level.min(z_size - 1);
        for y in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                let wx = coord.x() * SECTION_SIZE as i32 + x as i32;
                let wy = coord.y() * SECTION_SIZE as i32 + y as i32;
                let height = self.surface_height(wx, wy, z_size);
                let top: BlockId = if height <= sea + 1 { SAND } else { GRASS };

                column.set_block(x, y, 0, BEDROCK);
                for z in 1..height {
                    let id = if z + 1 == height {
                        top
                    } else if z + 4 >= height {
                        if top == SAND {
                            SAND
                        } else {
                            DIRT
                        }
                    } else {
                        STONE
                    };
                    column.set_block(x, y, z, id);
                }
                for z in height..sea {
                    column.set_block(x, y, z, WATER);
                }
            }
        }
    }

    fn populate(&self, column: &mut VoxelColumn, x: i32, y: i32, width: usize, height: usize) {
        let mut rng = self.column_rng(column.coord());
        let origin = column.coord().to_world_pos();
        let x0 = (x - origin.x as i32).clamp(0, SECTION_SIZE as i32) as usize;
        let y0 = (y - origin.y as i32).clamp(0, SECTION_SIZE as i32) as usize;
        let x1 = (x0 + width).min(SECTION_SIZE);
        let y1 = (y0 + height).min(SECTION_SIZE);

        for ly in y0..y1 {
            for lx in x0..x1 {
                let h = column.height(lx, ly);
                if h == 0 || h + TRUNK_HEIGHT + 2 >= column.z_size() {
                    continue;
                }
                if column.block(lx, ly, h - 1) != GRASS {
                    continue;
                }
                let roll: f64 = rng.gen();
                if roll < self.config.tree_density {
                    Self::place_tree(column, lx, ly, h);
                } else if roll < self.config.tree_density + 0.1 {
                    column.set_block(lx, ly, h, TALL_GRASS);
                }
            }
        }
    }
}
