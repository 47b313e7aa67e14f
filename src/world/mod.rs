pub mod block_flags;
pub mod block_id;
pub mod blocks_data;
pub mod chunk_coord;
pub mod column;
pub mod generator;
pub mod lighting;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use block_flags::BlockFlags;
pub use block_id::BlockId;
pub use blocks_data::{BlockProperties, BlockRegistry};
pub use chunk_coord::{BlockPos, ChunkCoord, RegionCoord, SectionKey, WorldBounds};
pub use column::{MetaValue, VoxelColumn};
pub use generator::TerrainGenerator;
pub use lighting::{LightingEngine, Neighborhood};
pub use storage::{ColumnPersistence, ColumnRecord, PersistenceLayer};
pub use store::{ChunkStore, HasColumn, Lookup, Residency};
