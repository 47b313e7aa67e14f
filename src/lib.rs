pub mod client;
pub mod config;
pub mod net;
pub mod server;
pub mod utils;
pub mod world;

// Re-export commonly used types
pub use client::{ClientMeshPipeline, ClientTerrainController};
pub use config::{ChunkSysConfig, EngineConfig, RenderConfig, WorldGenConfig};
pub use net::{BlockChange, ChunkData, TerrainPacket};
pub use server::{ColumnState, ServerTerrainController};
pub use utils::error::{ProtocolError, StorageError, TerrainError};
pub use utils::math::{ViewFrustum, AABB};
pub use world::{BlockId, BlockRegistry, ChunkCoord, ChunkStore, LightingEngine, SectionKey, VoxelColumn};
