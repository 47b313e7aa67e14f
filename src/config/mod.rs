pub mod chunksys;
pub mod core;
pub mod rendering;
pub mod worldgen;

pub use chunksys::ChunkSysConfig;
pub use core::EngineConfig;
pub use rendering::RenderConfig;
pub use worldgen::{GeneratorKind, WorldGenConfig};
