pub mod protocol;

pub use protocol::{BlockChange, ChunkData, TerrainPacket};
