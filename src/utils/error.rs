use crate::world::chunk_coord::ChunkCoord;
use crate::world::column::ColumnError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Corrupt region data: {0}")]
    Corrupt(String),

    #[error("Invalid column data: {0}")]
    Column(#[from] ColumnError),
}

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("Column {0} is outside the world")]
    OutOfBounds(ChunkCoord),

    #[error("Column {0} is not loaded")]
    NotLoaded(ChunkCoord),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Packet encoding failed: {0}")]
    Encode(bincode::Error),

    #[error("Packet decoding failed: {0}")]
    Decode(bincode::Error),

    #[error("Invalid chunk payload: {0}")]
    InvalidChunk(#[from] ColumnError),

    #[error("Chunk {0} is outside the world")]
    OutOfBounds(ChunkCoord),
}
