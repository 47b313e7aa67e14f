use crate::net::protocol::{BlockChange, ChunkData};
use crate::server::controller::TerrainEditor;
use crate::world::block_id::BlockId;
use crate::world::chunk_coord::{BlockPos, ChunkCoord};
use crate::world::storage::EntityRecord;

pub type PlayerId = u64;

/// Outgoing terrain traffic to connected peers.
pub trait TerrainEventSink: Send + Sync {
    fn send_chunk(&self, player: PlayerId, data: ChunkData);
    fn send_block_change(&self, player: PlayerId, change: BlockChange);
}

/// Owner of the entities living inside columns.
pub trait EntityHost: Send + Sync {
    /// Removes and returns the entities inside an evicted column.
    fn detach(&self, coord: ChunkCoord) -> Vec<EntityRecord>;
    /// Hands back entities restored with a column.
    fn attach(&self, coord: ChunkCoord, entities: Vec<EntityRecord>);
    /// Entities to include when the column is sent to a client.
    fn snapshot(&self, _coord: ChunkCoord) -> Vec<EntityRecord> {
        Vec::new()
    }
}

/// Behaviour run when a delayed update scheduled by `kind` comes due.
pub trait UpdateHandler: Send + Sync {
    fn run(&self, editor: &mut TerrainEditor<'_>, pos: BlockPos, kind: BlockId);
}

/// Drops all events; used when nothing is listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl TerrainEventSink for NoEvents {
    fn send_chunk(&self, _player: PlayerId, _data: ChunkData) {}

    fn send_block_change(&self, _player: PlayerId, _change: BlockChange) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntities;

impl EntityHost for NoEntities {
    fn detach(&self, _coord: ChunkCoord) -> Vec<EntityRecord> {
        Vec::new()
    }

    fn attach(&self, coord: ChunkCoord, entities: Vec<EntityRecord>) {
        if !entities.is_empty() {
            log::debug!("Discarding {} entities of column {}", entities.len(), coord);
        }
    }
}
