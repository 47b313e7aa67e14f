//! Terrain packets exchanged between the server and its clients.
use crate::utils::error::ProtocolError;
use crate::world::block_id::BlockId;
use crate::world::chunk_coord::{BlockPos, ChunkCoord};
use crate::world::column::{MetaValue, VoxelColumn};
use crate::world::storage::{EntityRecord, RunLength};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full contents of one column as sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    pub coord: ChunkCoord,
    pub z_size: u32,
    pub blocks: RunLength<u16>,
    pub meta: RunLength<u8>,
    pub light: RunLength<u8>,
    pub entities: Vec<EntityRecord>,
    pub metadata: BTreeMap<String, MetaValue>,
}

impl ChunkData {
    pub fn from_column(column: &VoxelColumn, entities: Vec<EntityRecord>) -> Self {
        Self {
            coord: column.coord(),
            z_size: column.z_size() as u32,
            blocks: RunLength::encode(&column.blocks_flat()),
            meta: RunLength::encode(&column.meta_flat()),
            light: RunLength::encode(&column.light_flat()),
            entities,
            metadata: column.metadata().clone(),
        }
    }

    pub fn to_column(&self) -> Result<VoxelColumn, ProtocolError> {
        let mut column = VoxelColumn::from_runs(
            self.coord,
            self.z_size as usize,
            &self.blocks,
            &self.meta,
            &self.light,
        )?;
        column.set_metadata(self.metadata.clone());
        Ok(column)
    }
}

/// A single block edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockChange {
    pub pos: BlockPos,
    pub id: BlockId,
    pub meta: u8,
}

impl BlockChange {
    pub fn new(pos: BlockPos, id: BlockId, meta: u8) -> Self {
        Self { pos, id, meta }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TerrainPacket {
    ChunkRequest { coord: ChunkCoord },
    ChunkData(ChunkData),
    BlockChange(BlockChange),
    /// Compact form of a change to air with zero metadata.
    BlockChangeAir { pos: BlockPos },
}

impl TerrainPacket {
    /// Wraps a block change, using the air shortcut where it applies.
    pub fn block_change(change: BlockChange) -> Self {
        if change.id.is_air() && change.meta == 0 {
            TerrainPacket::BlockChangeAir { pos: change.pos }
        } else {
            TerrainPacket::BlockChange(change)
        }
    }

    /// The block change carried by this packet, if any.
    pub fn as_block_change(&self) -> Option<BlockChange> {
        match self {
            TerrainPacket::BlockChange(change) => Some(*change),
            TerrainPacket::BlockChangeAir { pos } => Some(BlockChange::new(*pos, BlockId::AIR, 0)),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::blocks_data::{STONE, TORCH};
    use crate::world::column::ColumnError;

    #[test]
    fn test_air_shortcut() {
        let pos = BlockPos::new(-3, 40, 17);
        let air = TerrainPacket::block_change(BlockChange::new(pos, BlockId::AIR, 0));
        assert_eq!(air, TerrainPacket::BlockChangeAir { pos });

        let meta_air = TerrainPacket::block_change(BlockChange::new(pos, BlockId::AIR, 2));
        assert!(matches!(meta_air, TerrainPacket::BlockChange(_)));

        let stone = TerrainPacket::block_change(BlockChange::new(pos, STONE, 0));
        assert!(matches!(stone, TerrainPacket::BlockChange(_)));

        let full = TerrainPacket::BlockChange(BlockChange::new(pos, STONE, 1)).encode().unwrap();
        let short = air.encode().unwrap();
        assert!(short.len() < full.len());
        assert_eq!(
            TerrainPacket::decode(&short).unwrap().as_block_change(),
            Some(BlockChange::new(pos, BlockId::AIR, 0))
        );
    }

    #[test]
    fn test_chunk_data_carries_column() {
        let coord = ChunkCoord::new(5, -9);
        let mut column = VoxelColumn::new(coord, 32);
        column.set_block(1, 2, 3, TORCH);
        column.set_meta(1, 2, 3, 4);
        column.set_block_light(1, 2, 3, 14);
        column.set_meta_value("biome", MetaValue::Text("plains".into()));

        let packet = TerrainPacket::ChunkData(ChunkData::from_column(&column, Vec::new()));
        let decoded = TerrainPacket::decode(&packet.encode().unwrap()).unwrap();
        let TerrainPacket::ChunkData(data) = decoded else {
            panic!("expected chunk data");
        };
        let restored = data.to_column().unwrap();
        assert_eq!(restored.blocks_flat(), column.blocks_flat());
        assert_eq!(restored.light_flat(), column.light_flat());
        assert_eq!(restored.meta(1, 2, 3), 4);
        assert_eq!(restored.metadata(), column.metadata());
    }

    #[test]
    fn test_inflated_chunk_payload_is_rejected() {
        let mut data = ChunkData::from_column(&VoxelColumn::new(ChunkCoord::new(0, 0), 16), Vec::new());
        data.blocks = RunLength {
            runs: vec![(u32::MAX, 1); 3],
        };
        let bytes = TerrainPacket::ChunkData(data).encode().unwrap();
        let TerrainPacket::ChunkData(data) = TerrainPacket::decode(&bytes).unwrap() else {
            panic!("expected chunk data");
        };
        assert!(matches!(
            data.to_column(),
            Err(ProtocolError::InvalidChunk(ColumnError::LengthMismatch { .. }))
        ));
    }

    #[test]
    fn test_truncated_packet_is_error() {
        let bytes = TerrainPacket::ChunkRequest {
            coord: ChunkCoord::new(1, 2),
        }
        .encode()
        .unwrap();
        assert!(matches!(
            TerrainPacket::decode(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::Decode(_))
        ));
    }
}
