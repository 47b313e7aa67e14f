use crate::utils::error::StorageError;
use crate::world::chunk_coord::ChunkCoord;
use crate::world::column::{MetaValue, VoxelColumn};
use crate::world::storage::compress::RunLength;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An entity detached from an evicted column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: u64,
    pub state: Vec<u8>,
    pub last_tick: u64,
}

/// A delayed block update stored relative to the tick it was saved at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistedUpdate {
    pub kind: u16,
    pub remaining: u64,
    /// `(z << 8) | (y << 4) | x`
    pub position: u32,
}

/// Everything persisted for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub z_size: u32,
    pub blocks: RunLength<u16>,
    pub meta: RunLength<u8>,
    pub light: RunLength<u8>,
    pub entities: Vec<EntityRecord>,
    pub updates: Vec<PersistedUpdate>,
    pub metadata: BTreeMap<String, MetaValue>,
    pub populated: bool,
}

impl ColumnRecord {
    pub fn capture(column: &VoxelColumn, populated: bool) -> Self {
        Self {
            z_size: column.z_size() as u32,
            blocks: RunLength::encode(&column.blocks_flat()),
            meta: RunLength::encode(&column.meta_flat()),
            light: RunLength::encode(&column.light_flat()),
            entities: Vec::new(),
            updates: Vec::new(),
            metadata: column.metadata().clone(),
            populated,
        }
    }

    pub fn restore(&self, coord: ChunkCoord) -> Result<VoxelColumn, StorageError> {
        let mut column = VoxelColumn::from_runs(
            coord,
            self.z_size as usize,
            &self.blocks,
            &self.meta,
            &self.light,
        )?;
        column.set_metadata(self.metadata.clone());
        Ok(column)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::column::ColumnError;
    use crate::world::block_id::BlockId;

    #[test]
    fn test_capture_restore() {
        let coord = ChunkCoord::new(-3, 9);
        let mut column = VoxelColumn::new(coord, 48);
        column.set_block(1, 2, 40, BlockId(9));
        column.set_meta(1, 2, 40, 3);
        column.set_light(0, 0, 47, 0xF0);
        column.set_meta_value("snow", MetaValue::Float(0.25));

        let mut record = ColumnRecord::capture(&column, true);
        record.entities.push(EntityRecord {
            id: 77,
            state: vec![1, 2, 3],
            last_tick: 1000,
        });
        let decoded = ColumnRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);

        let restored = decoded.restore(coord).unwrap();
        assert_eq!(restored.blocks_flat(), column.blocks_flat());
        assert_eq!(restored.meta_flat(), column.meta_flat());
        assert_eq!(restored.light_flat(), column.light_flat());
        assert_eq!(restored.meta_value("snow"), Some(&MetaValue::Float(0.25)));
    }

    #[test]
    fn test_restore_rejects_bad_lengths() {
        let mut record = ColumnRecord::capture(&VoxelColumn::new(ChunkCoord::new(0, 0), 16), false);
        record.blocks = RunLength::encode(&[0u16; 10]);
        assert!(record.restore(ChunkCoord::new(0, 0)).is_err());
    }

    #[test]
    fn test_restore_rejects_inflated_runs() {
        let mut record = ColumnRecord::capture(&VoxelColumn::new(ChunkCoord::new(0, 0), 16), false);
        record.light = RunLength {
            runs: vec![(u32::MAX, 0); 4],
        };
        let bytes = record.to_bytes().unwrap();
        let loaded = ColumnRecord::from_bytes(&bytes).unwrap();
        assert!(matches!(
            loaded.restore(ChunkCoord::new(0, 0)),
            Err(StorageError::Column(ColumnError::LengthMismatch { .. }))
        ));

        record.light = RunLength::encode(&[0u8; 16 * 256]);
        record.z_size = u32::MAX;
        assert!(matches!(
            record.restore(ChunkCoord::new(0, 0)),
            Err(StorageError::Column(ColumnError::InvalidHeight(_)))
        ));
    }
}
