use crate::world::block_id::BlockId;
use crate::world::chunk_coord::{BlockPos, ChunkCoord};
use crate::world::column::VoxelColumn;
use crate::world::storage::PersistedUpdate;

/// A block update that fires once the world tick reaches `due`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayedUpdate {
    pub pos: BlockPos,
    pub due: u64,
    /// The block that scheduled the update; it must still be there to run.
    pub kind: BlockId,
}

impl DelayedUpdate {
    pub fn new(pos: BlockPos, due: u64, kind: BlockId) -> Self {
        Self { pos, due, kind }
    }

    pub fn is_valid(&self, column: &VoxelColumn) -> bool {
        if self.pos.chunk() != column.coord() {
            return false;
        }
        let (x, y, z) = self.pos.local();
        self.pos.0.z >= 0 && z < column.z_size() && column.block(x, y, z) == self.kind
    }
}

/// Pending delayed updates of one column, guarded by that column's lock.
#[derive(Debug, Clone, Default)]
pub struct UpdateQueue {
    updates: Vec<DelayedUpdate>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, update: DelayedUpdate) {
        self.updates.push(update);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DelayedUpdate> {
        self.updates.iter()
    }

    /// Removes and returns every update due at `tick`, earliest first.
    pub fn take_due(&mut self, tick: u64) -> Vec<DelayedUpdate> {
        let mut due = Vec::new();
        self.updates.retain(|u| {
            if u.due <= tick {
                due.push(*u);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|u| u.due);
        due
    }

    /// Still-valid updates relative to `tick`, ready to be written to disk.
    pub fn persist(&self, column: &VoxelColumn, tick: u64) -> Vec<PersistedUpdate> {
        self.updates
            .iter()
            .filter(|u| u.is_valid(column))
            .map(|u| PersistedUpdate {
                kind: u.kind.get_id(),
                remaining: u.due.saturating_sub(tick),
                position: u.pos.pack_local(),
            })
            .collect()
    }

    /// Rebuilds a queue from disk; delays are re-based on `tick`.
    pub fn restore(coord: ChunkCoord, persisted: &[PersistedUpdate], tick: u64) -> Self {
        Self {
            updates: persisted
                .iter()
                .map(|p| DelayedUpdate {
                    pos: BlockPos::unpack_local(coord, p.position),
                    due: tick + p.remaining,
                    kind: BlockId(p.kind),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::blocks_data::{SAND, WATER};

    #[test]
    fn test_take_due_in_order() {
        let pos = BlockPos::new(1, 1, 1);
        let mut queue = UpdateQueue::new();
        queue.schedule(DelayedUpdate::new(pos, 9, WATER));
        queue.schedule(DelayedUpdate::new(pos, 4, WATER));
        queue.schedule(DelayedUpdate::new(pos, 6, WATER));

        let due: Vec<u64> = queue.take_due(6).iter().map(|u| u.due).collect();
        assert_eq!(due, vec![4, 6]);
        assert_eq!(queue.len(), 1);
        assert!(queue.take_due(8).is_empty());
    }

    #[test]
    fn test_persist_drops_invalid_and_rebases() {
        let coord = ChunkCoord::new(-1, 2);
        let mut column = VoxelColumn::new(coord, 32);
        let water = BlockPos::from_local(coord, 3, 4, 20);
        let sand = BlockPos::from_local(coord, 5, 6, 7);
        column.set_block(3, 4, 20, WATER);

        let mut queue = UpdateQueue::new();
        queue.schedule(DelayedUpdate::new(water, 110, WATER));
        queue.schedule(DelayedUpdate::new(sand, 105, SAND));

        let persisted = queue.persist(&column, 100);
        assert_eq!(
            persisted,
            vec![PersistedUpdate {
                kind: WATER.get_id(),
                remaining: 10,
                position: (20 << 8) | (4 << 4) | 3,
            }]
        );

        let restored = UpdateQueue::restore(coord, &persisted, 5000);
        let updates: Vec<_> = restored.iter().copied().collect();
        assert_eq!(updates, vec![DelayedUpdate::new(water, 5010, WATER)]);
    }
}
