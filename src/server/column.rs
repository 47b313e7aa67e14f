use crate::server::scheduler::UpdateQueue;
use crate::server::state::ColumnState;
use crate::world::column::VoxelColumn;
use crate::world::store::HasColumn;

/// A column as held by the server: voxels plus lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct ServerColumn {
    column: VoxelColumn,
    state: ColumnState,
    populated: bool,
    updates: UpdateQueue,
}

impl ServerColumn {
    /// A freshly generated column that still has to be populated.
    pub fn generated(column: VoxelColumn) -> Self {
        Self {
            column,
            state: ColumnState::New,
            populated: false,
            updates: UpdateQueue::new(),
        }
    }

    /// A column read back from disk.
    pub fn restored(column: VoxelColumn, populated: bool, updates: UpdateQueue) -> Self {
        Self {
            column,
            state: if populated {
                ColumnState::Populated
            } else {
                ColumnState::New
            },
            populated,
            updates,
        }
    }

    pub fn state(&self) -> ColumnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ColumnState) {
        self.state = state;
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub(crate) fn mark_populated(&mut self) {
        self.populated = true;
    }

    pub fn updates(&self) -> &UpdateQueue {
        &self.updates
    }

    pub fn updates_mut(&mut self) -> &mut UpdateQueue {
        &mut self.updates
    }
}

impl HasColumn for ServerColumn {
    fn column(&self) -> &VoxelColumn {
        &self.column
    }

    fn column_mut(&mut self) -> &mut VoxelColumn {
        &mut self.column
    }
}
