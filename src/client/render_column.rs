use crate::client::mesh::Lod;
use crate::server::state::ColumnState;
use crate::world::block_id::BlockId;
use crate::world::blocks_data::BlockRegistry;
use crate::world::chunk_coord::{ChunkCoord, SectionKey};
use crate::world::column::{Section, VoxelColumn, SECTION_VOLUME};
use crate::world::store::HasColumn;

/// Renderer bookkeeping for one 16x16x16 section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionState {
    /// Blocks or light changed since the last accepted build.
    pub dirty: bool,
    pub visible: bool,
    /// Every block is opaque; visibility does not pass through.
    pub solid: bool,
    /// A mesh for this section currently sits in the sink.
    pub built: bool,
    pub lod: Lod,
    /// Bumped on every invalidation; builds started earlier are discarded.
    pub generation: u64,
}

/// Whether all 4096 blocks of a section are opaque.
pub fn section_is_solid(section: &Section, registry: &BlockRegistry) -> bool {
    if let Some(id) = section.blocks.uniform_value() {
        return registry.is_opaque(BlockId(id));
    }
    (0..SECTION_VOLUME).all(|i| registry.is_opaque(section.block(i)))
}

/// A client-side column: voxels received from the server plus per-section
/// render state.
#[derive(Debug, Clone)]
pub struct RenderColumn {
    column: VoxelColumn,
    state: ColumnState,
    sections: Vec<SectionState>,
}

impl RenderColumn {
    /// Wraps a column with every section dirty and solidity computed.
    pub fn new(column: VoxelColumn, state: ColumnState, registry: &BlockRegistry) -> Self {
        let sections = column
            .sections()
            .iter()
            .map(|section| SectionState {
                dirty: true,
                solid: section_is_solid(section, registry),
                ..Default::default()
            })
            .collect();
        Self {
            column,
            state,
            sections,
        }
    }

    /// Placeholder for a column we have only seen block changes for.
    pub fn empty(coord: ChunkCoord, z_size: usize, registry: &BlockRegistry) -> Self {
        Self::new(VoxelColumn::new(coord, z_size), ColumnState::New, registry)
    }

    pub fn coord(&self) -> ChunkCoord {
        self.column.coord()
    }

    pub fn state(&self) -> ColumnState {
        self.state
    }

    pub fn set_state(&mut self, state: ColumnState) {
        self.state = state;
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn key(&self, section: usize) -> SectionKey {
        SectionKey::new(self.coord(), section as i32)
    }

    pub fn section_state(&self, section: usize) -> &SectionState {
        &self.sections[section]
    }

    pub fn section_state_mut(&mut self, section: usize) -> &mut SectionState {
        &mut self.sections[section]
    }

    pub fn section_states(&self) -> &[SectionState] {
        &self.sections
    }

    /// Flags a section for rebuild and invalidates builds in flight.
    pub fn mark_dirty(&mut self, section: usize) {
        let state = &mut self.sections[section];
        state.dirty = true;
        state.generation += 1;
    }

    pub fn refresh_solid(&mut self, section: usize, registry: &BlockRegistry) {
        self.sections[section].solid = section_is_solid(self.column.section(section), registry);
    }
}

impl HasColumn for RenderColumn {
    fn column(&self) -> &VoxelColumn {
        &self.column
    }

    fn column_mut(&mut self) -> &mut VoxelColumn {
        &mut self.column
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::blocks_data::{GLASS, STONE};

    #[test]
    fn test_solidity() {
        let registry = BlockRegistry::with_defaults();
        let mut column = VoxelColumn::new(ChunkCoord::new(0, 0), 32);
        for z in 0..16 {
            for y in 0..16 {
                for x in 0..16 {
                    column.set_block(x, y, z, STONE);
                }
            }
        }
        let mut render = RenderColumn::new(column, ColumnState::Loaded, &registry);
        assert!(render.section_state(0).solid);
        assert!(!render.section_state(1).solid);
        assert!(render.section_states().iter().all(|s| s.dirty));

        render.column_mut().set_block(7, 7, 7, GLASS);
        render.refresh_solid(0, &registry);
        assert!(!render.section_state(0).solid);
    }

    #[test]
    fn test_mark_dirty_bumps_generation() {
        let registry = BlockRegistry::with_defaults();
        let mut render = RenderColumn::empty(ChunkCoord::new(1, 1), 16, &registry);
        render.section_state_mut(0).dirty = false;
        render.mark_dirty(0);
        assert!(render.section_state(0).dirty);
        assert_eq!(render.section_state(0).generation, 1);
        assert_eq!(render.state(), ColumnState::New);
    }
}
