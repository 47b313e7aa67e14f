//! Client-side column window fed by the network instead of a generator.
use crate::client::render_column::RenderColumn;
use crate::config::ChunkSysConfig;
use crate::net::protocol::{BlockChange, ChunkData, TerrainPacket};
use crate::server::state::ColumnState;
use crate::utils::error::ProtocolError;
use crate::world::blocks_data::BlockRegistry;
use crate::world::chunk_coord::{ChunkCoord, SectionKey, WorldBounds};
use crate::world::column::SECTION_SIZE;
use crate::world::lighting::{LightingEngine, Neighborhood};
use crate::world::store::{ChunkStore, HasColumn};
use glam::Vec3;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub type ClientStore = ChunkStore<RenderColumn>;

/// Sends chunk requests to the server.
pub trait ChunkRequester: Send + Sync {
    fn request_chunk(&self, coord: ChunkCoord);
}

/// Told about columns arriving, leaving and sections going stale.
pub trait SectionListener: Send + Sync {
    fn column_loaded(&self, coord: ChunkCoord);
    fn column_disposed(&self, coord: ChunkCoord);
    fn sections_dirtied(&self, keys: &[SectionKey]);
}

pub struct ClientTerrainController {
    config: ChunkSysConfig,
    registry: Arc<BlockRegistry>,
    store: Arc<ClientStore>,
    lighting: Mutex<LightingEngine>,
    requester: Arc<dyn ChunkRequester>,
    listener: Option<Arc<dyn SectionListener>>,
    outstanding: Mutex<HashSet<ChunkCoord>>,
    center: Mutex<Option<ChunkCoord>>,
}

impl ClientTerrainController {
    pub fn new(
        config: ChunkSysConfig,
        registry: Arc<BlockRegistry>,
        requester: Arc<dyn ChunkRequester>,
    ) -> Self {
        let store = Arc::new(ClientStore::new(WorldBounds::new(config.world_radius)));
        Self {
            config,
            lighting: Mutex::new(LightingEngine::new(registry.clone())),
            registry,
            store,
            requester,
            listener: None,
            outstanding: Mutex::new(HashSet::new()),
            center: Mutex::new(None),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SectionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn store(&self) -> &Arc<ClientStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Requests missing columns around the player, nearest first, while
    /// fewer than `max_outstanding_requests` are unanswered, and drops
    /// columns beyond the view radius plus one. Returns the number of
    /// requests sent.
    pub fn update_window(&self, player_pos: Vec3) -> usize {
        let center = ChunkCoord::from_world_pos(player_pos);
        *self.center.lock() = Some(center);
        let radius = self.config.view_radius;
        let keep = (radius as i64 + 1).pow(2);

        for coord in self.store.coords() {
            if coord.distance_squared(&center) > keep {
                self.dispose(coord);
            }
        }

        let mut outstanding = self.outstanding.lock();
        outstanding.retain(|c| c.distance_squared(&center) <= keep);

        let bounds = self.store.bounds();
        let mut sent = 0;
        for coord in center.circle(radius) {
            if outstanding.len() >= self.config.max_outstanding_requests {
                break;
            }
            if !bounds.contains(coord) || outstanding.contains(&coord) || self.is_loaded(coord) {
                continue;
            }
            self.requester.request_chunk(coord);
            outstanding.insert(coord);
            sent += 1;
        }
        sent
    }

    fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.store
            .get(coord)
            .found()
            .map_or(false, |h| h.read().state() >= ColumnState::Loaded)
    }

    fn dispose(&self, coord: ChunkCoord) {
        if self.store.remove(coord).is_some() {
            log::debug!("Disposed column {}", coord);
            if let Some(listener) = &self.listener {
                listener.column_disposed(coord);
            }
        }
    }

    /// Installs a column received from the server.
    pub fn on_chunk_data(&self, data: ChunkData) -> Result<(), ProtocolError> {
        let coord = data.coord;
        if !self.store.bounds().contains(coord) {
            return Err(ProtocolError::OutOfBounds(coord));
        }
        self.outstanding.lock().remove(&coord);
        let column = data.to_column()?;
        let render = RenderColumn::new(column, ColumnState::Loaded, &self.registry);

        self.store.remove(coord);
        self.store.insert(coord, render);

        // Faces of the side columns that touch this one may now be hidden.
        let mut dirty = Vec::new();
        for side in coord.sides4() {
            if let Some(handle) = self.store.get(side).found() {
                let mut neighbor = handle.write();
                for s in 0..neighbor.section_count() {
                    neighbor.mark_dirty(s);
                    dirty.push(SectionKey::new(side, s as i32));
                }
            }
        }

        if let Some(listener) = &self.listener {
            listener.column_loaded(coord);
            listener.sections_dirtied(&dirty);
        }
        Ok(())
    }

    /// Applies a single block edit, creating an empty column if the bulk
    /// data has not arrived yet. Returns the sections marked dirty.
    pub fn on_block_change(&self, change: BlockChange) -> Vec<SectionKey> {
        let coord = change.pos.chunk();
        if !self.store.bounds().contains(coord) {
            log::warn!("Ignoring block change outside the world at {}", change.pos);
            return Vec::new();
        }
        let z_size = self.store.get(coord).found().map_or(self.config.z_size, |h| h.read().column().z_size());
        if change.pos.0.z < 0 || change.pos.0.z as usize >= z_size {
            log::warn!("Ignoring block change outside the column at {}", change.pos);
            return Vec::new();
        }
        if !self.store.contains(coord) {
            log::debug!("Block change for unloaded column {}; creating it", coord);
            self.store
                .get_or_insert_with(coord, || RenderColumn::empty(coord, z_size, &self.registry));
        }

        let (x, y, z) = change.pos.local();
        let section = z / SECTION_SIZE;
        let touched = {
            let mut lighting = self.lighting.lock();
            self.store.with_neighbors_mut(coord, |render, sides| {
                let column = render.column_mut();
                let old = column.set_block(x, y, z, change.id);
                column.set_meta(x, y, z, change.meta);
                if old == change.id {
                    return Vec::new();
                }
                let mut hood = Neighborhood::new(column, sides);
                lighting.on_block_changed(&mut hood, x, y, z, old);
                let touched = hood.touched_sections();
                render.refresh_solid(section, &self.registry);
                touched
            })
        };
        let Some(touched) = touched else {
            return Vec::new();
        };

        let mut keys: BTreeSet<SectionKey> = touched.into_iter().collect();
        keys.insert(SectionKey::new(coord, section as i32));
        let last = SECTION_SIZE - 1;
        if x == 0 {
            keys.insert(SectionKey::new(coord.offset(-1, 0), section as i32));
        }
        if x == last {
            keys.insert(SectionKey::new(coord.offset(1, 0), section as i32));
        }
        if y == 0 {
            keys.insert(SectionKey::new(coord.offset(0, -1), section as i32));
        }
        if y == last {
            keys.insert(SectionKey::new(coord.offset(0, 1), section as i32));
        }
        if z % SECTION_SIZE == 0 && section > 0 {
            keys.insert(SectionKey::new(coord, section as i32 - 1));
        }
        if z % SECTION_SIZE == last {
            keys.insert(SectionKey::new(coord, section as i32 + 1));
        }

        let dirty = self.mark_dirty(keys);
        if let Some(listener) = &self.listener {
            listener.sections_dirtied(&dirty);
        }
        dirty
    }

    /// Marks existing sections dirty; keys of absent columns or out-of-range
    /// sections are skipped.
    fn mark_dirty(&self, keys: BTreeSet<SectionKey>) -> Vec<SectionKey> {
        let mut dirty = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(handle) = self.store.get(key.column).found() else {
                continue;
            };
            let mut render = handle.write();
            if key.section < 0 || key.section as usize >= render.section_count() {
                continue;
            }
            render.mark_dirty(key.section as usize);
            dirty.push(key);
        }
        dirty
    }

    pub fn on_packet(&self, packet: TerrainPacket) -> Result<Vec<SectionKey>, ProtocolError> {
        match packet {
            TerrainPacket::ChunkData(data) => {
                let coord = data.coord;
                self.on_chunk_data(data)?;
                let sections = self
                    .store
                    .get(coord)
                    .found()
                    .map_or(0, |h| h.read().section_count());
                Ok((0..sections).map(|s| SectionKey::new(coord, s as i32)).collect())
            }
            TerrainPacket::ChunkRequest { coord } => {
                log::warn!("Client received a chunk request for {}", coord);
                Ok(Vec::new())
            }
            other => match other.as_block_change() {
                Some(change) => Ok(self.on_block_change(change)),
                None => Ok(Vec::new()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block_id::BlockId;
    use crate::world::blocks_data::{GLASS, STONE, TORCH};
    use crate::world::chunk_coord::BlockPos;
    use crate::world::column::VoxelColumn;

    #[derive(Default)]
    struct CountingRequester {
        requests: Mutex<Vec<ChunkCoord>>,
    }

    impl ChunkRequester for CountingRequester {
        fn request_chunk(&self, coord: ChunkCoord) {
            self.requests.lock().push(coord);
        }
    }

    fn config() -> ChunkSysConfig {
        ChunkSysConfig {
            z_size: 32,
            view_radius: 4,
            ..Default::default()
        }
    }

    fn client() -> (ClientTerrainController, Arc<CountingRequester>) {
        let requester = Arc::new(CountingRequester::default());
        let controller = ClientTerrainController::new(
            config(),
            Arc::new(BlockRegistry::with_defaults()),
            requester.clone(),
        );
        (controller, requester)
    }

    fn chunk(coord: ChunkCoord) -> ChunkData {
        let mut column = VoxelColumn::new(coord, 32);
        for y in 0..16 {
            for x in 0..16 {
                column.set_block(x, y, 0, STONE);
            }
        }
        ChunkData::from_column(&column, Vec::new())
    }

    #[test]
    fn test_outstanding_request_cap() {
        let (client, requester) = client();
        assert_eq!(client.update_window(Vec3::new(8.0, 8.0, 20.0)), 3);
        assert_eq!(
            requester.requests.lock()[0],
            ChunkCoord::new(0, 0),
            "nearest column first"
        );

        assert_eq!(client.update_window(Vec3::new(8.0, 8.0, 20.0)), 0);
        assert_eq!(client.outstanding(), 3);

        let first = requester.requests.lock()[0];
        client.on_chunk_data(chunk(first)).unwrap();
        assert_eq!(client.outstanding(), 2);
        assert_eq!(client.update_window(Vec3::new(8.0, 8.0, 20.0)), 1);
        assert_eq!(requester.requests.lock().len(), 4);
        assert!(!requester.requests.lock()[1..].contains(&first));
    }

    #[test]
    fn test_extreme_chunk_data_is_rejected() {
        let (client, _) = client();
        let mut data = chunk(ChunkCoord::new(0, 0));
        data.coord = ChunkCoord::new(i32::MIN, i32::MAX);
        assert!(matches!(
            client.on_chunk_data(data),
            Err(ProtocolError::OutOfBounds(_))
        ));
        assert!(client.store().is_empty());

        let far = BlockPos::new(i32::MIN, 0, 3);
        assert!(client.on_block_change(BlockChange::new(far, STONE, 0)).is_empty());
    }

    #[test]
    fn test_far_columns_are_disposed() {
        let (client, _) = client();
        client.on_chunk_data(chunk(ChunkCoord::new(0, 0))).unwrap();
        client.on_chunk_data(chunk(ChunkCoord::new(6, 0))).unwrap();
        client.update_window(Vec3::new(8.0, 8.0, 0.0));
        assert!(client.store().contains(ChunkCoord::new(0, 0)));
        assert!(!client.store().contains(ChunkCoord::new(6, 0)));
    }

    #[test]
    fn test_boundary_edits_dirty_neighbours() {
        let (client, _) = client();
        let a = ChunkCoord::new(0, 0);
        let b = ChunkCoord::new(1, 0);
        client.on_chunk_data(chunk(a)).unwrap();
        client.on_chunk_data(chunk(b)).unwrap();

        // x = 15 of column a, z = 16 is the bottom of section 1.
        let pos = BlockPos::from_local(a, 15, 3, 16);
        let dirty = client.on_block_change(BlockChange::new(pos, GLASS, 0));
        for key in [
            SectionKey::new(a, 1),
            SectionKey::new(b, 1),
            SectionKey::new(a, 0),
        ] {
            assert!(dirty.contains(&key), "{:?} not dirtied", key);
        }
        assert!(!dirty.contains(&SectionKey::new(ChunkCoord::new(-1, 0), 1)));

        let handle = client.store().get(b).found().unwrap();
        assert_eq!(handle.read().section_state(1).generation, 1);
        let handle = client.store().get(a).found().unwrap();
        assert_eq!(handle.read().section_state(1).generation, 2);
    }

    #[test]
    fn test_interior_edit_stays_in_column() {
        let (client, _) = client();
        let a = ChunkCoord::new(0, 0);
        client.on_chunk_data(chunk(a)).unwrap();
        let dirty = client.on_block_change(BlockChange::new(BlockPos::from_local(a, 7, 7, 20), GLASS, 0));
        assert!(dirty.contains(&SectionKey::new(a, 1)));
        assert!(dirty.iter().all(|k| k.column == a));
    }

    #[test]
    fn test_block_change_before_chunk_data() {
        let (client, _) = client();
        let pos = BlockPos::new(-20, 5, 9);
        let packet = TerrainPacket::block_change(BlockChange::new(pos, TORCH, 0));
        let dirty = client.on_packet(packet).unwrap();
        assert!(!dirty.is_empty());

        let handle = client.store().get(pos.chunk()).found().unwrap();
        let render = handle.read();
        assert_eq!(render.state(), ColumnState::New);
        let (x, y, z) = pos.local();
        assert_eq!(render.column().block(x, y, z), TORCH);
        assert_eq!(render.column().block_light(x, y, z), 14);

        drop(render);
        client
            .on_packet(TerrainPacket::block_change(BlockChange::new(pos, BlockId::AIR, 0)))
            .unwrap();
        assert_eq!(handle.read().column().block_light(x, y, z), 0);
    }
}
