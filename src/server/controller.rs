//! Authoritative terrain loop: loads columns around players, walks them
//! through their lifecycle, evicts what nobody needs and applies edits.
use crate::config::ChunkSysConfig;
use crate::net::protocol::{BlockChange, ChunkData};
use crate::server::column::ServerColumn;
use crate::server::events::{
    EntityHost, NoEntities, NoEvents, PlayerId, TerrainEventSink, UpdateHandler,
};
use crate::server::scheduler::{DelayedUpdate, UpdateQueue};
use crate::server::state::{next_state, ColumnState, TransitionContext};
use crate::utils::error::{StorageError, TerrainError};
use crate::world::block_id::BlockId;
use crate::world::blocks_data::BlockRegistry;
use crate::world::chunk_coord::{BlockPos, ChunkCoord, WorldBounds};
use crate::world::column::{VoxelColumn, SECTION_SIZE};
use crate::world::generator::TerrainGenerator;
use crate::world::lighting::{LightingEngine, Neighborhood};
use crate::world::storage::{ColumnPersistence, ColumnRecord, EntityRecord, PersistenceLayer};
use crate::world::store::{ChunkStore, HasColumn, Lookup, Residency, Shared};
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type ServerStore = ChunkStore<ServerColumn>;

type BlockJob = Box<dyn FnOnce(&mut TerrainEditor<'_>) + Send>;

#[derive(Debug, Clone)]
struct PlayerWindow {
    center: ChunkCoord,
    radius: i32,
    sent: HashSet<ChunkCoord>,
    requested: HashSet<ChunkCoord>,
}

/// Deduplicating FIFO of columns to re-check.
#[derive(Debug, Default)]
struct Worklist {
    queue: VecDeque<ChunkCoord>,
    queued: HashSet<ChunkCoord>,
}

impl Worklist {
    fn push(&mut self, coord: ChunkCoord) {
        if self.queued.insert(coord) {
            self.queue.push_back(coord);
        }
    }

    fn extend(&mut self, coords: impl IntoIterator<Item = ChunkCoord>) {
        for coord in coords {
            self.push(coord);
        }
    }

    fn pop(&mut self) -> Option<ChunkCoord> {
        let coord = self.queue.pop_front()?;
        self.queued.remove(&coord);
        Some(coord)
    }
}

pub struct ServerTerrainController {
    config: ChunkSysConfig,
    registry: Arc<BlockRegistry>,
    store: Arc<ServerStore>,
    persistence: Arc<dyn ColumnPersistence>,
    generator: Arc<dyn TerrainGenerator>,
    lighting: Mutex<LightingEngine>,
    events: Arc<dyn TerrainEventSink>,
    entities: Arc<dyn EntityHost>,
    handlers: RwLock<HashMap<BlockId, Arc<dyn UpdateHandler>>>,
    players: RwLock<HashMap<PlayerId, PlayerWindow>>,
    job_sender: Sender<BlockJob>,
    job_receiver: Receiver<BlockJob>,
    tick: AtomicU64,
    running: AtomicBool,
    tick_lock: Mutex<()>,
}

impl ServerTerrainController {
    pub fn new(
        config: ChunkSysConfig,
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn TerrainGenerator>,
        store: Arc<ServerStore>,
        persistence: Arc<dyn ColumnPersistence>,
    ) -> Self {
        let (job_sender, job_receiver) = unbounded();
        Self {
            config,
            lighting: Mutex::new(LightingEngine::new(registry.clone())),
            registry,
            store,
            persistence,
            generator,
            events: Arc::new(NoEvents),
            entities: Arc::new(NoEntities),
            handlers: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            job_sender,
            job_receiver,
            tick: AtomicU64::new(0),
            running: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
        }
    }

    /// Controller backed by region files under `config.region_dir`.
    pub fn with_region_storage(
        config: ChunkSysConfig,
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn TerrainGenerator>,
    ) -> Self {
        let store = Arc::new(ServerStore::new(WorldBounds::new(config.world_radius)));
        let residency: Arc<dyn Residency> = store.clone();
        let persistence = Arc::new(PersistenceLayer::new(config.region_dir.clone(), residency));
        Self::new(config, registry, generator, store, persistence)
    }

    pub fn with_event_sink(mut self, events: Arc<dyn TerrainEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_entity_host(mut self, entities: Arc<dyn EntityHost>) -> Self {
        self.entities = entities;
        self
    }

    pub fn register_handler(&self, kind: BlockId, handler: Arc<dyn UpdateHandler>) {
        self.handlers.write().insert(kind, handler);
    }

    pub fn config(&self) -> &ChunkSysConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ServerStore> {
        &self.store
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn state(&self, coord: ChunkCoord) -> Option<ColumnState> {
        self.store.get(coord).found().map(|h| h.read().state())
    }

    // Players

    pub fn add_player(&self, player: PlayerId, position: Vec3, radius: i32) {
        let window = PlayerWindow {
            center: ChunkCoord::from_world_pos(position),
            radius,
            sent: HashSet::new(),
            requested: HashSet::new(),
        };
        self.players.write().insert(player, window);
        log::info!("Player {} joined with view radius {}", player, radius);
    }

    pub fn move_player(&self, player: PlayerId, position: Vec3) {
        let mut players = self.players.write();
        let Some(window) = players.get_mut(&player) else {
            return;
        };
        let center = ChunkCoord::from_world_pos(position);
        if center == window.center {
            return;
        }
        window.center = center;
        let keep = (window.radius as i64 + 1).pow(2);
        window
            .sent
            .retain(|c| c.distance_squared(&center) <= keep);
    }

    pub fn remove_player(&self, player: PlayerId) {
        if self.players.write().remove(&player).is_some() {
            log::info!("Player {} left", player);
        }
    }

    /// A client asked for a column. Sent right away if it is ready,
    /// otherwise as soon as it becomes sendable.
    pub fn request_chunk(&self, player: PlayerId, coord: ChunkCoord) {
        if !self.store.bounds().contains(coord) {
            log::warn!("Player {} requested column {} outside the world", player, coord);
            return;
        }
        let data = self.sendable_data(coord);
        {
            let mut players = self.players.write();
            let Some(window) = players.get_mut(&player) else {
                return;
            };
            if data.is_none() {
                window.requested.insert(coord);
                return;
            }
            window.requested.remove(&coord);
            window.sent.insert(coord);
        }
        if let Some(data) = data {
            self.events.send_chunk(player, data);
        }
    }

    // Edits

    /// Queues arbitrary terrain code to run on the controller loop.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce(&mut TerrainEditor<'_>) + Send + 'static,
    {
        if let Err(e) = self.job_sender.send(Box::new(job)) {
            log::warn!("Failed to queue block change: {}", e);
        }
    }

    pub fn submit_block_change(&self, pos: BlockPos, id: BlockId, meta: u8) {
        self.submit(move |editor| {
            if let Err(e) = editor.set_block(pos, id, meta) {
                log::warn!("Dropping block change at {}: {}", pos, e);
            }
        });
    }

    // Loading

    /// Resident column, else the persisted one, else a freshly generated one.
    pub fn get_or_load(&self, coord: ChunkCoord) -> Result<Shared<ServerColumn>, TerrainError> {
        match self.store.get(coord) {
            Lookup::Found(handle) => Ok(handle),
            Lookup::OutOfBounds => Err(TerrainError::OutOfBounds(coord)),
            Lookup::NotLoaded => {
                let (column, entities) = self.load_or_generate(coord, self.current_tick());
                self.install(coord, column, entities)
                    .found()
                    .ok_or(TerrainError::NotLoaded(coord))
            }
        }
    }

    fn load_or_generate(&self, coord: ChunkCoord, tick: u64) -> (ServerColumn, Vec<EntityRecord>) {
        if let Some(record) = self.persistence.load(coord) {
            match record.restore(coord) {
                Ok(column) => {
                    let updates = UpdateQueue::restore(coord, &record.updates, tick);
                    log::debug!("Loaded column {} from disk", coord);
                    return (
                        ServerColumn::restored(column, record.populated, updates),
                        record.entities,
                    );
                }
                Err(e) => log::warn!("Regenerating unreadable column {}: {}", coord, e),
            }
        }
        let mut column = VoxelColumn::new(coord, self.config.z_size);
        self.generator.generate(coord, &mut column);
        (ServerColumn::generated(column), Vec::new())
    }

    fn install(
        &self,
        coord: ChunkCoord,
        column: ServerColumn,
        entities: Vec<EntityRecord>,
    ) -> Lookup<ServerColumn> {
        let lookup = self.store.insert(coord, column);
        if !entities.is_empty() {
            self.entities.attach(coord, entities);
        }
        lookup
    }

    // Tick

    pub fn tick(&self) {
        let _guard = self.tick_lock.lock();
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;

        let wanted = self.wanted_columns();
        let mut worklist = Worklist::default();
        self.load_missing(&wanted, &mut worklist, tick);
        worklist.extend(self.store.coords());
        self.evict_unwanted(&wanted, &mut worklist, tick);
        self.settle(&mut worklist);
        self.drain_block_changes(tick);
        self.run_delayed_updates(tick);
        self.answer_requests();
    }

    /// Every in-bounds column inside some player's load ring, with its
    /// squared distance to the nearest such player.
    fn wanted_columns(&self) -> HashMap<ChunkCoord, i64> {
        let bounds = self.store.bounds();
        let players = self.players.read();
        let mut wanted: HashMap<ChunkCoord, i64> = HashMap::new();
        for window in players.values() {
            for coord in window.center.circle(window.radius + self.config.border_margin) {
                if !bounds.contains(coord) {
                    continue;
                }
                let d = window.center.distance_squared(&coord);
                wanted
                    .entry(coord)
                    .and_modify(|e| *e = (*e).min(d))
                    .or_insert(d);
            }
        }
        wanted
    }

    fn load_missing(&self, wanted: &HashMap<ChunkCoord, i64>, worklist: &mut Worklist, tick: u64) {
        let mut missing: Vec<(i64, ChunkCoord)> = wanted
            .iter()
            .filter(|(c, _)| !self.store.contains(**c))
            .map(|(c, d)| (*d, *c))
            .collect();
        if missing.is_empty() {
            return;
        }
        missing.sort();
        missing.truncate(self.config.max_loads_per_tick);

        let loaded: Vec<_> = missing
            .par_iter()
            .map(|&(_, coord)| {
                let (column, entities) = self.load_or_generate(coord, tick);
                (coord, column, entities)
            })
            .collect();

        log::debug!("Loaded {} columns", loaded.len());
        for (coord, column, entities) in loaded {
            self.install(coord, column, entities);
            worklist.push(coord);
            worklist.extend(coord.neighbors8());
        }
    }

    /// Advances columns until no transition applies. Any change re-queues
    /// the column and its 8 neighbours, whose rules depend on it.
    fn settle(&self, worklist: &mut Worklist) {
        while let Some(coord) = worklist.pop() {
            if self.advance(coord).is_some() {
                worklist.push(coord);
                worklist.extend(coord.neighbors8());
            }
        }
    }

    fn advance(&self, coord: ChunkCoord) -> Option<ColumnState> {
        let handle = self.store.get(coord).found()?;
        let (state, populated) = {
            let entry = handle.read();
            (entry.state(), entry.is_populated())
        };
        let neighbors = coord
            .neighbors8()
            .map(|n| self.store.get(n).found().map(|h| h.read().state()));
        let next = next_state(state, &TransitionContext::new(populated, neighbors));
        if next == state {
            return None;
        }

        handle.write().set_state(next);
        match next {
            ColumnState::Populating => self.populate(coord, &handle),
            ColumnState::Loaded if state == ColumnState::Border => self.relight(coord),
            _ => {}
        }
        log::debug!("Column {}: {:?} -> {:?}", coord, state, next);
        Some(next)
    }

    fn populate(&self, coord: ChunkCoord, handle: &Shared<ServerColumn>) {
        {
            let mut entry = handle.write();
            if entry.is_populated() {
                return;
            }
            let origin = coord.to_world_pos();
            self.generator.populate(
                entry.column_mut(),
                origin.x as i32,
                origin.y as i32,
                SECTION_SIZE,
                SECTION_SIZE,
            );
            entry.mark_populated();
        }
        self.relight(coord);
        handle.write().column_mut().compact();
    }

    fn relight(&self, coord: ChunkCoord) {
        let mut lighting = self.lighting.lock();
        self.store.with_neighbors_mut(coord, |entry, sides| {
            let mut hood = Neighborhood::new(entry.column_mut(), sides);
            lighting.relight(&mut hood);
        });
    }

    // Eviction

    fn evict_unwanted(&self, wanted: &HashMap<ChunkCoord, i64>, worklist: &mut Worklist, tick: u64) {
        let mut stale: Vec<ChunkCoord> = self
            .store
            .coords()
            .into_iter()
            .filter(|c| !wanted.contains_key(c))
            .collect();
        stale.sort();
        stale.truncate(self.config.max_evictions_per_tick);
        for coord in stale {
            if self.evict(coord, tick) {
                worklist.extend(coord.neighbors8());
            }
        }
    }

    /// Persists and drops one column. Persistence failures are logged and
    /// the column is dropped anyway.
    fn evict(&self, coord: ChunkCoord, tick: u64) -> bool {
        let Some(handle) = self.store.get(coord).found() else {
            return false;
        };
        let unfinished = {
            let entry = handle.read();
            entry.state() == ColumnState::Populating && !entry.is_populated()
        };
        if unfinished {
            self.populate(coord, &handle);
        }

        let mut record = {
            let entry = handle.read();
            let mut record = ColumnRecord::capture(entry.column(), entry.is_populated());
            record.updates = entry.updates().persist(entry.column(), tick);
            record
        };
        record.entities = self.entities.detach(coord);
        if let Err(e) = self.persistence.save(coord, record) {
            log::error!("Failed to persist column {}: {}", coord, e);
        }

        self.store.remove(coord);
        for window in self.players.write().values_mut() {
            window.sent.remove(&coord);
            window.requested.remove(&coord);
        }
        log::debug!("Evicted column {}", coord);
        true
    }

    // Edits and delayed updates

    fn drain_block_changes(&self, tick: u64) {
        let pending = self.job_receiver.len();
        let mut editor = TerrainEditor::new(self, tick);
        for job in self.job_receiver.try_iter().take(pending) {
            job(&mut editor);
        }
    }

    fn run_delayed_updates(&self, tick: u64) {
        let mut due: Vec<DelayedUpdate> = Vec::new();
        for (_, handle) in self.store.entries() {
            due.extend(handle.write().updates_mut().take_due(tick));
        }
        if due.is_empty() {
            return;
        }
        due.sort_by_key(|u| u.due);

        let mut editor = TerrainEditor::new(self, tick);
        for update in due {
            let valid = self
                .store
                .get(update.pos.chunk())
                .found()
                .map_or(false, |h| update.is_valid(h.read().column()));
            if !valid {
                log::debug!("Dropping stale update at {} for {}", update.pos, update.kind);
                continue;
            }
            let handler = self.handlers.read().get(&update.kind).cloned();
            match handler {
                Some(handler) => handler.run(&mut editor, update.pos, update.kind),
                None => log::debug!("No handler for updates of {}", update.kind),
            }
        }
    }

    fn answer_requests(&self) {
        let pending: Vec<(PlayerId, ChunkCoord)> = self
            .players
            .read()
            .iter()
            .flat_map(|(p, w)| w.requested.iter().map(move |c| (*p, *c)))
            .collect();
        for (player, coord) in pending {
            let Some(data) = self.sendable_data(coord) else {
                continue;
            };
            {
                let mut players = self.players.write();
                let Some(window) = players.get_mut(&player) else {
                    continue;
                };
                window.requested.remove(&coord);
                window.sent.insert(coord);
            }
            self.events.send_chunk(player, data);
        }
    }

    fn sendable_data(&self, coord: ChunkCoord) -> Option<ChunkData> {
        let handle = self.store.get(coord).found()?;
        let entry = handle.read();
        if entry.state() != ColumnState::Sendable {
            return None;
        }
        Some(ChunkData::from_column(
            entry.column(),
            self.entities.snapshot(coord),
        ))
    }

    fn miss(&self, coord: ChunkCoord) -> TerrainError {
        if self.store.bounds().contains(coord) {
            TerrainError::NotLoaded(coord)
        } else {
            TerrainError::OutOfBounds(coord)
        }
    }

    fn column_at(&self, pos: BlockPos) -> Result<(Shared<ServerColumn>, usize, usize, usize), TerrainError> {
        let coord = pos.chunk();
        let handle = self.store.get(coord).found().ok_or_else(|| self.miss(coord))?;
        let (x, y, z) = pos.local();
        if pos.0.z < 0 || z >= handle.read().column().z_size() {
            return Err(TerrainError::OutOfBounds(coord));
        }
        Ok((handle, x, y, z))
    }

    fn apply_block_change(&self, pos: BlockPos, id: BlockId, meta: u8) -> Result<BlockId, TerrainError> {
        let coord = pos.chunk();
        let (_, x, y, z) = self.column_at(pos)?;
        let old = {
            let mut lighting = self.lighting.lock();
            self.store.with_neighbors_mut(coord, |entry, sides| {
                let column = entry.column_mut();
                let old = column.set_block(x, y, z, id);
                column.set_meta(x, y, z, meta);
                if old != id {
                    let mut hood = Neighborhood::new(column, sides);
                    lighting.on_block_changed(&mut hood, x, y, z, old);
                }
                old
            })
        };
        let old = old.ok_or_else(|| self.miss(coord))?;

        let change = BlockChange::new(pos, id, meta);
        let watchers: Vec<PlayerId> = self
            .players
            .read()
            .iter()
            .filter(|(_, w)| w.sent.contains(&coord))
            .map(|(p, _)| *p)
            .collect();
        for player in watchers {
            self.events.send_block_change(player, change);
        }
        Ok(old)
    }

    // Lifecycle

    /// Runs `tick` on a background thread every `tick_interval_ms` until `stop`.
    pub fn spawn(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let controller = Arc::clone(self);
        std::thread::Builder::new()
            .name("terrain-server".into())
            .spawn(move || {
                log::info!("Terrain controller started");
                let interval = Duration::from_millis(controller.config.tick_interval_ms);
                while controller.running.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    controller.tick();
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                log::info!("Terrain controller stopped");
            })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the loop, applies queued edits, evicts every column and flushes.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.stop();
        let _guard = self.tick_lock.lock();
        let tick = self.current_tick();
        self.drain_block_changes(tick);
        let coords = self.store.coords();
        log::info!("Saving {} columns", coords.len());
        for coord in coords {
            self.evict(coord, tick);
        }
        self.persistence.flush()
    }
}

/// Handle given to queued block-change jobs and delayed-update handlers.
pub struct TerrainEditor<'a> {
    controller: &'a ServerTerrainController,
    tick: u64,
}

impl<'a> TerrainEditor<'a> {
    fn new(controller: &'a ServerTerrainController, tick: u64) -> Self {
        Self { controller, tick }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.controller.registry
    }

    pub fn block(&self, pos: BlockPos) -> Result<BlockId, TerrainError> {
        let (handle, x, y, z) = self.controller.column_at(pos)?;
        let block = handle.read().column().block(x, y, z);
        Ok(block)
    }

    pub fn meta(&self, pos: BlockPos) -> Result<u8, TerrainError> {
        let (handle, x, y, z) = self.controller.column_at(pos)?;
        let meta = handle.read().column().meta(x, y, z);
        Ok(meta)
    }

    /// Sets a block, repairs light around it and tells every player that
    /// was sent the column. Returns the previous block.
    pub fn set_block(&mut self, pos: BlockPos, id: BlockId, meta: u8) -> Result<BlockId, TerrainError> {
        self.controller.apply_block_change(pos, id, meta)
    }

    /// Schedules an update `delay` ticks from now on behalf of the block
    /// currently at `pos`.
    pub fn schedule(&mut self, pos: BlockPos, delay: u64) -> Result<(), TerrainError> {
        let (handle, x, y, z) = self.controller.column_at(pos)?;
        let mut entry = handle.write();
        let kind = entry.column().block(x, y, z);
        entry
            .updates_mut()
            .schedule(DelayedUpdate::new(pos, self.tick + delay, kind));
        Ok(())
    }
}
