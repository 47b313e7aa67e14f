//! Keeps meshes of the visible sections current: recomputes visibility as the
//! camera moves, queues sections that need geometry and builds them on two
//! worker threads.
use crate::client::controller::{ClientStore, SectionListener};
use crate::client::mesh::{build_section_mesh, BlockMesher, Lod, MeshSink, SectionMesh, SectionSnapshot};
use crate::client::render_column::RenderColumn;
use crate::client::visibility::compute_visibility;
use crate::config::rendering::RenderConfig;
use crate::server::state::ColumnState;
use crate::utils::math::{ViewFrustum, AABB};
use crate::world::chunk_coord::{ChunkCoord, SectionKey};
use crate::world::store::Shared;
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::{Mat4, Vec3};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Camera {
    position: Vec3,
    view_proj: Mat4,
    section: Option<SectionKey>,
}

/// Everything needed to build one section off-lock.
pub struct BuildJob {
    pub key: SectionKey,
    pub lod: Lod,
    generation: u64,
    column: Shared<RenderColumn>,
    snapshot: SectionSnapshot,
}

pub struct ClientMeshPipeline {
    config: RenderConfig,
    view_radius: i32,
    store: Arc<ClientStore>,
    mesher: Arc<dyn BlockMesher>,
    sink: Arc<dyn MeshSink>,
    camera: Mutex<Camera>,
    visible: RwLock<HashSet<SectionKey>>,
    /// Keys whose mesh currently sits in the sink.
    meshed: Mutex<HashSet<SectionKey>>,
    queued: Mutex<HashSet<SectionKey>>,
    load_tx: Sender<SectionKey>,
    load_rx: Receiver<SectionKey>,
    update_tx: Sender<SectionKey>,
    update_rx: Receiver<SectionKey>,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientMeshPipeline {
    pub fn new(
        config: RenderConfig,
        view_radius: i32,
        store: Arc<ClientStore>,
        mesher: Arc<dyn BlockMesher>,
        sink: Arc<dyn MeshSink>,
    ) -> Self {
        let (load_tx, load_rx) = unbounded();
        let (update_tx, update_rx) = unbounded();
        Self {
            config,
            view_radius,
            store,
            mesher,
            sink,
            camera: Mutex::new(Camera {
                position: Vec3::ZERO,
                view_proj: Mat4::IDENTITY,
                section: None,
            }),
            visible: RwLock::new(HashSet::new()),
            meshed: Mutex::new(HashSet::new()),
            queued: Mutex::new(HashSet::new()),
            load_tx,
            load_rx,
            update_tx,
            update_rx,
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_visible(&self, key: SectionKey) -> bool {
        self.visible.read().contains(&key)
    }

    pub fn visible_count(&self) -> usize {
        self.visible.read().len()
    }

    pub fn queued(&self) -> usize {
        self.queued.lock().len()
    }

    /// Updates the camera. Visibility is recomputed when the camera enters
    /// another section; sections whose detail level no longer fits their
    /// distance are queued for rebuild.
    pub fn set_camera(&self, position: Vec3, view_proj: Mat4) {
        let section = SectionKey::from_world_pos(position);
        let moved = {
            let mut camera = self.camera.lock();
            camera.position = position;
            camera.view_proj = view_proj;
            let moved = camera.section != Some(section);
            camera.section = Some(section);
            moved
        };
        if moved {
            self.recompute_visibility();
        }
        self.refresh_lod(position);
    }

    fn lod_for(&self, key: SectionKey, camera: Vec3) -> Lod {
        Lod::for_distance_sq(camera.distance_squared(key.center()), self.config.lod_distance_sq)
    }

    fn refresh_lod(&self, camera: Vec3) {
        let visible: Vec<SectionKey> = self.visible.read().iter().copied().collect();
        for key in visible {
            let wanted = self.lod_for(key, camera);
            let Some(handle) = self.store.get(key.column).found() else {
                continue;
            };
            let mut render = handle.write();
            let index = key.section as usize;
            if index >= render.section_count() {
                continue;
            }
            let state = render.section_state(index);
            if state.built && !state.dirty && state.lod != wanted {
                render.mark_dirty(index);
                drop(render);
                self.enqueue(key, false);
            }
        }
    }

    /// The camera's section with its height clamped into the camera's column.
    fn camera_section(&self) -> Option<SectionKey> {
        let mut key = self.camera.lock().section?;
        let handle = self.store.get(key.column).found()?;
        let count = handle.read().section_count() as i32;
        key.section = key.section.clamp(0, count - 1);
        Some(key)
    }

    fn section_loaded(&self, key: SectionKey) -> bool {
        self.store.get(key.column).found().map_or(false, |handle| {
            let render = handle.read();
            render.state() >= ColumnState::Loaded && key.section >= 0 && (key.section as usize) < render.section_count()
        })
    }

    fn section_solid(&self, key: SectionKey) -> bool {
        self.store
            .get(key.column)
            .found()
            .map_or(false, |handle| handle.read().section_state(key.section as usize).solid)
    }

    /// Replaces the visible set. Sections leaving it lose their mesh unless
    /// `keep_invisible_meshes` is set; sections entering it are queued if
    /// they have no current mesh.
    pub fn recompute_visibility(&self) {
        let fresh = match self.camera_section() {
            Some(camera) => compute_visibility(
                camera,
                |key| self.section_loaded(key),
                |key| self.section_solid(key),
                self.view_radius,
            ),
            None => HashSet::new(),
        };

        let mut visible = self.visible.write();
        for &key in visible.difference(&fresh) {
            if let Some(handle) = self.store.get(key.column).found() {
                let mut render = handle.write();
                let index = key.section as usize;
                if index < render.section_count() {
                    render.section_state_mut(index).visible = false;
                    if !self.config.keep_invisible_meshes {
                        render.mark_dirty(index);
                        render.section_state_mut(index).built = false;
                    }
                }
            }
            if !self.config.keep_invisible_meshes {
                self.drop_mesh(key);
            }
        }

        let mut wanted = Vec::new();
        for &key in fresh.difference(&visible) {
            let Some(handle) = self.store.get(key.column).found() else {
                continue;
            };
            let mut render = handle.write();
            let state = render.section_state_mut(key.section as usize);
            state.visible = true;
            if state.dirty || !state.built {
                wanted.push((key, !state.built));
            }
        }
        log::trace!("{} sections visible, {} newly queued", fresh.len(), wanted.len());
        *visible = fresh;
        drop(visible);

        for (key, load) in wanted {
            self.enqueue(key, load);
        }
    }

    fn drop_mesh(&self, key: SectionKey) {
        if self.meshed.lock().remove(&key) {
            self.sink.remove(key);
        }
    }

    fn enqueue(&self, key: SectionKey, load: bool) {
        if !self.queued.lock().insert(key) {
            return;
        }
        let tx = if load { &self.load_tx } else { &self.update_tx };
        if tx.send(key).is_err() {
            log::warn!("Mesh queue closed, dropping {:?}", key);
        }
    }

    fn next_key(&self, preferred: &Receiver<SectionKey>, fallback: &Receiver<SectionKey>) -> Option<SectionKey> {
        let key = preferred.try_recv().or_else(|_| fallback.try_recv()).ok()?;
        self.queued.lock().remove(&key);
        Some(key)
    }

    /// Snapshots a section that is visible and dirty.
    pub fn prepare(&self, key: SectionKey) -> Option<BuildJob> {
        let lod = self.lod_for(key, self.camera.lock().position);
        let column = self.store.get(key.column).found()?;
        let generation = {
            let render = column.read();
            let index = usize::try_from(key.section).ok()?;
            if index >= render.section_count() {
                return None;
            }
            let state = render.section_state(index);
            if !state.dirty || !state.visible {
                return None;
            }
            state.generation
        };
        let snapshot = SectionSnapshot::take(&self.store, key)?;
        Some(BuildJob {
            key,
            lod,
            generation,
            column,
            snapshot,
        })
    }

    /// Hands a finished mesh to the sink unless the section was invalidated,
    /// hidden or disposed since `prepare`.
    pub fn commit(&self, job: BuildJob, mesh: SectionMesh) -> bool {
        let current = match self.store.get(job.key.column).found() {
            Some(handle) if Arc::ptr_eq(&handle, &job.column) => handle,
            _ => {
                log::trace!("Dropping mesh of disposed column {:?}", job.key);
                return false;
            }
        };
        let mut render = current.write();
        let state = render.section_state_mut(job.key.section as usize);
        if state.generation != job.generation || !state.visible {
            log::trace!("Dropping stale mesh of {:?}", job.key);
            return false;
        }
        if mesh.is_empty() {
            self.drop_mesh(job.key);
        } else {
            self.meshed.lock().insert(job.key);
            self.sink.submit(job.key, Arc::new(mesh));
        }
        state.built = true;
        state.dirty = false;
        state.lod = job.lod;
        true
    }

    pub fn build(&self, key: SectionKey) -> bool {
        let Some(job) = self.prepare(key) else {
            return false;
        };
        let mesh = build_section_mesh(&job.snapshot, self.mesher.as_ref(), job.lod);
        self.commit(job, mesh)
    }

    /// Builds everything queued on the calling thread. Returns the number of
    /// meshes committed.
    pub fn run_pending(&self) -> usize {
        let mut built = 0;
        while let Some(key) = self.next_key(&self.load_rx, &self.update_rx) {
            if self.build(key) {
                built += 1;
            }
        }
        built
    }

    /// Starts the load worker and the update worker; each falls back to the
    /// other's queue when its own is empty.
    pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut workers = self.workers.lock();
        for (name, load_first) in [("mesh-load", true), ("mesh-update", false)] {
            let pipeline = Arc::clone(self);
            let handle = std::thread::Builder::new().name(name.into()).spawn(move || {
                let (preferred, fallback) = if load_first {
                    (&pipeline.load_rx, &pipeline.update_rx)
                } else {
                    (&pipeline.update_rx, &pipeline.load_rx)
                };
                let idle = Duration::from_millis(pipeline.config.worker_idle_ms);
                while pipeline.running.load(Ordering::SeqCst) {
                    match pipeline.next_key(preferred, fallback) {
                        Some(key) => {
                            pipeline.build(key);
                        }
                        None => std::thread::sleep(idle),
                    }
                }
            })?;
            workers.push(handle);
        }
        log::info!("Mesh workers started");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                log::error!("Mesh worker panicked");
            }
        }
    }

    /// Built visible sections inside the view frustum, nearest first.
    pub fn draw_list(&self) -> Vec<SectionKey> {
        let camera = *self.camera.lock();
        let frustum = ViewFrustum::from_matrix(camera.view_proj);
        let mut keys: Vec<SectionKey> = self
            .visible
            .read()
            .iter()
            .copied()
            .filter(|key| frustum.intersects_aabb(&AABB::for_section(*key)))
            .filter(|key| {
                self.store
                    .get(key.column)
                    .found()
                    .map_or(false, |h| {
                        h.read()
                            .section_states()
                            .get(key.section as usize)
                            .map_or(false, |s| s.built)
                    })
            })
            .collect();
        keys.sort_by(|a, b| {
            let da = camera.position.distance_squared(a.center());
            let db = camera.position.distance_squared(b.center());
            da.total_cmp(&db)
        });
        keys
    }
}

impl SectionListener for ClientMeshPipeline {
    fn column_loaded(&self, coord: ChunkCoord) {
        // A re-sent column has fresh section state; let visibility flag it again.
        self.visible.write().retain(|key| key.column != coord);
        self.recompute_visibility();
    }

    fn column_disposed(&self, coord: ChunkCoord) {
        let stale: Vec<SectionKey> = self.meshed.lock().iter().copied().filter(|k| k.column == coord).collect();
        for key in stale {
            self.drop_mesh(key);
        }
        self.recompute_visibility();
    }

    fn sections_dirtied(&self, keys: &[SectionKey]) {
        for &key in keys {
            let Some(handle) = self.store.get(key.column).found() else {
                continue;
            };
            let (visible, built) = {
                let render = handle.read();
                let state = render.section_state(key.section as usize);
                (state.visible, state.built)
            };
            if visible {
                self.enqueue(key, !built);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::controller::{ChunkRequester, ClientTerrainController};
    use crate::client::mesh::{CubeMesher, MeshStore};
    use crate::config::chunksys::ChunkSysConfig;
    use crate::net::protocol::{BlockChange, ChunkData};
    use crate::world::blocks_data::{BlockRegistry, GLASS, STONE};
    use crate::world::chunk_coord::{BlockPos, WorldBounds};
    use crate::world::column::VoxelColumn;
    use std::time::Instant;

    struct Fixture {
        registry: Arc<BlockRegistry>,
        store: Arc<ClientStore>,
        sink: Arc<MeshStore>,
        pipeline: Arc<ClientMeshPipeline>,
    }

    fn fixture(config: RenderConfig, radius: i32) -> Fixture {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let store = Arc::new(ClientStore::new(WorldBounds::default()));
        let sink = Arc::new(MeshStore::new());
        let pipeline = Arc::new(ClientMeshPipeline::new(
            config,
            radius,
            store.clone(),
            Arc::new(CubeMesher::new(registry.clone())),
            sink.clone(),
        ));
        Fixture {
            registry,
            store,
            sink,
            pipeline,
        }
    }

    fn fill(column: &mut VoxelColumn, z_range: std::ops::Range<usize>) {
        for z in z_range {
            for y in 0..16 {
                for x in 0..16 {
                    column.set_block(x, y, z, STONE);
                }
            }
        }
    }

    impl Fixture {
        fn load(&self, column: VoxelColumn) {
            let coord = column.coord();
            self.store
                .insert(coord, RenderColumn::new(column, ColumnState::Loaded, &self.registry));
            self.pipeline.column_loaded(coord);
        }

        fn floor(&self, coord: ChunkCoord, z_size: usize) {
            let mut column = VoxelColumn::new(coord, z_size);
            fill(&mut column, 0..1);
            self.load(column);
        }

        fn state(&self, key: SectionKey) -> crate::client::render_column::SectionState {
            let handle = self.store.get(key.column).found().unwrap();
            let state = handle.read().section_state(key.section as usize).clone();
            state
        }
    }

    fn looking_north(eye: Vec3) -> Mat4 {
        let view = Mat4::look_at_rh(eye, eye + Vec3::Y, Vec3::Z);
        let proj = Mat4::perspective_rh(70f32.to_radians(), 1.0, 0.1, 500.0);
        proj * view
    }

    #[test]
    fn test_only_visible_sections_are_built() {
        let f = fixture(RenderConfig::default(), 4);
        let origin = ChunkCoord::new(0, 0);
        let mut column = VoxelColumn::new(origin, 48);
        fill(&mut column, 16..32);
        f.load(column);

        let eye = Vec3::new(8.0, 8.0, 40.0);
        f.pipeline.set_camera(eye, looking_north(eye));
        f.pipeline.run_pending();

        let below = SectionKey::new(origin, 0);
        let wall = SectionKey::new(origin, 1);
        let camera = SectionKey::new(origin, 2);
        assert!(f.pipeline.is_visible(wall));
        assert!(!f.pipeline.is_visible(below));
        assert!(f.sink.contains(wall));
        assert!(!f.sink.contains(below));
        // Air only: built, but nothing to draw.
        assert!(!f.sink.contains(camera));
        assert!(f.state(camera).built);
        assert!(f.state(below).dirty && !f.state(below).built);
    }

    #[test]
    fn test_camera_above_column_is_clamped() {
        let f = fixture(RenderConfig::default(), 4);
        f.floor(ChunkCoord::new(0, 0), 128);
        let eye = Vec3::new(8.0, 8.0, 20.0);
        f.pipeline.set_camera(eye, looking_north(eye));
        f.pipeline.run_pending();
        let floor = SectionKey::new(ChunkCoord::new(0, 0), 0);
        assert_eq!(f.sink.get(floor).unwrap().lod, Lod::Full);

        let eye = Vec3::new(8.0, 8.0, 200.0);
        f.pipeline.set_camera(eye, looking_north(eye));
        assert!(f.pipeline.is_visible(SectionKey::new(ChunkCoord::new(0, 0), 7)));
        assert!(f.state(floor).dirty, "floor should be rebuilt at reduced detail");
        f.pipeline.run_pending();
        assert_eq!(f.sink.get(floor).unwrap().lod, Lod::Reduced);
        assert!(!f.state(floor).dirty);
    }

    #[test]
    fn test_stale_builds_are_dropped() {
        let f = fixture(RenderConfig::default(), 4);
        let coord = ChunkCoord::new(0, 0);
        f.floor(coord, 32);
        let eye = Vec3::new(8.0, 8.0, 8.0);
        f.pipeline.set_camera(eye, looking_north(eye));
        let key = SectionKey::new(coord, 0);

        let job = f.pipeline.prepare(key).unwrap();
        let mesh = build_section_mesh(&job.snapshot, &CubeMesher::new(f.registry.clone()), job.lod);
        f.store.get(coord).found().unwrap().write().mark_dirty(0);
        assert!(!f.pipeline.commit(job, mesh));
        assert!(!f.sink.contains(key));

        let job = f.pipeline.prepare(key).unwrap();
        let mesh = build_section_mesh(&job.snapshot, &CubeMesher::new(f.registry.clone()), job.lod);
        f.store.remove(coord);
        f.floor(coord, 32);
        assert!(!f.pipeline.commit(job, mesh));
        assert!(!f.sink.contains(key));

        f.pipeline.run_pending();
        assert!(f.sink.contains(key));
    }

    #[test]
    fn test_hidden_sections_lose_their_mesh() {
        let near = ChunkCoord::new(0, 0);
        let far = ChunkCoord::new(6, 0);
        for keep in [false, true] {
            let f = fixture(
                RenderConfig {
                    keep_invisible_meshes: keep,
                    ..Default::default()
                },
                2,
            );
            f.floor(near, 32);
            f.floor(far, 32);
            let eye = Vec3::new(8.0, 8.0, 8.0);
            f.pipeline.set_camera(eye, looking_north(eye));
            f.pipeline.run_pending();
            let key = SectionKey::new(near, 0);
            assert!(f.sink.contains(key));

            let eye = far.to_world_pos() + Vec3::new(8.0, 8.0, 8.0);
            f.pipeline.set_camera(eye, looking_north(eye));
            assert!(!f.pipeline.is_visible(key));
            assert_eq!(f.sink.contains(key), keep);
            assert_eq!(f.state(key).built, keep);
        }
    }

    #[test]
    fn test_draw_list_culls_behind_camera() {
        let f = fixture(RenderConfig::default(), 3);
        for y in -2..=2 {
            f.floor(ChunkCoord::new(0, y), 32);
        }
        let eye = Vec3::new(8.0, 8.0, 8.0);
        f.pipeline.set_camera(eye, looking_north(eye));
        f.pipeline.run_pending();

        let list = f.pipeline.draw_list();
        assert!(list.contains(&SectionKey::new(ChunkCoord::new(0, 2), 0)));
        assert!(!list.contains(&SectionKey::new(ChunkCoord::new(0, -2), 0)));
        assert_eq!(list.first(), Some(&SectionKey::new(ChunkCoord::new(0, 0), 0)));
    }

    struct NoRequests;

    impl ChunkRequester for NoRequests {
        fn request_chunk(&self, _coord: ChunkCoord) {}
    }

    #[test]
    fn test_workers_follow_block_changes() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let controller = ClientTerrainController::new(
            ChunkSysConfig {
                z_size: 32,
                view_radius: 3,
                ..Default::default()
            },
            registry.clone(),
            Arc::new(NoRequests),
        );
        let sink = Arc::new(MeshStore::new());
        let pipeline = Arc::new(ClientMeshPipeline::new(
            RenderConfig::default(),
            3,
            controller.store().clone(),
            Arc::new(CubeMesher::new(registry.clone())),
            sink.clone(),
        ));
        let controller = controller.with_listener(pipeline.clone());

        let eye = Vec3::new(8.0, 8.0, 8.0);
        pipeline.set_camera(eye, looking_north(eye));
        pipeline.start().unwrap();

        let coord = ChunkCoord::new(0, 0);
        let mut column = VoxelColumn::new(coord, 32);
        fill(&mut column, 0..1);
        controller.on_chunk_data(ChunkData::from_column(&column, Vec::new())).unwrap();

        let key = SectionKey::new(coord, 0);
        let wait_for = |pred: &dyn Fn() -> bool| {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !pred() {
                assert!(Instant::now() < deadline, "timed out waiting for mesh workers");
                std::thread::sleep(Duration::from_millis(5));
            }
        };
        wait_for(&|| sink.contains(key));
        let before = sink.get(key).unwrap().translucent.quad_count();
        assert_eq!(before, 0);

        controller.on_block_change(BlockChange::new(BlockPos::from_local(coord, 4, 4, 1), GLASS, 0));
        wait_for(&|| sink.get(key).map_or(false, |m| m.translucent.quad_count() > 0));

        pipeline.stop();
    }
}
