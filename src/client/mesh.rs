//! Section geometry: snapshots taken under short read locks, block meshers
//! that turn them into quads, and the sink that receives finished meshes.
use crate::client::render_column::RenderColumn;
use crate::world::block_flags::BlockFlags;
use crate::world::block_id::BlockId;
use crate::world::blocks_data::{BlockRegistry, BEDROCK};
use crate::world::chunk_coord::SectionKey;
use crate::world::column::{block_light_of, sun_of, MAX_LIGHT, SECTION_SIZE};
use crate::world::store::{ChunkStore, HasColumn};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Level of detail a section is built at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lod {
    #[default]
    Full,
    /// Flora is skipped and faces take the block's own light.
    Reduced,
}

impl Lod {
    pub fn for_distance_sq(distance_sq: f32, threshold: f32) -> Self {
        if distance_sq < threshold {
            Lod::Full
        } else {
            Lod::Reduced
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
    pub normal: [f32; 3],
    pub sun_light: f32,
    pub block_light: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBuilder {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn quad_count(&self) -> usize {
        self.indices.len() / 6
    }

    /// Appends a quad given its corners in counter-clockwise order.
    pub fn add_quad(&mut self, corners: [Vec3; 4], normal: Vec3, light: u8) {
        let base = self.vertices.len() as u32;
        let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let sun = sun_of(light) as f32 / MAX_LIGHT as f32;
        let block = block_light_of(light) as f32 / MAX_LIGHT as f32;
        for (corner, uv) in corners.iter().zip(uvs) {
            self.vertices.push(Vertex {
                position: corner.to_array(),
                tex_coord: uv,
                normal: normal.to_array(),
                sun_light: sun,
                block_light: block,
            });
        }
        for i in [0, 1, 2, 0, 2, 3] {
            self.indices.push(base + i);
        }
    }
}

/// A finished section mesh as handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionMesh {
    pub key: SectionKey,
    pub lod: Lod,
    pub opaque: MeshBuilder,
    pub translucent: MeshBuilder,
}

impl SectionMesh {
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.translucent.is_empty()
    }
}

/// Receives finished meshes; `submit` replaces the previous mesh in one step.
pub trait MeshSink: Send + Sync {
    fn submit(&self, key: SectionKey, mesh: Arc<SectionMesh>);
    fn remove(&self, key: SectionKey);
}

/// In-memory sink holding the current mesh of every built section.
#[derive(Debug, Default)]
pub struct MeshStore {
    meshes: RwLock<HashMap<SectionKey, Arc<SectionMesh>>>,
}

impl MeshStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SectionKey) -> Option<Arc<SectionMesh>> {
        self.meshes.read().get(&key).cloned()
    }

    pub fn contains(&self, key: SectionKey) -> bool {
        self.meshes.read().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.meshes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.read().is_empty()
    }
}

impl MeshSink for MeshStore {
    fn submit(&self, key: SectionKey, mesh: Arc<SectionMesh>) {
        self.meshes.write().insert(key, mesh);
    }

    fn remove(&self, key: SectionKey) {
        self.meshes.write().remove(&key);
    }
}

/// -x, +x, -y, +y, -z, +z
pub const FACE_NORMALS: [(i32, i32, i32); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Unit-cube corners of each face, counter-clockwise seen from outside.
const FACE_CORNERS: [[[f32; 3]; 4]; 6] = [
    [[0., 1., 0.], [0., 0., 0.], [0., 0., 1.], [0., 1., 1.]],
    [[1., 0., 0.], [1., 1., 0.], [1., 1., 1.], [1., 0., 1.]],
    [[0., 0., 0.], [1., 0., 0.], [1., 0., 1.], [0., 0., 1.]],
    [[1., 1., 0.], [0., 1., 0.], [0., 1., 1.], [1., 1., 1.]],
    [[0., 1., 0.], [1., 1., 0.], [1., 0., 0.], [0., 0., 0.]],
    [[0., 0., 1.], [1., 0., 1.], [1., 1., 1.], [0., 1., 1.]],
];

const PADDED: usize = SECTION_SIZE + 2;
const OPEN_SKY: u8 = MAX_LIGHT << 4;

/// Copy of one section plus the one-voxel shell around it, so meshing
/// never touches a live column.
#[derive(Debug, Clone)]
pub struct SectionSnapshot {
    pub key: SectionKey,
    blocks: Vec<BlockId>,
    light: Vec<u8>,
}

impl SectionSnapshot {
    fn index(x: i32, y: i32, z: i32) -> usize {
        debug_assert!((-1..=SECTION_SIZE as i32).contains(&x));
        debug_assert!((-1..=SECTION_SIZE as i32).contains(&y));
        debug_assert!((-1..=SECTION_SIZE as i32).contains(&z));
        (((z + 1) as usize * PADDED) + (y + 1) as usize) * PADDED + (x + 1) as usize
    }

    /// An all-air snapshot open to the sky.
    pub fn empty(key: SectionKey) -> Self {
        Self {
            key,
            blocks: vec![BlockId::AIR; PADDED * PADDED * PADDED],
            light: vec![OPEN_SKY; PADDED * PADDED * PADDED],
        }
    }

    /// Section-local access; coordinates in `-1..=16` reach the shell.
    pub fn block(&self, x: i32, y: i32, z: i32) -> BlockId {
        self.blocks[Self::index(x, y, z)]
    }

    pub fn light(&self, x: i32, y: i32, z: i32) -> u8 {
        self.light[Self::index(x, y, z)]
    }

    pub fn set(&mut self, x: i32, y: i32, z: i32, block: BlockId, light: u8) {
        let i = Self::index(x, y, z);
        self.blocks[i] = block;
        self.light[i] = light;
    }

    /// Copies the section's own voxels and the layers directly above and
    /// below it from `render`. Below the world counts as bedrock.
    pub fn capture_center(&mut self, render: &RenderColumn) {
        let column = render.column();
        let s = self.key.section as usize;
        let base = s * SECTION_SIZE;
        let size = SECTION_SIZE as i32;
        for z in -1..=size {
            let wz = base as i32 + z;
            for y in 0..size {
                for x in 0..size {
                    if wz < 0 {
                        self.set(x, y, z, BEDROCK, 0);
                    } else if (wz as usize) < column.z_size() {
                        let (lx, ly, lz) = (x as usize, y as usize, wz as usize);
                        self.set(x, y, z, column.block(lx, ly, lz), column.light(lx, ly, lz));
                    }
                }
            }
        }
    }

    /// Copies the layer of side column `side` (-x, +x, -y, +y) facing the section.
    pub fn capture_side(&mut self, side: usize, render: &RenderColumn) {
        let column = render.column();
        let base = self.key.section as usize * SECTION_SIZE;
        let size = SECTION_SIZE as i32;
        for z in 0..size {
            let wz = base + z as usize;
            if wz >= column.z_size() {
                break;
            }
            for t in 0..size {
                let (sx, sy, x, y) = match side {
                    0 => (SECTION_SIZE - 1, t as usize, -1, t),
                    1 => (0, t as usize, size, t),
                    2 => (t as usize, SECTION_SIZE - 1, t, -1),
                    _ => (t as usize, 0, t, size),
                };
                self.set(x, y, z, column.block(sx, sy, wz), column.light(sx, sy, wz));
            }
        }
    }

    /// Takes a snapshot of `key` from the store, read-locking one column at a time.
    pub fn take(store: &ChunkStore<RenderColumn>, key: SectionKey) -> Option<Self> {
        let mut snapshot = Self::empty(key);
        {
            let handle = store.get(key.column).found()?;
            let render = handle.read();
            if key.section < 0 || key.section as usize >= render.section_count() {
                return None;
            }
            snapshot.capture_center(&render);
        }
        for (side, coord) in key.column.sides4().iter().enumerate() {
            if let Some(handle) = store.get(*coord).found() {
                snapshot.capture_side(side, &handle.read());
            }
        }
        Some(snapshot)
    }

    pub fn origin(&self) -> Vec3 {
        self.key.column.to_world_pos() + Vec3::new(0.0, 0.0, (self.key.section * SECTION_SIZE as i32) as f32)
    }
}

/// Everything a mesher knows about one block when emitting its faces.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    pub id: BlockId,
    /// World position of the block's minimum corner.
    pub position: Vec3,
    pub light: u8,
    /// Light of the voxel each face looks into.
    pub face_light: [u8; 6],
    /// Bit `i` set when face `i` is hidden by its neighbour.
    pub occlusion: u8,
    pub lod: Lod,
}

impl BlockContext {
    pub fn face_hidden(&self, face: usize) -> bool {
        self.occlusion & (1 << face) != 0
    }
}

/// Turns a block into geometry.
pub trait BlockMesher: Send + Sync {
    fn mesh_block(&self, ctx: &BlockContext, opaque: &mut MeshBuilder, translucent: &mut MeshBuilder);

    /// Whether `neighbor` hides the face of `of` that touches it.
    fn occludes(&self, neighbor: BlockId, of: BlockId) -> bool;
}

/// Plain unit cubes for every non-air block.
pub struct CubeMesher {
    registry: Arc<BlockRegistry>,
}

impl CubeMesher {
    pub fn new(registry: Arc<BlockRegistry>) -> Self {
        Self { registry }
    }
}

impl BlockMesher for CubeMesher {
    fn mesh_block(&self, ctx: &BlockContext, opaque: &mut MeshBuilder, translucent: &mut MeshBuilder) {
        let flags = self.registry.flags(ctx.id);
        if ctx.lod == Lod::Reduced && flags.contains(BlockFlags::FLORA) {
            return;
        }
        let builder = if flags.is_opaque() { opaque } else { translucent };
        for (face, corners) in FACE_CORNERS.iter().enumerate() {
            if ctx.face_hidden(face) {
                continue;
            }
            let (nx, ny, nz) = FACE_NORMALS[face];
            let light = match ctx.lod {
                Lod::Full => ctx.face_light[face],
                Lod::Reduced => ctx.light,
            };
            builder.add_quad(
                corners.map(|c| ctx.position + Vec3::from_array(c)),
                Vec3::new(nx as f32, ny as f32, nz as f32),
                light,
            );
        }
    }

    fn occludes(&self, neighbor: BlockId, of: BlockId) -> bool {
        self.registry.is_opaque(neighbor) || (neighbor == of && !neighbor.is_air())
    }
}

/// Builds the opaque and translucent geometry of a snapshot.
pub fn build_section_mesh(snapshot: &SectionSnapshot, mesher: &dyn BlockMesher, lod: Lod) -> SectionMesh {
    let mut opaque = MeshBuilder::new();
    let mut translucent = MeshBuilder::new();
    let origin = snapshot.origin();
    let size = SECTION_SIZE as i32;

    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                let id = snapshot.block(x, y, z);
                if id.is_air() {
                    continue;
                }
                let mut occlusion = 0u8;
                let mut face_light = [0u8; 6];
                for (face, (dx, dy, dz)) in FACE_NORMALS.iter().enumerate() {
                    let (nx, ny, nz) = (x + dx, y + dy, z + dz);
                    if mesher.occludes(snapshot.block(nx, ny, nz), id) {
                        occlusion |= 1 << face;
                    }
                    face_light[face] = snapshot.light(nx, ny, nz);
                }
                let ctx = BlockContext {
                    id,
                    position: origin + Vec3::new(x as f32, y as f32, z as f32),
                    light: snapshot.light(x, y, z),
                    face_light,
                    occlusion,
                    lod,
                };
                mesher.mesh_block(&ctx, &mut opaque, &mut translucent);
            }
        }
    }

    SectionMesh {
        key: snapshot.key,
        lod,
        opaque,
        translucent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::blocks_data::{STONE, TALL_GRASS, WATER};
    use crate::world::chunk_coord::ChunkCoord;

    fn mesher() -> CubeMesher {
        CubeMesher::new(Arc::new(BlockRegistry::with_defaults()))
    }

    fn snapshot() -> SectionSnapshot {
        SectionSnapshot::empty(SectionKey::new(ChunkCoord::new(0, 0), 1))
    }

    #[test]
    fn test_lone_cube_has_six_faces() {
        let mut snap = snapshot();
        snap.set(4, 4, 4, STONE, 0);
        let mesh = build_section_mesh(&snap, &mesher(), Lod::Full);
        assert_eq!(mesh.opaque.quad_count(), 6);
        assert!(mesh.translucent.is_empty());
        assert_eq!(mesh.opaque.vertices[0].sun_light, 1.0);

        let min = mesh
            .opaque
            .vertices
            .iter()
            .fold(Vec3::splat(f32::MAX), |m, v| m.min(Vec3::from_array(v.position)));
        assert_eq!(min, Vec3::new(4.0, 4.0, 20.0));
    }

    #[test]
    fn test_shared_faces_are_culled() {
        let mut snap = snapshot();
        snap.set(4, 4, 4, STONE, 0);
        snap.set(5, 4, 4, STONE, 0);
        // Opaque shell neighbour across the section boundary.
        snap.set(-1, 0, 0, STONE, 0);
        snap.set(0, 0, 0, STONE, 0);
        let mesh = build_section_mesh(&snap, &mesher(), Lod::Full);
        assert_eq!(mesh.opaque.quad_count(), 10 + 5);
    }

    #[test]
    fn test_water_is_translucent_and_merges() {
        let mut snap = snapshot();
        snap.set(1, 1, 1, WATER, 0);
        snap.set(1, 1, 2, WATER, 0);
        let mesh = build_section_mesh(&snap, &mesher(), Lod::Full);
        assert!(mesh.opaque.is_empty());
        assert_eq!(mesh.translucent.quad_count(), 10);
    }

    #[test]
    fn test_reduced_detail_skips_flora() {
        let mut snap = snapshot();
        snap.set(2, 2, 2, TALL_GRASS, 0);
        assert!(!build_section_mesh(&snap, &mesher(), Lod::Full).is_empty());
        assert!(build_section_mesh(&snap, &mesher(), Lod::Reduced).is_empty());
        assert_eq!(Lod::for_distance_sq(9215.0, 9216.0), Lod::Full);
        assert_eq!(Lod::for_distance_sq(9216.0, 9216.0), Lod::Reduced);
    }

    #[test]
    fn test_mesh_store_replaces() {
        let store = MeshStore::new();
        let key = SectionKey::new(ChunkCoord::new(0, 0), 0);
        let mesh = |lod| {
            Arc::new(SectionMesh {
                key,
                lod,
                opaque: MeshBuilder::new(),
                translucent: MeshBuilder::new(),
            })
        };
        store.submit(key, mesh(Lod::Full));
        store.submit(key, mesh(Lod::Reduced));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(key).map(|m| m.lod), Some(Lod::Reduced));
        store.remove(key);
        assert!(store.is_empty());
    }
}
