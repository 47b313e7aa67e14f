//! Sunlight and block-light propagation.
//!
//! Both channels obey the same rule: a voxel holds the larger of its own
//! source (direct sky for sunlight, emission for block light) and the best
//! neighbour level minus one minus its attenuation. Full initialisation
//! computes that fixpoint for a whole column; the incremental paths repair
//! it after a single block edit with a removal wave followed by a refill.

use crate::world::block_id::BlockId;
use crate::world::blocks_data::BlockRegistry;
use crate::world::chunk_coord::{ChunkCoord, SectionKey};
use crate::world::column::{
    block_light_of, pack_light, sun_of, VoxelColumn, MAX_LIGHT, SECTION_SIZE, SECTION_VOLUME,
};
use std::collections::HashMap;
use std::sync::Arc;

const EDGE: i32 = SECTION_SIZE as i32;

const DIRECTIONS: [(i32, i32, i32); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightChannel {
    Sun,
    Block,
}

impl LightChannel {
    #[inline]
    fn get(self, packed: u8) -> u8 {
        match self {
            LightChannel::Sun => sun_of(packed),
            LightChannel::Block => block_light_of(packed),
        }
    }

    #[inline]
    fn put(self, packed: u8, level: u8) -> u8 {
        match self {
            LightChannel::Sun => pack_light(level, block_light_of(packed)),
            LightChannel::Block => pack_light(sun_of(packed), level),
        }
    }
}

/// Pending update record; coordinates are relative to the centre column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightNode {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub level: u8,
}

impl LightNode {
    fn new(x: i32, y: i32, z: i32, level: u8) -> Self {
        Self { x, y, z, level }
    }
}

#[derive(Debug, Clone, Copy)]
struct Loc {
    slot: usize,
    x: usize,
    y: usize,
    z: usize,
}

/// A centre column plus whichever of its four side columns are loaded.
///
/// Positions are given relative to the centre: `[0, 16)` is the centre,
/// `[-16, 0)` and `[16, 32)` reach into the side columns. Diagonal columns
/// are never consulted.
pub struct Neighborhood<'a> {
    center: &'a mut VoxelColumn,
    /// -x, +x, -y, +y
    sides: [Option<&'a mut VoxelColumn>; 4],
    touched: [Option<(usize, usize)>; 5],
}

impl<'a> Neighborhood<'a> {
    pub fn new(center: &'a mut VoxelColumn, sides: [Option<&'a mut VoxelColumn>; 4]) -> Self {
        Self {
            center,
            sides,
            touched: [None; 5],
        }
    }

    pub fn isolated(center: &'a mut VoxelColumn) -> Self {
        Self::new(center, [None, None, None, None])
    }

    pub fn center(&self) -> &VoxelColumn {
        &*self.center
    }

    pub fn center_mut(&mut self) -> &mut VoxelColumn {
        &mut *self.center
    }

    pub fn side(&self, index: usize) -> Option<&VoxelColumn> {
        self.sides[index].as_deref()
    }

    fn column(&self, slot: usize) -> Option<&VoxelColumn> {
        if slot == 0 {
            Some(&*self.center)
        } else {
            self.sides[slot - 1].as_deref()
        }
    }

    fn column_mut(&mut self, slot: usize) -> Option<&mut VoxelColumn> {
        if slot == 0 {
            Some(&mut *self.center)
        } else {
            self.sides[slot - 1].as_deref_mut()
        }
    }

    fn in_reach(x: i32, y: i32) -> bool {
        (-EDGE..2 * EDGE).contains(&x) && (-EDGE..2 * EDGE).contains(&y)
    }

    fn locate(&self, x: i32, y: i32, z: i32) -> Option<Loc> {
        if !Self::in_reach(x, y) || z < 0 {
            return None;
        }
        let inside_x = (0..EDGE).contains(&x);
        let inside_y = (0..EDGE).contains(&y);
        let slot = match (inside_x, inside_y) {
            (true, true) => 0,
            (false, true) if x < 0 => 1,
            (false, true) => 2,
            (true, false) if y < 0 => 3,
            (true, false) => 4,
            (false, false) => return None,
        };
        let column = self.column(slot)?;
        if z as usize >= column.z_size() {
            return None;
        }
        Some(Loc {
            slot,
            x: x.rem_euclid(EDGE) as usize,
            y: y.rem_euclid(EDGE) as usize,
            z: z as usize,
        })
    }

    fn locate_checked(&self, x: i32, y: i32, z: i32) -> Option<Loc> {
        assert!(
            Self::in_reach(x, y),
            "position ({}, {}, {}) is outside the neighbourhood of {}",
            x,
            y,
            z,
            self.center.coord()
        );
        self.locate(x, y, z)
    }

    fn block(&self, loc: Loc) -> BlockId {
        match self.column(loc.slot) {
            Some(column) => column.block(loc.x, loc.y, loc.z),
            None => BlockId::AIR,
        }
    }

    fn level(&self, loc: Loc, channel: LightChannel) -> u8 {
        match self.column(loc.slot) {
            Some(column) => channel.get(column.light(loc.x, loc.y, loc.z)),
            None => 0,
        }
    }

    fn set_level(&mut self, loc: Loc, channel: LightChannel, level: u8) {
        if let Some(column) = self.column_mut(loc.slot) {
            let packed = column.light(loc.x, loc.y, loc.z);
            let updated = channel.put(packed, level);
            if updated != packed {
                column.set_light(loc.x, loc.y, loc.z, updated);
                self.touch(loc.slot, loc.z, loc.z);
            }
        }
    }

    fn touch(&mut self, slot: usize, lo: usize, hi: usize) {
        self.touched[slot] = Some(match self.touched[slot] {
            Some((a, b)) => (a.min(lo), b.max(hi)),
            None => (lo, hi),
        });
    }

    /// Block at a centre-relative position; `None` for absent columns.
    /// Panics when the position is farther than one column away.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> Option<BlockId> {
        self.locate_checked(x, y, z).map(|loc| self.block(loc))
    }

    pub fn sun_at(&self, x: i32, y: i32, z: i32) -> Option<u8> {
        self.locate_checked(x, y, z)
            .map(|loc| self.level(loc, LightChannel::Sun))
    }

    pub fn block_light_at(&self, x: i32, y: i32, z: i32) -> Option<u8> {
        self.locate_checked(x, y, z)
            .map(|loc| self.level(loc, LightChannel::Block))
    }

    /// Columns whose light changed, with the inclusive z range written.
    pub fn touched(&self) -> Vec<(ChunkCoord, usize, usize)> {
        (0..5)
            .filter_map(|slot| {
                let (lo, hi) = self.touched[slot]?;
                let column = self.column(slot)?;
                Some((column.coord(), lo, hi))
            })
            .collect()
    }

    pub fn touched_sections(&self) -> Vec<SectionKey> {
        let mut keys = Vec::new();
        for (coord, lo, hi) in self.touched() {
            for section in lo / SECTION_SIZE..=hi / SECTION_SIZE {
                keys.push(SectionKey::new(coord, section as i32));
            }
        }
        keys
    }
}

#[derive(Debug, Default)]
struct LightPools {
    current: Vec<LightNode>,
    next: Vec<LightNode>,
    removal: Vec<LightNode>,
    removal_next: Vec<LightNode>,
    frontier: Vec<LightNode>,
    line_old: Vec<u8>,
    line_new: Vec<u8>,
    sky: HashMap<(usize, usize, usize), Vec<u8>>,
}

impl LightPools {
    fn reset(&mut self) {
        self.current.clear();
        self.next.clear();
        self.removal.clear();
        self.removal_next.clear();
        self.frontier.clear();
        self.sky.clear();
    }
}

/// Direct sky light along one vertical line, top to bottom.
fn sky_line(
    registry: &BlockRegistry,
    column: &VoxelColumn,
    x: usize,
    y: usize,
    replaced: Option<(usize, BlockId)>,
    out: &mut Vec<u8>,
) {
    let z_size = column.z_size();
    let height = column.height(x, y);
    out.clear();
    out.resize(z_size, 0);
    let mut level = MAX_LIGHT;
    for z in (0..z_size).rev() {
        let block = match replaced {
            Some((rz, old)) if rz == z => old,
            _ if z >= height => BlockId::AIR,
            _ => column.block(x, y, z),
        };
        level = level.saturating_sub(registry.attenuation(block));
        out[z] = level;
    }
}

/// Owns the flood-fill buffers; one engine per thread that edits terrain.
pub struct LightingEngine {
    registry: Arc<BlockRegistry>,
    pools: LightPools,
}

impl LightingEngine {
    pub fn new(registry: Arc<BlockRegistry>) -> Self {
        Self {
            registry,
            pools: LightPools::default(),
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// Recomputes both channels of the centre column.
    pub fn relight(&mut self, hood: &mut Neighborhood) {
        self.init_sun_light(hood);
        self.init_block_light(hood);
    }

    pub fn init_sun_light(&mut self, hood: &mut Neighborhood) {
        self.pools.reset();
        let z_size = hood.center().z_size();
        hood.center_mut().clear_sun_light();
        hood.touch(0, 0, z_size - 1);

        for y in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                let mut level = MAX_LIGHT;
                for z in (0..z_size).rev() {
                    let a = self.registry.attenuation(hood.center().block(x, y, z));
                    level = level.saturating_sub(a);
                    if level == 0 {
                        break;
                    }
                    hood.center_mut().set_sun_light(x, y, z, level);
                }
            }
        }

        // Sky light spilling sideways below the taller of two neighbouring lines.
        let mut line = std::mem::take(&mut self.pools.line_new);
        for y in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                sky_line(&self.registry, hood.center(), x, y, None, &mut line);
                let height = hood.center().height(x, y);
                for &(dx, dy, _) in &DIRECTIONS[..4] {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    let Some(base) = hood.locate(nx, ny, 0) else {
                        continue;
                    };
                    let neighbor_height = hood
                        .column(base.slot)
                        .map_or(0, |c| c.height(base.x, base.y));
                    let top = height.max(neighbor_height).min(z_size);
                    for z in 0..top {
                        let sky = line[z];
                        if sky <= 1 {
                            continue;
                        }
                        let Some(loc) = hood.locate(nx, ny, z as i32) else {
                            continue;
                        };
                        let a = self.registry.attenuation(hood.block(loc));
                        let level = sky as i32 - 1 - a as i32;
                        if level > hood.level(loc, LightChannel::Sun) as i32 {
                            self.pools
                                .current
                                .push(LightNode::new(nx, ny, z as i32, level as u8));
                        }
                    }
                }
            }
        }
        self.pools.line_new = line;

        self.pull_from_sides(hood, LightChannel::Sun);
        self.propagate(hood, LightChannel::Sun);
    }

    pub fn init_block_light(&mut self, hood: &mut Neighborhood) {
        self.pools.reset();
        let z_size = hood.center().z_size();
        hood.center_mut().clear_block_light();
        hood.touch(0, 0, z_size - 1);

        for (s, section) in hood.center().sections().iter().enumerate() {
            if let Some(id) = section.blocks.uniform_value() {
                if self.registry.emission(BlockId(id)) == 0 {
                    continue;
                }
            }
            for i in 0..SECTION_VOLUME {
                let emission = self.registry.emission(section.block(i));
                if emission > 0 {
                    let x = (i % SECTION_SIZE) as i32;
                    let y = ((i / SECTION_SIZE) % SECTION_SIZE) as i32;
                    let z = (s * SECTION_SIZE + i / (SECTION_SIZE * SECTION_SIZE)) as i32;
                    self.pools.current.push(LightNode::new(x, y, z, emission));
                }
            }
        }

        self.pull_from_sides(hood, LightChannel::Block);
        self.propagate(hood, LightChannel::Block);
    }

    /// Repairs sunlight after the block at a centre-local position changed.
    pub fn update_sun_light(
        &mut self,
        hood: &mut Neighborhood,
        x: usize,
        y: usize,
        z: usize,
        old_block: BlockId,
    ) {
        Self::check_local(hood, x, y, z);
        self.pools.reset();

        let mut old_line = std::mem::take(&mut self.pools.line_old);
        let mut new_line = std::mem::take(&mut self.pools.line_new);
        sky_line(&self.registry, hood.center(), x, y, Some((z, old_block)), &mut old_line);
        sky_line(&self.registry, hood.center(), x, y, None, &mut new_line);

        let mut changed: Vec<(i32, i32, i32)> = old_line
            .iter()
            .zip(new_line.iter())
            .enumerate()
            .filter(|(_, (old, new))| old != new)
            .map(|(cz, _)| (x as i32, y as i32, cz as i32))
            .collect();
        if !changed.iter().any(|&(_, _, cz)| cz == z as i32) {
            changed.push((x as i32, y as i32, z as i32));
        }
        self.pools.sky.insert((0, x, y), new_line.clone());
        self.pools.line_old = old_line;
        self.pools.line_new = new_line;

        self.repair(hood, LightChannel::Sun, &changed, (x as i32, y as i32, z as i32));
    }

    /// Repairs block light after the block at a centre-local position changed.
    pub fn update_block_light(
        &mut self,
        hood: &mut Neighborhood,
        x: usize,
        y: usize,
        z: usize,
        _old_block: BlockId,
    ) {
        Self::check_local(hood, x, y, z);
        self.pools.reset();
        let p = (x as i32, y as i32, z as i32);
        self.repair(hood, LightChannel::Block, &[p], p);
    }

    pub fn on_block_changed(
        &mut self,
        hood: &mut Neighborhood,
        x: usize,
        y: usize,
        z: usize,
        old_block: BlockId,
    ) {
        self.update_sun_light(hood, x, y, z, old_block);
        self.update_block_light(hood, x, y, z, old_block);
    }

    fn check_local(hood: &Neighborhood, x: usize, y: usize, z: usize) {
        assert!(
            x < SECTION_SIZE && y < SECTION_SIZE && z < hood.center().z_size(),
            "light update at ({}, {}, {}) outside column {}",
            x,
            y,
            z,
            hood.center().coord()
        );
    }

    fn source(&mut self, hood: &Neighborhood, loc: Loc, channel: LightChannel) -> u8 {
        match channel {
            LightChannel::Block => self.registry.emission(hood.block(loc)),
            LightChannel::Sun => {
                let registry = &self.registry;
                let line = self
                    .pools
                    .sky
                    .entry((loc.slot, loc.x, loc.y))
                    .or_insert_with(|| {
                        let mut line = Vec::new();
                        if let Some(column) = hood.column(loc.slot) {
                            sky_line(registry, column, loc.x, loc.y, None, &mut line);
                        }
                        line
                    });
                line.get(loc.z).copied().unwrap_or(0)
            }
        }
    }

    /// Removal wave over `changed`, then refill from what survived.
    fn repair(
        &mut self,
        hood: &mut Neighborhood,
        channel: LightChannel,
        changed: &[(i32, i32, i32)],
        edited: (i32, i32, i32),
    ) {
        for &(cx, cy, cz) in changed {
            let Some(loc) = hood.locate(cx, cy, cz) else {
                continue;
            };
            let current = hood.level(loc, channel);
            if current > 0 {
                hood.set_level(loc, channel, 0);
                self.pools.removal.push(LightNode::new(cx, cy, cz, current));
            }
            let source = self.source(hood, loc, channel);
            if source > 0 {
                self.pools.current.push(LightNode::new(cx, cy, cz, source));
            }
        }

        while !self.pools.removal.is_empty() {
            let mut batch = std::mem::take(&mut self.pools.removal);
            for node in batch.drain(..) {
                for &(dx, dy, dz) in &DIRECTIONS {
                    let (nx, ny, nz) = (node.x + dx, node.y + dy, node.z + dz);
                    let Some(loc) = hood.locate(nx, ny, nz) else {
                        continue;
                    };
                    let level = hood.level(loc, channel);
                    if level == 0 {
                        continue;
                    }
                    if level < node.level {
                        hood.set_level(loc, channel, 0);
                        self.pools.removal_next.push(LightNode::new(nx, ny, nz, level));
                        let source = self.source(hood, loc, channel);
                        if source > 0 {
                            self.pools.current.push(LightNode::new(nx, ny, nz, source));
                        }
                    } else {
                        self.pools.frontier.push(LightNode::new(nx, ny, nz, level));
                    }
                }
            }
            self.pools.removal = batch;
            std::mem::swap(&mut self.pools.removal, &mut self.pools.removal_next);
        }

        let (ex, ey, ez) = edited;
        for &(dx, dy, dz) in &DIRECTIONS {
            self.pools
                .frontier
                .push(LightNode::new(ex + dx, ey + dy, ez + dz, 0));
        }
        let frontier = std::mem::take(&mut self.pools.frontier);
        for node in &frontier {
            let Some(loc) = hood.locate(node.x, node.y, node.z) else {
                continue;
            };
            let level = hood.level(loc, channel);
            if level > 1 {
                self.spread(hood, node.x, node.y, node.z, level);
            }
        }
        self.pools.frontier = frontier;

        self.propagate(hood, channel);
    }

    /// Seeds centre boundary voxels from light already present in side columns.
    fn pull_from_sides(&mut self, hood: &Neighborhood, channel: LightChannel) {
        let z_size = hood.center().z_size() as i32;
        for (side, &(dx, dy, _)) in DIRECTIONS[..4].iter().enumerate() {
            if hood.side(side).is_none() {
                continue;
            }
            for i in 0..EDGE {
                // Boundary voxel of the centre facing this side.
                let (bx, by) = match side {
                    0 => (0, i),
                    1 => (EDGE - 1, i),
                    2 => (i, 0),
                    _ => (i, EDGE - 1),
                };
                for z in 0..z_size {
                    let Some(outer) = hood.locate(bx + dx, by + dy, z) else {
                        continue;
                    };
                    let outer_level = hood.level(outer, channel);
                    if outer_level <= 1 {
                        continue;
                    }
                    let Some(inner) = hood.locate(bx, by, z) else {
                        continue;
                    };
                    let a = self.registry.attenuation(hood.block(inner));
                    let level = outer_level as i32 - 1 - a as i32;
                    if level > hood.level(inner, channel) as i32 {
                        self.pools.current.push(LightNode::new(bx, by, z, level as u8));
                    }
                }
            }
        }
    }

    fn spread(&mut self, hood: &Neighborhood, x: i32, y: i32, z: i32, level: u8) {
        for &(dx, dy, dz) in &DIRECTIONS {
            let (nx, ny, nz) = (x + dx, y + dy, z + dz);
            let Some(loc) = hood.locate(nx, ny, nz) else {
                continue;
            };
            let a = self.registry.attenuation(hood.block(loc));
            let proposed = level as i32 - 1 - a as i32;
            if proposed > 0 {
                self.pools
                    .next
                    .push(LightNode::new(nx, ny, nz, proposed as u8));
            }
        }
    }

    /// Two-pool breadth-first fill; a record only lands if it raises the voxel.
    fn propagate(&mut self, hood: &mut Neighborhood, channel: LightChannel) {
        let mut pending = std::mem::take(&mut self.pools.next);
        self.pools.current.append(&mut pending);
        self.pools.next = pending;

        while !self.pools.current.is_empty() {
            let mut round = std::mem::take(&mut self.pools.current);
            for node in round.drain(..) {
                let Some(loc) = hood.locate(node.x, node.y, node.z) else {
                    continue;
                };
                if node.level <= hood.level(loc, channel) {
                    continue;
                }
                hood.set_level(loc, channel, node.level);
                self.spread(hood, node.x, node.y, node.z, node.level);
            }
            self.pools.current = round;
            std::mem::swap(&mut self.pools.current, &mut self.pools.next);
        }
    }
}
