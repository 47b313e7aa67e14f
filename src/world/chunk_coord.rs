use glam::{IVec2, IVec3, Vec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// Horizontal edge length of a column and of a section.
pub const CHUNK_SIZE: i32 = 16;
/// Columns per region edge.
pub const REGION_SIZE: i32 = 16;

/// Column position in the chunk grid. `x`/`y` are horizontal, height is `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkCoord(pub IVec2);

impl Serialize for ChunkCoord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.0.x, self.0.y).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChunkCoord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (x, y) = <(i32, i32)>::deserialize(deserializer)?;
        Ok(ChunkCoord(IVec2::new(x, y)))
    }
}

impl PartialOrd for ChunkCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.x.cmp(&other.0.x) {
            Ordering::Equal => self.0.y.cmp(&other.0.y),
            ord => ord,
        }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0.x, self.0.y)
    }
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self(IVec2::new(x, y))
    }

    pub fn x(&self) -> i32 {
        self.0.x
    }

    pub fn y(&self) -> i32 {
        self.0.y
    }

    /// Wraps at the i32 edges; such coordinates are outside any world bounds.
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.0.x.wrapping_add(dx), self.0.y.wrapping_add(dy))
    }

    pub fn from_world_pos(pos: Vec3) -> Self {
        Self::new(
            (pos.x / CHUNK_SIZE as f32).floor() as i32,
            (pos.y / CHUNK_SIZE as f32).floor() as i32,
        )
    }

    pub fn from_block(pos: BlockPos) -> Self {
        Self::new(
            pos.0.x.div_euclid(CHUNK_SIZE),
            pos.0.y.div_euclid(CHUNK_SIZE),
        )
    }

    /// World position of the column's (0, 0, 0) corner.
    pub fn to_world_pos(&self) -> Vec3 {
        Vec3::new(
            self.0.x as f32 * CHUNK_SIZE as f32,
            self.0.y as f32 * CHUNK_SIZE as f32,
            0.0,
        )
    }

    pub fn region(&self) -> RegionCoord {
        RegionCoord::new(self.0.x.div_euclid(REGION_SIZE), self.0.y.div_euclid(REGION_SIZE))
    }

    /// Stable text key of this column inside its region archive.
    pub fn key(&self) -> String {
        format!("{}.{}", to_base36(self.0.x as i64), to_base36(self.0.y as i64))
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let (x, y) = key.split_once('.')?;
        Some(Self::new(
            i32::try_from(from_base36(x)?).ok()?,
            i32::try_from(from_base36(y)?).ok()?,
        ))
    }

    /// The 8 surrounding columns.
    pub fn neighbors8(&self) -> [Self; 8] {
        [
            self.offset(-1, -1),
            self.offset(0, -1),
            self.offset(1, -1),
            self.offset(-1, 0),
            self.offset(1, 0),
            self.offset(-1, 1),
            self.offset(0, 1),
            self.offset(1, 1),
        ]
    }

    /// Face-adjacent columns in the order -x, +x, -y, +y.
    pub fn sides4(&self) -> [Self; 4] {
        [
            self.offset(-1, 0),
            self.offset(1, 0),
            self.offset(0, -1),
            self.offset(0, 1),
        ]
    }

    pub fn distance_squared(&self, other: &Self) -> i64 {
        let dx = self.0.x as i64 - other.0.x as i64;
        let dy = self.0.y as i64 - other.0.y as i64;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Self) -> f32 {
        (self.distance_squared(other) as f32).sqrt()
    }

    /// Columns whose centre lies within `radius` columns of `self`, nearest first.
    pub fn circle(&self, radius: i32) -> Vec<Self> {
        let r2 = radius as i64 * radius as i64;
        let mut coords = Vec::new();
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                let c = self.offset(dx, dy);
                if self.distance_squared(&c) <= r2 {
                    coords.push(c);
                }
            }
        }
        coords.sort_by_key(|c| (self.distance_squared(c), *c));
        coords
    }
}

impl From<IVec2> for ChunkCoord {
    fn from(vec: IVec2) -> Self {
        Self(vec)
    }
}

impl From<ChunkCoord> for IVec2 {
    fn from(coord: ChunkCoord) -> Self {
        coord.0
    }
}

/// A 16x16 block of columns stored in one archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionCoord {
    pub x: i32,
    pub y: i32,
}

impl RegionCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn file_name(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}.{}.region",
            to_base36(self.x as i64),
            to_base36(self.y as i64)
        ))
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".region")?;
        let (x, y) = stem.split_once('.')?;
        Some(Self::new(
            i32::try_from(from_base36(x)?).ok()?,
            i32::try_from(from_base36(y)?).ok()?,
        ))
    }

    pub fn columns(&self) -> impl Iterator<Item = ChunkCoord> {
        let base = ChunkCoord::new(self.x * REGION_SIZE, self.y * REGION_SIZE);
        (0..REGION_SIZE)
            .flat_map(move |dx| (0..REGION_SIZE).map(move |dy| base.offset(dx, dy)))
    }
}

/// Absolute block position; `z` is height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos(pub IVec3);

impl Serialize for BlockPos {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.0.x, self.0.y, self.0.z).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockPos {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (x, y, z) = <(i32, i32, i32)>::deserialize(deserializer)?;
        Ok(BlockPos(IVec3::new(x, y, z)))
    }
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    pub fn from_local(coord: ChunkCoord, x: usize, y: usize, z: usize) -> Self {
        Self::new(
            coord.x() * CHUNK_SIZE + x as i32,
            coord.y() * CHUNK_SIZE + y as i32,
            z as i32,
        )
    }

    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::from_block(*self)
    }

    /// Local (x, y, z) inside the owning column.
    pub fn local(&self) -> (usize, usize, usize) {
        (
            self.0.x.rem_euclid(CHUNK_SIZE) as usize,
            self.0.y.rem_euclid(CHUNK_SIZE) as usize,
            self.0.z as usize,
        )
    }

    /// Local position packed as `(z << 8) | (y << 4) | x`.
    pub fn pack_local(&self) -> u32 {
        let (x, y, z) = self.local();
        ((z as u32) << 8) | ((y as u32) << 4) | x as u32
    }

    pub fn unpack_local(coord: ChunkCoord, packed: u32) -> Self {
        let x = (packed & 0xF) as usize;
        let y = ((packed >> 4) & 0xF) as usize;
        let z = (packed >> 8) as usize;
        Self::from_local(coord, x, y, z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.0.x, self.0.y, self.0.z)
    }
}

/// One 16x16x16 slice of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub column: ChunkCoord,
    pub section: i32,
}

impl SectionKey {
    pub const fn new(column: ChunkCoord, section: i32) -> Self {
        Self { column, section }
    }

    pub fn from_world_pos(pos: Vec3) -> Self {
        Self::new(
            ChunkCoord::from_world_pos(pos),
            (pos.z / CHUNK_SIZE as f32).floor() as i32,
        )
    }

    /// The 6 face-adjacent sections (may be outside the column's height).
    pub fn neighbors6(&self) -> [Self; 6] {
        [
            Self::new(self.column.offset(-1, 0), self.section),
            Self::new(self.column.offset(1, 0), self.section),
            Self::new(self.column.offset(0, -1), self.section),
            Self::new(self.column.offset(0, 1), self.section),
            Self::new(self.column, self.section - 1),
            Self::new(self.column, self.section + 1),
        ]
    }

    pub fn center(&self) -> Vec3 {
        let half = CHUNK_SIZE as f32 / 2.0;
        self.column.to_world_pos()
            + Vec3::new(half, half, (self.section * CHUNK_SIZE) as f32 + half)
    }
}

/// Finite horizontal extent of the world, in columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldBounds {
    pub radius: i32,
}

impl WorldBounds {
    pub const DEFAULT_RADIUS: i32 = 1_875_000;

    pub fn new(radius: i32) -> Self {
        Self { radius }
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        let radius = self.radius.max(0) as u32;
        coord.x().unsigned_abs() < radius && coord.y().unsigned_abs() < radius
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RADIUS)
    }
}

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn to_base36(value: i64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let negative = value < 0;
    let mut n = value.unsigned_abs();
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

pub fn from_base36(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    i64::from_str_radix(digits, 36)
        .ok()
        .map(|v| if negative { -v } else { v })
}
