use crate::world::block_id::BlockId;
use crate::world::chunk_coord::ChunkCoord;
use crate::world::storage::compress::RunLength;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const SECTION_SIZE: usize = 16;
pub const SECTION_AREA: usize = SECTION_SIZE * SECTION_SIZE;
pub const SECTION_VOLUME: usize = SECTION_AREA * SECTION_SIZE;
pub const MAX_LIGHT: u8 = 15;
/// Tallest column whose heights still fit the `u16` height cache.
pub const MAX_Z_SIZE: usize = u16::MAX as usize / SECTION_SIZE * SECTION_SIZE;

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("Column height {0} is not a positive multiple of 16 up to 65520")]
    InvalidHeight(usize),
    #[error("Array length {actual} does not match column volume {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Per-section storage that stays a single value until something differs.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionArray<T> {
    Uniform(T),
    Dense(Box<[T]>),
}

impl<T: Copy + PartialEq> SectionArray<T> {
    #[inline]
    pub fn get(&self, index: usize) -> T {
        match self {
            SectionArray::Uniform(v) => *v,
            SectionArray::Dense(values) => values[index],
        }
    }

    pub fn set(&mut self, index: usize, value: T) {
        match self {
            SectionArray::Uniform(v) if *v == value => {}
            SectionArray::Uniform(v) => {
                let mut values = vec![*v; SECTION_VOLUME].into_boxed_slice();
                values[index] = value;
                *self = SectionArray::Dense(values);
            }
            SectionArray::Dense(values) => values[index] = value,
        }
    }

    pub fn fill(&mut self, value: T) {
        *self = SectionArray::Uniform(value);
    }

    /// Collapses a dense array back to a single value when possible.
    pub fn compact(&mut self) -> bool {
        if let SectionArray::Dense(values) = self {
            let first = values[0];
            if values.iter().all(|v| *v == first) {
                *self = SectionArray::Uniform(first);
                return true;
            }
        }
        false
    }

    pub fn uniform_value(&self) -> Option<T> {
        match self {
            SectionArray::Uniform(v) => Some(*v),
            SectionArray::Dense(_) => None,
        }
    }

    pub fn extend_into(&self, out: &mut Vec<T>) {
        match self {
            SectionArray::Uniform(v) => out.extend(std::iter::repeat(*v).take(SECTION_VOLUME)),
            SectionArray::Dense(values) => out.extend_from_slice(values),
        }
    }

    fn from_slice(values: &[T]) -> Self {
        let mut array = SectionArray::Dense(values.to_vec().into_boxed_slice());
        array.compact();
        array
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub blocks: SectionArray<u16>,
    pub meta: SectionArray<u8>,
    /// Sunlight in the high nibble, block light in the low nibble.
    pub light: SectionArray<u8>,
}

impl Section {
    fn empty() -> Self {
        Self {
            blocks: SectionArray::Uniform(0),
            meta: SectionArray::Uniform(0),
            light: SectionArray::Uniform(0),
        }
    }

    /// Index of a local position within a section (`z` already reduced mod 16).
    #[inline]
    pub fn index(x: usize, y: usize, z: usize) -> usize {
        x + y * SECTION_SIZE + z * SECTION_AREA
    }

    pub fn block(&self, index: usize) -> BlockId {
        BlockId(self.blocks.get(index))
    }

    pub fn is_air(&self) -> bool {
        self.blocks.uniform_value() == Some(0)
    }

    pub fn compact(&mut self) {
        self.blocks.compact();
        self.meta.compact();
        self.light.compact();
    }
}

#[inline]
pub fn pack_light(sun: u8, block: u8) -> u8 {
    (sun.min(MAX_LIGHT) << 4) | block.min(MAX_LIGHT)
}

#[inline]
pub fn sun_of(packed: u8) -> u8 {
    packed >> 4
}

#[inline]
pub fn block_light_of(packed: u8) -> u8 {
    packed & 0x0F
}

/// Opaque per-column side state that travels with the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// One 16x16xN stack of voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelColumn {
    coord: ChunkCoord,
    z_size: usize,
    sections: Vec<Section>,
    heights: Box<[u16; SECTION_AREA]>,
    metadata: BTreeMap<String, MetaValue>,
}

impl VoxelColumn {
    /// Panics if `z_size` is not a valid column height.
    pub fn new(coord: ChunkCoord, z_size: usize) -> Self {
        assert!(
            Self::valid_height(z_size),
            "column height {} is not a positive multiple of 16 up to {}",
            z_size,
            MAX_Z_SIZE
        );
        Self {
            coord,
            z_size,
            sections: (0..z_size / SECTION_SIZE).map(|_| Section::empty()).collect(),
            heights: Box::new([0; SECTION_AREA]),
            metadata: BTreeMap::new(),
        }
    }

    pub fn valid_height(z_size: usize) -> bool {
        z_size > 0 && z_size % SECTION_SIZE == 0 && z_size <= MAX_Z_SIZE
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn z_size(&self) -> usize {
        self.z_size
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section(&self, index: usize) -> &Section {
        &self.sections[index]
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[inline]
    fn locate(&self, x: usize, y: usize, z: usize) -> (usize, usize) {
        assert!(
            x < SECTION_SIZE && y < SECTION_SIZE && z < self.z_size,
            "local position ({}, {}, {}) outside column {} of height {}",
            x,
            y,
            z,
            self.coord,
            self.z_size
        );
        (z / SECTION_SIZE, Section::index(x, y, z % SECTION_SIZE))
    }

    pub fn block(&self, x: usize, y: usize, z: usize) -> BlockId {
        let (s, i) = self.locate(x, y, z);
        BlockId(self.sections[s].blocks.get(i))
    }

    /// Writes a block and returns the one it replaced.
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, id: BlockId) -> BlockId {
        let (s, i) = self.locate(x, y, z);
        let old = BlockId(self.sections[s].blocks.get(i));
        if old == id {
            return old;
        }
        self.sections[s].blocks.set(i, id.0);

        let h = self.heights[x + y * SECTION_SIZE] as usize;
        if !id.is_air() && z + 1 > h {
            self.heights[x + y * SECTION_SIZE] = (z + 1) as u16;
        } else if id.is_air() && z + 1 == h {
            self.recompute_height(x, y);
        }
        old
    }

    pub fn meta(&self, x: usize, y: usize, z: usize) -> u8 {
        let (s, i) = self.locate(x, y, z);
        self.sections[s].meta.get(i)
    }

    pub fn set_meta(&mut self, x: usize, y: usize, z: usize, meta: u8) {
        let (s, i) = self.locate(x, y, z);
        self.sections[s].meta.set(i, meta);
    }

    pub fn light(&self, x: usize, y: usize, z: usize) -> u8 {
        let (s, i) = self.locate(x, y, z);
        self.sections[s].light.get(i)
    }

    pub fn set_light(&mut self, x: usize, y: usize, z: usize, packed: u8) {
        let (s, i) = self.locate(x, y, z);
        self.sections[s].light.set(i, packed);
    }

    pub fn sun_light(&self, x: usize, y: usize, z: usize) -> u8 {
        sun_of(self.light(x, y, z))
    }

    pub fn block_light(&self, x: usize, y: usize, z: usize) -> u8 {
        block_light_of(self.light(x, y, z))
    }

    pub fn set_sun_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        let (s, i) = self.locate(x, y, z);
        let packed = self.sections[s].light.get(i);
        self.sections[s].light.set(i, pack_light(level, block_light_of(packed)));
    }

    pub fn set_block_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        let (s, i) = self.locate(x, y, z);
        let packed = self.sections[s].light.get(i);
        self.sections[s].light.set(i, pack_light(sun_of(packed), level));
    }

    /// Resets one light channel across the whole column.
    pub fn clear_sun_light(&mut self) {
        for section in &mut self.sections {
            match section.light.uniform_value() {
                Some(v) => section.light.fill(block_light_of(v)),
                None => {
                    for i in 0..SECTION_VOLUME {
                        let v = section.light.get(i);
                        section.light.set(i, block_light_of(v));
                    }
                }
            }
        }
    }

    pub fn clear_block_light(&mut self) {
        for section in &mut self.sections {
            match section.light.uniform_value() {
                Some(v) => section.light.fill(v & 0xF0),
                None => {
                    for i in 0..SECTION_VOLUME {
                        let v = section.light.get(i);
                        section.light.set(i, v & 0xF0);
                    }
                }
            }
        }
    }

    /// One past the highest non-air z at (x, y); 0 when the line is empty.
    pub fn height(&self, x: usize, y: usize) -> usize {
        assert!(x < SECTION_SIZE && y < SECTION_SIZE, "height lookup outside column");
        self.heights[x + y * SECTION_SIZE] as usize
    }

    pub fn max_height(&self) -> usize {
        self.heights.iter().copied().max().unwrap_or(0) as usize
    }

    fn recompute_height(&mut self, x: usize, y: usize) {
        let mut h = self.heights[x + y * SECTION_SIZE] as usize;
        while h > 0 && self.block(x, y, h - 1).is_air() {
            h -= 1;
        }
        self.heights[x + y * SECTION_SIZE] = h as u16;
    }

    pub fn recompute_heights(&mut self) {
        for y in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                self.heights[x + y * SECTION_SIZE] = self.z_size as u16;
                self.recompute_height(x, y);
            }
        }
    }

    /// Collapses uniform arrays in every section.
    pub fn compact(&mut self) {
        for section in &mut self.sections {
            section.compact();
        }
    }

    pub fn is_compact(&self) -> bool {
        self.sections.iter().all(|s| {
            let mut blocks = s.blocks.clone();
            let mut meta = s.meta.clone();
            let mut light = s.light.clone();
            !blocks.compact() && !meta.compact() && !light.compact()
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetaValue> {
        &self.metadata
    }

    pub fn meta_value(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.get(key)
    }

    pub fn set_meta_value(&mut self, key: &str, value: MetaValue) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn set_metadata(&mut self, metadata: BTreeMap<String, MetaValue>) {
        self.metadata = metadata;
    }

    pub fn blocks_flat(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(self.sections.len() * SECTION_VOLUME);
        for section in &self.sections {
            section.blocks.extend_into(&mut out);
        }
        out
    }

    pub fn meta_flat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sections.len() * SECTION_VOLUME);
        for section in &self.sections {
            section.meta.extend_into(&mut out);
        }
        out
    }

    pub fn light_flat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sections.len() * SECTION_VOLUME);
        for section in &self.sections {
            section.light.extend_into(&mut out);
        }
        out
    }

    /// Rebuilds a column from section-major flat arrays.
    pub fn from_flat(
        coord: ChunkCoord,
        z_size: usize,
        blocks: &[u16],
        meta: &[u8],
        light: &[u8],
    ) -> Result<Self, ColumnError> {
        if !Self::valid_height(z_size) {
            return Err(ColumnError::InvalidHeight(z_size));
        }
        let expected = z_size * SECTION_AREA;
        for actual in [blocks.len(), meta.len(), light.len()] {
            if actual != expected {
                return Err(ColumnError::LengthMismatch { expected, actual });
            }
        }

        let mut column = Self::new(coord, z_size);
        for (s, section) in column.sections.iter_mut().enumerate() {
            let range = s * SECTION_VOLUME..(s + 1) * SECTION_VOLUME;
            section.blocks = SectionArray::from_slice(&blocks[range.clone()]);
            section.meta = SectionArray::from_slice(&meta[range.clone()]);
            section.light = SectionArray::from_slice(&light[range]);
        }
        column.recompute_heights();
        Ok(column)
    }

    /// Like `from_flat`, but checks the run-length totals before expanding
    /// anything, so a bogus count cannot force a huge allocation.
    pub fn from_runs(
        coord: ChunkCoord,
        z_size: usize,
        blocks: &RunLength<u16>,
        meta: &RunLength<u8>,
        light: &RunLength<u8>,
    ) -> Result<Self, ColumnError> {
        if !Self::valid_height(z_size) {
            return Err(ColumnError::InvalidHeight(z_size));
        }
        let expected = z_size * SECTION_AREA;
        for actual in [blocks.len(), meta.len(), light.len()] {
            if actual != expected {
                return Err(ColumnError::LengthMismatch { expected, actual });
            }
        }
        Self::from_flat(coord, z_size, &blocks.decode(), &meta.decode(), &light.decode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_promotion_and_compaction() {
        let mut column = VoxelColumn::new(ChunkCoord::new(0, 0), 32);
        assert!(column.section(0).is_air());

        column.set_block(3, 4, 5, BlockId(1));
        assert!(matches!(column.section(0).blocks, SectionArray::Dense(_)));
        assert!(column.section(1).is_air());

        column.set_block(3, 4, 5, BlockId::AIR);
        column.compact();
        assert!(column.section(0).is_air());
        assert!(column.is_compact());
    }

    #[test]
    fn test_height_cache() {
        let mut column = VoxelColumn::new(ChunkCoord::new(0, 0), 64);
        assert_eq!(column.height(2, 2), 0);
        column.set_block(2, 2, 10, BlockId(1));
        column.set_block(2, 2, 40, BlockId(1));
        assert_eq!(column.height(2, 2), 41);
        column.set_block(2, 2, 40, BlockId::AIR);
        assert_eq!(column.height(2, 2), 11);
        column.set_block(2, 2, 10, BlockId::AIR);
        assert_eq!(column.height(2, 2), 0);
        assert_eq!(column.max_height(), 0);
    }

    #[test]
    fn test_light_nibbles() {
        let mut column = VoxelColumn::new(ChunkCoord::new(0, 0), 16);
        column.set_sun_light(1, 1, 1, 12);
        column.set_block_light(1, 1, 1, 7);
        assert_eq!(column.sun_light(1, 1, 1), 12);
        assert_eq!(column.block_light(1, 1, 1), 7);
        assert_eq!(column.light(1, 1, 1), 0xC7);

        column.clear_sun_light();
        assert_eq!(column.sun_light(1, 1, 1), 0);
        assert_eq!(column.block_light(1, 1, 1), 7);
    }

    #[test]
    fn test_flat_export_import() {
        let coord = ChunkCoord::new(5, -5);
        let mut column = VoxelColumn::new(coord, 32);
        column.set_block(0, 0, 0, BlockId(2));
        column.set_block(15, 15, 31, BlockId(3));
        column.set_meta(15, 15, 31, 9);
        column.set_light(7, 7, 20, 0xF3);
        column.set_meta_value("season", MetaValue::Int(4));

        let mut copy = VoxelColumn::from_flat(
            coord,
            32,
            &column.blocks_flat(),
            &column.meta_flat(),
            &column.light_flat(),
        )
        .unwrap();
        copy.set_metadata(column.metadata().clone());
        assert_eq!(copy.blocks_flat(), column.blocks_flat());
        assert_eq!(copy.height(15, 15), 32);
        assert_eq!(copy.light(7, 7, 20), 0xF3);

        let short = VoxelColumn::from_flat(coord, 32, &[0; 10], &[], &[]);
        assert!(matches!(short, Err(ColumnError::LengthMismatch { .. })));
    }

    #[test]
    fn test_height_limit() {
        assert_eq!(MAX_Z_SIZE, 65_520);
        assert!(VoxelColumn::valid_height(MAX_Z_SIZE));
        assert!(!VoxelColumn::valid_height(MAX_Z_SIZE + SECTION_SIZE));
        assert!(!VoxelColumn::valid_height(0));
        let tall = VoxelColumn::from_flat(ChunkCoord::new(0, 0), 65_536, &[], &[], &[]);
        assert!(matches!(tall, Err(ColumnError::InvalidHeight(65_536))));
    }

    #[test]
    #[should_panic]
    fn test_column_above_height_cache_panics() {
        VoxelColumn::new(ChunkCoord::new(0, 0), 65_536);
    }

    #[test]
    fn test_inflated_runs_are_rejected_before_decoding() {
        let coord = ChunkCoord::new(0, 0);
        let fine = RunLength::encode(&[0u8; 16 * SECTION_AREA]);
        let inflated = RunLength {
            runs: vec![(u32::MAX, 1u16), (u32::MAX, 2u16)],
        };
        let result = VoxelColumn::from_runs(coord, 16, &inflated, &fine, &fine);
        assert!(matches!(
            result,
            Err(ColumnError::LengthMismatch { expected, .. }) if expected == 16 * SECTION_AREA
        ));

        let blocks = RunLength::encode(&[1u16; 16 * SECTION_AREA]);
        let column = VoxelColumn::from_runs(coord, 16, &blocks, &fine, &fine).unwrap();
        assert_eq!(column.height(3, 3), 16);
        assert!(matches!(
            VoxelColumn::from_runs(coord, u32::MAX as usize, &blocks, &fine, &fine),
            Err(ColumnError::InvalidHeight(_))
        ));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_access_panics() {
        let column = VoxelColumn::new(ChunkCoord::new(0, 0), 16);
        column.block(0, 16, 0);
    }
}
