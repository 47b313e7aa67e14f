use crate::utils::error::StorageError;
use crate::world::chunk_coord::{ChunkCoord, RegionCoord};
use crate::world::storage::record::ColumnRecord;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One archive of up to 256 columns: zlib(bincode(key → bincode(record))).
#[derive(Debug)]
pub struct RegionFile {
    coord: RegionCoord,
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
    dirty: bool,
}

impl RegionFile {
    /// Opens the archive for `coord` in `dir`. A missing file yields an empty
    /// region; an unreadable one is moved aside and also yields an empty region.
    pub fn open(dir: &Path, coord: RegionCoord) -> Result<Self, StorageError> {
        let path = dir.join(coord.file_name());
        let mut region = Self {
            coord,
            path,
            entries: BTreeMap::new(),
            dirty: false,
        };
        if !region.path.exists() {
            return Ok(region);
        }

        let bytes = std::fs::read(&region.path)?;
        match Self::decode(&bytes) {
            Ok(entries) => region.entries = entries,
            Err(e) => {
                let aside = region.path.with_extension("region.corrupt");
                log::warn!(
                    "Region {:?} is unreadable ({}); moving it to {}",
                    coord,
                    e,
                    aside.display()
                );
                std::fs::rename(&region.path, &aside)?;
            }
        }
        Ok(region)
    }

    fn decode(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let mut raw = Vec::new();
        ZlibDecoder::new(bytes)
            .read_to_end(&mut raw)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        bincode::deserialize(&raw).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reads a column; a corrupt entry is dropped and reported as absent.
    pub fn load(&mut self, coord: ChunkCoord) -> Option<ColumnRecord> {
        let key = coord.key();
        let bytes = self.entries.get(&key)?;
        match ColumnRecord::from_bytes(bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Dropping corrupt entry for column {}: {}", coord, e);
                self.entries.remove(&key);
                self.dirty = true;
                None
            }
        }
    }

    pub fn store(&mut self, coord: ChunkCoord, record: &ColumnRecord) -> Result<(), StorageError> {
        let bytes = record.to_bytes()?;
        self.entries.insert(coord.key(), bytes);
        self.dirty = true;
        Ok(())
    }

    /// Rewrites the archive through a temp file in the same directory.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let raw = bincode::serialize(&self.entries)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let compressed = encoder.finish()?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&compressed)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        self.dirty = false;
        log::debug!("Flushed region {:?} ({} columns)", self.coord, self.entries.len());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, coord: ChunkCoord, bytes: Vec<u8>) {
        self.entries.insert(coord.key(), bytes);
        self.dirty = true;
    }
}
