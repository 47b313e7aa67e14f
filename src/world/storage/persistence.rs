use crate::utils::error::StorageError;
use crate::world::chunk_coord::{ChunkCoord, RegionCoord};
use crate::world::storage::record::ColumnRecord;
use crate::world::storage::region::RegionFile;
use crate::world::store::Residency;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where evicted columns go and where missing ones are looked up first.
pub trait ColumnPersistence: Send + Sync {
    /// `None` for columns never saved or whose data is unreadable.
    fn load(&self, coord: ChunkCoord) -> Option<ColumnRecord>;
    fn save(&self, coord: ChunkCoord, record: ColumnRecord) -> Result<(), StorageError>;
    fn flush(&self) -> Result<(), StorageError>;
}

/// Region-file backed persistence with a cache of open archives.
///
/// All disk access is serialized through one mutex; this is not on the
/// hot path. On a region miss every open region with no resident column
/// is flushed and closed.
pub struct PersistenceLayer {
    dir: PathBuf,
    regions: Mutex<HashMap<RegionCoord, RegionFile>>,
    residency: Arc<dyn Residency>,
}

impl PersistenceLayer {
    pub fn new(dir: impl Into<PathBuf>, residency: Arc<dyn Residency>) -> Self {
        Self {
            dir: dir.into(),
            regions: Mutex::new(HashMap::new()),
            residency,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn open_regions(&self) -> usize {
        self.regions.lock().len()
    }

    fn is_idle(&self, region: RegionCoord) -> bool {
        !region.columns().any(|c| self.residency.is_resident(c))
    }

    fn close_idle(&self, regions: &mut HashMap<RegionCoord, RegionFile>, keep: RegionCoord) {
        let idle: Vec<RegionCoord> = regions
            .keys()
            .copied()
            .filter(|rc| *rc != keep && self.is_idle(*rc))
            .collect();
        for rc in idle {
            if let Some(mut region) = regions.remove(&rc) {
                if let Err(e) = region.flush() {
                    log::error!("Failed to flush region {:?} on close: {}", rc, e);
                } else {
                    log::info!("Closed region {:?}", rc);
                }
            }
        }
    }

    fn with_region<R>(
        &self,
        coord: RegionCoord,
        f: impl FnOnce(&mut RegionFile) -> R,
    ) -> Result<R, StorageError> {
        let mut regions = self.regions.lock();
        if !regions.contains_key(&coord) {
            self.close_idle(&mut regions, coord);
            let region = RegionFile::open(&self.dir, coord)?;
            log::info!("Opened region {:?}", coord);
            regions.insert(coord, region);
        }
        match regions.get_mut(&coord) {
            Some(region) => Ok(f(region)),
            None => Err(StorageError::Corrupt(format!("region {:?} vanished", coord))),
        }
    }
}

impl ColumnPersistence for PersistenceLayer {
    fn load(&self, coord: ChunkCoord) -> Option<ColumnRecord> {
        match self.with_region(coord.region(), |region| region.load(coord)) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Treating column {} as absent: {}", coord, e);
                None
            }
        }
    }

    fn save(&self, coord: ChunkCoord, record: ColumnRecord) -> Result<(), StorageError> {
        self.with_region(coord.region(), |region| region.store(coord, &record))?
    }

    fn flush(&self) -> Result<(), StorageError> {
        let mut regions = self.regions.lock();
        let mut first_error = None;
        for (rc, region) in regions.iter_mut() {
            if let Err(e) = region.flush() {
                log::error!("Failed to flush region {:?}: {}", rc, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block_id::BlockId;
    use crate::world::column::VoxelColumn;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Resident(parking_lot::Mutex<HashSet<ChunkCoord>>);

    impl Residency for Resident {
        fn is_resident(&self, coord: ChunkCoord) -> bool {
            self.0.lock().contains(&coord)
        }
    }

    fn record_with(coord: ChunkCoord, id: u16) -> ColumnRecord {
        let mut column = VoxelColumn::new(coord, 16);
        column.set_block(0, 0, 0, BlockId(id));
        ColumnRecord::capture(&column, true)
    }

    #[test]
    fn test_save_flush_reload() {
        let dir = tempfile::tempdir().unwrap();
        let coord = ChunkCoord::new(40, -40);
        {
            let layer = PersistenceLayer::new(dir.path(), Arc::new(Resident::default()));
            layer.save(coord, record_with(coord, 3)).unwrap();
            layer.flush().unwrap();
        }
        let layer = PersistenceLayer::new(dir.path(), Arc::new(Resident::default()));
        let loaded = layer.load(coord).unwrap();
        assert_eq!(loaded, record_with(coord, 3));
        assert!(layer.load(coord.offset(1, 0)).is_none());
    }

    #[test]
    fn test_idle_regions_close_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let resident = Arc::new(Resident::default());
        let layer = PersistenceLayer::new(dir.path(), resident.clone());

        let a = ChunkCoord::new(0, 0);
        let b = ChunkCoord::new(100, 100);
        let c = ChunkCoord::new(-100, 3);

        layer.save(a, record_with(a, 1)).unwrap();
        assert_eq!(layer.open_regions(), 1);

        // Nothing is resident, so touching another region closes (and flushes) the first.
        layer.load(b);
        assert_eq!(layer.open_regions(), 1);
        assert!(dir.path().join(a.region().file_name()).exists());

        resident.0.lock().insert(b);
        layer.load(c);
        assert_eq!(layer.open_regions(), 2);

        // Hits never close anything.
        layer.load(b);
        assert_eq!(layer.open_regions(), 2);
    }

    #[test]
    fn test_corrupt_region_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let coord = ChunkCoord::new(5, 5);
        std::fs::write(dir.path().join(coord.region().file_name()), [1u8, 2, 3]).unwrap();

        let layer = PersistenceLayer::new(dir.path(), Arc::new(Resident::default()));
        assert!(layer.load(coord).is_none());
        layer.save(coord, record_with(coord, 2)).unwrap();
        layer.flush().unwrap();
        assert_eq!(layer.load(coord), Some(record_with(coord, 2)));
    }
}
