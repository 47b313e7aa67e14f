use crate::world::chunk_coord::{ChunkCoord, WorldBounds};
use crate::world::column::VoxelColumn;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

pub type Shared<T> = Arc<RwLock<T>>;

/// Result of a store lookup; the two misses drive different caller behaviour.
pub enum Lookup<T> {
    Found(Shared<T>),
    /// In bounds but not resident yet: the caller may trigger a load.
    NotLoaded,
    /// Outside the world: treat as void.
    OutOfBounds,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<Shared<T>> {
        match self {
            Lookup::Found(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T> Clone for Lookup<T> {
    fn clone(&self) -> Self {
        match self {
            Lookup::Found(entry) => Lookup::Found(entry.clone()),
            Lookup::NotLoaded => Lookup::NotLoaded,
            Lookup::OutOfBounds => Lookup::OutOfBounds,
        }
    }
}

impl<T> std::fmt::Debug for Lookup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Found(_) => write!(f, "Found"),
            Lookup::NotLoaded => write!(f, "NotLoaded"),
            Lookup::OutOfBounds => write!(f, "OutOfBounds"),
        }
    }
}

/// Entries that carry a voxel column (server state, client render state).
pub trait HasColumn {
    fn column(&self) -> &VoxelColumn;
    fn column_mut(&mut self) -> &mut VoxelColumn;
}

impl HasColumn for VoxelColumn {
    fn column(&self) -> &VoxelColumn {
        self
    }

    fn column_mut(&mut self) -> &mut VoxelColumn {
        self
    }
}

/// Answers "is this column currently loaded".
pub trait Residency: Send + Sync {
    fn is_resident(&self, coord: ChunkCoord) -> bool;
}

/// Concurrent coordinate → column map. The map lock is only held for
/// insertion, removal and handle lookup; each entry has its own lock.
pub struct ChunkStore<T> {
    entries: RwLock<HashMap<ChunkCoord, Shared<T>>>,
    bounds: WorldBounds,
}

impl<T> ChunkStore<T> {
    pub fn new(bounds: WorldBounds) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bounds,
        }
    }

    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    pub fn get(&self, coord: ChunkCoord) -> Lookup<T> {
        if !self.bounds.contains(coord) {
            return Lookup::OutOfBounds;
        }
        match self.entries.read().get(&coord) {
            Some(entry) => Lookup::Found(entry.clone()),
            None => Lookup::NotLoaded,
        }
    }

    /// Returns the live entry, building one with `make` if absent. `make`
    /// runs without the map lock; if another thread inserted first, its
    /// entry wins and the fresh value is dropped.
    pub fn get_or_insert_with<F>(&self, coord: ChunkCoord, make: F) -> Lookup<T>
    where
        F: FnOnce() -> T,
    {
        match self.get(coord) {
            Lookup::NotLoaded => {}
            other => return other,
        }
        let fresh = Arc::new(RwLock::new(make()));
        let mut entries = self.entries.write();
        Lookup::Found(entries.entry(coord).or_insert(fresh).clone())
    }

    pub fn insert(&self, coord: ChunkCoord, value: T) -> Lookup<T> {
        self.get_or_insert_with(coord, || value)
    }

    pub fn remove(&self, coord: ChunkCoord) -> Option<Shared<T>> {
        self.entries.write().remove(&coord)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.entries.read().contains_key(&coord)
    }

    pub fn coords(&self) -> Vec<ChunkCoord> {
        self.entries.read().keys().copied().collect()
    }

    pub fn entries(&self) -> Vec<(ChunkCoord, Shared<T>)> {
        self.entries
            .read()
            .iter()
            .map(|(c, e)| (*c, e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn neighbors(&self, coord: ChunkCoord) -> [(ChunkCoord, Lookup<T>); 8] {
        coord.neighbors8().map(|c| (c, self.get(c)))
    }

    pub fn clear(&self) -> Vec<(ChunkCoord, Shared<T>)> {
        self.entries.write().drain().collect()
    }
}

impl<T: HasColumn> ChunkStore<T> {
    /// Write-locks `coord` and its four side columns, in coordinate order,
    /// and hands them to `f`. Returns `None` if `coord` is not resident.
    pub fn with_neighbors_mut<R, F>(&self, coord: ChunkCoord, f: F) -> Option<R>
    where
        F: FnOnce(&mut T, [Option<&mut VoxelColumn>; 4]) -> R,
    {
        let sides = coord.sides4();
        let mut handles: Vec<(ChunkCoord, Shared<T>)> = {
            let entries = self.entries.read();
            let center = entries.get(&coord)?.clone();
            let mut handles = vec![(coord, center)];
            for side in sides {
                if let Some(entry) = entries.get(&side) {
                    handles.push((side, entry.clone()));
                }
            }
            handles
        };
        handles.sort_by_key(|(c, _)| *c);

        let mut guards: Vec<(ChunkCoord, RwLockWriteGuard<'_, T>)> =
            handles.iter().map(|(c, h)| (*c, h.write())).collect();

        let mut center: Option<&mut T> = None;
        let mut side_columns: [Option<&mut VoxelColumn>; 4] = [None, None, None, None];
        for (c, guard) in guards.iter_mut() {
            if *c == coord {
                center = Some(&mut **guard);
            } else if let Some(i) = sides.iter().position(|s| *s == *c) {
                side_columns[i] = Some(guard.column_mut());
            }
        }
        let center = center?;
        Some(f(center, side_columns))
    }
}

impl<T: Send + Sync> Residency for ChunkStore<T> {
    fn is_resident(&self, coord: ChunkCoord) -> bool {
        self.contains(coord)
    }
}
