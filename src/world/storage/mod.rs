pub mod compress;
pub mod persistence;
pub mod record;
pub mod region;

pub use compress::RunLength;
pub use persistence::{ColumnPersistence, PersistenceLayer};
pub use record::{ColumnRecord, EntityRecord, PersistedUpdate};
pub use region::RegionFile;
