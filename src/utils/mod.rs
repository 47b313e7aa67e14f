pub mod error;
pub mod math;

pub use error::{ProtocolError, StorageError, TerrainError};
pub use math::{Plane, ViewFrustum, AABB};
