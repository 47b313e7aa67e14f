pub mod controller;
pub mod mesh;
pub mod pipeline;
pub mod render_column;
pub mod visibility;

pub use controller::{ChunkRequester, ClientStore, ClientTerrainController, SectionListener};
pub use mesh::{BlockMesher, CubeMesher, Lod, MeshSink, MeshStore, SectionMesh};
pub use pipeline::ClientMeshPipeline;
pub use render_column::{RenderColumn, SectionState};
pub use visibility::compute_visibility;
