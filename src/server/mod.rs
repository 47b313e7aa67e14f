pub mod column;
pub mod controller;
pub mod events;
pub mod scheduler;
pub mod state;

pub use column::ServerColumn;
pub use controller::{ServerTerrainController, TerrainEditor};
pub use events::{EntityHost, NoEntities, NoEvents, PlayerId, TerrainEventSink, UpdateHandler};
pub use scheduler::{DelayedUpdate, UpdateQueue};
pub use state::{next_state, ColumnState, TransitionContext};
