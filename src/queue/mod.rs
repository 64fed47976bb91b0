pub mod events;
pub mod orchestrator;

pub use events::PlaylistEvent;
pub use orchestrator::{PlaylistItem, PlaylistOrchestrator, PlaylistResult};
