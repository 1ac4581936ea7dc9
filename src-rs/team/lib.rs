pub mod markers;
pub mod orchestrator;
pub mod types;

pub use markers::{demux, Demuxer, MarkerEvent, Segment};
pub use orchestrator::{TeamOrchestrator, TeamOutcome, TeamState, TurnRunner};
pub use types::{TeamConfig, TeamMember};
