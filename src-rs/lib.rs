pub mod config;
pub mod helpers;
pub mod result;

#[path = "llm/lib.rs"]
pub mod llm;
#[path = "team/lib.rs"]
pub mod team;
#[path = "api/lib.rs"]
pub mod api;

pub use config::RelayConfig;
pub use llm::StreamingRelay;
pub use result::TurnSummary;
