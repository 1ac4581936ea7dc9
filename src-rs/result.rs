use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What one relayed model turn produced, for logging and the team transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnSummary {
    pub provider: String,
    pub model: String,
    pub characters: usize,
    pub sources: usize,
    pub grounding_disabled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}
