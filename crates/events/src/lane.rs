//! Delivery lanes.
//!
//! A lane is a routing key attached to every event. The router never
//! schedules by lane; priority is the concern of whatever process hosts a
//! lane's delivery path.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lane {
    /// Synchronous-feeling, lowest SLA.
    Critical,
    /// Default lane.
    Standard,
    /// Eventual, longest SLA.
    Background,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Critical, Lane::Standard, Lane::Background];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Critical => "CRITICAL",
            Lane::Standard => "STANDARD",
            Lane::Background => "BACKGROUND",
        }
    }
}

impl Default for Lane {
    fn default() -> Self {
        Lane::Standard
    }
}

impl core::fmt::Display for Lane {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
