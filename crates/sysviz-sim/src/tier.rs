//! Architecture tiers shared by the notification pipeline, flow animator and
//! load tester.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Maturity level of a simulated architecture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Single server, no cache, synchronous fan-out.
    #[default]
    Basic,
    /// Worker pool, cache, retries.
    Advanced,
    /// Partitioned log, heavy caching, idempotent delivery.
    Legendary,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Basic, Tier::Advanced, Tier::Legendary];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Advanced => "advanced",
            Tier::Legendary => "legendary",
        }
    }

    /// 1-based tier number.
    pub fn number(self) -> u8 {
        match self {
            Tier::Basic => 1,
            Tier::Advanced => 2,
            Tier::Legendary => 3,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = SimError;

    /// Accepts the tier name or its number (`"legendary"`, `"3"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" | "1" => Ok(Tier::Basic),
            "advanced" | "2" => Ok(Tier::Advanced),
            "legendary" | "3" => Ok(Tier::Legendary),
            _ => Err(SimError::unknown("tier", s, "basic, advanced, legendary")),
        }
    }
}
