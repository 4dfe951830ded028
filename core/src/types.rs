//! Shared primitive types used across the entire campaign core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A simulation tick. The host decides how much wall time one tick covers
/// and passes it as `dt` seconds.
pub type Tick = u64;

/// Stable zone identifier. Geometry lives in the host; the core only knows ids.
pub type ZoneId = String;

/// Stable player identifier supplied by the host.
pub type PlayerId = String;

/// Host-side unit reference (garrison members).
pub type UnitId = String;

/// The canonical campaign identifier.
pub type CampaignId = String;

/// Faction allegiance. Only the two combatant factions hold accounts
/// and may contest zones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Neutral,
    FactionA,
    FactionB,
}

impl Faction {
    pub const COMBATANTS: [Faction; 2] = [Faction::FactionA, Faction::FactionB];

    /// The opposing combatant. Neutral has no opponent.
    pub fn opponent(self) -> Option<Faction> {
        match self {
            Self::FactionA => Some(Self::FactionB),
            Self::FactionB => Some(Self::FactionA),
            Self::Neutral => None,
        }
    }

    pub fn is_combatant(self) -> bool {
        !matches!(self, Self::Neutral)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::FactionA => "faction_a",
            Self::FactionB => "faction_b",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
