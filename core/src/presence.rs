//! Presence: the host collaborator that tells the core who stands where.
//!
//! The core does not know how presence is detected (trigger volumes,
//! line of sight, proximity). Once per tick the engine asks the host for
//! every zone's per-faction counts, in zone order.

use crate::{
    rng::{RngBank, RngSlot, SubsystemRng},
    types::{Faction, PlayerId, ZoneId},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

/// Raw per-zone presence as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceCounts {
    pub faction_a: u32,
    pub faction_b: u32,
    pub undercover_a: u32,
    pub undercover_b: u32,
    /// Players physically inside the zone, regardless of cover.
    #[serde(default)]
    pub players: BTreeSet<PlayerId>,
}

impl PresenceCounts {
    pub fn new(faction_a: u32, faction_b: u32) -> Self {
        Self { faction_a, faction_b, ..Self::default() }
    }

    pub fn with_undercover(mut self, faction: Faction, agents: u32) -> Self {
        match faction {
            Faction::FactionA => self.undercover_a = agents,
            Faction::FactionB => self.undercover_b = agents,
            Faction::Neutral => {}
        }
        self
    }

    pub fn with_player(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.players.insert(player_id.into());
        self
    }
}

/// Host presence query. Implementations must answer for unknown zones
/// with empty counts rather than failing.
pub trait PresenceSource: Send {
    fn query_presence(&mut self, zone_id: &str) -> PresenceCounts;
}

/// All presence for one tick, plus rally bonuses granted by capture requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    pub counts: BTreeMap<ZoneId, PresenceCounts>,
    pub rallies: BTreeMap<ZoneId, (u32, u32)>,
}

impl PresenceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone_id: impl Into<ZoneId>, counts: PresenceCounts) {
        self.counts.insert(zone_id.into(), counts);
    }

    pub fn get(&self, zone_id: &str) -> Option<&PresenceCounts> {
        self.counts.get(zone_id)
    }

    pub fn is_player_present(&self, zone_id: &str, player_id: &str) -> bool {
        self.counts
            .get(zone_id)
            .is_some_and(|c| c.players.contains(player_id))
    }

    pub fn add_rally(&mut self, zone_id: &str, faction: Faction, bonus: u32) {
        let entry = self.rallies.entry(zone_id.to_string()).or_default();
        match faction {
            Faction::FactionA => entry.0 += bonus,
            Faction::FactionB => entry.1 += bonus,
            Faction::Neutral => {}
        }
    }

    pub fn rally(&self, zone_id: &str) -> (u32, u32) {
        self.rallies.get(zone_id).copied().unwrap_or_default()
    }
}

/// Fixed presence table. Clones share the same table, so a test or host
/// can keep a handle and change presence between ticks.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPresence {
    table: Arc<Mutex<HashMap<ZoneId, PresenceCounts>>>,
}

impl ScriptedPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, zone_id: impl Into<ZoneId>, counts: PresenceCounts) {
        if let Ok(mut table) = self.table.lock() {
            table.insert(zone_id.into(), counts);
        }
    }

    pub fn clear(&self, zone_id: &str) {
        if let Ok(mut table) = self.table.lock() {
            table.remove(zone_id);
        }
    }

    pub fn clear_all(&self) {
        if let Ok(mut table) = self.table.lock() {
            table.clear();
        }
    }
}

impl PresenceSource for ScriptedPresence {
    fn query_presence(&mut self, zone_id: &str) -> PresenceCounts {
        self.table
            .lock()
            .ok()
            .and_then(|table| table.get(zone_id).cloned())
            .unwrap_or_default()
    }
}

/// Seeded random skirmishes for headless runs and determinism checks.
/// Each faction shows up in a zone with some probability and a random
/// headcount; agents and players are scattered from a separate stream.
pub struct SkirmishPresence {
    presence_rng: SubsystemRng,
    agents_rng: SubsystemRng,
    max_units: u64,
    players: Vec<(PlayerId, Faction)>,
}

impl SkirmishPresence {
    pub fn new(seed: u64, max_units: u32) -> Self {
        let bank = RngBank::new(seed);
        Self {
            presence_rng: bank.for_slot(RngSlot::Presence),
            agents_rng: bank.for_slot(RngSlot::Agents),
            max_units: u64::from(max_units.max(1)),
            players: Vec::new(),
        }
    }

    /// Players that may be placed into zones.
    pub fn with_players(mut self, players: Vec<(PlayerId, Faction)>) -> Self {
        self.players = players;
        self
    }

    fn roll_headcount(&mut self) -> u32 {
        if self.presence_rng.chance(0.55) {
            (1 + self.presence_rng.next_u64_below(self.max_units)) as u32
        } else {
            0
        }
    }
}

impl PresenceSource for SkirmishPresence {
    fn query_presence(&mut self, _zone_id: &str) -> PresenceCounts {
        let mut counts = PresenceCounts::new(self.roll_headcount(), self.roll_headcount());
        if self.agents_rng.chance(0.1) {
            counts.undercover_a = 1;
        }
        if self.agents_rng.chance(0.1) {
            counts.undercover_b = 1;
        }
        for (player_id, _) in &self.players {
            if self.agents_rng.chance(0.2) {
                counts.players.insert(player_id.clone());
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_presence_is_shared_between_clones() {
        let host = ScriptedPresence::new();
        let mut engine_side = host.clone();
        host.set("zone-1", PresenceCounts::new(3, 1));
        assert_eq!(engine_side.query_presence("zone-1"), PresenceCounts::new(3, 1));
        assert_eq!(engine_side.query_presence("zone-9"), PresenceCounts::default());
    }

    #[test]
    fn skirmish_presence_is_seed_stable() {
        let mut a = SkirmishPresence::new(77, 4);
        let mut b = SkirmishPresence::new(77, 4);
        for zone in ["z1", "z2", "z3", "z1"] {
            assert_eq!(a.query_presence(zone), b.query_presence(zone));
        }
    }
}
