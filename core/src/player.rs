//! Player persistence records and the roster that owns them.

use crate::{
    error::{SimError, SimResult},
    types::{Faction, PlayerId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub player_id: PlayerId,
    pub faction: Faction,
    pub inventory: Vec<String>,
    /// Item currently equipped, by shop item id.
    pub loadout: Option<String>,
    pub undercover: bool,
    pub last_position: Option<[f64; 3]>,
}

impl PlayerRecord {
    pub fn new(player_id: impl Into<PlayerId>, faction: Faction) -> Self {
        Self {
            player_id: player_id.into(),
            faction,
            inventory: Vec::new(),
            loadout: None,
            undercover: false,
            last_position: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerRoster {
    players: BTreeMap<PlayerId, PlayerRecord>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player. Rejoining with the same faction is a no-op;
    /// switching faction mid-campaign is refused.
    pub fn join(&mut self, player_id: &str, faction: Faction) -> SimResult<&PlayerRecord> {
        if player_id.is_empty() {
            return Err(SimError::Validation("empty player id".to_string()));
        }
        if !faction.is_combatant() {
            return Err(SimError::Validation(format!(
                "player '{player_id}' must join a combatant faction"
            )));
        }
        if let Some(existing) = self.players.get(player_id) {
            if existing.faction != faction {
                return Err(SimError::Validation(format!(
                    "player '{player_id}' already fights for {}",
                    existing.faction
                )));
            }
        }
        Ok(self
            .players
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerRecord::new(player_id, faction)))
    }

    pub fn get(&self, player_id: &str) -> Option<&PlayerRecord> {
        self.players.get(player_id)
    }

    pub(crate) fn get_mut(&mut self, player_id: &str) -> Option<&mut PlayerRecord> {
        self.players.get_mut(player_id)
    }

    /// Last known position as reported by the host.
    pub fn set_position(&mut self, player_id: &str, position: [f64; 3]) -> SimResult<()> {
        if position.iter().any(|c| !c.is_finite()) {
            return Err(SimError::Validation(format!("non-finite position for '{player_id}'")));
        }
        let record = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| SimError::Validation(format!("unknown player '{player_id}'")))?;
        record.last_position = Some(position);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values()
    }

    /// Records in player-id order, for persistence.
    pub fn records(&self) -> Vec<PlayerRecord> {
        self.players.values().cloned().collect()
    }

    pub fn from_records(records: Vec<PlayerRecord>) -> SimResult<Self> {
        let mut players = BTreeMap::new();
        for record in records {
            if record.player_id.is_empty() || !record.faction.is_combatant() {
                return Err(SimError::Validation(format!(
                    "invalid player record '{}'",
                    record.player_id
                )));
            }
            if let Some(pos) = record.last_position {
                if pos.iter().any(|c| !c.is_finite()) {
                    return Err(SimError::Validation(format!(
                        "player '{}' has a non-finite position",
                        record.player_id
                    )));
                }
            }
            let id = record.player_id.clone();
            if players.insert(id.clone(), record).is_some() {
                return Err(SimError::Validation(format!("duplicate player record '{id}'")));
            }
        }
        Ok(Self { players })
    }
}
