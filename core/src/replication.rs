//! Replication contract: exactly which campaign fields reach clients.
//!
//! The tick thread builds a ReplicationFrame after every tick and publishes
//! it behind an `Arc`. Readers clone the `Arc` and never hold the lock while
//! reading, so a slow client cannot stall the tick.
//!
//! Hidden from clients: undercover flags, garrison unit ids, disengage
//! timers, transaction logs and player positions. An undercover player is
//! shown as Neutral.

use crate::{
    campaign::{Campaign, CampaignPhase},
    player::PlayerRoster,
    types::{Faction, PlayerId, Tick, ZoneId},
    zone::ContestState,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicatedZone {
    pub zone_id: ZoneId,
    pub owner: Faction,
    pub attacker: Option<Faction>,
    pub capturing: bool,
    pub progress: f64,
    pub garrison_a: u64,
    pub garrison_b: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicatedPlayer {
    pub player_id: PlayerId,
    /// Neutral while the player is undercover.
    pub shown_faction: Faction,
    pub loadout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationFrame {
    pub tick: Tick,
    pub phase: CampaignPhase,
    pub winner: Option<Faction>,
    pub zones: Vec<ReplicatedZone>,
    pub players: BTreeMap<PlayerId, ReplicatedPlayer>,
    pub balances: BTreeMap<Faction, u64>,
}

/// Changes between two frames. Zones are addressed by id; a zone never
/// disappears mid-campaign, players may.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationDelta {
    pub base_tick: Tick,
    pub tick: Tick,
    pub phase: Option<CampaignPhase>,
    pub winner: Option<Option<Faction>>,
    pub zones: Vec<ReplicatedZone>,
    pub players: Vec<ReplicatedPlayer>,
    pub removed_players: Vec<PlayerId>,
    pub balances: BTreeMap<Faction, u64>,
}

impl ReplicationDelta {
    /// True when nothing but the tick number moved.
    pub fn is_empty(&self) -> bool {
        self.phase.is_none()
            && self.winner.is_none()
            && self.zones.is_empty()
            && self.players.is_empty()
            && self.removed_players.is_empty()
            && self.balances.is_empty()
    }
}

impl ReplicationFrame {
    pub fn capture(tick: Tick, campaign: &Campaign, roster: &PlayerRoster) -> Self {
        let zones = campaign
            .zones()
            .iter()
            .map(|zone| ReplicatedZone {
                zone_id: zone.zone_id.clone(),
                owner: zone.owner,
                attacker: zone.contest.attacker(),
                capturing: matches!(zone.contest, ContestState::Capturing { .. }),
                progress: zone.progress,
                garrison_a: zone.garrison_count(Faction::FactionA),
                garrison_b: zone.garrison_count(Faction::FactionB),
            })
            .collect();
        let players = roster
            .iter()
            .map(|p| {
                let shown = ReplicatedPlayer {
                    player_id: p.player_id.clone(),
                    shown_faction: if p.undercover { Faction::Neutral } else { p.faction },
                    loadout: p.loadout.clone(),
                };
                (p.player_id.clone(), shown)
            })
            .collect();
        let balances = campaign.ledger().accounts().map(|a| (a.faction, a.balance)).collect();

        Self {
            tick,
            phase: campaign.phase(),
            winner: campaign.winner(),
            zones,
            players,
            balances,
        }
    }

    pub fn diff(&self, next: &ReplicationFrame) -> ReplicationDelta {
        let zones = next
            .zones
            .iter()
            .filter(|z| self.zone(&z.zone_id) != Some(*z))
            .cloned()
            .collect();
        let players = next
            .players
            .values()
            .filter(|p| self.players.get(&p.player_id) != Some(*p))
            .cloned()
            .collect();
        let removed_players = self
            .players
            .keys()
            .filter(|id| !next.players.contains_key(*id))
            .cloned()
            .collect();
        let balances = next
            .balances
            .iter()
            .filter(|(f, b)| self.balances.get(*f) != Some(*b))
            .map(|(&f, &b)| (f, b))
            .collect();

        ReplicationDelta {
            base_tick: self.tick,
            tick: next.tick,
            phase: (self.phase != next.phase).then_some(next.phase),
            winner: (self.winner != next.winner).then_some(next.winner),
            zones,
            players,
            removed_players,
            balances,
        }
    }

    /// Bring a client copy forward. Deltas built against a different base
    /// tick are refused; the client must request a full frame.
    pub fn apply(&mut self, delta: &ReplicationDelta) -> Result<(), String> {
        if delta.base_tick != self.tick {
            return Err(format!(
                "delta base tick {} does not match frame tick {}",
                delta.base_tick, self.tick
            ));
        }
        self.tick = delta.tick;
        if let Some(phase) = delta.phase {
            self.phase = phase;
        }
        if let Some(winner) = delta.winner {
            self.winner = winner;
        }
        for zone in &delta.zones {
            match self.zones.iter_mut().find(|z| z.zone_id == zone.zone_id) {
                Some(slot) => *slot = zone.clone(),
                None => self.zones.push(zone.clone()),
            }
        }
        for player in &delta.players {
            self.players.insert(player.player_id.clone(), player.clone());
        }
        for id in &delta.removed_players {
            self.players.remove(id);
        }
        self.balances.extend(delta.balances.iter().map(|(&f, &b)| (f, b)));
        Ok(())
    }

    pub fn zone(&self, zone_id: &str) -> Option<&ReplicatedZone> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }
}

/// Latest published frame. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct FramePublisher {
    latest: Arc<RwLock<Option<Arc<ReplicationFrame>>>>,
}

impl FramePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame and return the delta from the previous one.
    pub fn publish(&self, frame: ReplicationFrame) -> Option<ReplicationDelta> {
        let frame = Arc::new(frame);
        let mut slot = match self.latest.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let delta = slot.as_ref().map(|prev| prev.diff(&frame));
        *slot = Some(frame);
        delta
    }

    pub fn latest(&self) -> Option<Arc<ReplicationFrame>> {
        match self.latest.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.latest.write() {
            *slot = None;
        }
    }
}
