//! The event bus: everything the core tells the outside world.
//!
//! RULE: Presentation and notification code never reads simulation
//! internals. It subscribes to the bus and reacts to typed events.

use crate::{
    campaign::VictoryCause,
    economy::TransactionReason,
    types::{CampaignId, Faction, PlayerId, Tick, ZoneId},
    zone::ContestOutcome,
};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Every event emitted by the campaign core.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEvent {
    // ── Engine events ──────────────────────────────
    TickStarted {
        tick: Tick,
    },
    TickCompleted {
        tick: Tick,
    },
    CampaignStarted {
        tick: Tick,
        campaign_id: CampaignId,
        zone_count: usize,
    },

    // ── Capture events ─────────────────────────────
    ZoneContestStarted {
        tick: Tick,
        zone_id: ZoneId,
        attacker: Faction,
        owner: Faction,
    },
    ZoneOwnershipChanged {
        tick: Tick,
        zone_id: ZoneId,
        from: Faction,
        to: Faction,
    },
    ZoneContestResolved {
        tick: Tick,
        zone_id: ZoneId,
        attacker: Faction,
        outcome: ContestOutcome,
    },
    ZoneUpdateAborted {
        tick: Tick,
        zone_id: ZoneId,
        detail: String,
    },

    // ── Economy events ─────────────────────────────
    EconomyTransaction {
        tick: Tick,
        faction: Faction,
        delta: i64,
        reason: TransactionReason,
        balance_after: u64,
    },
    FactionDegraded {
        tick: Tick,
        faction: Faction,
        shortfall: u64,
    },

    // ── Campaign events ────────────────────────────
    CampaignEnded {
        tick: Tick,
        winner: Option<Faction>,
        cause: VictoryCause,
    },
    CampaignRestored {
        tick: Tick,
        slot: Option<String>,
    },

    // ── Player command events ──────────────────────
    CommandApplied {
        tick: Tick,
        seq: u64,
        player_id: PlayerId,
        command_type: String,
    },
    CommandFailed {
        tick: Tick,
        seq: u64,
        player_id: PlayerId,
        command_type: String,
        reason: String,
    },
    PlayerUndercoverChanged {
        tick: Tick,
        player_id: PlayerId,
        undercover: bool,
    },

    // ── Persistence events ─────────────────────────
    SaveCompleted {
        slot: String,
        tick: Tick,
        bytes: u64,
    },
    SaveFailed {
        slot: String,
        tick: Tick,
        reason: String,
    },
}

impl CampaignEvent {
    /// Stable string name, used for the event_type journal column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TickStarted { .. }             => "tick_started",
            Self::TickCompleted { .. }           => "tick_completed",
            Self::CampaignStarted { .. }         => "campaign_started",
            Self::ZoneContestStarted { .. }      => "zone_contest_started",
            Self::ZoneOwnershipChanged { .. }    => "zone_ownership_changed",
            Self::ZoneContestResolved { .. }     => "zone_contest_resolved",
            Self::ZoneUpdateAborted { .. }       => "zone_update_aborted",
            Self::EconomyTransaction { .. }      => "economy_transaction",
            Self::FactionDegraded { .. }         => "faction_degraded",
            Self::CampaignEnded { .. }           => "campaign_ended",
            Self::CampaignRestored { .. }        => "campaign_restored",
            Self::CommandApplied { .. }          => "command_applied",
            Self::CommandFailed { .. }           => "command_failed",
            Self::PlayerUndercoverChanged { .. } => "player_undercover_changed",
            Self::SaveCompleted { .. }           => "save_completed",
            Self::SaveFailed { .. }              => "save_failed",
        }
    }

    /// Component that produced the event, used for the source journal column.
    pub fn source(&self) -> &'static str {
        match self {
            Self::TickStarted { .. }
            | Self::TickCompleted { .. }
            | Self::CampaignRestored { .. } => "engine",
            Self::ZoneContestStarted { .. }
            | Self::ZoneOwnershipChanged { .. }
            | Self::ZoneContestResolved { .. }
            | Self::ZoneUpdateAborted { .. } => "capture",
            Self::EconomyTransaction { .. } | Self::FactionDegraded { .. } => "economy",
            Self::CampaignStarted { .. } | Self::CampaignEnded { .. } => "campaign",
            Self::CommandApplied { .. }
            | Self::CommandFailed { .. }
            | Self::PlayerUndercoverChanged { .. } => "commands",
            Self::SaveCompleted { .. } | Self::SaveFailed { .. } => "persistence",
        }
    }

    /// Events after which an autosave is worth taking.
    pub fn is_significant(&self) -> bool {
        matches!(
            self,
            Self::ZoneOwnershipChanged { .. } | Self::CampaignEnded { .. }
        )
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub campaign_id: CampaignId,
    pub tick: Tick,
    pub source: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized CampaignEvent
}

/// Fan-out of tick events to any number of presentation subscribers.
/// Subscribers that hang up are dropped on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Sender<CampaignEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<CampaignEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, events: &[CampaignEvent]) {
        if events.is_empty() {
            return;
        }
        self.subscribers.retain(|tx| {
            events.iter().all(|event| tx.send(event.clone()).is_ok())
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
