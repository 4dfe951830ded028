//! Player command intake.
//!
//! Commands arrive from UI/network collaborators at any time. They are
//! validated immediately (accept/reject answered synchronously), queued,
//! and applied once per tick, before the capture tick, in arrival order.
//! Each command is validated again at apply time because the world may
//! have moved on since intake.

use crate::{
    campaign::{Campaign, CampaignPhase},
    config::CampaignConfig,
    economy::TransactionReason,
    error::{CommandRejection, SimError},
    event::CampaignEvent,
    player::PlayerRoster,
    presence::PresenceSnapshot,
    types::{PlayerId, Tick, UnitId, ZoneId},
    zone::GarrisonUnit,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// All player-issued commands.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PlayerCommand {
    RequestCapture { zone_id: ZoneId },
    Undercover { enabled: bool },
    ShopPurchase { item_id: String },
    GarrisonOrder { zone_id: ZoneId, units: Vec<UnitId> },
}

impl PlayerCommand {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RequestCapture { .. } => "request_capture",
            Self::Undercover { .. }     => "undercover",
            Self::ShopPurchase { .. }   => "shop_purchase",
            Self::GarrisonOrder { .. }  => "garrison_order",
        }
    }
}

/// A queued player command with its arrival sequence and submission tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedCommand {
    pub seq:        u64,
    pub command_id: String,
    pub player_id:  PlayerId,
    pub queued_at:  Tick,
    pub command:    PlayerCommand,
}

/// Receipt handed back to the submitter on acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTicket {
    pub seq: u64,
    pub command_id: String,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    next_seq: u64,
    pending: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, player_id: &str, command: PlayerCommand, tick: Tick) -> CommandTicket {
        self.next_seq += 1;
        let ticket = CommandTicket {
            seq: self.next_seq,
            command_id: uuid::Uuid::new_v4().to_string(),
        };
        self.pending.push_back(QueuedCommand {
            seq: ticket.seq,
            command_id: ticket.command_id.clone(),
            player_id: player_id.to_string(),
            queued_at: tick,
            command,
        });
        ticket
    }

    /// Everything queued so far, in arrival order.
    pub fn drain(&mut self) -> Vec<QueuedCommand> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Read-only view a command is validated against.
pub struct CommandContext<'a> {
    pub campaign: &'a Campaign,
    pub roster: &'a PlayerRoster,
    pub config: &'a CampaignConfig,
    pub presence: &'a PresenceSnapshot,
}

pub fn validate(
    ctx: &CommandContext<'_>,
    player_id: &str,
    command: &PlayerCommand,
) -> Result<(), CommandRejection> {
    let player = ctx
        .roster
        .get(player_id)
        .ok_or_else(|| CommandRejection::InvalidState(format!("unknown player '{player_id}'")))?;
    if ctx.campaign.phase() != CampaignPhase::Active {
        return Err(CommandRejection::InvalidState(format!(
            "campaign is {:?}",
            ctx.campaign.phase()
        )));
    }

    match command {
        PlayerCommand::RequestCapture { zone_id } => {
            let zone = ctx
                .campaign
                .zone(zone_id)
                .ok_or_else(|| CommandRejection::Validation(format!("unknown zone '{zone_id}'")))?;
            if player.undercover {
                return Err(CommandRejection::InvalidState(
                    "undercover agents cannot lead a capture".to_string(),
                ));
            }
            if zone.owner == player.faction && zone.contest.attacker().is_none() {
                return Err(CommandRejection::InvalidState(format!(
                    "zone '{zone_id}' is already held by {}",
                    player.faction
                )));
            }
            if !ctx.presence.is_player_present(zone_id, player_id) {
                return Err(CommandRejection::NotPresentAtZone(zone_id.clone()));
            }
        }
        PlayerCommand::Undercover { enabled } => {
            if player.undercover == *enabled {
                return Err(CommandRejection::InvalidState(format!(
                    "player '{player_id}' undercover is already {enabled}"
                )));
            }
        }
        PlayerCommand::ShopPurchase { item_id } => {
            let item = ctx
                .config
                .shop_item(item_id)
                .ok_or_else(|| CommandRejection::Validation(format!("unknown item '{item_id}'")))?;
            let available = ctx.campaign.ledger().balance(player.faction);
            if item.price > available {
                return Err(CommandRejection::InsufficientFunds {
                    needed: item.price,
                    available,
                });
            }
        }
        PlayerCommand::GarrisonOrder { zone_id, units } => {
            if units.is_empty() {
                return Err(CommandRejection::Validation("garrison order without units".to_string()));
            }
            let mut seen = BTreeSet::new();
            if units.iter().any(|u| u.is_empty() || !seen.insert(u.as_str())) {
                return Err(CommandRejection::Validation(
                    "garrison units must be unique, non-empty ids".to_string(),
                ));
            }
            let zone = ctx
                .campaign
                .zone(zone_id)
                .ok_or_else(|| CommandRejection::Validation(format!("unknown zone '{zone_id}'")))?;
            if zone.owner != player.faction {
                return Err(CommandRejection::InvalidState(format!(
                    "zone '{zone_id}' is not held by {}",
                    player.faction
                )));
            }
            let stationed = ctx
                .campaign
                .zones()
                .iter()
                .flat_map(|z| z.garrison.iter())
                .find(|g| seen.contains(g.unit_id.as_str()));
            if let Some(unit) = stationed {
                return Err(CommandRejection::Validation(format!(
                    "unit '{}' is already garrisoned",
                    unit.unit_id
                )));
            }
        }
    }
    Ok(())
}

/// Apply one queued command. Re-validates first; nothing changes on rejection.
pub fn apply(
    tick: Tick,
    queued: &QueuedCommand,
    campaign: &mut Campaign,
    roster: &mut PlayerRoster,
    config: &CampaignConfig,
    presence: &mut PresenceSnapshot,
) -> Result<Vec<CampaignEvent>, CommandRejection> {
    let ctx = CommandContext {
        campaign: &*campaign,
        roster: &*roster,
        config,
        presence: &*presence,
    };
    validate(&ctx, &queued.player_id, &queued.command)?;

    let player_id = queued.player_id.as_str();
    let faction = roster
        .get(player_id)
        .map(|p| p.faction)
        .ok_or_else(|| CommandRejection::InvalidState(format!("unknown player '{player_id}'")))?;

    let mut events = Vec::new();
    match &queued.command {
        PlayerCommand::RequestCapture { zone_id } => {
            presence.add_rally(zone_id, faction, config.rally_bonus);
        }
        PlayerCommand::Undercover { enabled } => {
            if let Some(player) = roster.get_mut(player_id) {
                player.undercover = *enabled;
            }
            events.push(CampaignEvent::PlayerUndercoverChanged {
                tick,
                player_id: player_id.to_string(),
                undercover: *enabled,
            });
        }
        PlayerCommand::ShopPurchase { item_id } => {
            let price = config
                .shop_item(item_id)
                .map(|item| item.price)
                .ok_or_else(|| CommandRejection::Validation(format!("unknown item '{item_id}'")))?;
            let reason = TransactionReason::ShopPurchase { item_id: item_id.clone() };
            let event = campaign
                .ledger_mut()
                .debit(tick, faction, price, reason)
                .map_err(|e| match e {
                    SimError::InsufficientFunds { requested, available, .. } => {
                        CommandRejection::InsufficientFunds { needed: requested, available }
                    }
                    other => CommandRejection::InvalidState(other.to_string()),
                })?;
            events.push(event);
            if let Some(player) = roster.get_mut(player_id) {
                player.inventory.push(item_id.clone());
                player.loadout = Some(item_id.clone());
            }
        }
        PlayerCommand::GarrisonOrder { zone_id, units } => {
            let zone = campaign
                .zone_mut(zone_id)
                .ok_or_else(|| CommandRejection::Validation(format!("unknown zone '{zone_id}'")))?;
            for unit_id in units {
                zone.garrison.insert(GarrisonUnit { unit_id: unit_id.clone(), faction });
            }
        }
    }
    Ok(events)
}
