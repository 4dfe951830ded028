//! Immutable campaign views.
//!
//! The campaign manager is the single writer of phase and winner. Every
//! other reader (persistence, replication, tooling) works from a
//! CampaignSnapshot taken synchronously at request time, so the live
//! campaign can keep mutating while the copy is serialized elsewhere.

use crate::{
    campaign::CampaignPhase,
    config::VictoryConfig,
    types::{CampaignId, Faction, Tick, ZoneId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignSnapshot {
    pub campaign_id: CampaignId,
    pub phase: CampaignPhase,
    pub winner: Option<Faction>,
    pub victory: VictoryConfig,
    /// Zone ids in campaign (insertion) order.
    pub zone_order: Vec<ZoneId>,
    /// Consecutive ticks each faction has spent at zero balance.
    pub zero_balance_streaks: BTreeMap<Faction, u32>,
    pub economy_ticks: u64,
    /// Tick at which the campaign ended, if it has.
    #[serde(default)]
    pub ended_at: Option<Tick>,
}

impl CampaignSnapshot {
    pub fn is_over(&self) -> bool {
        self.phase == CampaignPhase::Ended
    }
}
