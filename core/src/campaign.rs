//! Campaign manager: owns the zones, the ledger and the capture engine.
//!
//! TICK ORDER (fixed, never reordered):
//!   1. Capture tick       (every tick)
//!   2. Economy tick       (every `economy.tick_interval` ticks: income, then upkeep)
//!   3. Victory evaluation (every tick)
//!
//! Phase lifecycle: Setup → Active → Ended. Only this module writes the
//! phase and the winner; everybody else reads a CampaignSnapshot.

use crate::{
    capture::CaptureEngine,
    config::{CampaignConfig, VictoryConfig},
    economy::{Account, EconomyLedger},
    error::{SimError, SimResult},
    event::CampaignEvent,
    presence::PresenceSnapshot,
    snapshot::CampaignSnapshot,
    types::{CampaignId, Faction, Tick},
    zone::Zone,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Setup,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VictoryCause {
    ZoneControl,
    EconomicCollapse,
}

#[derive(Debug)]
pub struct Campaign {
    campaign_id: CampaignId,
    phase: CampaignPhase,
    winner: Option<Faction>,
    ended_at: Option<Tick>,
    zones: Vec<Zone>,
    ledger: EconomyLedger,
    capture: CaptureEngine,
    victory: VictoryConfig,
    economy_interval: Tick,
    zero_streaks: BTreeMap<Faction, u32>,
    economy_ticks: u64,
}

impl Campaign {
    /// Fresh campaign in the Setup phase, zones and accounts built from config.
    pub fn new(config: &CampaignConfig) -> Self {
        Self {
            campaign_id: uuid::Uuid::new_v4().to_string(),
            phase: CampaignPhase::Setup,
            winner: None,
            ended_at: None,
            zones: config.zones.iter().map(Zone::from_config).collect(),
            ledger: EconomyLedger::new(&config.economy),
            capture: CaptureEngine::new(&config.capture),
            victory: config.victory.clone(),
            economy_interval: config.economy.tick_interval,
            zero_streaks: Faction::COMBATANTS.iter().map(|&f| (f, 0)).collect(),
            economy_ticks: 0,
        }
    }

    /// Replace the capture engine, e.g. to install a custom capture curve.
    pub fn with_capture_engine(mut self, capture: CaptureEngine) -> Self {
        self.capture = capture;
        self
    }

    pub fn start(&mut self, tick: Tick) -> SimResult<CampaignEvent> {
        if self.phase != CampaignPhase::Setup {
            return Err(SimError::Validation(format!(
                "campaign cannot start from phase {:?}",
                self.phase
            )));
        }
        self.phase = CampaignPhase::Active;
        log::info!("campaign {} started with {} zones", self.campaign_id, self.zones.len());
        Ok(CampaignEvent::CampaignStarted {
            tick,
            campaign_id: self.campaign_id.clone(),
            zone_count: self.zones.len(),
        })
    }

    /// One campaign tick. A no-op outside the Active phase.
    pub fn tick(
        &mut self,
        tick: Tick,
        dt: f64,
        presence: &PresenceSnapshot,
    ) -> SimResult<Vec<CampaignEvent>> {
        if self.phase != CampaignPhase::Active {
            return Ok(Vec::new());
        }

        let report = self.capture.tick(tick, &mut self.zones, presence, dt);
        let mut events = report.events;

        if tick % self.economy_interval == 0 {
            events.extend(self.run_economy(tick)?);
        }

        if let Some(ended) = self.evaluate_victory(tick) {
            events.push(ended);
        }

        log::debug!(
            "tick={tick} campaign: a={} b={} balances=({}, {})",
            self.owned_count(Faction::FactionA),
            self.owned_count(Faction::FactionB),
            self.ledger.balance(Faction::FactionA),
            self.ledger.balance(Faction::FactionB),
        );
        Ok(events)
    }

    fn run_economy(&mut self, tick: Tick) -> SimResult<Vec<CampaignEvent>> {
        self.economy_ticks += 1;
        let mut events = self.ledger.apply_income(tick, &self.zones)?;
        events.extend(self.ledger.apply_upkeep(tick, &self.zones)?);
        Ok(events)
    }

    /// Zones a faction needs to own to win: ceil(fraction × zone count).
    pub fn required_zone_count(&self) -> usize {
        let exact = self.victory.zone_fraction * self.zones.len() as f64;
        ((exact - 1e-9).ceil().max(1.0)) as usize
    }

    pub fn owned_count(&self, faction: Faction) -> usize {
        self.zones.iter().filter(|z| z.owner == faction).count()
    }

    fn evaluate_victory(&mut self, tick: Tick) -> Option<CampaignEvent> {
        for faction in Faction::COMBATANTS {
            let streak = self.zero_streaks.entry(faction).or_insert(0);
            *streak = if self.ledger.balance(faction) == 0 { streak.saturating_add(1) } else { 0 };
        }

        let required = self.required_zone_count();
        let dominant: Vec<Faction> = Faction::COMBATANTS
            .into_iter()
            .filter(|&f| self.owned_count(f) >= required)
            .collect();
        if let [winner] = dominant[..] {
            return Some(self.end(tick, Some(winner), VictoryCause::ZoneControl));
        }

        if self.victory.bankruptcy_ticks == 0 {
            return None;
        }
        let collapsed: Vec<Faction> = Faction::COMBATANTS
            .into_iter()
            .filter(|f| self.zero_streaks.get(f).copied().unwrap_or(0) >= self.victory.bankruptcy_ticks)
            .collect();
        match collapsed[..] {
            [] => None,
            [loser] => Some(self.end(tick, loser.opponent(), VictoryCause::EconomicCollapse)),
            _ => Some(self.end(tick, None, VictoryCause::EconomicCollapse)),
        }
    }

    fn end(&mut self, tick: Tick, winner: Option<Faction>, cause: VictoryCause) -> CampaignEvent {
        self.phase = CampaignPhase::Ended;
        self.winner = winner;
        self.ended_at = Some(tick);
        match winner {
            Some(w) => log::info!("tick={tick} campaign {} won by {w} ({cause:?})", self.campaign_id),
            None => log::info!("tick={tick} campaign {} ended in a draw ({cause:?})", self.campaign_id),
        }
        CampaignEvent::CampaignEnded { tick, winner, cause }
    }

    pub fn snapshot(&self) -> CampaignSnapshot {
        CampaignSnapshot {
            campaign_id: self.campaign_id.clone(),
            phase: self.phase,
            winner: self.winner,
            victory: self.victory.clone(),
            zone_order: self.zones.iter().map(|z| z.zone_id.clone()).collect(),
            zero_balance_streaks: self.zero_streaks.clone(),
            economy_ticks: self.economy_ticks,
            ended_at: self.ended_at,
        }
    }

    /// Rebuild a campaign from saved parts. Everything is validated before
    /// anything is built; a partially valid document yields an error.
    pub fn restore(
        config: &CampaignConfig,
        snapshot: CampaignSnapshot,
        zones: Vec<Zone>,
        accounts: Vec<Account>,
    ) -> SimResult<Self> {
        let expected: Vec<&str> = config.zones.iter().map(|z| z.zone_id.as_str()).collect();
        let saved: Vec<&str> = zones.iter().map(|z| z.zone_id.as_str()).collect();
        if expected != saved {
            return Err(SimError::Validation(format!(
                "saved zones {saved:?} do not match configured zones {expected:?}"
            )));
        }
        if snapshot.zone_order.iter().map(String::as_str).ne(saved.iter().copied()) {
            return Err(SimError::Validation(
                "campaign zone order disagrees with zone block".to_string(),
            ));
        }
        for zone in &zones {
            zone.check_invariants()
                .map_err(|v| SimError::Validation(v.to_string()))?;
            if zone.garrison.iter().any(|u| !u.faction.is_combatant()) {
                return Err(SimError::Validation(format!(
                    "zone '{}' garrisons a neutral unit",
                    zone.zone_id
                )));
            }
        }

        match (snapshot.phase, snapshot.winner, snapshot.ended_at) {
            (CampaignPhase::Ended, winner, Some(_)) if winner.map_or(true, Faction::is_combatant) => {}
            (CampaignPhase::Setup | CampaignPhase::Active, None, None) => {}
            (phase, winner, ended_at) => {
                return Err(SimError::Validation(format!(
                    "inconsistent campaign state: phase {phase:?}, winner {winner:?}, ended_at {ended_at:?}"
                )));
            }
        }
        snapshot.victory.validate()?;
        if snapshot.zero_balance_streaks.keys().any(|f| !f.is_combatant()) {
            return Err(SimError::Validation("zero-balance streak for neutral faction".to_string()));
        }

        let ledger = EconomyLedger::from_accounts(&config.economy, accounts)?;

        Ok(Self {
            campaign_id: snapshot.campaign_id,
            phase: snapshot.phase,
            winner: snapshot.winner,
            ended_at: snapshot.ended_at,
            zones,
            ledger,
            capture: CaptureEngine::new(&config.capture),
            victory: snapshot.victory,
            economy_interval: config.economy.tick_interval,
            zero_streaks: snapshot.zero_balance_streaks,
            economy_ticks: snapshot.economy_ticks,
        })
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn phase(&self) -> CampaignPhase {
        self.phase
    }

    pub fn winner(&self) -> Option<Faction> {
        self.winner
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }

    pub(crate) fn zone_mut(&mut self, zone_id: &str) -> Option<&mut Zone> {
        self.zones.iter_mut().find(|z| z.zone_id == zone_id)
    }

    pub fn ledger(&self) -> &EconomyLedger {
        &self.ledger
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut EconomyLedger {
        &mut self.ledger
    }

    pub fn economy_interval(&self) -> Tick {
        self.economy_interval
    }
}

