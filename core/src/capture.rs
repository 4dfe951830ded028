//! Capture engine: turns host presence into zone transitions each tick.
//!
//! Zones are evaluated independently. Above `parallel_threshold` zones the
//! evaluations run on the rayon pool; results are merged back in zone order,
//! so parallel and sequential runs produce identical state and events.
//!
//! A zone whose evaluation violates an invariant keeps its prior state.
//! The violation is logged and reported; the other zones still update.

use crate::{
    config::{CaptureConfig, UndercoverPolicy},
    event::CampaignEvent,
    presence::PresenceSnapshot,
    types::Tick,
    zone::{evaluate_tick, CaptureRules, PresenceSample, Zone, ZoneChange, ZoneInvariantViolation},
};
use rayon::prelude::*;

#[derive(Debug, Default)]
pub struct CaptureReport {
    pub events: Vec<CampaignEvent>,
    pub violations: Vec<ZoneInvariantViolation>,
}

#[derive(Debug)]
pub struct CaptureEngine {
    rules: CaptureRules,
    parallel_threshold: usize,
}

impl CaptureEngine {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            rules: CaptureRules::from_config(config),
            parallel_threshold: config.parallel_threshold,
        }
    }

    pub fn with_rules(rules: CaptureRules, parallel_threshold: usize) -> Self {
        Self { rules, parallel_threshold }
    }

    pub fn rules(&self) -> &CaptureRules {
        &self.rules
    }

    /// Effective sample for one zone: host counts plus rally bonuses, with
    /// undercover agents folded in when the policy says they contribute.
    pub fn aggregate(&self, zone_id: &str, presence: &PresenceSnapshot) -> PresenceSample {
        let counts = presence.get(zone_id).cloned().unwrap_or_default();
        let (rally_a, rally_b) = presence.rally(zone_id);
        let mut sample = PresenceSample {
            faction_a: counts.faction_a.saturating_add(rally_a),
            faction_b: counts.faction_b.saturating_add(rally_b),
            undercover_a: counts.undercover_a,
            undercover_b: counts.undercover_b,
        };
        if self.rules.undercover == UndercoverPolicy::Contribute {
            sample.faction_a = sample.faction_a.saturating_add(counts.undercover_a);
            sample.faction_b = sample.faction_b.saturating_add(counts.undercover_b);
        }
        sample
    }

    /// Advance every zone by `dt` seconds.
    pub fn tick(
        &self,
        tick: Tick,
        zones: &mut [Zone],
        presence: &PresenceSnapshot,
        dt: f64,
    ) -> CaptureReport {
        let samples: Vec<PresenceSample> = zones
            .iter()
            .map(|zone| self.aggregate(&zone.zone_id, presence))
            .collect();

        let results: Vec<_> = if zones.len() >= self.parallel_threshold {
            zones
                .par_iter()
                .zip(samples.par_iter())
                .map(|(zone, sample)| evaluate_tick(zone, sample, dt, &self.rules))
                .collect()
        } else {
            zones
                .iter()
                .zip(samples.iter())
                .map(|(zone, sample)| evaluate_tick(zone, sample, dt, &self.rules))
                .collect()
        };

        let mut report = CaptureReport::default();
        for (zone, result) in zones.iter_mut().zip(results) {
            match result {
                Ok(transition) => {
                    for change in &transition.changes {
                        report.events.push(change_event(tick, &zone.zone_id, change));
                    }
                    *zone = transition.zone;
                }
                Err(violation) => {
                    log::error!("tick={tick} capture aborted for {violation}");
                    report.events.push(CampaignEvent::ZoneUpdateAborted {
                        tick,
                        zone_id: violation.zone_id.clone(),
                        detail: violation.detail.clone(),
                    });
                    report.violations.push(violation);
                }
            }
        }
        report
    }
}

fn change_event(tick: Tick, zone_id: &str, change: &ZoneChange) -> CampaignEvent {
    let zone_id = zone_id.to_string();
    match *change {
        ZoneChange::ContestStarted { attacker, owner } => {
            log::debug!("tick={tick} {zone_id}: contest opened by {attacker} against {owner}");
            CampaignEvent::ZoneContestStarted { tick, zone_id, attacker, owner }
        }
        ZoneChange::OwnershipChanged { from, to } => {
            log::info!("tick={tick} {zone_id}: ownership {from} -> {to}");
            CampaignEvent::ZoneOwnershipChanged { tick, zone_id, from, to }
        }
        ZoneChange::ContestResolved { attacker, outcome } => {
            CampaignEvent::ZoneContestResolved { tick, zone_id, attacker, outcome }
        }
    }
}
