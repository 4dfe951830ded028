//! Zone state machine: ownership, contest and capture progress.
//!
//! `evaluate_tick` is a pure function of (zone, presence sample, dt, rules).
//! It never touches the engine, the clock or the event log, so every
//! transition can be unit-tested in isolation.
//!
//! Observable states:
//!   Neutral                      : no owner, nobody contesting
//!   Owned(F)                     : F owns, nobody contesting
//!   Contested(attacker, progress)
//!
//! INVARIANTS:
//!   - progress is finite and within [0, 1]
//!   - an uncontested zone has progress 0
//!   - ownership changes only when the attacker's progress reaches 1

use crate::{
    config::{CaptureConfig, CaptureCurveConfig, UndercoverPolicy, ZoneConfig},
    types::{Faction, UnitId, ZoneId},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use thiserror::Error;

/// Progress within this distance of 1.0 counts as a completed capture.
/// Absorbs accumulated float error from repeated `rate * dt` steps.
pub const PROGRESS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GarrisonUnit {
    pub unit_id: UnitId,
    pub faction: Faction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContestState {
    Uncontested,
    /// A contest is open but the attacker is not gaining this tick
    /// (stalemate, grace period or decay).
    Contested { attacker: Faction },
    /// The attacker holds the majority and progress is rising.
    Capturing { attacker: Faction },
}

impl ContestState {
    pub fn attacker(&self) -> Option<Faction> {
        match *self {
            Self::Uncontested => None,
            Self::Contested { attacker } | Self::Capturing { attacker } => Some(attacker),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContestOutcome {
    Captured,
    Repelled,
}

/// Read-only classification of a zone, as seen by UI and victory checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoneState {
    Neutral,
    Owned(Faction),
    Contested { attacker: Faction, progress: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub zone_id: ZoneId,
    pub name: String,
    pub value: u64,
    pub owner: Faction,
    pub contest: ContestState,
    pub progress: f64,
    pub garrison: BTreeSet<GarrisonUnit>,
    pub undercover_present: bool,
    /// Seconds the current attacker has been absent or outnumbered.
    pub disengaged_secs: f64,
}

impl Zone {
    pub fn from_config(config: &ZoneConfig) -> Self {
        Self {
            zone_id: config.zone_id.clone(),
            name: config.name.clone(),
            value: config.value,
            owner: config.initial_owner,
            contest: ContestState::Uncontested,
            progress: 0.0,
            garrison: BTreeSet::new(),
            undercover_present: false,
            disengaged_secs: 0.0,
        }
    }

    pub fn state(&self) -> ZoneState {
        match self.contest.attacker() {
            Some(attacker) => ZoneState::Contested { attacker, progress: self.progress },
            None if self.owner == Faction::Neutral => ZoneState::Neutral,
            None => ZoneState::Owned(self.owner),
        }
    }

    pub fn garrison_count(&self, faction: Faction) -> u64 {
        self.garrison.iter().filter(|u| u.faction == faction).count() as u64
    }

    /// Structural checks shared by the state machine and save restore.
    pub fn check_invariants(&self) -> Result<(), ZoneInvariantViolation> {
        let violation = |detail: String| ZoneInvariantViolation {
            zone_id: self.zone_id.clone(),
            detail,
        };
        if !self.progress.is_finite() || !(0.0..=1.0).contains(&self.progress) {
            return Err(violation(format!("progress {} outside [0, 1]", self.progress)));
        }
        if !self.disengaged_secs.is_finite() || self.disengaged_secs < 0.0 {
            return Err(violation(format!("disengaged_secs {} invalid", self.disengaged_secs)));
        }
        match self.contest.attacker() {
            None if self.progress != 0.0 => Err(violation(format!(
                "uncontested zone carries progress {}",
                self.progress
            ))),
            Some(attacker) if !attacker.is_combatant() => {
                Err(violation("neutral faction cannot attack".to_string()))
            }
            Some(attacker) if attacker == self.owner => {
                Err(violation(format!("{attacker} is contesting its own zone")))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("zone '{zone_id}': {detail}")]
pub struct ZoneInvariantViolation {
    pub zone_id: ZoneId,
    pub detail: String,
}

/// Effective per-faction presence in one zone for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSample {
    pub faction_a: u32,
    pub faction_b: u32,
    pub undercover_a: u32,
    pub undercover_b: u32,
}

impl PresenceSample {
    pub fn new(faction_a: u32, faction_b: u32) -> Self {
        Self { faction_a, faction_b, ..Self::default() }
    }

    pub fn of(&self, faction: Faction) -> u32 {
        match faction {
            Faction::FactionA => self.faction_a,
            Faction::FactionB => self.faction_b,
            Faction::Neutral => 0,
        }
    }

    pub fn undercover_of(&self, faction: Faction) -> u32 {
        match faction {
            Faction::FactionA => self.undercover_a,
            Faction::FactionB => self.undercover_b,
            Faction::Neutral => 0,
        }
    }

    /// Strict majority holder; None on a tie (including an empty zone).
    pub fn majority(&self) -> Option<Faction> {
        use std::cmp::Ordering::*;
        match self.faction_a.cmp(&self.faction_b) {
            Greater => Some(Faction::FactionA),
            Less => Some(Faction::FactionB),
            Equal => None,
        }
    }

    /// Net headcount advantage of `faction` over its opponent (0 if behind).
    pub fn advantage(&self, faction: Faction) -> u32 {
        match faction.opponent() {
            Some(opp) => self.of(faction).saturating_sub(self.of(opp)),
            None => 0,
        }
    }
}

/// Capture speed as a function of net presence advantage.
pub trait CaptureCurve: Send + Sync + fmt::Debug {
    /// Progress per second for an attacker `advantage` units ahead.
    fn rate(&self, advantage: u32, base_rate: f64) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct FlatCurve;

impl CaptureCurve for FlatCurve {
    fn rate(&self, advantage: u32, base_rate: f64) -> f64 {
        if advantage > 0 { base_rate } else { 0.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinearCurve;

impl CaptureCurve for LinearCurve {
    fn rate(&self, advantage: u32, base_rate: f64) -> f64 {
        base_rate * advantage as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiminishingCurve {
    pub half_saturation: f64,
    pub max_multiplier: f64,
}

impl CaptureCurve for DiminishingCurve {
    fn rate(&self, advantage: u32, base_rate: f64) -> f64 {
        let n = advantage as f64;
        base_rate * self.max_multiplier * n / (n + self.half_saturation)
    }
}

/// Tunables the state machine reads. Built once per campaign.
#[derive(Debug)]
pub struct CaptureRules {
    pub curve: Box<dyn CaptureCurve>,
    pub capture_rate: f64,
    pub decay_rate: f64,
    pub grace_secs: f64,
    pub undercover: UndercoverPolicy,
}

impl CaptureRules {
    pub fn from_config(config: &CaptureConfig) -> Self {
        let curve: Box<dyn CaptureCurve> = match config.curve {
            CaptureCurveConfig::Flat => Box::new(FlatCurve),
            CaptureCurveConfig::Linear => Box::new(LinearCurve),
            CaptureCurveConfig::DiminishingReturns { half_saturation, max_multiplier } => {
                Box::new(DiminishingCurve { half_saturation, max_multiplier })
            }
        };
        Self {
            curve,
            capture_rate: config.capture_rate,
            decay_rate: config.decay_rate,
            grace_secs: config.grace_secs,
            undercover: config.undercover,
        }
    }

    /// Swap in a host-provided curve.
    pub fn with_curve(mut self, curve: Box<dyn CaptureCurve>) -> Self {
        self.curve = curve;
        self
    }
}

/// What happened to a zone during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneChange {
    ContestStarted { attacker: Faction, owner: Faction },
    OwnershipChanged { from: Faction, to: Faction },
    ContestResolved { attacker: Faction, outcome: ContestOutcome },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneTransition {
    pub zone: Zone,
    pub changes: Vec<ZoneChange>,
}

/// Evaluate one zone for one tick. Pure and deterministic.
pub fn evaluate_tick(
    zone: &Zone,
    sample: &PresenceSample,
    dt: f64,
    rules: &CaptureRules,
) -> Result<ZoneTransition, ZoneInvariantViolation> {
    zone.check_invariants()?;
    if !dt.is_finite() || dt < 0.0 {
        return Err(ZoneInvariantViolation {
            zone_id: zone.zone_id.clone(),
            detail: format!("tick length {dt} is not a non-negative number"),
        });
    }

    let mut next = zone.clone();
    let mut changes = Vec::new();
    next.undercover_present = sample.undercover_a + sample.undercover_b > 0;
    let majority = sample.majority();

    match zone.contest.attacker() {
        None => {
            if let Some(challenger) = majority.filter(|f| *f != zone.owner) {
                next.contest = ContestState::Contested { attacker: challenger };
                next.progress = 0.0;
                next.disengaged_secs = 0.0;
                changes.push(ZoneChange::ContestStarted {
                    attacker: challenger,
                    owner: zone.owner,
                });
                advance(&mut next, challenger, sample, dt, rules, &mut changes);
            }
        }
        Some(attacker) if majority == Some(attacker) => {
            advance(&mut next, attacker, sample, dt, rules, &mut changes);
        }
        Some(attacker) if majority.is_none() && sample.of(attacker) > 0 => {
            // Stalemate: both sides present in equal strength. No tie-break.
            next.contest = ContestState::Contested { attacker };
            next.disengaged_secs = 0.0;
        }
        Some(attacker) => {
            disengage(&mut next, attacker, sample, dt, rules, &mut changes);
        }
    }

    next.check_invariants()?;
    Ok(ZoneTransition { zone: next, changes })
}

fn advance(
    zone: &mut Zone,
    attacker: Faction,
    sample: &PresenceSample,
    dt: f64,
    rules: &CaptureRules,
    changes: &mut Vec<ZoneChange>,
) {
    let gain = rules.curve.rate(sample.advantage(attacker), rules.capture_rate) * dt;
    zone.disengaged_secs = 0.0;
    let progress = zone.progress + gain;

    if progress >= 1.0 - PROGRESS_EPSILON {
        let from = zone.owner;
        zone.owner = attacker;
        zone.contest = ContestState::Uncontested;
        zone.progress = 0.0;
        zone.garrison.retain(|unit| unit.faction == attacker);
        changes.push(ZoneChange::OwnershipChanged { from, to: attacker });
        changes.push(ZoneChange::ContestResolved {
            attacker,
            outcome: ContestOutcome::Captured,
        });
        return;
    }

    // A NaN or negative gain from a custom curve surfaces in the exit check.
    zone.progress = progress;
    zone.contest = if gain > 0.0 {
        ContestState::Capturing { attacker }
    } else {
        ContestState::Contested { attacker }
    };
}

fn disengage(
    zone: &mut Zone,
    attacker: Faction,
    sample: &PresenceSample,
    dt: f64,
    rules: &CaptureRules,
    changes: &mut Vec<ZoneChange>,
) {
    zone.contest = ContestState::Contested { attacker };
    if rules.undercover == UndercoverPolicy::SuppressDecay && sample.undercover_of(attacker) > 0 {
        return;
    }

    let before = zone.disengaged_secs;
    zone.disengaged_secs += dt;
    if zone.disengaged_secs <= rules.grace_secs {
        return;
    }

    // Only the part of this tick that lies beyond the grace interval decays.
    let decaying_secs = zone.disengaged_secs - before.max(rules.grace_secs);
    let progress = (zone.progress - rules.decay_rate * decaying_secs).max(0.0);
    if progress <= PROGRESS_EPSILON {
        zone.progress = 0.0;
        zone.contest = ContestState::Uncontested;
        zone.disengaged_secs = 0.0;
        changes.push(ZoneChange::ContestResolved {
            attacker,
            outcome: ContestOutcome::Repelled,
        });
    } else {
        zone.progress = progress;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_requires_strict_lead() {
        assert_eq!(PresenceSample::new(3, 0).majority(), Some(Faction::FactionA));
        assert_eq!(PresenceSample::new(1, 2).majority(), Some(Faction::FactionB));
        assert_eq!(PresenceSample::new(2, 2).majority(), None);
        assert_eq!(PresenceSample::new(0, 0).majority(), None);
    }

    #[test]
    fn curves_scale_as_documented() {
        assert_eq!(FlatCurve.rate(5, 0.1), 0.1);
        assert_eq!(FlatCurve.rate(0, 0.1), 0.0);
        assert!((LinearCurve.rate(3, 0.1) - 0.3).abs() < 1e-12);
        let d = DiminishingCurve { half_saturation: 2.0, max_multiplier: 2.0 };
        assert!(d.rate(2, 0.1) < d.rate(4, 0.1));
        assert!(d.rate(1000, 0.1) < 0.2);
    }

    #[test]
    fn uncontested_zone_with_progress_is_rejected() {
        let mut zone = Zone::from_config(&ZoneConfig {
            zone_id: "z".into(),
            name: "Z".into(),
            value: 1,
            initial_owner: Faction::Neutral,
        });
        zone.progress = 0.4;
        assert!(zone.check_invariants().is_err());
    }
}
