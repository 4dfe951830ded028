//! Zone state machine tests: pure evaluate_tick, no engine.

use rebellion_core::{
    config::{CampaignConfig, UndercoverPolicy},
    types::Faction,
    zone::{
        evaluate_tick, CaptureRules, ContestOutcome, ContestState, PresenceSample, Zone,
        ZoneChange, ZoneState,
    },
};

fn rules() -> CaptureRules {
    CaptureRules::from_config(&CampaignConfig::default_test().capture)
}

fn neutral_zone() -> Zone {
    Zone::from_config(&CampaignConfig::default_test().zones[0])
}

fn step(zone: &Zone, sample: PresenceSample, rules: &CaptureRules) -> (Zone, Vec<ZoneChange>) {
    let t = evaluate_tick(zone, &sample, 1.0, rules).expect("valid transition");
    (t.zone, t.changes)
}

/// Neutral zone, 3-vs-0 for FactionA at 0.1/s → owned after exactly 10 ticks.
#[test]
fn neutral_zone_captured_in_ten_ticks() {
    let rules = rules();
    let mut zone = neutral_zone();
    let mut all_changes = Vec::new();

    for tick in 1..=10 {
        let (next, changes) = step(&zone, PresenceSample::new(3, 0), &rules);
        zone = next;
        if tick < 10 {
            assert_eq!(zone.owner, Faction::Neutral, "captured early at tick {tick}");
            assert!(matches!(zone.contest, ContestState::Capturing { attacker: Faction::FactionA }));
        }
        all_changes.extend(changes);
    }

    assert_eq!(zone.state(), ZoneState::Owned(Faction::FactionA));
    assert_eq!(zone.progress, 0.0);
    assert_eq!(
        all_changes,
        vec![
            ZoneChange::ContestStarted { attacker: Faction::FactionA, owner: Faction::Neutral },
            ZoneChange::OwnershipChanged { from: Faction::Neutral, to: Faction::FactionA },
            ZoneChange::ContestResolved { attacker: Faction::FactionA, outcome: ContestOutcome::Captured },
        ]
    );
}

#[test]
fn progress_stays_within_bounds_under_mixed_presence() {
    let rules = rules();
    let mut zone = neutral_zone();
    let pattern = [(3, 0), (0, 0), (2, 2), (0, 4), (5, 1), (0, 0), (1, 0), (0, 2)];
    for i in 0..400 {
        let (a, b) = pattern[(i * 7) % pattern.len()];
        zone = step(&zone, PresenceSample::new(a, b), &rules).0;
        assert!((0.0..=1.0).contains(&zone.progress), "progress {} out of bounds", zone.progress);
        zone.check_invariants().expect("invariants hold");
    }
}

#[test]
fn stalemate_never_changes_progress() {
    let rules = rules();
    let mut zone = neutral_zone();
    for _ in 0..4 {
        zone = step(&zone, PresenceSample::new(3, 0), &rules).0;
    }
    let held = zone.progress;
    assert!(held > 0.0);

    for n in [1, 2, 5, 9] {
        for _ in 0..25 {
            let (next, changes) = step(&zone, PresenceSample::new(n, n), &rules);
            assert!(changes.is_empty());
            zone = next;
        }
        assert_eq!(zone.progress, held, "stalemate at {n}v{n} moved progress");
        assert!(matches!(zone.contest, ContestState::Contested { attacker: Faction::FactionA }));
    }
}

#[test]
fn owned_zone_challenge_restarts_from_zero() {
    let rules = rules();
    let mut zone = neutral_zone();
    for _ in 0..10 {
        zone = step(&zone, PresenceSample::new(3, 0), &rules).0;
    }
    assert_eq!(zone.owner, Faction::FactionA);

    let (zone, changes) = step(&zone, PresenceSample::new(0, 2), &rules);
    assert_eq!(
        changes,
        vec![ZoneChange::ContestStarted { attacker: Faction::FactionB, owner: Faction::FactionA }]
    );
    assert_eq!(zone.owner, Faction::FactionA);
    assert!((zone.progress - 0.1).abs() < 1e-12, "fresh contest should hold one tick of progress");
}

#[test]
fn disengaged_attacker_decays_after_grace_then_reverts() {
    let rules = rules(); // grace 3s, decay 0.05/s
    let mut zone = neutral_zone();
    for _ in 0..4 {
        zone = step(&zone, PresenceSample::new(2, 0), &rules).0;
    }
    let peak = zone.progress;

    for _ in 0..3 {
        zone = step(&zone, PresenceSample::new(0, 0), &rules).0;
        assert_eq!(zone.progress, peak, "no decay inside the grace interval");
    }

    zone = step(&zone, PresenceSample::new(0, 0), &rules).0;
    assert!((zone.progress - (peak - 0.05)).abs() < 1e-9);

    let mut resolved = Vec::new();
    for _ in 0..20 {
        let (next, changes) = step(&zone, PresenceSample::new(0, 0), &rules);
        zone = next;
        resolved.extend(changes);
    }
    assert_eq!(zone.state(), ZoneState::Neutral);
    assert_eq!(
        resolved,
        vec![ZoneChange::ContestResolved { attacker: Faction::FactionA, outcome: ContestOutcome::Repelled }]
    );
}

#[test]
fn outnumbered_attacker_counts_as_disengaged() {
    let rules = rules();
    let mut zone = neutral_zone();
    for _ in 0..5 {
        zone = step(&zone, PresenceSample::new(4, 0), &rules).0;
    }
    let before = zone.progress;
    // FactionB outnumbers but does not take over the contest.
    zone = step(&zone, PresenceSample::new(1, 3), &rules).0;
    assert_eq!(zone.contest.attacker(), Some(Faction::FactionA));
    assert_eq!(zone.progress, before);
    assert!(zone.disengaged_secs > 0.0);
}

#[test]
fn out_of_range_progress_is_an_invariant_violation() {
    let rules = rules();
    let mut zone = neutral_zone();
    zone.contest = ContestState::Capturing { attacker: Faction::FactionA };
    zone.progress = 1.5;
    let err = evaluate_tick(&zone, &PresenceSample::new(1, 0), 1.0, &rules).unwrap_err();
    assert_eq!(err.zone_id, "zone-1");

    zone.progress = f64::NAN;
    assert!(evaluate_tick(&zone, &PresenceSample::new(1, 0), 1.0, &rules).is_err());
}

#[test]
fn undercover_agents_hold_progress_under_suppress_policy() {
    let mut rules = rules();
    let mut zone = neutral_zone();
    for _ in 0..3 {
        zone = step(&zone, PresenceSample::new(2, 0), &rules).0;
    }
    let held = zone.progress;

    let agents_only = PresenceSample { undercover_a: 1, ..PresenceSample::default() };
    for _ in 0..10 {
        zone = step(&zone, agents_only, &rules).0;
    }
    assert_eq!(zone.progress, held);
    assert!(zone.undercover_present);

    rules.undercover = UndercoverPolicy::Ignore;
    for _ in 0..10 {
        zone = step(&zone, agents_only, &rules).0;
    }
    assert!(zone.progress < held, "ignored agents should not stop decay");
}
