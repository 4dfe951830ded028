//! Campaign manager tests: lifecycle and victory.

use rebellion_core::{
    campaign::{Campaign, CampaignPhase, VictoryCause},
    capture::CaptureEngine,
    config::CampaignConfig,
    event::CampaignEvent,
    presence::{PresenceCounts, PresenceSnapshot},
    types::Faction,
    zone::{CaptureCurve, CaptureRules},
};

fn presence_for(zones: &[&str], counts: PresenceCounts) -> PresenceSnapshot {
    let mut snapshot = PresenceSnapshot::new();
    for zone in zones {
        snapshot.insert(*zone, counts.clone());
    }
    snapshot
}

fn ended_events(events: &[CampaignEvent]) -> Vec<&CampaignEvent> {
    events
        .iter()
        .filter(|e| matches!(e, CampaignEvent::CampaignEnded { .. }))
        .collect()
}

#[test]
fn ticks_are_no_ops_until_started() {
    let config = CampaignConfig::default_test();
    let mut campaign = Campaign::new(&config);
    let presence = presence_for(&["zone-1"], PresenceCounts::new(3, 0));

    assert_eq!(campaign.phase(), CampaignPhase::Setup);
    assert!(campaign.tick(1, 1.0, &presence).unwrap().is_empty());
    assert_eq!(campaign.zone("zone-1").unwrap().progress, 0.0);

    campaign.start(1).unwrap();
    assert!(campaign.start(2).is_err(), "second start must be refused");
    assert!(!campaign.tick(2, 1.0, &presence).unwrap().is_empty());
}

/// 5 zones, 0.8 fraction → owning 4 wins. CampaignEnded fires exactly once.
#[test]
fn owning_four_of_five_zones_wins_exactly_once() {
    let config = CampaignConfig::default_test();
    let mut campaign = Campaign::new(&config);
    campaign.start(0).unwrap();
    assert_eq!(campaign.required_zone_count(), 4);

    let presence = presence_for(&["zone-1", "zone-2", "zone-3", "zone-4"], PresenceCounts::new(3, 0));
    let mut events = Vec::new();
    for tick in 1..=30 {
        events.extend(campaign.tick(tick, 1.0, &presence).unwrap());
    }

    let ended = ended_events(&events);
    assert_eq!(ended.len(), 1);
    assert_eq!(
        ended[0],
        &CampaignEvent::CampaignEnded {
            tick: 10,
            winner: Some(Faction::FactionA),
            cause: VictoryCause::ZoneControl,
        }
    );
    assert_eq!(campaign.phase(), CampaignPhase::Ended);
    assert_eq!(campaign.winner(), Some(Faction::FactionA));
    assert!(events.iter().all(|e| match e {
        CampaignEvent::EconomyTransaction { tick, .. } => *tick <= 10,
        _ => true,
    }), "nothing happens after the campaign ends");
}

#[test]
fn three_of_five_is_not_enough() {
    let config = CampaignConfig::default_test();
    let mut campaign = Campaign::new(&config);
    campaign.start(0).unwrap();
    let presence = presence_for(&["zone-1", "zone-2", "zone-3"], PresenceCounts::new(2, 0));
    for tick in 1..=50 {
        campaign.tick(tick, 1.0, &presence).unwrap();
    }
    assert_eq!(campaign.owned_count(Faction::FactionA), 3);
    assert_eq!(campaign.phase(), CampaignPhase::Active);
}

#[test]
fn bankrupt_opponent_hands_victory() {
    let mut config = CampaignConfig::default_test();
    config.economy.starting_balance = 0;
    config.economy.tick_interval = 1;
    config.victory.bankruptcy_ticks = 3;
    config.zones[0].initial_owner = Faction::FactionA;

    let mut campaign = Campaign::new(&config);
    campaign.start(0).unwrap();
    let empty = PresenceSnapshot::new();
    let mut events = Vec::new();
    for tick in 1..=5 {
        events.extend(campaign.tick(tick, 1.0, &empty).unwrap());
    }

    assert_eq!(
        ended_events(&events),
        vec![&CampaignEvent::CampaignEnded {
            tick: 3,
            winner: Some(Faction::FactionA),
            cause: VictoryCause::EconomicCollapse,
        }]
    );
}

#[test]
fn simultaneous_collapse_is_a_draw() {
    let mut config = CampaignConfig::default_test();
    config.economy.starting_balance = 0;
    config.victory.bankruptcy_ticks = 2;

    let mut campaign = Campaign::new(&config);
    campaign.start(0).unwrap();
    let empty = PresenceSnapshot::new();
    campaign.tick(1, 1.0, &empty).unwrap();
    let events = campaign.tick(2, 1.0, &empty).unwrap();

    assert!(events.contains(&CampaignEvent::CampaignEnded {
        tick: 2,
        winner: None,
        cause: VictoryCause::EconomicCollapse,
    }));
    assert_eq!(campaign.phase(), CampaignPhase::Ended);
    assert_eq!(campaign.winner(), None);
}

#[test]
fn snapshot_reflects_the_single_writer() {
    let config = CampaignConfig::default_test();
    let mut campaign = Campaign::new(&config);
    campaign.start(0).unwrap();
    let snapshot = campaign.snapshot();
    assert_eq!(snapshot.phase, CampaignPhase::Active);
    assert_eq!(snapshot.zone_order, vec!["zone-1", "zone-2", "zone-3", "zone-4", "zone-5"]);
    assert!(!snapshot.is_over());
}

/// Host-provided curve: twice the base rate for any majority.
#[derive(Debug)]
struct DoubleTime;

impl CaptureCurve for DoubleTime {
    fn rate(&self, advantage: u32, base_rate: f64) -> f64 {
        if advantage > 0 { 2.0 * base_rate } else { 0.0 }
    }
}

#[test]
fn installed_capture_curve_drives_the_campaign() {
    let config = CampaignConfig::default_test();
    let rules = CaptureRules::from_config(&config.capture).with_curve(Box::new(DoubleTime));
    let mut campaign = Campaign::new(&config).with_capture_engine(CaptureEngine::with_rules(rules, 64));
    campaign.start(0).unwrap();

    let presence = presence_for(&["zone-1", "zone-2", "zone-3", "zone-4"], PresenceCounts::new(3, 0));
    let mut events = Vec::new();
    for tick in 1..=10 {
        events.extend(campaign.tick(tick, 1.0, &presence).unwrap());
    }

    assert_eq!(
        ended_events(&events),
        vec![&CampaignEvent::CampaignEnded {
            tick: 5,
            winner: Some(Faction::FactionA),
            cause: VictoryCause::ZoneControl,
        }]
    );
}
