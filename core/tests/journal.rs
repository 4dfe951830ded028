//! Campaign journal tests: run rows and the event log.

use rebellion_core::{
    campaign::CampaignPhase,
    config::CampaignConfig,
    engine::CampaignEngine,
    presence::{PresenceCounts, ScriptedPresence},
    store::SimStore,
};
use tempfile::TempDir;

const SEED: u64 = 0xF00D_0000_0000_0001;

fn journaled(dir: &TempDir) -> (CampaignEngine, ScriptedPresence) {
    let mut config = CampaignConfig::default_test();
    config.persistence.save_dir = dir.path().to_string_lossy().into_owned();
    let host = ScriptedPresence::new();
    let mut engine = CampaignEngine::new(config, Box::new(host.clone()), SEED)
        .and_then(|e| e.with_journal(SimStore::in_memory()?))
        .unwrap();
    engine.start().unwrap();
    (engine, host)
}

#[test]
fn victory_closes_the_campaign_row() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, host) = journaled(&dir);
    for zone in ["zone-1", "zone-2", "zone-3", "zone-4"] {
        host.set(zone, PresenceCounts::new(3, 0));
    }
    engine.run_ticks(12, 1.0).unwrap();

    let id = engine.campaign().campaign_id().to_string();
    let record = engine.journal().unwrap().campaign_record(&id).unwrap().unwrap();
    assert_eq!(record.seed, SEED);
    assert_eq!(record.ended_tick, Some(10));
    assert_eq!(record.winner.as_deref(), Some("faction_a"));
    assert_eq!(record.cause.as_deref(), Some("zone_control"));

    let journal = engine.journal().unwrap();
    assert_eq!(journal.event_count(&id, Some("campaign_ended")).unwrap(), 1);
    assert_eq!(journal.event_count(&id, Some("zone_ownership_changed")).unwrap(), 4);
    let ended = engine.store_events_for_tick(10).unwrap();
    let row = ended.iter().find(|e| e.event_type == "campaign_ended").unwrap();
    assert_eq!(row.source, "campaign");
    assert!(row.payload.contains("\"winner\":\"faction_a\""));
}

#[test]
fn reset_abandons_the_old_run_and_opens_a_new_one() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, host) = journaled(&dir);
    engine.join_player("alice", rebellion_core::types::Faction::FactionA).unwrap();
    host.set("zone-2", PresenceCounts::new(2, 0));
    engine.run_ticks(3, 1.0).unwrap();
    let old_id = engine.campaign().campaign_id().to_string();

    engine.reset().unwrap();
    let new_id = engine.campaign().campaign_id().to_string();
    assert_ne!(old_id, new_id);
    assert_eq!(engine.campaign().phase(), CampaignPhase::Setup);
    assert_eq!(engine.clock.current_tick, 0);
    assert!(engine.roster().get("alice").is_some());

    let journal = engine.journal().unwrap();
    let old = journal.campaign_record(&old_id).unwrap().unwrap();
    assert_eq!(old.ended_tick, Some(3));
    assert_eq!(old.winner, None);
    assert_eq!(old.cause.as_deref(), Some("abandoned"));
    let fresh = journal.campaign_record(&new_id).unwrap().unwrap();
    assert_eq!(fresh.ended_tick, None);

    engine.start().unwrap();
    engine.on_simulation_tick(1.0).unwrap();
    assert_eq!(engine.campaign().zone("zone-2").unwrap().progress, 0.1);
}
