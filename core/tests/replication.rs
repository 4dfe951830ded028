//! Replication contract tests: what clients see and how deltas apply.

use rebellion_core::{
    campaign::CampaignPhase,
    command::PlayerCommand,
    config::CampaignConfig,
    engine::CampaignEngine,
    presence::{PresenceCounts, ScriptedPresence},
    replication::ReplicationFrame,
    types::Faction,
};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> (CampaignEngine, ScriptedPresence) {
    let mut config = CampaignConfig::default_test();
    config.persistence.save_dir = dir.path().to_string_lossy().into_owned();
    let host = ScriptedPresence::new();
    let mut engine = CampaignEngine::new(config, Box::new(host.clone()), 5).unwrap();
    engine.join_player("alice", Faction::FactionA).unwrap();
    engine.join_player("bob", Faction::FactionB).unwrap();
    engine.start().unwrap();
    (engine, host)
}

fn latest(engine: &CampaignEngine) -> ReplicationFrame {
    engine.frames().latest().expect("a frame is published after start").as_ref().clone()
}

#[test]
fn start_publishes_the_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(&dir);
    let frame = latest(&engine);
    assert_eq!(frame.tick, 0);
    assert_eq!(frame.phase, CampaignPhase::Active);
    assert_eq!(frame.zones.len(), 5);
    assert_eq!(frame.balances[&Faction::FactionA], 100);
    assert_eq!(frame.players["bob"].shown_faction, Faction::FactionB);
}

#[test]
fn undercover_players_are_shown_as_neutral() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, _) = engine(&dir);
    engine.submit_command("bob", PlayerCommand::Undercover { enabled: true }).unwrap();
    let report = engine.on_simulation_tick(1.0).unwrap();

    let frame = latest(&engine);
    assert_eq!(frame.players["bob"].shown_faction, Faction::Neutral);
    assert_eq!(frame.players["alice"].shown_faction, Faction::FactionA);

    let delta = report.delta.expect("second frame yields a delta");
    assert_eq!(delta.players.len(), 1);
    assert_eq!(delta.players[0].player_id, "bob");
    assert_eq!(delta.players[0].shown_faction, Faction::Neutral);
}

#[test]
fn client_copy_follows_deltas_to_the_latest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, host) = engine(&dir);
    let mut client = latest(&engine);

    host.set("zone-1", PresenceCounts::new(3, 0));
    host.set("zone-4", PresenceCounts::new(1, 2));
    engine.submit_command("alice", PlayerCommand::ShopPurchase { item_id: "rifle".into() }).unwrap();

    let mut quiet_ticks = 0;
    for _ in 0..15 {
        let delta = engine.on_simulation_tick(1.0).unwrap().delta.expect("delta every tick");
        if delta.is_empty() {
            quiet_ticks += 1;
        }
        client.apply(&delta).expect("deltas arrive in order");
    }

    assert_eq!(client, latest(&engine));
    assert_eq!(client.zone("zone-1").unwrap().owner, Faction::FactionA);
    assert_eq!(client.players["alice"].loadout.as_deref(), Some("rifle"));
    assert_eq!(client.zone("zone-4").unwrap().owner, Faction::FactionB);
    // Both zones fall at tick 10; nothing visible moves afterwards.
    assert_eq!(quiet_ticks, 5);
}

#[test]
fn deltas_against_the_wrong_base_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, host) = engine(&dir);
    let mut client = latest(&engine);
    host.set("zone-2", PresenceCounts::new(0, 2));

    let first = engine.on_simulation_tick(1.0).unwrap().delta.unwrap();
    let second = engine.on_simulation_tick(1.0).unwrap().delta.unwrap();

    assert!(client.apply(&second).is_err(), "skipped a delta");
    let untouched = client.clone();
    client.apply(&first).unwrap();
    assert!(client.apply(&first).is_err(), "replayed a delta");
    client.apply(&second).unwrap();
    assert_ne!(client, untouched);
    assert_eq!(client, latest(&engine));
}

#[test]
fn restore_starts_a_fresh_frame_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, host) = engine(&dir);
    host.set("zone-3", PresenceCounts::new(2, 0));
    engine.run_ticks(4, 1.0).unwrap();
    let doc = engine.save_document("rewind");
    engine.run_ticks(3, 1.0).unwrap();
    let stale_client = latest(&engine);

    engine.restore(doc, None).unwrap();
    let restored = latest(&engine);
    assert_eq!(restored.tick, 4);

    let mut resync = stale_client;
    let delta = engine.on_simulation_tick(1.0).unwrap().delta.unwrap();
    assert_eq!(delta.base_tick, 4);
    assert!(resync.apply(&delta).is_err(), "clients must take a full frame after restore");
}
