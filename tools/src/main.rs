//! campaign-runner: headless campaign runner.
//!
//! Usage:
//!   campaign-runner --seed 12345 --ticks 600 --db run.db
//!   campaign-runner --seed 12345 --data-dir ./data --save-dir ./saves --ipc-mode
//!
//! IPC mode reads one JSON request per line on stdin and answers with one
//! JSON line on stdout.

use anyhow::{Context, Result};
use rebellion_core::{
    command::PlayerCommand,
    config::CampaignConfig,
    engine::CampaignEngine,
    event::CampaignEvent,
    presence::SkirmishPresence,
    replication::ReplicationFrame,
    store::SimStore,
    types::{Faction, Tick},
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    GetState,
    Tick { count: u64 },
    Join { player_id: String, faction: Faction },
    Command { player_id: String, command: PlayerCommand },
    Save { slot: String },
    Load { slot: String },
    Slots,
    Quit,
}

#[derive(serde::Serialize)]
struct UiState {
    tick: Tick,
    paused: bool,
    frame: Option<ReplicationFrame>,
    pending_commands: usize,
    events: Vec<CampaignEvent>,
}

#[derive(serde::Serialize)]
struct SlotRow {
    slot: String,
    bytes: u64,
    tick: Option<Tick>,
    label: Option<String>,
    error: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ticks = parse_arg(&args, "--ticks", 600u64);
    let dt = parse_arg(&args, "--dt", 1.0f64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");

    let mut config = if Path::new(data_dir).join("campaign.json").is_file() {
        CampaignConfig::load(data_dir)?
    } else {
        log::warn!("no campaign.json under {data_dir}; using the built-in test campaign");
        CampaignConfig::default_test()
    };
    if let Some(save_dir) = flag_value(&args, "--save-dir") {
        config.persistence.save_dir = save_dir.to_string();
    }

    if !ipc_mode {
        println!("Rebellion campaign-runner");
        println!("  seed:      {seed}");
        println!("  ticks:     {ticks}");
        println!("  dt:        {dt}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  save_dir:  {}", config.persistence.save_dir);
        println!();
    }

    let roster = vec![
        ("rebel-1".to_string(), Faction::FactionA),
        ("loyalist-1".to_string(), Faction::FactionB),
    ];
    let presence = SkirmishPresence::new(seed, 4).with_players(roster.clone());
    let store = SimStore::open(db)?;
    let mut engine = CampaignEngine::new(config, Box::new(presence), seed)?.with_journal(store)?;
    for (player_id, faction) in &roster {
        engine.join_player(player_id, *faction)?;
    }
    engine.start()?;

    if ipc_mode {
        run_ipc_loop(&mut engine, dt)?;
    } else {
        run_batch(&mut engine, ticks, dt)?;
        engine.save("final", "end of batch run")?;
        engine.flush_saves(FLUSH_TIMEOUT)?;
        print_summary(&engine)?;
    }
    Ok(())
}

fn run_batch(engine: &mut CampaignEngine, ticks: u64, dt: f64) -> Result<()> {
    for _ in 0..ticks {
        let report = engine.on_simulation_tick(dt)?;
        let over = report
            .events
            .iter()
            .any(|e| matches!(e, CampaignEvent::CampaignEnded { .. }));
        if over {
            break;
        }
    }
    Ok(())
}

fn run_ipc_loop(engine: &mut CampaignEngine, dt: f64) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let request: IpcRequest = match serde_json::from_str(&buffer) {
            Ok(r) => r,
            Err(e) => {
                reply(&mut stdout, &serde_json::json!({ "error": e.to_string() }))?;
                continue;
            }
        };

        let response = match request {
            IpcRequest::Quit => break,
            IpcRequest::GetState => state_json(engine, Vec::new())?,
            IpcRequest::Tick { count } => {
                let events = engine.run_ticks(count, dt)?;
                state_json(engine, events)?
            }
            IpcRequest::Join { player_id, faction } => match engine.join_player(&player_id, faction) {
                Ok(()) => state_json(engine, Vec::new())?,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            IpcRequest::Command { player_id, command } => {
                match engine.submit_command(&player_id, command) {
                    Ok(ticket) => serde_json::json!({
                        "accepted": true,
                        "seq": ticket.seq,
                        "command_id": ticket.command_id,
                    }),
                    Err(rejection) => serde_json::json!({
                        "accepted": false,
                        "reason": rejection.to_string(),
                    }),
                }
            }
            IpcRequest::Save { slot } => {
                let label = format!("manual save at tick {}", engine.clock.current_tick);
                match engine.save(&slot, &label) {
                    Ok(()) => {
                        let events = engine.flush_saves(FLUSH_TIMEOUT)?;
                        state_json(engine, events)?
                    }
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                }
            }
            IpcRequest::Load { slot } => match engine.load(&slot) {
                Ok(event) => state_json(engine, vec![event])?,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            IpcRequest::Slots => {
                let rows: Vec<SlotRow> = engine
                    .saves()
                    .slots()
                    .enumerate()?
                    .into_iter()
                    .map(|info| match info.summary {
                        Ok(summary) => SlotRow {
                            slot: info.slot,
                            bytes: info.bytes,
                            tick: Some(summary.tick),
                            label: Some(summary.label),
                            error: None,
                        },
                        Err(e) => SlotRow {
                            slot: info.slot,
                            bytes: info.bytes,
                            tick: None,
                            label: None,
                            error: Some(e.to_string()),
                        },
                    })
                    .collect();
                serde_json::to_value(rows)?
            }
        };
        reply(&mut stdout, &response)?;
    }
    engine.flush_saves(FLUSH_TIMEOUT)?;
    Ok(())
}

fn reply(stdout: &mut io::Stdout, value: &serde_json::Value) -> Result<()> {
    writeln!(stdout, "{value}")?;
    stdout.flush()?;
    Ok(())
}

fn state_json(engine: &CampaignEngine, events: Vec<CampaignEvent>) -> Result<serde_json::Value> {
    let state = UiState {
        tick: engine.clock.current_tick,
        paused: engine.clock.paused,
        frame: engine.frames().latest().map(|f| (*f).clone()),
        pending_commands: engine.pending_commands(),
        events,
    };
    serde_json::to_value(state).context("serializing UI state")
}

fn print_summary(engine: &CampaignEngine) -> Result<()> {
    let campaign = engine.campaign();
    let campaign_id = campaign.campaign_id();

    println!("=== CAMPAIGN SUMMARY ===");
    println!("  campaign_id:    {campaign_id}");
    println!("  final tick:     {}", engine.clock.current_tick);
    println!("  phase:          {:?}", campaign.phase());
    match campaign.winner() {
        Some(winner) => println!("  winner:         {winner}"),
        None => println!("  winner:         none"),
    }
    println!(
        "  zones needed:   {} of {}",
        campaign.required_zone_count(),
        campaign.zones().len()
    );
    for faction in Faction::COMBATANTS {
        println!(
            "  {:<14}  zones {:>2} | balance {:>6}",
            faction.as_str(),
            campaign.owned_count(faction),
            campaign.ledger().balance(faction)
        );
    }

    if let Some(journal) = engine.journal() {
        println!();
        println!("=== JOURNAL ===");
        println!("  events:         {}", journal.event_count(campaign_id, None)?);
        for kind in ["zone_ownership_changed", "faction_degraded", "command_applied", "save_completed"] {
            println!("  {kind:<24}{}", journal.event_count(campaign_id, Some(kind))?);
        }
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
