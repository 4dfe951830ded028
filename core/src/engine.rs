//! The campaign engine: the explicitly constructed context the host drives.
//!
//! EXECUTION ORDER per `on_simulation_tick(dt)` (fixed, never reordered):
//!   1. Clock advance
//!   2. Presence query     (host collaborator, every zone in campaign order)
//!   3. Command drain      (arrival order, re-validated)
//!   4. Campaign tick      (capture → economy cadence → victory)
//!   5. Autosave request   (interval and significant events)
//!   6. Save outcomes      (poll the writer)
//!   7. Journal + event bus
//!   8. Replication frame
//!
//! RULES:
//!   - Only the tick thread mutates campaign state.
//!   - Save I/O never runs on the tick thread; it works from an immutable
//!     SaveDocument taken at request time.
//!   - All randomness flows through the RngBank (see SkirmishPresence).
//!   - Restores validate the whole document before anything is replaced.

use crate::{
    campaign::{Campaign, CampaignPhase},
    clock::SimClock,
    command::{self, CommandContext, CommandQueue, CommandTicket, PlayerCommand},
    config::CampaignConfig,
    error::{CommandRejection, SaveFormatError, SimError, SimResult},
    event::{CampaignEvent, EventBus, EventLogEntry},
    player::PlayerRoster,
    presence::{PresenceSnapshot, PresenceSource, SkirmishPresence},
    replication::{FramePublisher, ReplicationDelta, ReplicationFrame},
    save_format::{FormatVersion, SaveDocument, FORMAT_MAJOR},
    save_writer::{SaveWriter, WritePolicy},
    slots::{SlotKind, SlotManager},
    snapshot::CampaignSnapshot,
    store::SimStore,
    types::{Faction, Tick},
};
use crossbeam_channel::Receiver;
use std::{sync::Arc, time::Duration};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything one host tick produced.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: Tick,
    pub events: Vec<CampaignEvent>,
    /// Change from the previously published frame; None on the first frame.
    pub delta: Option<ReplicationDelta>,
}

pub struct CampaignEngine {
    pub clock: SimClock,
    seed: u64,
    config: CampaignConfig,
    campaign: Campaign,
    roster: PlayerRoster,
    commands: CommandQueue,
    presence: Box<dyn PresenceSource>,
    last_presence: PresenceSnapshot,
    saves: SaveWriter,
    journal: Option<SimStore>,
    bus: EventBus,
    frames: FramePublisher,
}

impl CampaignEngine {
    pub fn new(config: CampaignConfig, presence: Box<dyn PresenceSource>, seed: u64) -> SimResult<Self> {
        config.validate()?;
        let slots = SlotManager::new(&config.persistence.save_dir)?;
        let saves = SaveWriter::new(slots, WritePolicy::from(&config.persistence));
        Ok(Self {
            clock: SimClock::new(),
            seed,
            campaign: Campaign::new(&config),
            roster: PlayerRoster::new(),
            commands: CommandQueue::new(),
            presence,
            last_presence: PresenceSnapshot::new(),
            saves,
            journal: None,
            bus: EventBus::new(),
            frames: FramePublisher::new(),
            config,
        })
    }

    /// Headless engine fed by seeded skirmish presence.
    pub fn build(config: CampaignConfig, seed: u64) -> SimResult<Self> {
        Self::new(config, Box::new(SkirmishPresence::new(seed, 4)), seed)
    }

    /// Attach a journal. Migrates the schema and registers the campaign.
    pub fn with_journal(mut self, store: SimStore) -> SimResult<Self> {
        store.migrate()?;
        store.insert_campaign(self.campaign.campaign_id(), self.seed, ENGINE_VERSION)?;
        self.journal = Some(store);
        Ok(self)
    }

    pub fn start(&mut self) -> SimResult<CampaignEvent> {
        let event = self.campaign.start(self.clock.current_tick)?;
        self.emit(self.clock.current_tick, std::slice::from_ref(&event))?;
        self.frames.publish(self.frame());
        Ok(event)
    }

    pub fn join_player(&mut self, player_id: &str, faction: Faction) -> SimResult<()> {
        self.roster.join(player_id, faction)?;
        Ok(())
    }

    pub fn set_player_position(&mut self, player_id: &str, position: [f64; 3]) -> SimResult<()> {
        self.roster.set_position(player_id, position)
    }

    /// Validate and queue a player command. Accept or reject is answered
    /// now; the command itself applies on the next tick.
    pub fn submit_command(
        &mut self,
        player_id: &str,
        command: PlayerCommand,
    ) -> Result<CommandTicket, CommandRejection> {
        let ctx = CommandContext {
            campaign: &self.campaign,
            roster: &self.roster,
            config: &self.config,
            presence: &self.last_presence,
        };
        if let Err(rejection) = command::validate(&ctx, player_id, &command) {
            log::warn!("rejected {} from '{player_id}': {rejection}", command.type_name());
            return Err(rejection);
        }
        Ok(self.commands.push(player_id, command, self.clock.current_tick))
    }

    /// Advance one host tick of `dt` simulated seconds.
    pub fn on_simulation_tick(&mut self, dt: f64) -> SimResult<TickReport> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(SimError::Validation(format!("tick dt {dt} must be finite and non-negative")));
        }
        if self.clock.paused {
            return Err(SimError::Validation("engine is paused".to_string()));
        }

        let tick = self.clock.advance(dt);
        let mut events = vec![CampaignEvent::TickStarted { tick }];

        let mut presence = PresenceSnapshot::new();
        for zone in self.campaign.zones() {
            presence.insert(zone.zone_id.clone(), self.presence.query_presence(&zone.zone_id));
        }

        for queued in self.commands.drain() {
            let command_type = queued.command.type_name().to_string();
            match command::apply(
                tick,
                &queued,
                &mut self.campaign,
                &mut self.roster,
                &self.config,
                &mut presence,
            ) {
                Ok(applied) => {
                    events.extend(applied);
                    events.push(CampaignEvent::CommandApplied {
                        tick,
                        seq: queued.seq,
                        player_id: queued.player_id,
                        command_type,
                    });
                }
                Err(rejection) => {
                    log::warn!(
                        "tick={tick} command #{} ({command_type}) from '{}' failed: {rejection}",
                        queued.seq,
                        queued.player_id
                    );
                    events.push(CampaignEvent::CommandFailed {
                        tick,
                        seq: queued.seq,
                        player_id: queued.player_id,
                        command_type,
                        reason: rejection.to_string(),
                    });
                }
            }
        }

        let campaign_events = self.campaign.tick(tick, dt, &presence)?;
        let significant = campaign_events.iter().any(CampaignEvent::is_significant);
        let ended = campaign_events.iter().find_map(|e| match *e {
            CampaignEvent::CampaignEnded { winner, cause, .. } => Some((winner, cause)),
            _ => None,
        });
        events.extend(campaign_events);
        self.last_presence = presence;

        if self.autosave_due(tick, significant) {
            let doc = Arc::new(self.save_document("autosave"));
            self.saves.request(&SlotKind::autosave_slot(tick), doc)?;
        }
        events.extend(self.saves.poll());
        events.push(CampaignEvent::TickCompleted { tick });

        self.emit(tick, &events)?;
        if let (Some((winner, cause)), Some(journal)) = (ended, &self.journal) {
            journal.finish_campaign(self.campaign.campaign_id(), tick, winner, Some(cause))?;
        }
        let delta = self.frames.publish(self.frame());

        log::debug!("tick={tick} complete: {} events", events.len());
        Ok(TickReport { tick, events, delta })
    }

    /// Run `n` ticks of `dt` seconds. Returns every event produced.
    /// Used for testing and fast-forward.
    pub fn run_ticks(&mut self, n: u64, dt: f64) -> SimResult<Vec<CampaignEvent>> {
        let mut events = Vec::new();
        for _ in 0..n {
            events.extend(self.on_simulation_tick(dt)?.events);
        }
        Ok(events)
    }

    fn autosave_due(&self, tick: Tick, significant: bool) -> bool {
        let persistence = &self.config.persistence;
        let on_interval = persistence.autosave_interval_ticks > 0
            && tick % persistence.autosave_interval_ticks == 0
            && self.campaign.phase() == CampaignPhase::Active;
        on_interval || (persistence.autosave_on_events && significant)
    }

    // ── Persistence ────────────────────────────────────────────

    /// Immutable copy of everything a save needs, taken now.
    pub fn save_document(&self, label: &str) -> SaveDocument {
        SaveDocument {
            format_version: FormatVersion::CURRENT,
            saved_at: chrono::Utc::now(),
            label: label.to_string(),
            clock: self.clock.clone(),
            campaign: self.campaign.snapshot(),
            zones: self.campaign.zones().to_vec(),
            accounts: self.campaign.ledger().snapshot(),
            players: self.roster.records(),
        }
    }

    /// Request a save. The write happens off the tick thread; its outcome
    /// arrives as SaveCompleted or SaveFailed on a later tick or flush.
    /// `auto-<digits>` names belong to the autosave rotation and are refused.
    pub fn save(&mut self, slot: &str, label: &str) -> SimResult<()> {
        if SlotKind::of(slot) == SlotKind::Auto {
            return Err(SimError::Validation(format!(
                "slot name '{slot}' is reserved for autosaves"
            )));
        }
        let doc = Arc::new(self.save_document(label));
        self.saves.request(slot, doc)
    }

    /// Block until outstanding saves finish or `timeout` passes, journaling
    /// and publishing their outcomes.
    pub fn flush_saves(&mut self, timeout: Duration) -> SimResult<Vec<CampaignEvent>> {
        let events = self.saves.wait_idle(timeout);
        self.emit(self.clock.current_tick, &events)?;
        Ok(events)
    }

    pub fn load(&mut self, slot: &str) -> SimResult<CampaignEvent> {
        let doc = self.saves.slots().load(slot)?;
        self.restore(doc, Some(slot))
    }

    /// Replace live state with a saved document. Nothing changes unless the
    /// whole document is valid.
    pub fn restore(&mut self, doc: SaveDocument, slot: Option<&str>) -> SimResult<CampaignEvent> {
        if doc.format_version.major != FORMAT_MAJOR {
            return Err(SaveFormatError::UnsupportedVersion {
                found: doc.format_version.major,
                supported: FORMAT_MAJOR,
            }
            .into());
        }
        if !doc.clock.elapsed_secs.is_finite() || doc.clock.elapsed_secs < 0.0 {
            return Err(rejected("clock elapsed time is invalid"));
        }
        if doc.campaign.ended_at.is_some_and(|t| t > doc.clock.current_tick) {
            return Err(rejected("campaign ended after the saved clock tick"));
        }

        let campaign = Campaign::restore(&self.config, doc.campaign, doc.zones, doc.accounts)
            .map_err(into_rejection)?;
        let roster = PlayerRoster::from_records(doc.players).map_err(into_rejection)?;

        self.campaign = campaign;
        self.roster = roster;
        self.clock = SimClock { paused: false, ..doc.clock };
        self.commands.clear();
        self.last_presence = PresenceSnapshot::new();
        if let Some(journal) = &self.journal {
            journal.insert_campaign(self.campaign.campaign_id(), self.seed, ENGINE_VERSION)?;
        }

        let tick = self.clock.current_tick;
        let event = CampaignEvent::CampaignRestored { tick, slot: slot.map(str::to_string) };
        log::info!(
            "restored campaign {} at tick {tick} from {}",
            self.campaign.campaign_id(),
            slot.unwrap_or("memory")
        );
        self.emit(tick, std::slice::from_ref(&event))?;
        self.frames.clear();
        self.frames.publish(self.frame());
        Ok(event)
    }

    /// Abandon the current campaign and set up a fresh one. Players stay
    /// enrolled with their factions; inventories are wiped. Queued and
    /// in-flight saves of the abandoned campaign are cancelled.
    pub fn reset(&mut self) -> SimResult<()> {
        self.saves.cancel_all();
        if let Some(journal) = &self.journal {
            if self.campaign.phase() != CampaignPhase::Ended {
                journal.finish_campaign(
                    self.campaign.campaign_id(),
                    self.clock.current_tick,
                    None,
                    None,
                )?;
            }
        }
        let mut roster = PlayerRoster::new();
        for player in self.roster.iter() {
            roster.join(&player.player_id, player.faction)?;
        }
        self.campaign = Campaign::new(&self.config);
        self.roster = roster;
        self.clock = SimClock::new();
        self.commands.clear();
        self.last_presence = PresenceSnapshot::new();
        self.frames.clear();
        if let Some(journal) = &self.journal {
            journal.insert_campaign(self.campaign.campaign_id(), self.seed, ENGINE_VERSION)?;
        }
        log::info!("campaign reset; new campaign {}", self.campaign.campaign_id());
        Ok(())
    }

    // ── Observers ──────────────────────────────────────────────

    pub fn subscribe(&mut self) -> Receiver<CampaignEvent> {
        self.bus.subscribe()
    }

    /// Shared handle to the latest replication frame.
    pub fn frames(&self) -> FramePublisher {
        self.frames.clone()
    }

    pub fn snapshot(&self) -> CampaignSnapshot {
        self.campaign.snapshot()
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn roster(&self) -> &PlayerRoster {
        &self.roster
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn saves(&self) -> &SaveWriter {
        &self.saves
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn journal(&self) -> Option<&SimStore> {
        self.journal.as_ref()
    }

    /// Query journaled events for a tick of the current campaign.
    /// Used by the determinism test and replay tooling.
    pub fn store_events_for_tick(&self, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        match &self.journal {
            Some(journal) => journal.events_for_tick(self.campaign.campaign_id(), tick),
            None => Ok(Vec::new()),
        }
    }

    fn frame(&self) -> ReplicationFrame {
        ReplicationFrame::capture(self.clock.current_tick, &self.campaign, &self.roster)
    }

    fn emit(&mut self, tick: Tick, events: &[CampaignEvent]) -> SimResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        if let Some(journal) = self.journal.as_mut() {
            journal.append_events(self.campaign.campaign_id(), tick, events)?;
        }
        self.bus.publish(events);
        Ok(())
    }
}

fn rejected(detail: &str) -> SimError {
    SaveFormatError::Rejected(detail.to_string()).into()
}

fn into_rejection(err: SimError) -> SimError {
    match err {
        SimError::Validation(detail) => SaveFormatError::Rejected(detail).into(),
        other => other,
    }
}
