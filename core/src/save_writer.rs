//! Asynchronous save writer.
//!
//! Per-slot lane state machine:
//!
//!   Idle → Writing → Verifying → Committed ─┐
//!                              ↘ Failed ────┴→ Idle (next poll)
//!
//! At most one write per slot is in flight. Requests that arrive while a
//! write is running, or before the next poll, replace the pending request
//! for that slot (latest wins). File I/O runs on worker threads against an
//! immutable `Arc<SaveDocument>`; outcomes travel back over a crossbeam
//! channel and surface as SaveCompleted / SaveFailed from `poll()` on the
//! tick thread.
//!
//! A write that times out or is cancelled is abandoned but keeps its lane
//! until the worker reports back, so a newer write to the same slot never
//! races the stale one to the rename.

use crate::{
    config::PersistenceConfig,
    error::SimError,
    event::CampaignEvent,
    save_format::{self, SaveDocument},
    slots::{SlotKind, SlotManager},
    types::Tick,
};
use crossbeam_channel::{Receiver, Sender};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWritePhase {
    Idle,
    Writing,
    Verifying,
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
    pub autosave_retention: usize,
}

impl From<&PersistenceConfig> for WritePolicy {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            autosave_retention: config.autosave_retention,
        }
    }
}

struct Pending {
    doc: Arc<SaveDocument>,
    requests: u32,
}

struct InFlight {
    job_id: u64,
    tick: Tick,
    started: Instant,
    cancel: Arc<AtomicBool>,
    /// Outcome already reported or discarded; only the worker's exit matters.
    abandoned: bool,
}

impl InFlight {
    fn abandon(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.abandoned = true;
    }
}

struct SlotLane {
    phase: SlotWritePhase,
    in_flight: Option<InFlight>,
    pending: Option<Pending>,
}

impl SlotLane {
    fn new() -> Self {
        Self { phase: SlotWritePhase::Idle, in_flight: None, pending: None }
    }
}

enum WorkerMsg {
    Phase {
        slot: String,
        job_id: u64,
        phase: SlotWritePhase,
    },
    Done {
        slot: String,
        job_id: u64,
        result: Result<u64, String>,
        attempts: u32,
    },
}

pub struct SaveWriter {
    slots: SlotManager,
    policy: WritePolicy,
    lanes: BTreeMap<String, SlotLane>,
    tx: Sender<WorkerMsg>,
    rx: Receiver<WorkerMsg>,
    next_job: u64,
    coalesced: u64,
}

impl SaveWriter {
    pub fn new(slots: SlotManager, policy: WritePolicy) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            slots,
            policy,
            lanes: BTreeMap::new(),
            tx,
            rx,
            next_job: 0,
            coalesced: 0,
        }
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    /// Queue a save. Nothing touches disk until the next `poll()`.
    pub fn request(&mut self, slot: &str, doc: Arc<SaveDocument>) -> Result<(), SimError> {
        SlotManager::validate_slot_name(slot)?;
        let lane = self.lanes.entry(slot.to_string()).or_insert_with(SlotLane::new);
        match lane.pending.as_mut() {
            Some(pending) => {
                pending.doc = doc;
                pending.requests += 1;
                self.coalesced += 1;
                log::debug!("save request for '{slot}' coalesced ({} pending)", pending.requests);
            }
            None => lane.pending = Some(Pending { doc, requests: 1 }),
        }
        Ok(())
    }

    /// Collect worker outcomes, enforce timeouts and start pending writes.
    pub fn poll(&mut self) -> Vec<CampaignEvent> {
        for lane in self.lanes.values_mut() {
            if lane.in_flight.is_none()
                && matches!(lane.phase, SlotWritePhase::Committed | SlotWritePhase::Failed)
            {
                lane.phase = SlotWritePhase::Idle;
            }
        }

        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg, &mut events);
        }
        self.expire(&mut events);

        let ready: Vec<String> = self
            .lanes
            .iter()
            .filter(|(_, lane)| lane.in_flight.is_none() && lane.pending.is_some())
            .map(|(slot, _)| slot.clone())
            .collect();
        for slot in ready {
            self.launch(&slot);
        }
        events
    }

    /// Poll until every lane is idle or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<CampaignEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.poll();
        while !self.is_idle() && Instant::now() < deadline {
            if let Ok(msg) = self.rx.recv_timeout(Duration::from_millis(10)) {
                self.handle(msg, &mut events);
            }
            events.extend(self.poll());
        }
        events
    }

    pub fn phase(&self, slot: &str) -> SlotWritePhase {
        self.lanes.get(slot).map_or(SlotWritePhase::Idle, |lane| lane.phase)
    }

    pub fn is_idle(&self) -> bool {
        self.lanes
            .values()
            .all(|lane| lane.in_flight.is_none() && lane.pending.is_none())
    }

    pub fn in_flight(&self) -> usize {
        self.lanes.values().filter(|lane| lane.in_flight.is_some()).count()
    }

    /// Requests that replaced an earlier pending request.
    pub fn coalesced_requests(&self) -> u64 {
        self.coalesced
    }

    /// Drop pending requests and abandon in-flight writes. Late worker
    /// results are discarded without events.
    pub fn cancel_all(&mut self) {
        for lane in self.lanes.values_mut() {
            if let Some(job) = lane.in_flight.as_mut() {
                job.abandon();
            }
            lane.pending = None;
            lane.phase = SlotWritePhase::Idle;
        }
    }

    fn handle(&mut self, msg: WorkerMsg, events: &mut Vec<CampaignEvent>) {
        match msg {
            WorkerMsg::Phase { slot, job_id, phase } => {
                if let Some(lane) = self.current_lane(&slot, job_id) {
                    if lane.in_flight.as_ref().is_some_and(|job| !job.abandoned) {
                        lane.phase = phase;
                    }
                }
            }
            WorkerMsg::Done { slot, job_id, result, attempts } => {
                let Some(lane) = self.current_lane(&slot, job_id) else {
                    log::debug!("ignoring stale result for '{slot}' job {job_id}");
                    return;
                };
                let Some(job) = lane.in_flight.take() else {
                    return;
                };
                if job.abandoned {
                    log::debug!("abandoned save '{slot}' job {job_id} exited: {result:?}");
                    return;
                }
                match result {
                    Ok(bytes) => {
                        lane.phase = SlotWritePhase::Committed;
                        log::info!("saved '{slot}' at tick {} ({bytes} bytes)", job.tick);
                        events.push(CampaignEvent::SaveCompleted { slot, tick: job.tick, bytes });
                    }
                    Err(reason) => {
                        lane.phase = SlotWritePhase::Failed;
                        log::error!("save '{slot}' failed after {attempts} attempt(s): {reason}");
                        events.push(CampaignEvent::SaveFailed { slot, tick: job.tick, reason });
                    }
                }
            }
        }
    }

    fn current_lane(&mut self, slot: &str, job_id: u64) -> Option<&mut SlotLane> {
        self.lanes
            .get_mut(slot)
            .filter(|lane| lane.in_flight.as_ref().is_some_and(|job| job.job_id == job_id))
    }

    fn expire(&mut self, events: &mut Vec<CampaignEvent>) {
        let timeout = self.policy.timeout;
        for (slot, lane) in &mut self.lanes {
            let Some(job) = lane.in_flight.as_mut() else {
                continue;
            };
            if job.abandoned || job.started.elapsed() <= timeout {
                continue;
            }
            job.abandon();
            let reason = format!("timed out after {} ms", timeout.as_millis());
            log::error!("save '{slot}' {reason}");
            events.push(CampaignEvent::SaveFailed { slot: slot.clone(), tick: job.tick, reason });
            lane.phase = SlotWritePhase::Failed;
        }
    }

    fn launch(&mut self, slot: &str) {
        let Some(lane) = self.lanes.get_mut(slot) else {
            return;
        };
        let Some(pending) = lane.pending.take() else {
            return;
        };
        self.next_job += 1;
        let job_id = self.next_job;
        let cancel = Arc::new(AtomicBool::new(false));
        let tick = pending.doc.clock.current_tick;
        lane.in_flight = Some(InFlight {
            job_id,
            tick,
            started: Instant::now(),
            cancel: Arc::clone(&cancel),
            abandoned: false,
        });
        lane.phase = SlotWritePhase::Writing;

        let job = WriteJob {
            slot: slot.to_string(),
            job_id,
            doc: pending.doc,
            slots: self.slots.clone(),
            policy: self.policy.clone(),
            cancel,
            tx: self.tx.clone(),
        };
        thread::spawn(move || job.run());
    }
}

struct WriteJob {
    slot: String,
    job_id: u64,
    doc: Arc<SaveDocument>,
    slots: SlotManager,
    policy: WritePolicy,
    cancel: Arc<AtomicBool>,
    tx: Sender<WorkerMsg>,
}

impl WriteJob {
    fn run(self) {
        let (result, attempts) = self.write_with_retries();
        if result.is_ok() && SlotKind::of(&self.slot) == SlotKind::Auto {
            if let Err(e) = self.slots.prune_autosaves(self.policy.autosave_retention) {
                log::warn!("autosave retention failed: {e}");
            }
        }
        let _ = self.tx.send(WorkerMsg::Done {
            slot: self.slot,
            job_id: self.job_id,
            result: result.map_err(|e| e.to_string()),
            attempts,
        });
    }

    fn write_with_retries(&self) -> (Result<u64, SimError>, u32) {
        let bytes = match save_format::encode(&self.doc) {
            Ok(bytes) => bytes,
            Err(e) => return (Err(e.into()), 0),
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut report = |phase: SlotWritePhase| {
                let _ = self.tx.send(WorkerMsg::Phase {
                    slot: self.slot.clone(),
                    job_id: self.job_id,
                    phase,
                });
            };
            let result = self.slots.write_encoded(&self.slot, &bytes, &self.cancel, &mut report);
            let retryable = matches!(result, Err(SimError::Io(_) | SimError::CorruptSave(_)));
            if !retryable
                || attempt > self.policy.max_retries
                || self.cancel.load(Ordering::Relaxed)
            {
                return (result, attempt);
            }
            let delay = self.policy.backoff.saturating_mul(1 << (attempt - 1).min(10));
            if let Err(e) = &result {
                log::warn!(
                    "save '{}' attempt {attempt} failed ({e}), retrying in {} ms",
                    self.slot,
                    delay.as_millis()
                );
            }
            thread::sleep(delay);
        }
    }
}
