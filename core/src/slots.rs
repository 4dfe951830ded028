//! Save slots on disk.
//!
//! One file per slot, `<root>/<slot>.sav`. Writes never touch the live file
//! until the new bytes are durable and verified:
//!
//!   temp `.<slot>.<uuid>.tmp` → fsync → read back + decode → rename
//!
//! so a crash or failed write leaves the previous save intact. Leftover temp
//! files from an interrupted write are swept when the manager opens.

use crate::{
    campaign::CampaignPhase,
    error::{SaveFormatError, SimError, SimResult},
    save_format::{self, SaveDocument},
    save_writer::SlotWritePhase,
    types::{Faction, Tick},
};
use chrono::{DateTime, Utc};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

pub const SLOT_EXTENSION: &str = "sav";
const MAX_SLOT_NAME: usize = 64;

/// Test hook: the next write misbehaves in the given way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFault {
    /// Write only this many bytes of the temp file, then fail as if the
    /// process had died. The partial temp file is left on disk.
    InterruptAfter(usize),
    /// Flip a byte in the temp file after fsync, so verification fails.
    CorruptTemp,
    /// Fail this many write attempts with an I/O error before succeeding.
    FailTimes(u32),
    /// Hold the write this long before touching disk.
    Stall(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Manual,
    Auto,
}

/// Prefix of engine-written autosave slots: `auto-<tick>`.
pub const AUTOSAVE_PREFIX: &str = "auto-";

impl SlotKind {
    /// Only the engine's own `auto-<digits>` names are autosaves. Anything
    /// else, `autoplay` or `auto1` included, is a manual slot and is never
    /// pruned.
    pub fn of(slot: &str) -> Self {
        match slot.strip_prefix(AUTOSAVE_PREFIX) {
            Some(tick) if !tick.is_empty() && tick.bytes().all(|b| b.is_ascii_digit()) => Self::Auto,
            _ => Self::Manual,
        }
    }

    pub fn autosave_slot(tick: Tick) -> String {
        format!("{AUTOSAVE_PREFIX}{tick:08}")
    }
}

/// Header-level facts about a readable save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveSummary {
    pub label: String,
    pub saved_at: DateTime<Utc>,
    pub tick: Tick,
    pub phase: CampaignPhase,
    pub winner: Option<Faction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub slot: String,
    pub kind: SlotKind,
    pub bytes: u64,
    /// `Err` when the file exists but does not decode.
    pub summary: Result<SaveSummary, SaveFormatError>,
}

#[derive(Debug, Clone)]
pub struct SlotManager {
    root: PathBuf,
    fault: Arc<Mutex<Option<WriteFault>>>,
}

impl SlotManager {
    pub fn new(root: impl Into<PathBuf>) -> SimResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let manager = Self { root, fault: Arc::new(Mutex::new(None)) };
        manager.sweep_temp_files();
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validate_slot_name(slot: &str) -> SimResult<()> {
        let ok = !slot.is_empty()
            && slot.len() <= MAX_SLOT_NAME
            && slot.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if ok {
            Ok(())
        } else {
            Err(SimError::Validation(format!(
                "invalid slot name '{slot}': use 1-{MAX_SLOT_NAME} of [A-Za-z0-9_-]"
            )))
        }
    }

    pub fn path_for(&self, slot: &str) -> SimResult<PathBuf> {
        Self::validate_slot_name(slot)?;
        Ok(self.root.join(format!("{slot}.{SLOT_EXTENSION}")))
    }

    pub fn inject_fault(&self, fault: WriteFault) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some(fault);
        }
    }

    pub fn clear_fault(&self) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = None;
        }
    }

    /// Encode and atomically write a document. Returns bytes written.
    pub fn write(&self, slot: &str, doc: &SaveDocument) -> SimResult<u64> {
        let bytes = save_format::encode(doc)?;
        let cancel = AtomicBool::new(false);
        self.write_encoded(slot, &bytes, &cancel, &mut |_| {})
    }

    /// Atomic write of pre-encoded bytes. `on_phase` sees Writing and then
    /// Verifying. A raised `cancel` flag abandons the write before rename.
    pub fn write_encoded(
        &self,
        slot: &str,
        bytes: &[u8],
        cancel: &AtomicBool,
        on_phase: &mut dyn FnMut(SlotWritePhase),
    ) -> SimResult<u64> {
        let target = self.path_for(slot)?;
        let fault = self.take_fault();

        if let Some(WriteFault::Stall(pause)) = fault {
            let until = Instant::now() + pause;
            while Instant::now() < until && !cancel.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if let Some(WriteFault::FailTimes(_)) = fault {
            return Err(io::Error::other("injected write failure").into());
        }
        check_cancel(cancel)?;

        on_phase(SlotWritePhase::Writing);
        let temp = self.root.join(format!(".{slot}.{}.tmp", uuid::Uuid::new_v4()));
        if let Some(WriteFault::InterruptAfter(n)) = fault {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes[..n.min(bytes.len())])?;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "injected interruption").into());
        }

        let result = self.write_and_verify(&temp, &target, bytes, cancel, fault, on_phase);
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    fn write_and_verify(
        &self,
        temp: &Path,
        target: &Path,
        bytes: &[u8],
        cancel: &AtomicBool,
        fault: Option<WriteFault>,
        on_phase: &mut dyn FnMut(SlotWritePhase),
    ) -> SimResult<u64> {
        {
            let mut file = OpenOptions::new().write(true).create_new(true).open(temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if fault == Some(WriteFault::CorruptTemp) {
            let mut raw = fs::read(temp)?;
            if let Some(last) = raw.last_mut() {
                *last ^= 0xFF;
            }
            fs::write(temp, &raw)?;
        }

        on_phase(SlotWritePhase::Verifying);
        let written = fs::read(temp)?;
        if written != bytes {
            return Err(SaveFormatError::ChecksumMismatch.into());
        }
        save_format::decode(&written)?;
        check_cancel(cancel)?;

        fs::rename(temp, target)?;
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        Ok(bytes.len() as u64)
    }

    pub fn load(&self, slot: &str) -> SimResult<SaveDocument> {
        let path = self.path_for(slot)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SimError::SlotNotFound { slot: slot.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(save_format::decode(&bytes)?)
    }

    pub fn delete(&self, slot: &str) -> SimResult<()> {
        let path = self.path_for(slot)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SimError::SlotNotFound { slot: slot.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, slot: &str) -> bool {
        self.path_for(slot).is_ok_and(|p| p.is_file())
    }

    /// Every slot file under the root, sorted by slot name.
    pub fn enumerate(&self) -> SimResult<Vec<SlotInfo>> {
        let mut slots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SLOT_EXTENSION) {
                continue;
            }
            let Some(slot) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if Self::validate_slot_name(slot).is_err() {
                continue;
            }
            // A concurrent prune may remove a file between listing and reading.
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let summary = save_format::decode(&bytes).map(|doc| SaveSummary {
                label: doc.label,
                saved_at: doc.saved_at,
                tick: doc.clock.current_tick,
                phase: doc.campaign.phase,
                winner: doc.campaign.winner,
            });
            slots.push(SlotInfo {
                slot: slot.to_string(),
                kind: SlotKind::of(slot),
                bytes: bytes.len() as u64,
                summary,
            });
        }
        slots.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(slots)
    }

    /// Keep the `keep` most recent autosaves (by saved tick, then name);
    /// unreadable autosaves count as oldest. Returns the deleted slots.
    pub fn prune_autosaves(&self, keep: usize) -> SimResult<Vec<String>> {
        let mut autos: Vec<(Tick, String)> = self
            .enumerate()?
            .into_iter()
            .filter(|info| info.kind == SlotKind::Auto)
            .map(|info| (info.summary.map_or(0, |s| s.tick), info.slot))
            .collect();
        autos.sort();
        let excess = autos.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);
        for (_, slot) in autos.into_iter().take(excess) {
            match self.delete(&slot) {
                Ok(()) | Err(SimError::SlotNotFound { .. }) => removed.push(slot),
                Err(e) => return Err(e),
            }
        }
        if !removed.is_empty() {
            log::debug!("pruned autosaves {removed:?}");
        }
        Ok(removed)
    }

    fn take_fault(&self) -> Option<WriteFault> {
        let mut guard = self.fault.lock().ok()?;
        match guard.take() {
            Some(WriteFault::FailTimes(n)) if n > 1 => {
                *guard = Some(WriteFault::FailTimes(n - 1));
                Some(WriteFault::FailTimes(n))
            }
            other => other,
        }
    }

    fn sweep_temp_files(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for path in entries.flatten().map(|e| e.path()) {
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"));
            if is_temp {
                log::warn!("removing interrupted save {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }
    }
}

fn check_cancel(cancel: &AtomicBool) -> SimResult<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "save cancelled").into());
    }
    Ok(())
}
