//! SQLite campaign journal.
//!
//! RULE: Only store.rs talks to the database.
//! The engine hands events over; it never executes SQL directly.

use crate::{
    campaign::VictoryCause,
    error::SimResult,
    event::{CampaignEvent, EventLogEntry},
    types::{Faction, Tick},
};
use rusqlite::{params, Connection, OptionalExtension};

/// One row of `campaign_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRecord {
    pub campaign_id: String,
    pub seed: u64,
    pub version: String,
    pub started_at: String,
    pub ended_tick: Option<Tick>,
    pub winner: Option<String>,
    pub cause: Option<String>,
}

pub struct SimStore {
    conn: Connection,
}

impl SimStore {
    /// Open (or create) the journal database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_campaign.sql"))?;
        Ok(())
    }

    // ── Campaign ───────────────────────────────────────────────

    /// Register a campaign. A restored campaign keeps its existing row.
    pub fn insert_campaign(&self, campaign_id: &str, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO campaign_run (campaign_id, seed, version, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![campaign_id, seed as i64, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Close a campaign row. No cause means it was reset before a victory.
    pub fn finish_campaign(
        &self,
        campaign_id: &str,
        tick: Tick,
        winner: Option<Faction>,
        cause: Option<VictoryCause>,
    ) -> SimResult<()> {
        let cause = match cause {
            Some(cause) => serde_json::to_value(cause)?,
            None => serde_json::Value::from("abandoned"),
        };
        self.conn.execute(
            "UPDATE campaign_run SET ended_tick = ?2, winner = ?3, cause = ?4
             WHERE campaign_id = ?1",
            params![
                campaign_id,
                tick as i64,
                winner.map(|w| w.as_str()),
                cause.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn campaign_record(&self, campaign_id: &str) -> SimResult<Option<CampaignRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT campaign_id, seed, version, started_at, ended_tick, winner, cause
                 FROM campaign_run WHERE campaign_id = ?1",
                params![campaign_id],
                |row| {
                    Ok(CampaignRecord {
                        campaign_id: row.get(0)?,
                        seed:        row.get::<_, i64>(1)? as u64,
                        version:     row.get(2)?,
                        started_at:  row.get(3)?,
                        ended_tick:  row.get::<_, Option<i64>>(4)?.map(|t| t as u64),
                        winner:      row.get(5)?,
                        cause:       row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (campaign_id, tick, source, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.campaign_id,
                entry.tick as i64,
                entry.source,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    /// Journal one tick's events in a single transaction.
    pub fn append_events(
        &mut self,
        campaign_id: &str,
        tick: Tick,
        events: &[CampaignEvent],
    ) -> SimResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO event_log (campaign_id, tick, source, event_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                stmt.execute(params![
                    campaign_id,
                    tick as i64,
                    event.source(),
                    event.type_name(),
                    serde_json::to_string(event)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn events_for_tick(&self, campaign_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, campaign_id, tick, source, event_type, payload
             FROM event_log WHERE campaign_id = ?1 AND tick = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![campaign_id, tick as i64], |row| {
                Ok(EventLogEntry {
                    id:          Some(row.get(0)?),
                    campaign_id: row.get(1)?,
                    tick:        row.get::<_, i64>(2)? as u64,
                    source:      row.get(3)?,
                    event_type:  row.get(4)?,
                    payload:     row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// `(event_type, payload)` for a whole campaign in journal order.
    pub fn event_stream(&self, campaign_id: &str) -> SimResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_type, payload FROM event_log WHERE campaign_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![campaign_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn event_count(&self, campaign_id: &str, event_type: Option<&str>) -> SimResult<u64> {
        let count: i64 = match event_type {
            Some(kind) => self.conn.query_row(
                "SELECT COUNT(*) FROM event_log WHERE campaign_id = ?1 AND event_type = ?2",
                params![campaign_id, kind],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM event_log WHERE campaign_id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }
}
