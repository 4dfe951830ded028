//! Binary save format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header  magic "RBLS" | major u16 | minor u16 | sha256(body) [32] | body_len u64
//! body    campaign block   u32 len | JSON
//!         zones block      u32 count | (u32 len | JSON) * count
//!         accounts block   u32 count | (u32 len | JSON) * count
//!         players block    u32 count | (u32 len | JSON) * count
//! ```
//!
//! Readers refuse an unknown major version and accept any minor. Bytes past
//! `body_len`, and unknown JSON fields inside a block, are ignored.

use crate::{
    clock::SimClock,
    economy::Account,
    error::SaveFormatError,
    player::PlayerRecord,
    snapshot::CampaignSnapshot,
    zone::Zone,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SAVE_MAGIC: [u8; 4] = *b"RBLS";
pub const FORMAT_MAJOR: u16 = 1;
pub const FORMAT_MINOR: u16 = 0;
pub const HEADER_LEN: usize = 4 + 2 + 2 + 32 + 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    pub const CURRENT: Self = Self { major: FORMAT_MAJOR, minor: FORMAT_MINOR };
}

/// Everything needed to rebuild a campaign. Built synchronously from live
/// state and then handed to the writer as an immutable value.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveDocument {
    pub format_version: FormatVersion,
    pub saved_at: DateTime<Utc>,
    pub label: String,
    pub clock: SimClock,
    pub campaign: CampaignSnapshot,
    pub zones: Vec<Zone>,
    pub accounts: Vec<Account>,
    pub players: Vec<PlayerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub version: FormatVersion,
    pub checksum: [u8; 32],
    pub body_len: u64,
}

#[derive(Serialize, Deserialize)]
struct CampaignBlock {
    saved_at: DateTime<Utc>,
    label: String,
    clock: SimClock,
    campaign: CampaignSnapshot,
}

pub fn encode(doc: &SaveDocument) -> Result<Vec<u8>, SaveFormatError> {
    let mut body = Vec::new();
    let campaign = CampaignBlock {
        saved_at: doc.saved_at,
        label: doc.label.clone(),
        clock: doc.clock.clone(),
        campaign: doc.campaign.clone(),
    };
    put_json(&mut body, "campaign", &campaign)?;
    put_list(&mut body, "zones", &doc.zones)?;
    put_list(&mut body, "accounts", &doc.accounts)?;
    put_list(&mut body, "players", &doc.players)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&SAVE_MAGIC);
    out.extend_from_slice(&doc.format_version.major.to_le_bytes());
    out.extend_from_slice(&doc.format_version.minor.to_le_bytes());
    out.extend_from_slice(&Sha256::digest(&body));
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse and check the fixed header without touching the body.
pub fn read_header(bytes: &[u8]) -> Result<SaveHeader, SaveFormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(SaveFormatError::TooShort(bytes.len()));
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[0..4]);
    if magic != SAVE_MAGIC {
        return Err(SaveFormatError::BadMagic(magic));
    }
    let major = u16::from_le_bytes([bytes[4], bytes[5]]);
    let minor = u16::from_le_bytes([bytes[6], bytes[7]]);
    if major != FORMAT_MAJOR {
        return Err(SaveFormatError::UnsupportedVersion { found: major, supported: FORMAT_MAJOR });
    }
    let mut checksum = [0u8; 32];
    checksum.copy_from_slice(&bytes[8..40]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[40..48]);
    Ok(SaveHeader {
        version: FormatVersion { major, minor },
        checksum,
        body_len: u64::from_le_bytes(len),
    })
}

pub fn decode(bytes: &[u8]) -> Result<SaveDocument, SaveFormatError> {
    let header = read_header(bytes)?;
    let available = (bytes.len() - HEADER_LEN) as u64;
    if header.body_len > available {
        return Err(SaveFormatError::Truncated { declared: header.body_len, available });
    }
    let body = &bytes[HEADER_LEN..HEADER_LEN + header.body_len as usize];
    if Sha256::digest(body).as_slice() != header.checksum {
        return Err(SaveFormatError::ChecksumMismatch);
    }

    let mut reader = BlockReader { body, pos: 0 };
    let campaign: CampaignBlock = reader.json("campaign")?;
    let zones = reader.list("zones")?;
    let accounts = reader.list("accounts")?;
    let players = reader.list("players")?;

    Ok(SaveDocument {
        format_version: header.version,
        saved_at: campaign.saved_at,
        label: campaign.label,
        clock: campaign.clock,
        campaign: campaign.campaign,
        zones,
        accounts,
        players,
    })
}

fn put_json<T: Serialize>(
    out: &mut Vec<u8>,
    block: &'static str,
    value: &T,
) -> Result<(), SaveFormatError> {
    let json = serde_json::to_vec(value).map_err(|e| malformed(block, e))?;
    let len = u32::try_from(json.len()).map_err(|_| malformed(block, "entry exceeds 4 GiB"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&json);
    Ok(())
}

fn put_list<T: Serialize>(
    out: &mut Vec<u8>,
    block: &'static str,
    items: &[T],
) -> Result<(), SaveFormatError> {
    let count = u32::try_from(items.len()).map_err(|_| malformed(block, "too many entries"))?;
    out.extend_from_slice(&count.to_le_bytes());
    for item in items {
        put_json(out, block, item)?;
    }
    Ok(())
}

fn malformed(block: &'static str, detail: impl ToString) -> SaveFormatError {
    SaveFormatError::MalformedBlock { block, detail: detail.to_string() }
}

struct BlockReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl BlockReader<'_> {
    fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    fn u32(&mut self, block: &'static str) -> Result<u32, SaveFormatError> {
        if self.remaining() < 4 {
            return Err(malformed(block, format!("unexpected end of body at offset {}", self.pos)));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.body[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(raw))
    }

    fn json<T: DeserializeOwned>(&mut self, block: &'static str) -> Result<T, SaveFormatError> {
        let len = self.u32(block)? as usize;
        if len > self.remaining() {
            return Err(malformed(
                block,
                format!("entry of {len} bytes overruns body ({} left)", self.remaining()),
            ));
        }
        let slice = &self.body[self.pos..self.pos + len];
        self.pos += len;
        serde_json::from_slice(slice).map_err(|e| malformed(block, e))
    }

    fn list<T: DeserializeOwned>(&mut self, block: &'static str) -> Result<Vec<T>, SaveFormatError> {
        let count = self.u32(block)? as usize;
        // Each entry carries at least its length prefix.
        if count > self.remaining() / 4 {
            return Err(malformed(block, format!("count {count} exceeds remaining body")));
        }
        (0..count).map(|_| self.json(block)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_rejected_before_body_is_read() {
        assert_eq!(read_header(b"RBLS"), Err(SaveFormatError::TooShort(4)));

        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(b"NOPE");
        assert_eq!(read_header(&bytes), Err(SaveFormatError::BadMagic(*b"NOPE")));

        bytes[0..4].copy_from_slice(&SAVE_MAGIC);
        bytes[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert_eq!(
            read_header(&bytes),
            Err(SaveFormatError::UnsupportedVersion { found: 9, supported: FORMAT_MAJOR })
        );
    }

    #[test]
    fn oversized_count_is_malformed_not_a_huge_allocation() {
        let mut body = Vec::new();
        body.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut reader = BlockReader { body: &body, pos: 0 };
        let result: Result<Vec<Zone>, _> = reader.list("zones");
        assert!(matches!(result, Err(SaveFormatError::MalformedBlock { block: "zones", .. })));
    }
}
