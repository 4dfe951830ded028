use crate::types::{Faction, ZoneId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient funds: {faction} requested {requested}, balance {available}")]
    InsufficientFunds {
        faction: Faction,
        requested: u64,
        available: u64,
    },

    #[error("Corrupt save: {0}")]
    CorruptSave(#[from] SaveFormatError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Save slot '{slot}' not found")]
    SlotNotFound { slot: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;

/// Reasons a save file is refused at load time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveFormatError {
    #[error("file too short for a save header ({0} bytes)")]
    TooShort(usize),

    #[error("bad magic bytes {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported major version {found} (this build reads {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("body truncated: header declares {declared} bytes, {available} present")]
    Truncated { declared: u64, available: u64 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("malformed {block} block: {detail}")]
    MalformedBlock { block: &'static str, detail: String },

    #[error("document rejected: {0}")]
    Rejected(String),
}

/// Immediate answer to a command that failed validation at intake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandRejection {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("player is not present at zone '{0}'")]
    NotPresentAtZone(ZoneId),

    #[error("malformed command: {0}")]
    Validation(String),
}
