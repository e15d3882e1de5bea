use thiserror::Error;

use crate::session::ConfigKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagParseError {
    #[error("tag payload is empty")]
    Empty,
    #[error("tag payload is missing `{0}`")]
    MissingKey(&'static str),
    #[error("tag apiBase `{0}` is not an http(s) url")]
    InvalidApiBase(String),
    #[error("tag reported application not found")]
    ApplicationNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    #[error("could not join `{ssid}` after {attempts} attempts")]
    Timeout { ssid: String, attempts: u32 },
    #[error("unsupported hardware: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PacketEncodingError {
    #[error("{kind} packet needs {expected} entries, got {actual}")]
    WrongArity {
        kind: ConfigKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} packet has length {actual}, expected {expected}")]
    WrongLength {
        kind: ConfigKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} packet starts with mode {actual}, expected {expected}")]
    WrongMode {
        kind: ConfigKind,
        expected: u8,
        actual: f64,
    },
    #[error("schedule slot ids must be 1..=5 without duplicates, got {0}")]
    InvalidSlotId(u8),
    #[error("field `{0}` is not a finite number")]
    NonFinite(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("`{key}` must be within {min}..={max}, got {value}")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("`{0}` is not a finite number")]
    NonFinite(String),
    #[error("`{key}` needs a number, got `{text}`")]
    InvalidNumber { key: String, text: String },
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("schedule slot {0} does not exist")]
    UnknownSlot(u8),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("device is offline")]
    Offline,
    #[error("there are no changes to save")]
    NoChanges,
    #[error("a save is already pending")]
    SavePending,
    #[error("configuration has not been loaded from the device yet")]
    NotLoaded,
    #[error(transparent)]
    Encoding(#[from] PacketEncodingError),
    #[error("device rejected the command: {reason}")]
    CommandRejected { reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("device did not confirm the change within {waited_ms} ms")]
    Timeout { waited_ms: u64 },
    #[error("engine was disposed before the change was confirmed")]
    Disposed,
    #[error(transparent)]
    Edit(#[from] EditError),
}
