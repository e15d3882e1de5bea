use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    Setpoints,
    Schedule,
}

impl ConfigKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setpoints => "setpoints",
            Self::Schedule => "schedule",
        }
    }

    /// First element of every command packet for this kind.
    pub fn mode(self) -> u8 {
        match self {
            Self::Setpoints => 6,
            Self::Schedule => 7,
        }
    }

    pub fn packet_len(self) -> usize {
        match self {
            Self::Setpoints => 24,
            Self::Schedule => 26,
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Confirmed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

/// One save attempt, as recorded in the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub config_kind: ConfigKind,
    pub mode: u8,
    /// Epoch milliseconds; doubles as the lookup key.
    pub started_at: i64,
    pub changed_keys: Vec<String>,
    pub old_values: BTreeMap<String, f64>,
    pub new_values: BTreeMap<String, f64>,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub key: String,
    pub old: f64,
    pub new: f64,
}

impl SyncSession {
    pub fn pending(kind: ConfigKind, started_at: i64, changes: &[FieldChange]) -> Self {
        Self {
            config_kind: kind,
            mode: kind.mode(),
            started_at,
            changed_keys: changes.iter().map(|change| change.key.clone()).collect(),
            old_values: changes
                .iter()
                .map(|change| (change.key.clone(), change.old))
                .collect(),
            new_values: changes
                .iter()
                .map(|change| (change.key.clone(), change.new))
                .collect(),
            status: SyncStatus::Pending,
        }
    }
}
