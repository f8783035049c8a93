use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compliance::domain::CoiId;

/// Reminder channels recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "SMS_EXPIRY")]
    SmsExpiry,
}

impl NotificationKind {
    pub const fn label(self) -> &'static str {
        match self {
            NotificationKind::SmsExpiry => "SMS_EXPIRY",
        }
    }
}

/// Day-count boundary before expiry, tagged `D30`, `D15`, `D7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReminderThreshold(pub u32);

impl ReminderThreshold {
    pub fn tag(self) -> String {
        format!("D{}", self.0)
    }
}

impl fmt::Display for ReminderThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// Unique key of a ledger row: one per (certificate, kind, tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationKey {
    pub coi_id: CoiId,
    pub kind: NotificationKind,
    pub tag: String,
}

impl NotificationKey {
    pub fn expiry(coi_id: CoiId, threshold: ReminderThreshold) -> Self {
        Self {
            coi_id,
            kind: NotificationKind::SmsExpiry,
            tag: threshold.tag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: NotificationKey,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a claim against the unique (certificate, kind, tag) constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerClaim {
    Claimed,
    /// Someone already holds the row: the reminder went out or is going out.
    AlreadySent,
}

/// Persisted dedup ledger for reminders.
///
/// `claim` must be an atomic unique insert in the backing store. Two concurrent claims for
/// the same key may never both return [`LedgerClaim::Claimed`].
pub trait NotificationLedger: Send + Sync {
    fn claim(&self, entry: LedgerEntry) -> Result<LedgerClaim, LedgerError>;
    /// Drop a claim whose reminder could not be delivered so a later tick can retry.
    fn release(&self, key: &NotificationKey) -> Result<(), LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("notification ledger unavailable: {0}")]
    Unavailable(String),
}
