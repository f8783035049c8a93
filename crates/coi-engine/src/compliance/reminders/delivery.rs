use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ledger::{NotificationKind, ReminderThreshold};
use crate::compliance::domain::{BuildingId, CoiId, CoiOwner};

/// Renewal notice handed to the delivery collaborator, which owns recipients, channel and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryReminder {
    pub coi_id: CoiId,
    pub building_id: BuildingId,
    pub owner: CoiOwner,
    pub kind: NotificationKind,
    pub threshold: ReminderThreshold,
    pub days_left: i64,
    pub expiration_date: NaiveDate,
}

/// Outbound hook for reminders (SMS gateway, e-mail adapter, message bus).
pub trait ReminderPublisher: Send + Sync {
    fn publish(&self, reminder: &ExpiryReminder) -> Result<(), DeliveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("reminder transport unavailable: {0}")]
    Transport(String),
    #[error("reminder rejected by transport: {0}")]
    Rejected(String),
}
