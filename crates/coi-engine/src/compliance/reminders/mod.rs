//! Expiry reminder scheduler.
//!
//! Each tick looks at every PENDING or APPROVED certificate that has not yet expired, picks
//! the tightest threshold it currently falls under, and sends at most one reminder per
//! (certificate, threshold). The ledger claim is taken before delivery and released again
//! when delivery keeps failing, so the next tick retries it. A release the ledger refuses is
//! remembered and retried at the start of the following tick.

mod delivery;
mod ledger;
mod worker;

pub use delivery::{DeliveryError, ExpiryReminder, ReminderPublisher};
pub use ledger::{
    LedgerClaim, LedgerEntry, LedgerError, NotificationKey, NotificationKind, NotificationLedger,
    ReminderThreshold,
};
pub use worker::run_expiry_jobs;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::repository::{CoiFilter, CoiRecord, CoiRepository, RepositoryError};

pub const DEFAULT_THRESHOLDS: [u32; 3] = [30, 15, 7];
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Threshold set and delivery retry bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSchedule {
    thresholds: Vec<u32>,
    max_attempts: u32,
}

impl ReminderSchedule {
    /// Zero thresholds are dropped, duplicates collapsed, and the rest kept in descending order.
    pub fn new(thresholds: impl IntoIterator<Item = u32>, max_attempts: u32) -> Self {
        let mut thresholds: Vec<u32> = thresholds.into_iter().filter(|days| *days > 0).collect();
        thresholds.sort_unstable_by(|left, right| right.cmp(left));
        thresholds.dedup();

        Self {
            thresholds,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The tightest threshold covering `days_left`: with {30, 15, 7}, 10 days left maps to
    /// D15 and 5 days to D7. Thresholds already passed are never backfilled.
    pub fn threshold_for(&self, days_left: i64) -> Option<ReminderThreshold> {
        if days_left <= 0 {
            return None;
        }

        self.thresholds
            .iter()
            .rev()
            .copied()
            .find(|days| days_left <= i64::from(*days))
            .map(ReminderThreshold)
    }
}

impl Default for ReminderSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLDS, DEFAULT_MAX_ATTEMPTS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub emitted: Vec<ExpiryReminder>,
    /// Reminders skipped because the ledger already holds their row.
    pub duplicates: usize,
    /// Reminders whose ledger claim or delivery failed after every attempt; retried next tick.
    pub failed: Vec<NotificationKey>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct ExpiryReminderScheduler<R, L, P> {
    repository: Arc<R>,
    ledger: Arc<L>,
    publisher: Arc<P>,
    schedule: ReminderSchedule,
    unreleased: Mutex<BTreeSet<NotificationKey>>,
}

impl<R, L, P> ExpiryReminderScheduler<R, L, P>
where
    R: CoiRepository + 'static,
    L: NotificationLedger + 'static,
    P: ReminderPublisher + 'static,
{
    pub fn new(repository: Arc<R>, ledger: Arc<L>, publisher: Arc<P>) -> Self {
        Self::with_schedule(repository, ledger, publisher, ReminderSchedule::default())
    }

    pub fn with_schedule(
        repository: Arc<R>,
        ledger: Arc<L>,
        publisher: Arc<P>,
        schedule: ReminderSchedule,
    ) -> Self {
        Self {
            repository,
            ledger,
            publisher,
            schedule,
            unreleased: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn schedule(&self) -> &ReminderSchedule {
        &self.schedule
    }

    /// Claims whose release failed; the ledger still holds their rows.
    pub fn unreleased(&self) -> Vec<NotificationKey> {
        self.unreleased_guard().iter().cloned().collect()
    }

    /// Send every reminder due at `now`.
    ///
    /// Only a failure to list certificates aborts the tick. Ledger and delivery failures are
    /// logged per certificate, reported in [`TickReport::failed`], and retried on a later tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, ReminderError> {
        let today = now.date_naive();
        let mut report = TickReport::default();
        self.retry_releases();

        for record in self.repository.list(&CoiFilter::tracked())? {
            let days_left = record.snapshot.days_until_expiry(today);
            let Some(threshold) = self.schedule.threshold_for(days_left) else {
                continue;
            };

            let key = NotificationKey::expiry(record.id.clone(), threshold);
            match self.claim(&key, now) {
                Ok(LedgerClaim::Claimed) => {}
                Ok(LedgerClaim::AlreadySent) => {
                    debug!(coi_id = %key.coi_id, tag = %key.tag, "reminder already on the ledger");
                    report.duplicates += 1;
                    continue;
                }
                Err(err) => {
                    error!(
                        coi_id = %key.coi_id,
                        tag = %key.tag,
                        error = %err,
                        "ledger claim failed; will retry next tick"
                    );
                    report.failed.push(key);
                    continue;
                }
            }

            let reminder = reminder_for(&record, threshold, days_left);
            match self.deliver(&reminder) {
                Ok(attempts) => {
                    info!(
                        coi_id = %reminder.coi_id,
                        threshold = %threshold,
                        days_left,
                        attempts,
                        "expiry reminder sent"
                    );
                    report.emitted.push(reminder);
                }
                Err(err) => {
                    error!(
                        coi_id = %key.coi_id,
                        tag = %key.tag,
                        error = %err,
                        "expiry reminder undelivered; will retry next tick"
                    );
                    self.release(&key);
                    report.failed.push(key);
                }
            }
        }

        Ok(report)
    }

    /// Claim the ledger row, retrying transient ledger failures up to `max_attempts` times.
    fn claim(
        &self,
        key: &NotificationKey,
        now: DateTime<Utc>,
    ) -> Result<LedgerClaim, LedgerError> {
        let mut attempt = 1;
        loop {
            let entry = LedgerEntry {
                key: key.clone(),
                recorded_at: now,
            };
            match self.ledger.claim(entry) {
                Ok(claim) => return Ok(claim),
                Err(err) if attempt >= self.schedule.max_attempts => return Err(err),
                Err(err) => {
                    warn!(
                        coi_id = %key.coi_id,
                        tag = %key.tag,
                        attempt,
                        error = %err,
                        "ledger claim failed; retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }

    fn release(&self, key: &NotificationKey) {
        if let Err(err) = self.ledger.release(key) {
            error!(
                coi_id = %key.coi_id,
                tag = %key.tag,
                error = %err,
                "ledger release failed; will retry before the next tick"
            );
            self.unreleased_guard().insert(key.clone());
        }
    }

    fn retry_releases(&self) {
        let mut unreleased = self.unreleased_guard();
        unreleased.retain(|key| match self.ledger.release(key) {
            Ok(()) => {
                info!(coi_id = %key.coi_id, tag = %key.tag, "stale reminder claim released");
                false
            }
            Err(err) => {
                warn!(
                    coi_id = %key.coi_id,
                    tag = %key.tag,
                    error = %err,
                    "stale reminder claim still held"
                );
                true
            }
        });
    }

    fn unreleased_guard(&self) -> MutexGuard<'_, BTreeSet<NotificationKey>> {
        self.unreleased.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish with a bounded number of attempts, returning how many were used.
    fn deliver(&self, reminder: &ExpiryReminder) -> Result<u32, DeliveryError> {
        let mut attempt = 1;
        loop {
            match self.publisher.publish(reminder) {
                Ok(()) => return Ok(attempt),
                Err(err) if attempt >= self.schedule.max_attempts => return Err(err),
                Err(err) => {
                    warn!(
                        coi_id = %reminder.coi_id,
                        attempt,
                        error = %err,
                        "expiry reminder delivery failed; retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

fn reminder_for(
    record: &CoiRecord,
    threshold: ReminderThreshold,
    days_left: i64,
) -> ExpiryReminder {
    ExpiryReminder {
        coi_id: record.id.clone(),
        building_id: record.building_id.clone(),
        owner: record.owner.clone(),
        kind: NotificationKind::SmsExpiry,
        threshold,
        days_left,
        expiration_date: record.expiration_date(),
    }
}
