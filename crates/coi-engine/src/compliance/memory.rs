//! In-process implementations of the persistence and delivery seams.
//!
//! Each store keeps its state behind a single mutex, which makes `replace_active`, the
//! versioned `update`, and the ledger `claim` atomic within one process. A deployment with
//! several instances needs a store with real unique constraints instead.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::audit::{AuditEntry, AuditError, AuditEvent, AuditQuery, AuditSink};
use super::domain::{BuildingId, CoiId};
use super::reminders::{
    DeliveryError, ExpiryReminder, LedgerClaim, LedgerEntry, LedgerError, NotificationKey,
    NotificationLedger, ReminderPublisher,
};
use super::repository::{CoiFilter, CoiRecord, CoiRepository, RepositoryError};
use super::requirements::{RequirementStore, RequirementTemplate, TemplateId};

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, String> {
    mutex.lock().map_err(|_| format!("{name} mutex poisoned"))
}

#[derive(Default, Clone)]
pub struct InMemoryCoiRepository {
    records: Arc<Mutex<BTreeMap<CoiId, CoiRecord>>>,
    issued: Arc<AtomicU64>,
}

impl InMemoryCoiRepository {
    fn guard(&self) -> Result<MutexGuard<'_, BTreeMap<CoiId, CoiRecord>>, RepositoryError> {
        lock(&self.records, "repository").map_err(RepositoryError::Unavailable)
    }
}

impl CoiRepository for InMemoryCoiRepository {
    fn next_id(&self) -> Result<CoiId, RepositoryError> {
        let guard = self.guard()?;
        loop {
            let sequence = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
            let id = CoiId(format!("coi-{sequence:06}"));
            if !guard.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    fn insert(&self, record: CoiRecord) -> Result<CoiRecord, RepositoryError> {
        let mut guard = self.guard()?;
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(
        &self,
        mut record: CoiRecord,
        expected_version: u64,
    ) -> Result<CoiRecord, RepositoryError> {
        let mut guard = self.guard()?;
        let current = guard.get(&record.id).ok_or(RepositoryError::NotFound)?;
        if current.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                found: current.version,
            });
        }
        record.version = expected_version + 1;
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &CoiId) -> Result<Option<CoiRecord>, RepositoryError> {
        Ok(self.guard()?.get(id).cloned())
    }

    fn list(&self, filter: &CoiFilter) -> Result<Vec<CoiRecord>, RepositoryError> {
        Ok(self
            .guard()?
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRequirementStore {
    templates: Arc<Mutex<HashMap<BuildingId, Vec<RequirementTemplate>>>>,
    issued: Arc<AtomicU64>,
}

impl InMemoryRequirementStore {
    fn guard(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<BuildingId, Vec<RequirementTemplate>>>, RepositoryError>
    {
        lock(&self.templates, "requirement store").map_err(RepositoryError::Unavailable)
    }
}

impl RequirementStore for InMemoryRequirementStore {
    fn next_template_id(&self) -> Result<TemplateId, RepositoryError> {
        let guard = self.guard()?;
        loop {
            let sequence = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
            let id = TemplateId(format!("req-{sequence:06}"));
            if !guard.values().flatten().any(|template| template.id == id) {
                return Ok(id);
            }
        }
    }

    fn active(&self, building: &BuildingId) -> Result<Option<RequirementTemplate>, RepositoryError> {
        Ok(self
            .guard()?
            .get(building)
            .and_then(|templates| templates.iter().find(|template| template.active))
            .cloned())
    }

    fn replace_active(
        &self,
        template: RequirementTemplate,
        now: DateTime<Utc>,
    ) -> Result<Option<RequirementTemplate>, RepositoryError> {
        let mut guard = self.guard()?;
        let templates = guard.entry(template.building_id.clone()).or_default();
        if templates.iter().any(|existing| existing.id == template.id) {
            return Err(RepositoryError::Conflict);
        }

        let mut retired = None;
        for existing in templates.iter_mut().filter(|existing| existing.active) {
            existing.active = false;
            existing.deactivated_at = Some(now);
            retired = Some(existing.clone());
        }
        templates.push(template);
        Ok(retired)
    }

    fn history(&self, building: &BuildingId) -> Result<Vec<RequirementTemplate>, RepositoryError> {
        Ok(self.guard()?.get(building).cloned().unwrap_or_default())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    fn guard(&self) -> Result<MutexGuard<'_, Vec<AuditEntry>>, AuditError> {
        lock(&self.entries, "audit log").map_err(AuditError::Unavailable)
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.guard().map(|entries| entries.clone()).unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn append(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        let mut guard = self.guard()?;
        let entry = AuditEntry {
            id: guard.len() as u64 + 1,
            event,
        };
        guard.push(entry.clone());
        Ok(entry)
    }

    fn matching(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .guard()?
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryLedger {
    rows: Arc<Mutex<BTreeMap<NotificationKey, DateTime<Utc>>>>,
}

impl InMemoryLedger {
    fn guard(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<NotificationKey, DateTime<Utc>>>, LedgerError> {
        lock(&self.rows, "ledger").map_err(LedgerError::Unavailable)
    }

    pub fn keys(&self) -> BTreeSet<NotificationKey> {
        self.guard()
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl NotificationLedger for InMemoryLedger {
    fn claim(&self, entry: LedgerEntry) -> Result<LedgerClaim, LedgerError> {
        let mut guard = self.guard()?;
        if guard.contains_key(&entry.key) {
            return Ok(LedgerClaim::AlreadySent);
        }
        guard.insert(entry.key, entry.recorded_at);
        Ok(LedgerClaim::Claimed)
    }

    fn release(&self, key: &NotificationKey) -> Result<(), LedgerError> {
        self.guard()?.remove(key);
        Ok(())
    }
}

/// Publisher that keeps every delivered reminder in memory.
#[derive(Default, Clone)]
pub struct InMemoryReminderOutbox {
    delivered: Arc<Mutex<Vec<ExpiryReminder>>>,
}

impl InMemoryReminderOutbox {
    pub fn delivered(&self) -> Vec<ExpiryReminder> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }
}

impl ReminderPublisher for InMemoryReminderOutbox {
    fn publish(&self, reminder: &ExpiryReminder) -> Result<(), DeliveryError> {
        lock(&self.delivered, "outbox")
            .map_err(DeliveryError::Transport)?
            .push(reminder.clone());
        Ok(())
    }
}
