use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::compliance::audit::{
    AuditAction, AuditEntry, AuditError, AuditEvent, AuditQuery, AuditSink,
};
use crate::compliance::domain::{
    Attachment, AttachmentKind, AutoLiabilityLimits, BuildingId, CoiId, CoiOwner, CoiSubmission,
    CoverageSnapshot, CoverageType, EndorsementFlags, GeneralLiabilityLimits, TenantId,
    UmbrellaLimits, VendorId, WorkersCompLimits,
};
use crate::compliance::lifecycle::{AutoApplyMode, CoiLifecycle};
use crate::compliance::memory::{
    InMemoryAuditLog, InMemoryCoiRepository, InMemoryLedger, InMemoryReminderOutbox,
    InMemoryRequirementStore,
};
use crate::compliance::reminders::{
    DeliveryError, ExpiryReminder, ExpiryReminderScheduler, LedgerClaim, LedgerEntry, LedgerError,
    NotificationKey, NotificationLedger, ReminderPublisher, ReminderSchedule,
};
use crate::compliance::repository::{CoiFilter, CoiRecord, CoiRepository, RepositoryError};
use crate::compliance::requirements::{RequirementTemplate, RequirementTerms, TemplateId};

pub(super) type MemoryLifecycle =
    CoiLifecycle<InMemoryCoiRepository, InMemoryRequirementStore, InMemoryAuditLog>;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// 2025-09-15 12:00 UTC, the clock every scenario runs against.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 15, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn today() -> NaiveDate {
    now().date_naive()
}

pub(super) fn days_from_today(days: i64) -> NaiveDate {
    today() + chrono::Duration::days(days)
}

pub(super) fn building() -> BuildingId {
    BuildingId("bldg-harbor-point".to_string())
}

pub(super) fn vendor() -> CoiOwner {
    CoiOwner::Vendor(VendorId("vendor-brightline-hvac".to_string()))
}

pub(super) fn tenant() -> CoiOwner {
    CoiOwner::Tenant(TenantId("tenant-suite-410".to_string()))
}

pub(super) fn standard_terms() -> RequirementTerms {
    RequirementTerms {
        general_liability_occurrence_min: Some(1_000_000),
        general_liability_aggregate_min: Some(2_000_000),
        additional_insured_required: true,
        waiver_of_subrogation_required: true,
        notice_of_cancellation_min_days: Some(30),
        certificate_holder: Some("Harbor Point Owner LLC".to_string()),
        ..RequirementTerms::default()
    }
}

pub(super) fn template(terms: RequirementTerms) -> RequirementTemplate {
    RequirementTemplate {
        id: TemplateId("req-fixture".to_string()),
        building_id: building(),
        terms,
        active: true,
        created_at: now(),
        deactivated_at: None,
    }
}

/// Snapshot that satisfies [`standard_terms`] and expires on `expiration_date`.
pub(super) fn compliant_snapshot(expiration_date: NaiveDate) -> CoverageSnapshot {
    CoverageSnapshot {
        insured_name: Some("Brightline HVAC Inc.".to_string()),
        general_liability: GeneralLiabilityLimits {
            each_occurrence: Some(1_000_000),
            aggregate: Some(2_000_000),
            ..GeneralLiabilityLimits::default()
        },
        endorsements: EndorsementFlags {
            additional_insured: true,
            waiver_of_subrogation: true,
            primary_non_contributory: false,
        },
        notice_of_cancellation_days: Some(30),
        effective_date: date(2025, 1, 1),
        expiration_date,
        coverage_types: vec![CoverageType::GeneralLiability],
        auto_liability: AutoLiabilityLimits::default(),
        umbrella: UmbrellaLimits::default(),
        workers_comp: WorkersCompLimits::default(),
    }
}

pub(super) fn submission_with(snapshot: CoverageSnapshot) -> CoiSubmission {
    CoiSubmission {
        building_id: building(),
        owner: vendor(),
        snapshot,
        attachments: vec![Attachment {
            name: "acord-25.pdf".to_string(),
            kind: AttachmentKind::Certificate,
            storage_key: "coi/brightline/acord-25.pdf".to_string(),
        }],
    }
}

pub(super) fn compliant_submission() -> CoiSubmission {
    submission_with(compliant_snapshot(date(2026, 1, 1)))
}

/// GL each-occurrence of 500,000 against a 1,000,000 minimum.
pub(super) fn low_limit_submission() -> CoiSubmission {
    let mut snapshot = compliant_snapshot(date(2026, 1, 1));
    snapshot.general_liability.each_occurrence = Some(500_000);
    submission_with(snapshot)
}

pub(super) struct Harness {
    pub(super) lifecycle: Arc<MemoryLifecycle>,
    pub(super) repository: Arc<InMemoryCoiRepository>,
    pub(super) requirements: Arc<InMemoryRequirementStore>,
    pub(super) audit: Arc<InMemoryAuditLog>,
}

/// Lifecycle over in-memory stores with [`standard_terms`] active for [`building`].
pub(super) fn harness() -> Harness {
    let repository = Arc::new(InMemoryCoiRepository::default());
    let requirements = Arc::new(InMemoryRequirementStore::default());
    let audit = Arc::new(InMemoryAuditLog::default());
    let lifecycle = CoiLifecycle::new(repository.clone(), requirements.clone(), audit.clone());
    lifecycle
        .requirements()
        .activate(&building(), standard_terms(), now())
        .expect("requirement activates");

    Harness {
        lifecycle: Arc::new(lifecycle),
        repository,
        requirements,
        audit,
    }
}

pub(super) fn scheduler<R, L, P>(
    repository: Arc<R>,
    ledger: Arc<L>,
    publisher: Arc<P>,
) -> ExpiryReminderScheduler<R, L, P>
where
    R: CoiRepository + 'static,
    L: NotificationLedger + 'static,
    P: ReminderPublisher + 'static,
{
    ExpiryReminderScheduler::with_schedule(
        repository,
        ledger,
        publisher,
        ReminderSchedule::new([30, 15, 7], 3),
    )
}

pub(super) fn outbox() -> Arc<InMemoryReminderOutbox> {
    Arc::new(InMemoryReminderOutbox::default())
}

/// Publisher that fails a fixed number of times before delivering.
#[derive(Default)]
pub(super) struct FlakyPublisher {
    failures_left: AtomicU32,
    attempts: AtomicU32,
    delivered: Mutex<Vec<ExpiryReminder>>,
}

impl FlakyPublisher {
    pub(super) fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub(super) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(super) fn delivered(&self) -> Vec<ExpiryReminder> {
        self.delivered.lock().expect("publisher mutex poisoned").clone()
    }
}

impl ReminderPublisher for FlakyPublisher {
    fn publish(&self, reminder: &ExpiryReminder) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if consume_failure(&self.failures_left) {
            return Err(DeliveryError::Transport("sms gateway timeout".to_string()));
        }

        self.delivered
            .lock()
            .expect("publisher mutex poisoned")
            .push(reminder.clone());
        Ok(())
    }
}

fn consume_failure(failures_left: &AtomicU32) -> bool {
    failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// In-memory ledger whose claims and releases can be made to fail.
#[derive(Default)]
pub(super) struct FlakyLedger {
    rows: InMemoryLedger,
    claim_failures: AtomicU32,
    release_failures: AtomicU32,
    refused: Option<CoiId>,
    claims: AtomicU32,
}

impl FlakyLedger {
    pub(super) fn failing_claims(times: u32) -> Self {
        Self {
            claim_failures: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub(super) fn failing_releases(times: u32) -> Self {
        Self {
            release_failures: AtomicU32::new(times),
            ..Self::default()
        }
    }

    /// Every claim for `coi_id` fails; other certificates claim normally.
    pub(super) fn refusing(coi_id: CoiId) -> Self {
        Self {
            refused: Some(coi_id),
            ..Self::default()
        }
    }

    pub(super) fn keys(&self) -> BTreeSet<NotificationKey> {
        self.rows.keys()
    }

    pub(super) fn claims(&self) -> u32 {
        self.claims.load(Ordering::SeqCst)
    }
}

impl NotificationLedger for FlakyLedger {
    fn claim(&self, entry: LedgerEntry) -> Result<LedgerClaim, LedgerError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        if self.refused.as_ref() == Some(&entry.key.coi_id) || consume_failure(&self.claim_failures)
        {
            return Err(LedgerError::Unavailable("ledger write timed out".to_string()));
        }
        self.rows.claim(entry)
    }

    fn release(&self, key: &NotificationKey) -> Result<(), LedgerError> {
        if consume_failure(&self.release_failures) {
            return Err(LedgerError::Unavailable("ledger write timed out".to_string()));
        }
        self.rows.release(key)
    }
}

/// In-memory audit log that refuses to append the actions it is told to.
#[derive(Default)]
pub(super) struct FlakyAuditLog {
    log: InMemoryAuditLog,
    refused: Mutex<Vec<AuditAction>>,
}

impl FlakyAuditLog {
    pub(super) fn refuse(&self, action: AuditAction) {
        self.refused.lock().expect("audit mutex poisoned").push(action);
    }

    pub(super) fn recover(&self) {
        self.refused.lock().expect("audit mutex poisoned").clear();
    }

    pub(super) fn entries(&self) -> Vec<AuditEntry> {
        self.log.entries()
    }
}

impl AuditSink for FlakyAuditLog {
    fn append(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        let refused = self.refused.lock().expect("audit mutex poisoned");
        if refused.contains(&event.action) {
            return Err(AuditError::Unavailable("audit store offline".to_string()));
        }
        self.log.append(event)
    }

    fn matching(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        self.log.matching(query)
    }
}

pub(super) type FlakyAuditLifecycle =
    CoiLifecycle<InMemoryCoiRepository, InMemoryRequirementStore, FlakyAuditLog>;

/// Lifecycle whose audit sink can be taken offline, with [`standard_terms`] active.
pub(super) fn flaky_audit_lifecycle(
    mode: AutoApplyMode,
) -> (FlakyAuditLifecycle, Arc<FlakyAuditLog>) {
    let audit = Arc::new(FlakyAuditLog::default());
    let lifecycle = CoiLifecycle::new(
        Arc::new(InMemoryCoiRepository::default()),
        Arc::new(InMemoryRequirementStore::default()),
        audit.clone(),
    )
    .with_auto_apply(mode);
    lifecycle
        .requirements()
        .activate(&building(), standard_terms(), now())
        .expect("requirement activates");
    (lifecycle, audit)
}

pub(super) struct UnavailableRepository;

impl CoiRepository for UnavailableRepository {
    fn next_id(&self) -> Result<CoiId, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn insert(&self, _record: CoiRecord) -> Result<CoiRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _record: CoiRecord, _expected: u64) -> Result<CoiRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &CoiId) -> Result<Option<CoiRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _filter: &CoiFilter) -> Result<Vec<CoiRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) async fn read_text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
