use chrono::{DateTime, Duration, NaiveDate, Utc};
use coi_engine::compliance::{
    AuditActor, AutoApplyMode, BuildingId, CoiLifecycle, CoiOwner, CoiSubmission,
    CoverageSnapshot, CoverageType, DeliveryError, EndorsementFlags, ExpiryReminder,
    ExpiryReminderScheduler, GeneralLiabilityLimits, InMemoryAuditLog, InMemoryCoiRepository,
    InMemoryLedger, InMemoryReminderOutbox, InMemoryRequirementStore, LifecycleError,
    ReminderPublisher, ReminderSchedule, RequirementTerms, SubmissionOutcome, TenantId,
    VendorId, WorkersCompLimits,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ServiceLifecycle =
    CoiLifecycle<InMemoryCoiRepository, InMemoryRequirementStore, InMemoryAuditLog>;
pub(crate) type ServiceScheduler =
    ExpiryReminderScheduler<InMemoryCoiRepository, InMemoryLedger, LoggingReminderPublisher>;

/// Stand-in for the SMS gateway: logs each reminder and keeps it in an outbox.
#[derive(Default, Clone)]
pub(crate) struct LoggingReminderPublisher {
    outbox: InMemoryReminderOutbox,
}

impl LoggingReminderPublisher {
    pub(crate) fn delivered(&self) -> Vec<ExpiryReminder> {
        self.outbox.delivered()
    }
}

impl ReminderPublisher for LoggingReminderPublisher {
    fn publish(&self, reminder: &ExpiryReminder) -> Result<(), DeliveryError> {
        info!(
            coi_id = %reminder.coi_id,
            owner = reminder.owner.id(),
            tag = %reminder.threshold.tag(),
            days_left = reminder.days_left,
            "dispatching expiry reminder"
        );
        self.outbox.publish(reminder)
    }
}

pub(crate) struct Services {
    pub(crate) lifecycle: Arc<ServiceLifecycle>,
    pub(crate) scheduler: Arc<ServiceScheduler>,
    pub(crate) publisher: Arc<LoggingReminderPublisher>,
}

/// Wire the engine over in-process stores sharing one certificate repository.
pub(crate) fn build_services(auto_apply: AutoApplyMode, schedule: ReminderSchedule) -> Services {
    let repository = Arc::new(InMemoryCoiRepository::default());
    let lifecycle = CoiLifecycle::new(
        repository.clone(),
        Arc::new(InMemoryRequirementStore::default()),
        Arc::new(InMemoryAuditLog::default()),
    )
    .with_auto_apply(auto_apply);

    let publisher = Arc::new(LoggingReminderPublisher::default());
    let scheduler = ExpiryReminderScheduler::with_schedule(
        repository,
        Arc::new(InMemoryLedger::default()),
        publisher.clone(),
        schedule,
    );

    Services {
        lifecycle: Arc::new(lifecycle),
        scheduler: Arc::new(scheduler),
        publisher,
    }
}

pub(crate) fn harbor_point() -> BuildingId {
    BuildingId("bldg-harbor-point".to_string())
}

pub(crate) fn riverside() -> BuildingId {
    BuildingId("bldg-riverside".to_string())
}

pub(crate) fn harbor_point_terms() -> RequirementTerms {
    RequirementTerms {
        general_liability_occurrence_min: Some(1_000_000),
        general_liability_aggregate_min: Some(2_000_000),
        workers_comp_min: Some(500_000),
        additional_insured_required: true,
        waiver_of_subrogation_required: true,
        notice_of_cancellation_min_days: Some(30),
        certificate_holder: Some("Harbor Point Owner LLC".to_string()),
        holder_address: Some("100 Harbor Point Blvd, Baltimore, MD".to_string()),
        additional_insured_wording: Some(
            "Harbor Point Owner LLC and its managing agent".to_string(),
        ),
        ..RequirementTerms::default()
    }
}

pub(crate) fn riverside_terms() -> RequirementTerms {
    RequirementTerms {
        general_liability_occurrence_min: Some(1_000_000),
        additional_insured_required: true,
        ..RequirementTerms::default()
    }
}

/// Coverage matching the Harbor Point template, effective a year before it expires.
pub(crate) fn snapshot(insured: &str, expiration_date: NaiveDate) -> CoverageSnapshot {
    CoverageSnapshot {
        insured_name: Some(insured.to_string()),
        general_liability: GeneralLiabilityLimits {
            each_occurrence: Some(1_000_000),
            aggregate: Some(2_000_000),
            ..GeneralLiabilityLimits::default()
        },
        auto_liability: Default::default(),
        umbrella: Default::default(),
        workers_comp: WorkersCompLimits {
            each_accident: Some(500_000),
            ..WorkersCompLimits::default()
        },
        endorsements: EndorsementFlags {
            additional_insured: true,
            waiver_of_subrogation: true,
            primary_non_contributory: false,
        },
        notice_of_cancellation_days: Some(30),
        effective_date: expiration_date - Duration::days(365),
        expiration_date,
        coverage_types: vec![
            CoverageType::GeneralLiability,
            CoverageType::WorkersCompensation,
        ],
    }
}

pub(crate) fn vendor(id: &str) -> CoiOwner {
    CoiOwner::Vendor(VendorId(id.to_string()))
}

pub(crate) fn tenant(id: &str) -> CoiOwner {
    CoiOwner::Tenant(TenantId(id.to_string()))
}

/// Requirement templates for the demo buildings plus a spread of certificates around `now`.
pub(crate) fn seed_demo_data(
    lifecycle: &ServiceLifecycle,
    now: DateTime<Utc>,
) -> Result<Vec<SubmissionOutcome>, LifecycleError> {
    let today = now.date_naive();
    lifecycle.activate_requirement(&harbor_point(), harbor_point_terms(), AuditActor::System, now)?;
    lifecycle.activate_requirement(&riverside(), riverside_terms(), AuditActor::System, now)?;

    let mut under_insured = snapshot("Keystone Electric LLC", today + Duration::days(200));
    under_insured.general_liability.each_occurrence = Some(500_000);

    let submissions = [
        CoiSubmission {
            building_id: harbor_point(),
            owner: vendor("vendor-brightline-hvac"),
            snapshot: snapshot("Brightline HVAC Inc.", today + Duration::days(10)),
            attachments: Vec::new(),
        },
        CoiSubmission {
            building_id: harbor_point(),
            owner: vendor("vendor-keystone-electric"),
            snapshot: under_insured,
            attachments: Vec::new(),
        },
        CoiSubmission {
            building_id: riverside(),
            owner: tenant("tenant-suite-410"),
            snapshot: snapshot("Suite 410 Dental PC", today + Duration::days(28)),
            attachments: Vec::new(),
        },
        CoiSubmission {
            building_id: riverside(),
            owner: vendor("vendor-clearview-windows"),
            snapshot: snapshot("Clearview Window Cleaning", today - Duration::days(1)),
            attachments: Vec::new(),
        },
    ];

    submissions
        .into_iter()
        .map(|submission| lifecycle.submit(submission, now))
        .collect()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Midday UTC on `date`, the instant CLI commands run at when given a date.
pub(crate) fn at_midday(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(12, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}
