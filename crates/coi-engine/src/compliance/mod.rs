//! Certificate-of-insurance compliance: requirement templates, evaluation, lifecycle, and
//! expiry reminders.
//!
//! Every operation that depends on the date takes `now` explicitly; nothing in this module
//! reads the system clock except the HTTP handlers and the background worker.

pub mod audit;
pub mod domain;
pub mod evaluation;
pub mod export;
pub mod lifecycle;
pub mod memory;
pub mod reminders;
pub mod repository;
pub mod requirements;
pub mod router;

#[cfg(test)]
mod tests;

pub use audit::{
    AuditAction, AuditActor, AuditEntry, AuditError, AuditEvent, AuditPage, AuditQuery,
    AuditSink, SortOrder,
};
pub use domain::{
    Attachment, AttachmentKind, AutoLiabilityLimits, BuildingId, CoiId, CoiOwner, CoiStatus,
    CoiSubmission, CoverageSnapshot, CoverageType, EndorsementFlags, GeneralLiabilityLimits,
    ReviewDecision, SnapshotError, TenantId, UmbrellaLimits, VendorId, WorkersCompLimits,
};
pub use evaluation::{
    ComplianceEvaluator, ComplianceReason, CoverageLine, EndorsementFlag, Evaluation, Verdict,
};
pub use export::{audit_to_csv, cois_to_csv, ExportError};
pub use lifecycle::{
    AccessCheck, AccessDenial, AutoApplyMode, CoiLifecycle, LifecycleError, ReviewRequest,
    SubmissionOutcome, SweepReport,
};
pub use memory::{
    InMemoryAuditLog, InMemoryCoiRepository, InMemoryLedger, InMemoryReminderOutbox,
    InMemoryRequirementStore,
};
pub use reminders::{
    run_expiry_jobs, DeliveryError, ExpiryReminder, ExpiryReminderScheduler, LedgerClaim,
    LedgerEntry, LedgerError, NotificationKey, NotificationKind, NotificationLedger,
    ReminderError, ReminderPublisher, ReminderSchedule, ReminderThreshold, TickReport,
};
pub use repository::{
    CoiFilter, CoiRecord, CoiRepository, CoiStatusView, RepositoryError, ReviewRecord,
};
pub use requirements::{
    RequirementResolver, RequirementStore, RequirementTemplate, RequirementTerms, ResolveError,
    TemplateId,
};
pub use router::compliance_router;
