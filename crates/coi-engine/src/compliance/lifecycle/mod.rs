//! COI lifecycle: submission, reviewer decisions, and time-based expiry.
//!
//! Status changes go through the transition table in [`machine`] and are persisted with an
//! optimistic version check, so two concurrent decisions on the same certificate cannot both
//! land. Every change appends an audit event.

mod machine;

pub use machine::IllegalTransition;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::audit::{
    AuditAction, AuditActor, AuditEntry, AuditError, AuditEvent, AuditPage, AuditQuery, AuditSink,
};
use super::domain::{
    BuildingId, CoiId, CoiOwner, CoiStatus, CoiSubmission, ReviewDecision, SnapshotError,
};
use super::evaluation::{ComplianceEvaluator, ComplianceReason, Evaluation, Verdict};
use super::repository::{CoiFilter, CoiRecord, CoiRepository, RepositoryError, ReviewRecord};
use super::requirements::{
    RequirementResolver, RequirementStore, RequirementTemplate, RequirementTerms, ResolveError,
};
use machine::check_transition;

/// Whether an evaluation result is applied to the certificate without a reviewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoApplyMode {
    /// The verdict is attached as advisory data; a reviewer decides.
    #[default]
    Advisory,
    /// Passing certificates are approved; failing ones wait for a reviewer.
    ApprovePassing,
    /// Passing certificates are approved and failing ones rejected.
    ApproveAndReject,
}

impl AutoApplyMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "advisory" | "off" | "none" => Some(Self::Advisory),
            "approve_passing" => Some(Self::ApprovePassing),
            "approve_and_reject" | "full" => Some(Self::ApproveAndReject),
            _ => None,
        }
    }

    fn target(self, verdict: Verdict) -> Option<CoiStatus> {
        match (self, verdict) {
            (Self::Advisory, _) => None,
            (_, Verdict::Pass) => Some(CoiStatus::Approved),
            (Self::ApprovePassing, Verdict::Fail) => None,
            (Self::ApproveAndReject, Verdict::Fail) => Some(CoiStatus::Rejected),
        }
    }
}

/// Result of a submission; the verdict is exposed whatever the auto-apply mode.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub record: CoiRecord,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<CoiId>,
    /// Certificates that changed underneath the sweep; the next sweep picks them up.
    pub skipped: usize,
    /// Certificates left as they were because their audit entry could not be written.
    pub audit_failed: Vec<CoiId>,
}

/// Guard-desk answer: does the owner hold an approved certificate in force today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessCheck {
    pub building_id: BuildingId,
    pub owner: CoiOwner,
    pub cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coi_id: Option<CoiId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<AccessDenial>,
}

/// Why an owner is not cleared, judged from the most promising certificate on file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessDenial {
    /// An approved certificate exists but its coverage has not started.
    NotYetEffective { effective_date: NaiveDate },
    /// The latest approved certificate has run out.
    Lapsed { expiration_date: NaiveDate },
    /// A certificate is on file but still waits for a reviewer.
    PendingReview,
    /// Nothing approved or pending: no certificate, or only rejected ones.
    NoApprovedCertificate,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("certificate {0} not found")]
    NotFound(CoiId),
    #[error("building {0} has no active requirement template")]
    NoActiveRequirement(BuildingId),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),
    #[error("certificate {coi_id} cannot move from {from} to {to}")]
    InvalidTransition {
        coi_id: CoiId,
        from: CoiStatus,
        to: CoiStatus,
    },
    #[error(
        "approving certificate {coi_id} over {} unmet requirement(s) needs an override note",
        .reasons.len()
    )]
    OverrideReasonRequired {
        coi_id: CoiId,
        reasons: Vec<ComplianceReason>,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl From<ResolveError> for LifecycleError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::NoActiveRequirement(building) => Self::NoActiveRequirement(building),
            ResolveError::Repository(err) => Self::Repository(err),
        }
    }
}

/// Service composing the requirement resolver, evaluator, certificate store, and audit sink.
pub struct CoiLifecycle<R, Q, A> {
    repository: Arc<R>,
    requirements: RequirementResolver<Q>,
    audit: Arc<A>,
    evaluator: ComplianceEvaluator,
    auto_apply: AutoApplyMode,
}

impl<R, Q, A> CoiLifecycle<R, Q, A>
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    pub fn new(repository: Arc<R>, requirements: Arc<Q>, audit: Arc<A>) -> Self {
        Self {
            repository,
            requirements: RequirementResolver::new(requirements),
            audit,
            evaluator: ComplianceEvaluator::new(),
            auto_apply: AutoApplyMode::default(),
        }
    }

    pub fn with_auto_apply(mut self, mode: AutoApplyMode) -> Self {
        self.auto_apply = mode;
        self
    }

    pub fn auto_apply(&self) -> AutoApplyMode {
        self.auto_apply
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Register an ingested certificate in PENDING and attach its evaluation.
    pub fn submit(
        &self,
        submission: CoiSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, LifecycleError> {
        submission.snapshot.validate()?;
        let requirement = self.requirements.resolve(&submission.building_id)?;
        let evaluation =
            self.evaluator
                .evaluate(&submission.snapshot, &requirement, now.date_naive());

        let record = CoiRecord {
            id: self.repository.next_id()?,
            building_id: submission.building_id,
            owner: submission.owner,
            snapshot: submission.snapshot,
            status: CoiStatus::Pending,
            evaluation: Some(evaluation.clone()),
            review: None,
            attachments: submission.attachments,
            submitted_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = self.repository.insert(record)?;
        self.audit.append(AuditEvent::coi(
            &stored.id.0,
            AuditAction::CoiSubmitted,
            AuditActor::System,
            json!({
                "building_id": stored.building_id.0,
                "owner": stored.owner,
                "template_id": evaluation.template_id.0,
                "verdict": evaluation.verdict,
                "reasons": evaluation.reason_codes(),
            }),
            now,
        ))?;
        info!(
            coi_id = %stored.id.0,
            building_id = %stored.building_id.0,
            verdict = ?evaluation.verdict,
            reasons = evaluation.reasons.len(),
            "certificate submitted"
        );

        let record = match self.auto_apply.target(evaluation.verdict) {
            Some(target) => {
                match self.apply_automatically(stored.clone(), target, &evaluation, now) {
                    Ok(record) => record,
                    Err(LifecycleError::Audit(err)) => {
                        warn!(
                            coi_id = %stored.id.0,
                            error = %err,
                            "automatic decision not recorded; certificate left for review"
                        );
                        self.get(&stored.id)?
                    }
                    Err(err) => return Err(err),
                }
            }
            None => stored,
        };

        Ok(SubmissionOutcome { record, evaluation })
    }

    fn apply_automatically(
        &self,
        record: CoiRecord,
        target: CoiStatus,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<CoiRecord, LifecycleError> {
        let coi_id = record.id.clone();
        let from = record.status;
        check_transition(from, target).map_err(|_| LifecycleError::InvalidTransition {
            coi_id: coi_id.clone(),
            from,
            to: target,
        })?;

        let expected = record.version;
        let previous = record.clone();
        let mut updated = record;
        updated.status = target;
        updated.updated_at = now;
        let stored = match self.repository.update(updated, expected) {
            Ok(stored) => stored,
            Err(RepositoryError::VersionConflict { .. }) => {
                return Err(self.lost_race(&coi_id, target))
            }
            Err(err) => return Err(err.into()),
        };

        let action = match target {
            CoiStatus::Approved => AuditAction::AutoApproved,
            _ => AuditAction::AutoRejected,
        };
        self.audit_transition(
            previous,
            &stored,
            AuditEvent::coi(
                &coi_id.0,
                action,
                AuditActor::System,
                json!({
                    "from": from.label(),
                    "to": target.label(),
                    "reasons": evaluation.reasons,
                }),
                now,
            ),
        )?;
        info!(coi_id = %coi_id.0, status = target.label(), "evaluation applied automatically");

        Ok(stored)
    }

    /// Re-run the evaluation against the building's current template without changing state.
    pub fn evaluate(&self, coi_id: &CoiId, today: NaiveDate) -> Result<Evaluation, LifecycleError> {
        let record = self.get(coi_id)?;
        let requirement = self.requirements.resolve(&record.building_id)?;
        Ok(self.evaluator.evaluate(&record.snapshot, &requirement, today))
    }

    /// Record a reviewer's decision on a pending certificate.
    ///
    /// The evaluation is re-run first because the building's template may have changed since
    /// submission. Approving a failing certificate requires a non-blank override note.
    pub fn review(
        &self,
        coi_id: &CoiId,
        request: ReviewRequest,
        now: DateTime<Utc>,
    ) -> Result<CoiRecord, LifecycleError> {
        let record = self.get(coi_id)?;
        let target = request.decision.target_status();
        if record.status != CoiStatus::Pending {
            return Err(LifecycleError::InvalidTransition {
                coi_id: coi_id.clone(),
                from: record.status,
                to: target,
            });
        }

        let requirement = self.requirements.resolve(&record.building_id)?;
        let evaluation = self
            .evaluator
            .evaluate(&record.snapshot, &requirement, now.date_naive());

        let notes = request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string);
        let overriding = request.decision == ReviewDecision::Approve && !evaluation.passed();
        if overriding && notes.is_none() {
            warn!(
                coi_id = %coi_id.0,
                reviewer_id = %request.reviewer_id,
                reasons = ?evaluation.reason_codes(),
                "approval over failed evaluation refused without override note"
            );
            return Err(LifecycleError::OverrideReasonRequired {
                coi_id: coi_id.clone(),
                reasons: evaluation.reasons,
            });
        }

        let from = record.status;
        check_transition(from, target).map_err(|_| LifecycleError::InvalidTransition {
            coi_id: coi_id.clone(),
            from,
            to: target,
        })?;

        let expected = record.version;
        let previous = record.clone();
        let mut updated = record;
        updated.status = target;
        updated.evaluation = Some(evaluation.clone());
        updated.review = Some(ReviewRecord {
            reviewer_id: request.reviewer_id.clone(),
            decision: request.decision,
            reviewed_at: now,
            notes: notes.clone(),
            overrode_failed_evaluation: overriding,
        });
        updated.updated_at = now;

        let stored = match self.repository.update(updated, expected) {
            Ok(stored) => stored,
            Err(RepositoryError::VersionConflict { .. }) => {
                return Err(self.lost_race(coi_id, target))
            }
            Err(err) => return Err(err.into()),
        };

        let action = match request.decision {
            ReviewDecision::Approve => AuditAction::ReviewApproved,
            ReviewDecision::Reject => AuditAction::ReviewRejected,
        };
        self.audit_transition(
            previous,
            &stored,
            AuditEvent::coi(
                &coi_id.0,
                action,
                AuditActor::Reviewer(request.reviewer_id.clone()),
                json!({
                    "template_id": evaluation.template_id.0,
                    "verdict": evaluation.verdict,
                    "reasons": evaluation.reasons,
                    "override": overriding,
                    "notes": notes,
                }),
                now,
            ),
        )?;
        info!(
            coi_id = %coi_id.0,
            reviewer_id = %request.reviewer_id,
            status = target.label(),
            overriding,
            "certificate reviewed"
        );

        Ok(stored)
    }

    /// Append the audit entry for a transition that is already stored. If the sink refuses it,
    /// the record is put back to `previous` so a transition never persists without its entry.
    fn audit_transition(
        &self,
        previous: CoiRecord,
        stored: &CoiRecord,
        event: AuditEvent,
    ) -> Result<(), LifecycleError> {
        let err = match self.audit.append(event) {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        let restored_status = previous.status;
        match self.repository.update(previous, stored.version) {
            Ok(_) => warn!(
                coi_id = %stored.id.0,
                status = restored_status.label(),
                error = %err,
                "audit append failed; transition rolled back"
            ),
            Err(rollback) => error!(
                coi_id = %stored.id.0,
                status = stored.status.label(),
                error = %err,
                rollback_error = %rollback,
                "audit append failed and the transition could not be rolled back"
            ),
        }
        Err(err.into())
    }

    /// A concurrent writer won; report the status it left behind.
    fn lost_race(&self, coi_id: &CoiId, target: CoiStatus) -> LifecycleError {
        match self.repository.fetch(coi_id) {
            Ok(Some(current)) => LifecycleError::InvalidTransition {
                coi_id: coi_id.clone(),
                from: current.status,
                to: target,
            },
            Ok(None) => LifecycleError::NotFound(coi_id.clone()),
            Err(err) => err.into(),
        }
    }

    /// Move every PENDING or APPROVED certificate whose expiration date is on or before
    /// `now` to EXPIRED. Rejected certificates keep their status.
    pub fn sweep_expirations(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let today = now.date_naive();
        let candidates = self.repository.list(&CoiFilter::tracked())?;
        let mut report = SweepReport::default();

        for record in candidates
            .into_iter()
            .filter(|record| record.expiration_date() <= today)
        {
            let coi_id = record.id.clone();
            let from = record.status;
            if check_transition(from, CoiStatus::Expired).is_err() {
                continue;
            }

            let expired_on = record.expiration_date();
            let expected = record.version;
            let previous = record.clone();
            let mut updated = record;
            updated.status = CoiStatus::Expired;
            updated.updated_at = now;

            let stored = match self.repository.update(updated, expected) {
                Ok(stored) => stored,
                Err(RepositoryError::VersionConflict { .. }) => {
                    debug!(coi_id = %coi_id.0, "certificate changed during sweep; deferring");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let event = AuditEvent::coi(
                &coi_id.0,
                AuditAction::StatusExpired,
                AuditActor::System,
                json!({
                    "from": from.label(),
                    "expiration_date": expired_on,
                }),
                now,
            );
            match self.audit_transition(previous, &stored, event) {
                Ok(()) => report.expired.push(coi_id),
                Err(LifecycleError::Audit(_)) => report.audit_failed.push(coi_id),
                Err(err) => return Err(err),
            }
        }

        if !report.expired.is_empty() || report.skipped > 0 || !report.audit_failed.is_empty() {
            info!(
                expired = report.expired.len(),
                skipped = report.skipped,
                audit_failed = report.audit_failed.len(),
                "expiration sweep complete"
            );
        } else {
            debug!("expiration sweep found nothing to expire");
        }

        Ok(report)
    }

    pub fn get(&self, coi_id: &CoiId) -> Result<CoiRecord, LifecycleError> {
        self.repository
            .fetch(coi_id)?
            .ok_or_else(|| LifecycleError::NotFound(coi_id.clone()))
    }

    pub fn list(&self, filter: &CoiFilter) -> Result<Vec<CoiRecord>, LifecycleError> {
        let mut records = self.repository.list(filter)?;
        records.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(records)
    }

    pub fn access_status(
        &self,
        building_id: &BuildingId,
        owner: &CoiOwner,
        today: NaiveDate,
    ) -> Result<AccessCheck, LifecycleError> {
        let filter = CoiFilter {
            building_id: Some(building_id.clone()),
            owner: Some(owner.clone()),
            statuses: Vec::new(),
        };
        let on_file = self.repository.list(&filter)?;
        let approved: Vec<&CoiRecord> = on_file
            .iter()
            .filter(|record| record.status == CoiStatus::Approved)
            .collect();
        let best = approved
            .iter()
            .filter(|record| {
                record.snapshot.effective_date <= today && today < record.expiration_date()
            })
            .max_by_key(|record| record.expiration_date());

        let denial = match best {
            Some(_) => None,
            None => Some(denial_for(&on_file, &approved, today)),
        };

        Ok(AccessCheck {
            building_id: building_id.clone(),
            owner: owner.clone(),
            cleared: best.is_some(),
            valid_until: best.map(|record| record.expiration_date()),
            coi_id: best.map(|record| record.id.clone()),
            denial,
        })
    }

    pub fn requirements(&self) -> &RequirementResolver<Q> {
        &self.requirements
    }

    /// Replace the building's active requirement template and audit the change.
    pub fn activate_requirement(
        &self,
        building_id: &BuildingId,
        terms: RequirementTerms,
        actor: AuditActor,
        now: DateTime<Utc>,
    ) -> Result<RequirementTemplate, LifecycleError> {
        let template = self.requirements.activate(building_id, terms, now)?;
        self.audit.append(AuditEvent {
            entity: "REQUIREMENT_TEMPLATE".to_string(),
            entity_id: template.id.0.clone(),
            action: AuditAction::RequirementActivated,
            actor,
            details: json!({ "building_id": building_id.0 }),
            at: now,
        })?;
        Ok(template)
    }

    pub fn audit_log(&self, query: &AuditQuery) -> Result<AuditPage, LifecycleError> {
        Ok(self.audit.query(query)?)
    }

    pub fn audit_entries(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, LifecycleError> {
        Ok(self.audit.matching(query)?)
    }
}

fn denial_for(on_file: &[CoiRecord], approved: &[&CoiRecord], today: NaiveDate) -> AccessDenial {
    if let Some(effective_date) = approved
        .iter()
        .map(|record| record.snapshot.effective_date)
        .filter(|effective| *effective > today)
        .min()
    {
        return AccessDenial::NotYetEffective { effective_date };
    }

    let lapsed = on_file
        .iter()
        .filter(|record| matches!(record.status, CoiStatus::Approved | CoiStatus::Expired))
        .map(CoiRecord::expiration_date)
        .filter(|expiration| *expiration <= today)
        .max();
    if let Some(expiration_date) = lapsed {
        return AccessDenial::Lapsed { expiration_date };
    }

    if on_file
        .iter()
        .any(|record| record.status == CoiStatus::Pending)
    {
        AccessDenial::PendingReview
    } else {
        AccessDenial::NoApprovedCertificate
    }
}
