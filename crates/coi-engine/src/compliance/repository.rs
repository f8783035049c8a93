use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Attachment, BuildingId, CoiId, CoiOwner, CoiStatus, CoverageSnapshot, ReviewDecision,
};
use super::evaluation::{Evaluation, Verdict};

/// Reviewer sign-off captured when a pending certificate is decided by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub overrode_failed_evaluation: bool,
}

/// Stored certificate with its coverage, latest evaluation, and lifecycle metadata.
///
/// `version` increases on every successful update and backs the optimistic concurrency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoiRecord {
    pub id: CoiId,
    pub building_id: BuildingId,
    pub owner: CoiOwner,
    pub snapshot: CoverageSnapshot,
    pub status: CoiStatus,
    pub evaluation: Option<Evaluation>,
    pub review: Option<ReviewRecord>,
    pub attachments: Vec<Attachment>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl CoiRecord {
    pub fn expiration_date(&self) -> NaiveDate {
        self.snapshot.expiration_date
    }

    pub fn decision_rationale(&self) -> String {
        match (&self.review, &self.evaluation) {
            (Some(review), _) => match &review.notes {
                Some(notes) => format!("reviewed by {}: {notes}", review.reviewer_id),
                None => format!("reviewed by {}", review.reviewer_id),
            },
            (None, Some(evaluation)) => evaluation.summary(),
            (None, None) => "pending evaluation".to_string(),
        }
    }

    pub fn status_view(&self) -> CoiStatusView {
        CoiStatusView {
            coi_id: self.id.clone(),
            building_id: self.building_id.clone(),
            owner: self.owner.clone(),
            status: self.status.label(),
            verdict: self.evaluation.as_ref().map(|evaluation| evaluation.verdict),
            reasons: self
                .evaluation
                .as_ref()
                .map(Evaluation::reason_codes)
                .unwrap_or_default(),
            decision_rationale: self.decision_rationale(),
            expiration_date: self.snapshot.expiration_date,
        }
    }
}

/// Sanitized representation of a certificate for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct CoiStatusView {
    pub coi_id: CoiId,
    pub building_id: BuildingId,
    pub owner: CoiOwner,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub reasons: Vec<String>,
    pub decision_rationale: String,
    pub expiration_date: NaiveDate,
}

/// Listing filter; unset fields match everything and an empty `statuses` matches any status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoiFilter {
    pub building_id: Option<BuildingId>,
    pub owner: Option<CoiOwner>,
    pub statuses: Vec<CoiStatus>,
}

impl CoiFilter {
    pub fn tracked() -> Self {
        Self {
            statuses: vec![CoiStatus::Pending, CoiStatus::Approved],
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &CoiRecord) -> bool {
        self.building_id
            .as_ref()
            .map_or(true, |building| building == &record.building_id)
            && self.owner.as_ref().map_or(true, |owner| owner == &record.owner)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

/// Storage abstraction for certificates.
pub trait CoiRepository: Send + Sync {
    /// Allocate an identifier no stored certificate uses. Backends derive it from their own
    /// state so ids stay unique across restarts.
    fn next_id(&self) -> Result<CoiId, RepositoryError>;
    fn insert(&self, record: CoiRecord) -> Result<CoiRecord, RepositoryError>;
    /// Store `record` only when the persisted version still equals `expected_version`,
    /// returning the stored copy with its bumped version.
    fn update(&self, record: CoiRecord, expected_version: u64)
        -> Result<CoiRecord, RepositoryError>;
    fn fetch(&self, id: &CoiId) -> Result<Option<CoiRecord>, RepositoryError>;
    fn list(&self, filter: &CoiFilter) -> Result<Vec<CoiRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
