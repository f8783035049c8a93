use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for a managed building.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildingId(pub String);

/// Identifier wrapper for a submitted certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoiId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VendorId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

macro_rules! display_id {
    ($($name:ident),+) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })+
    };
}

display_id!(BuildingId, CoiId, VendorId, TenantId);

/// Party that must keep the certificate current. A COI always belongs to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CoiOwner {
    Vendor(VendorId),
    Tenant(TenantId),
}

impl CoiOwner {
    pub fn kind_label(&self) -> &'static str {
        match self {
            CoiOwner::Vendor(_) => "vendor",
            CoiOwner::Tenant(_) => "tenant",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            CoiOwner::Vendor(id) => &id.0,
            CoiOwner::Tenant(id) => &id.0,
        }
    }
}

/// Policy lines that can appear on a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageType {
    GeneralLiability,
    AutoLiability,
    Umbrella,
    WorkersCompensation,
}

/// General liability limits in whole currency units. `None` means the certificate did not state it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralLiabilityLimits {
    pub each_occurrence: Option<u64>,
    pub aggregate: Option<u64>,
    pub products_completed_ops: Option<u64>,
    pub personal_adv_injury: Option<u64>,
    pub medical_expense: Option<u64>,
    pub damage_to_rented_premises: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoLiabilityLimits {
    pub bodily_injury: Option<u64>,
    pub property_damage: Option<u64>,
    pub combined_single: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmbrellaLimits {
    pub each_occurrence: Option<u64>,
    pub retention: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersCompLimits {
    pub each_accident: Option<u64>,
    pub disease_each_employee: Option<u64>,
    pub disease_policy_limit: Option<u64>,
}

/// Endorsements marked on the certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementFlags {
    pub additional_insured: bool,
    pub waiver_of_subrogation: bool,
    pub primary_non_contributory: bool,
}

/// Structured coverage data extracted from a submitted certificate by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    #[serde(default)]
    pub insured_name: Option<String>,
    #[serde(default)]
    pub general_liability: GeneralLiabilityLimits,
    #[serde(default)]
    pub auto_liability: AutoLiabilityLimits,
    #[serde(default)]
    pub umbrella: UmbrellaLimits,
    #[serde(default)]
    pub workers_comp: WorkersCompLimits,
    #[serde(default)]
    pub endorsements: EndorsementFlags,
    #[serde(default)]
    pub notice_of_cancellation_days: Option<u16>,
    pub effective_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub coverage_types: Vec<CoverageType>,
}

impl CoverageSnapshot {
    /// Structural checks the evaluator relies on before comparing limits.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.coverage_types.is_empty() {
            return Err(SnapshotError::NoCoverageTypes);
        }

        if self.effective_date >= self.expiration_date {
            return Err(SnapshotError::InvalidDateRange {
                effective: self.effective_date,
                expiration: self.expiration_date,
            });
        }

        Ok(())
    }

    pub fn covers(&self, coverage: CoverageType) -> bool {
        self.coverage_types.contains(&coverage)
    }

    /// Whole days from `today` until expiry; negative once the certificate has lapsed.
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiration_date - today).num_days()
    }
}

/// Snapshot defects that make a certificate impossible to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "defect", rename_all = "snake_case")]
pub enum SnapshotError {
    #[error("certificate lists no coverage types")]
    NoCoverageTypes,
    #[error("effective date {effective} must precede expiration date {expiration}")]
    InvalidDateRange {
        effective: NaiveDate,
        expiration: NaiveDate,
    },
}

/// Lifecycle status of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoiStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl CoiStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CoiStatus::Pending => "PENDING",
            CoiStatus::Approved => "APPROVED",
            CoiStatus::Rejected => "REJECTED",
            CoiStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(CoiStatus::Pending),
            "APPROVED" => Some(CoiStatus::Approved),
            "REJECTED" => Some(CoiStatus::Rejected),
            "EXPIRED" => Some(CoiStatus::Expired),
            _ => None,
        }
    }

    /// Statuses that still take part in expiry sweeps and reminder ticks.
    pub const fn is_tracked(self) -> bool {
        matches!(self, CoiStatus::Pending | CoiStatus::Approved)
    }
}

impl fmt::Display for CoiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reviewer verdict on a pending certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub const fn target_status(self) -> CoiStatus {
        match self {
            ReviewDecision::Approve => CoiStatus::Approved,
            ReviewDecision::Reject => CoiStatus::Rejected,
        }
    }
}

/// File attached to a certificate; the engine never opens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentKind,
    pub storage_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentKind {
    Certificate,
    Endorsement,
    Other,
}

/// Ingestion payload: extracted coverage plus the building and owner linkage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoiSubmission {
    pub building_id: BuildingId,
    pub owner: CoiOwner,
    pub snapshot: CoverageSnapshot,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}
