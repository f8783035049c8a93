use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::compliance::domain::SnapshotError;

/// Coverage lines a requirement template can set a minimum for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageLine {
    GlOccurrence,
    GlAggregate,
    AutoCombined,
    Umbrella,
    WorkersComp,
}

impl CoverageLine {
    pub const fn code(self) -> &'static str {
        match self {
            CoverageLine::GlOccurrence => "GL_OCCURRENCE",
            CoverageLine::GlAggregate => "GL_AGGREGATE",
            CoverageLine::AutoCombined => "AUTO_COMBINED",
            CoverageLine::Umbrella => "UMBRELLA",
            CoverageLine::WorkersComp => "WORKERS_COMP",
        }
    }
}

/// Endorsements a requirement template can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndorsementFlag {
    AdditionalInsured,
    WaiverOfSubrogation,
    PrimaryNonContributory,
}

impl EndorsementFlag {
    pub const fn code(self) -> &'static str {
        match self {
            EndorsementFlag::AdditionalInsured => "ADDITIONAL_INSURED",
            EndorsementFlag::WaiverOfSubrogation => "WAIVER_OF_SUBROGATION",
            EndorsementFlag::PrimaryNonContributory => "PRIMARY_NON_CONTRIBUTORY",
        }
    }
}

/// One unmet requirement, carrying enough detail to render a reviewer-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ComplianceReason {
    InvalidSnapshot {
        defect: SnapshotError,
    },
    ExpiredOrNotYetEffective {
        today: NaiveDate,
        effective_date: NaiveDate,
        expiration_date: NaiveDate,
    },
    LimitBelowMinimum {
        line: CoverageLine,
        required: u64,
        provided: Option<u64>,
    },
    MissingFlag {
        flag: EndorsementFlag,
    },
    NoticeTooShort {
        required_days: u16,
        provided_days: Option<u16>,
    },
}

impl ComplianceReason {
    /// Stable machine code, e.g. `LIMIT_BELOW_MINIMUM:GL_OCCURRENCE`.
    pub fn code(&self) -> String {
        match self {
            ComplianceReason::InvalidSnapshot { .. } => "INVALID_SNAPSHOT".to_string(),
            ComplianceReason::ExpiredOrNotYetEffective { .. } => {
                "EXPIRED_OR_NOT_YET_EFFECTIVE".to_string()
            }
            ComplianceReason::LimitBelowMinimum { line, .. } => {
                format!("LIMIT_BELOW_MINIMUM:{}", line.code())
            }
            ComplianceReason::MissingFlag { flag } => format!("MISSING_FLAG:{}", flag.code()),
            ComplianceReason::NoticeTooShort { .. } => "NOTICE_TOO_SHORT".to_string(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ComplianceReason::InvalidSnapshot { defect } => format!("invalid certificate: {defect}"),
            ComplianceReason::ExpiredOrNotYetEffective {
                today,
                effective_date,
                expiration_date,
            } => format!(
                "certificate not in force on {today} (valid {effective_date} to {expiration_date})"
            ),
            ComplianceReason::LimitBelowMinimum {
                line,
                required,
                provided: Some(provided),
            } => format!(
                "{} limit {provided} below required {required}",
                line.code()
            ),
            ComplianceReason::LimitBelowMinimum {
                line,
                required,
                provided: None,
            } => format!("{} limit not provided (required {required})", line.code()),
            ComplianceReason::MissingFlag { flag } => format!("{} endorsement missing", flag.code()),
            ComplianceReason::NoticeTooShort {
                required_days,
                provided_days: Some(days),
            } => format!("notice of cancellation {days} days, required {required_days}"),
            ComplianceReason::NoticeTooShort {
                required_days,
                provided_days: None,
            } => format!("notice of cancellation not stated, required {required_days} days"),
        }
    }
}
