use chrono::NaiveDate;

use super::reason::{ComplianceReason, CoverageLine, EndorsementFlag};
use crate::compliance::domain::CoverageSnapshot;
use crate::compliance::requirements::RequirementTerms;

/// Certificate must be in force on `today`: `effective_date <= today < expiration_date`.
pub(crate) fn temporal_validity(
    snapshot: &CoverageSnapshot,
    today: NaiveDate,
) -> Option<ComplianceReason> {
    if today >= snapshot.effective_date && today < snapshot.expiration_date {
        return None;
    }

    Some(ComplianceReason::ExpiredOrNotYetEffective {
        today,
        effective_date: snapshot.effective_date,
        expiration_date: snapshot.expiration_date,
    })
}

pub(crate) fn coverage_minimums(
    snapshot: &CoverageSnapshot,
    terms: &RequirementTerms,
) -> Vec<ComplianceReason> {
    let lines = [
        (
            CoverageLine::GlOccurrence,
            terms.general_liability_occurrence_min,
            snapshot.general_liability.each_occurrence,
        ),
        (
            CoverageLine::GlAggregate,
            terms.general_liability_aggregate_min,
            snapshot.general_liability.aggregate,
        ),
        (
            CoverageLine::AutoCombined,
            terms.auto_combined_min,
            snapshot.auto_liability.combined_single,
        ),
        (
            CoverageLine::Umbrella,
            terms.umbrella_min,
            snapshot.umbrella.each_occurrence,
        ),
        (
            CoverageLine::WorkersComp,
            terms.workers_comp_min,
            snapshot.workers_comp.each_accident,
        ),
    ];

    lines
        .into_iter()
        .filter_map(|(line, required, provided)| {
            let required = required?;
            match provided {
                Some(limit) if limit >= required => None,
                _ => Some(ComplianceReason::LimitBelowMinimum {
                    line,
                    required,
                    provided,
                }),
            }
        })
        .collect()
}

pub(crate) fn endorsement_flags(
    snapshot: &CoverageSnapshot,
    terms: &RequirementTerms,
) -> Vec<ComplianceReason> {
    let flags = [
        (
            EndorsementFlag::AdditionalInsured,
            terms.additional_insured_required,
            snapshot.endorsements.additional_insured,
        ),
        (
            EndorsementFlag::WaiverOfSubrogation,
            terms.waiver_of_subrogation_required,
            snapshot.endorsements.waiver_of_subrogation,
        ),
        (
            EndorsementFlag::PrimaryNonContributory,
            terms.primary_non_contributory_required,
            snapshot.endorsements.primary_non_contributory,
        ),
    ];

    flags
        .into_iter()
        .filter(|(_, required, present)| *required && !*present)
        .map(|(flag, _, _)| ComplianceReason::MissingFlag { flag })
        .collect()
}

pub(crate) fn notice_of_cancellation(
    snapshot: &CoverageSnapshot,
    terms: &RequirementTerms,
) -> Option<ComplianceReason> {
    let required_days = terms.notice_of_cancellation_min_days?;
    match snapshot.notice_of_cancellation_days {
        Some(days) if days >= required_days => None,
        provided_days => Some(ComplianceReason::NoticeTooShort {
            required_days,
            provided_days,
        }),
    }
}
