mod reason;
mod rules;

pub use reason::{ComplianceReason, CoverageLine, EndorsementFlag};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::CoverageSnapshot;
use super::requirements::{RequirementTemplate, TemplateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Evaluation output: the verdict, every unmet requirement, and the template it was judged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reasons: Vec<ComplianceReason>,
    pub template_id: TemplateId,
    pub evaluated_on: NaiveDate,
}

impl Evaluation {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn reason_codes(&self) -> Vec<String> {
        self.reasons.iter().map(ComplianceReason::code).collect()
    }

    pub fn summary(&self) -> String {
        if self.reasons.is_empty() {
            return "meets building requirements".to_string();
        }

        let details: Vec<String> = self.reasons.iter().map(ComplianceReason::summary).collect();
        format!("requirements not met: {}", details.join("; "))
    }
}

/// Stateless comparison of extracted coverage against a requirement template.
///
/// The temporal, limit, endorsement, and notice checks run independently and all failures
/// are reported together. Only a structurally invalid snapshot short-circuits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceEvaluator;

impl ComplianceEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        snapshot: &CoverageSnapshot,
        requirement: &RequirementTemplate,
        today: NaiveDate,
    ) -> Evaluation {
        let reasons = match snapshot.validate() {
            Err(defect) => vec![ComplianceReason::InvalidSnapshot { defect }],
            Ok(()) => {
                let terms = &requirement.terms;
                let mut reasons = Vec::new();
                reasons.extend(rules::temporal_validity(snapshot, today));
                reasons.extend(rules::coverage_minimums(snapshot, terms));
                reasons.extend(rules::endorsement_flags(snapshot, terms));
                reasons.extend(rules::notice_of_cancellation(snapshot, terms));
                reasons
            }
        };

        let verdict = if reasons.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        Evaluation {
            verdict,
            reasons,
            template_id: requirement.id.clone(),
            evaluated_on: today,
        }
    }
}
