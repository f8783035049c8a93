use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::BuildingId;
use super::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Minimum insurance terms a building imposes. Limits are whole currency units; `None` means
/// the line is not required and is never checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementTerms {
    #[serde(default)]
    pub general_liability_occurrence_min: Option<u64>,
    #[serde(default)]
    pub general_liability_aggregate_min: Option<u64>,
    #[serde(default)]
    pub auto_combined_min: Option<u64>,
    #[serde(default)]
    pub umbrella_min: Option<u64>,
    #[serde(default)]
    pub workers_comp_min: Option<u64>,
    #[serde(default)]
    pub additional_insured_required: bool,
    #[serde(default)]
    pub waiver_of_subrogation_required: bool,
    #[serde(default)]
    pub primary_non_contributory_required: bool,
    #[serde(default)]
    pub notice_of_cancellation_min_days: Option<u16>,
    #[serde(default)]
    pub certificate_holder: Option<String>,
    #[serde(default)]
    pub holder_address: Option<String>,
    #[serde(default)]
    pub additional_insured_wording: Option<String>,
}

/// A building's requirement template. Superseded templates stay on record with `active = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementTemplate {
    pub id: TemplateId,
    pub building_id: BuildingId,
    pub terms: RequirementTerms,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Storage for requirement templates.
///
/// Implementations must keep at most one active template per building: `replace_active`
/// deactivates the current template and stores the new one as a single atomic step.
pub trait RequirementStore: Send + Sync {
    /// Allocate a template identifier no stored template uses.
    fn next_template_id(&self) -> Result<TemplateId, RepositoryError>;
    fn active(&self, building: &BuildingId) -> Result<Option<RequirementTemplate>, RepositoryError>;
    /// Returns the template that was deactivated, if any.
    fn replace_active(
        &self,
        template: RequirementTemplate,
        now: DateTime<Utc>,
    ) -> Result<Option<RequirementTemplate>, RepositoryError>;
    fn history(&self, building: &BuildingId) -> Result<Vec<RequirementTemplate>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("building {0} has no active requirement template")]
    NoActiveRequirement(BuildingId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Looks up and rotates the requirement template in force for each building.
pub struct RequirementResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for RequirementResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RequirementResolver<S>
where
    S: RequirementStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The single active template for `building`. A missing template means the certificate
    /// cannot be evaluated; it never counts as a pass.
    pub fn resolve(&self, building: &BuildingId) -> Result<RequirementTemplate, ResolveError> {
        match self.store.active(building)? {
            Some(template) if template.active => Ok(template),
            _ => Err(ResolveError::NoActiveRequirement(building.clone())),
        }
    }

    /// Install `terms` as the building's active template, retiring the previous one.
    pub fn activate(
        &self,
        building: &BuildingId,
        terms: RequirementTerms,
        now: DateTime<Utc>,
    ) -> Result<RequirementTemplate, ResolveError> {
        let template = RequirementTemplate {
            id: self.store.next_template_id()?,
            building_id: building.clone(),
            terms,
            active: true,
            created_at: now,
            deactivated_at: None,
        };

        let retired = self.store.replace_active(template.clone(), now)?;
        info!(
            building_id = %building.0,
            template_id = %template.id.0,
            retired = retired.as_ref().map(|previous| previous.id.0.as_str()).unwrap_or("none"),
            "requirement template activated"
        );

        Ok(template)
    }

    /// Every template the building has had, newest first.
    pub fn history(&self, building: &BuildingId) -> Result<Vec<RequirementTemplate>, ResolveError> {
        let mut templates = self.store.history(building)?;
        templates.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(templates)
    }
}
