use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who caused an audited change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditActor {
    System,
    Reviewer(String),
}

impl AuditActor {
    pub fn label(&self) -> &str {
        match self {
            AuditActor::System => "system",
            AuditActor::Reviewer(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "COI.SUBMITTED")]
    CoiSubmitted,
    #[serde(rename = "REVIEW.APPROVED")]
    ReviewApproved,
    #[serde(rename = "REVIEW.REJECTED")]
    ReviewRejected,
    #[serde(rename = "AUTO.APPROVED")]
    AutoApproved,
    #[serde(rename = "AUTO.REJECTED")]
    AutoRejected,
    #[serde(rename = "STATUS.EXPIRED")]
    StatusExpired,
    #[serde(rename = "REQUIREMENT.ACTIVATED")]
    RequirementActivated,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            AuditAction::CoiSubmitted => "COI.SUBMITTED",
            AuditAction::ReviewApproved => "REVIEW.APPROVED",
            AuditAction::ReviewRejected => "REVIEW.REJECTED",
            AuditAction::AutoApproved => "AUTO.APPROVED",
            AuditAction::AutoRejected => "AUTO.REJECTED",
            AuditAction::StatusExpired => "STATUS.EXPIRED",
            AuditAction::RequirementActivated => "REQUIREMENT.ACTIVATED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            AuditAction::CoiSubmitted,
            AuditAction::ReviewApproved,
            AuditAction::ReviewRejected,
            AuditAction::AutoApproved,
            AuditAction::AutoRejected,
            AuditAction::StatusExpired,
            AuditAction::RequirementActivated,
        ]
        .into_iter()
        .find(|action| action.label().eq_ignore_ascii_case(raw.trim()))
    }
}

/// Event emitted by the engine; the sink assigns the id when it persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub entity: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub actor: AuditActor,
    pub details: Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn coi(
        coi_id: &str,
        action: AuditAction,
        actor: AuditActor,
        details: Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: "COI".to_string(),
            entity_id: coi_id.to_string(),
            action,
            actor,
            details,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_PAGE_LIMIT: usize = 25;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Filters and pagination for audit log reads. Time bounds are `[from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: usize,
    pub limit: usize,
    pub sort: SortOrder,
}

impl AuditQuery {
    pub fn for_entity(entity: &str, entity_id: &str) -> Self {
        Self {
            entity: Some(entity.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let event = &entry.event;
        self.entity.as_deref().map_or(true, |entity| entity == event.entity)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| id == event.entity_id)
            && self
                .actor
                .as_deref()
                .map_or(true, |actor| actor == event.actor.label())
            && self.action.map_or(true, |action| action == event.action)
            && self.from.map_or(true, |from| event.at >= from)
            && self.to.map_or(true, |to| event.at < to)
    }

    fn page_bounds(&self) -> (usize, usize) {
        let page = self.page.max(1);
        let limit = match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            limit => limit.min(MAX_PAGE_LIMIT),
        };
        (page, limit)
    }

    /// Filter, order, and slice `entries` into the requested page.
    pub fn paginate<I>(&self, entries: I) -> AuditPage
    where
        I: IntoIterator<Item = AuditEntry>,
    {
        let mut matching: Vec<AuditEntry> =
            entries.into_iter().filter(|entry| self.matches(entry)).collect();
        matching.sort_by(|left, right| {
            left.event
                .at
                .cmp(&right.event.at)
                .then_with(|| left.id.cmp(&right.id))
        });
        if self.sort == SortOrder::Desc {
            matching.reverse();
        }

        let (page, limit) = self.page_bounds();
        let total = matching.len();
        let start = (page - 1).saturating_mul(limit);
        let items: Vec<AuditEntry> = matching.into_iter().skip(start).take(limit).collect();
        let has_next = start + items.len() < total;

        AuditPage {
            items,
            page,
            limit,
            total,
            has_next,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditEntry>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub has_next: bool,
}

/// Append-only destination for audit events.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> Result<AuditEntry, AuditError>;
    /// Every entry matching the query's filters, ignoring pagination.
    fn matching(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError>;

    fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        Ok(query.paginate(self.matching(query)?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}
