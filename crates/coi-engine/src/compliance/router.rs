use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::audit::{AuditAction, AuditActor, AuditQuery, AuditSink, SortOrder};
use super::domain::{
    BuildingId, CoiId, CoiOwner, CoiStatus, CoiSubmission, ReviewDecision, TenantId, VendorId,
};
use super::export::{audit_to_csv, cois_to_csv};
use super::lifecycle::{CoiLifecycle, LifecycleError, ReviewRequest};
use super::repository::{CoiFilter, CoiRecord, CoiRepository, CoiStatusView, RepositoryError};
use super::requirements::{RequirementStore, RequirementTerms};

type Service<R, Q, A> = Arc<CoiLifecycle<R, Q, A>>;

/// Router builder exposing certificate intake, review, export, and audit endpoints.
pub fn compliance_router<R, Q, A>(service: Service<R, Q, A>) -> Router
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/cois",
            post(submit_handler::<R, Q, A>).get(list_handler::<R, Q, A>),
        )
        .route("/api/v1/cois/export", get(export_handler::<R, Q, A>))
        .route("/api/v1/cois/:coi_id", get(status_handler::<R, Q, A>))
        .route(
            "/api/v1/cois/:coi_id/evaluate",
            post(evaluate_handler::<R, Q, A>),
        )
        .route(
            "/api/v1/cois/:coi_id/review",
            patch(review_handler::<R, Q, A>),
        )
        .route(
            "/api/v1/cois/:coi_id/approve",
            patch(approve_handler::<R, Q, A>),
        )
        .route(
            "/api/v1/cois/:coi_id/reject",
            patch(reject_handler::<R, Q, A>),
        )
        .route("/api/v1/audit/logs", get(audit_handler::<R, Q, A>))
        .route(
            "/api/v1/audit/logs/export",
            get(audit_export_handler::<R, Q, A>),
        )
        .route(
            "/api/v1/buildings/:building_id/requirements",
            post(activate_requirement_handler::<R, Q, A>)
                .get(requirement_history_handler::<R, Q, A>),
        )
        .route(
            "/api/v1/buildings/:building_id/access",
            get(access_handler::<R, Q, A>),
        )
        .with_state(service)
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let status = match &self {
            LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
            LifecycleError::InvalidTransition { .. }
            | LifecycleError::Repository(RepositoryError::Conflict)
            | LifecycleError::Repository(RepositoryError::VersionConflict { .. }) => {
                StatusCode::CONFLICT
            }
            LifecycleError::OverrideReasonRequired { .. }
            | LifecycleError::InvalidSnapshot(_)
            | LifecycleError::NoActiveRequirement(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LifecycleError::Repository(_) | LifecycleError::Audit(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut payload = json!({ "error": self.to_string() });
        if let LifecycleError::OverrideReasonRequired { reasons, .. } = &self {
            let codes: Vec<String> = reasons.iter().map(|reason| reason.code()).collect();
            payload["reasons"] = json!(codes);
        }

        (status, Json(payload)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

fn csv_response(filename: &str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

fn owner_from(
    vendor_id: Option<String>,
    tenant_id: Option<String>,
) -> Result<Option<CoiOwner>, Response> {
    match (vendor_id, tenant_id) {
        (Some(_), Some(_)) => Err(bad_request(
            "pass either vendor_id or tenant_id, not both",
        )),
        (Some(vendor), None) => Ok(Some(CoiOwner::Vendor(VendorId(vendor)))),
        (None, Some(tenant)) => Ok(Some(CoiOwner::Tenant(TenantId(tenant)))),
        (None, None) => Ok(None),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CoiListParams {
    building_id: Option<String>,
    status: Option<String>,
    vendor_id: Option<String>,
    tenant_id: Option<String>,
}

impl CoiListParams {
    fn into_filter(self) -> Result<CoiFilter, Response> {
        let statuses = match self.status {
            Some(raw) => vec![CoiStatus::parse(&raw)
                .ok_or_else(|| bad_request(format!("unknown status '{raw}'")))?],
            None => Vec::new(),
        };

        Ok(CoiFilter {
            building_id: self.building_id.map(BuildingId),
            owner: owner_from(self.vendor_id, self.tenant_id)?,
            statuses,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewNote {
    reviewer_id: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuditParams {
    entity: Option<String>,
    entity_id: Option<String>,
    actor_id: Option<String>,
    action: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page: Option<usize>,
    limit: Option<usize>,
    sort: Option<SortOrder>,
}

impl AuditParams {
    fn into_query(self) -> Result<AuditQuery, Response> {
        let action = match self.action {
            Some(raw) => Some(
                AuditAction::parse(&raw)
                    .ok_or_else(|| bad_request(format!("unknown audit action '{raw}'")))?,
            ),
            None => None,
        };

        Ok(AuditQuery {
            entity: self.entity,
            entity_id: self.entity_id,
            actor: self.actor_id,
            action,
            from: self.from,
            to: self.to,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or_default(),
            sort: self.sort.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivateRequirement {
    #[serde(default)]
    actor_id: Option<String>,
    #[serde(flatten)]
    terms: RequirementTerms,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AccessParams {
    vendor_id: Option<String>,
    tenant_id: Option<String>,
}

pub(crate) async fn submit_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Json(submission): Json<CoiSubmission>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    match service.submit(submission, Utc::now()) {
        Ok(outcome) => {
            let payload = json!({
                "coi": outcome.record.status_view(),
                "evaluation": outcome.evaluation,
            });
            (StatusCode::ACCEPTED, Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Query(params): Query<CoiListParams>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    match service.list(&filter) {
        Ok(records) => {
            let views: Vec<CoiStatusView> =
                records.iter().map(CoiRecord::status_view).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn export_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Query(params): Query<CoiListParams>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    let records = match service.list(&filter) {
        Ok(records) => records,
        Err(err) => return err.into_response(),
    };

    match cois_to_csv(&records) {
        Ok(body) => csv_response("cois-export.csv", body),
        Err(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn status_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(coi_id): Path<String>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    match service.get(&CoiId(coi_id)) {
        Ok(record) => (StatusCode::OK, Json(record.status_view())).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn evaluate_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(coi_id): Path<String>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    match service.evaluate(&CoiId(coi_id), Utc::now().date_naive()) {
        Ok(evaluation) => (StatusCode::OK, Json(evaluation)).into_response(),
        Err(err) => err.into_response(),
    }
}

fn review_response<R, Q, A>(
    service: &Service<R, Q, A>,
    coi_id: String,
    request: ReviewRequest,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    match service.review(&CoiId(coi_id), request, Utc::now()) {
        Ok(record) => (StatusCode::OK, Json(record.status_view())).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn review_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(coi_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    review_response(&service, coi_id, request)
}

pub(crate) async fn approve_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(coi_id): Path<String>,
    Json(note): Json<ReviewNote>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let request = ReviewRequest {
        decision: ReviewDecision::Approve,
        reviewer_id: note.reviewer_id,
        notes: note.notes,
    };
    review_response(&service, coi_id, request)
}

pub(crate) async fn reject_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(coi_id): Path<String>,
    Json(note): Json<ReviewNote>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let request = ReviewRequest {
        decision: ReviewDecision::Reject,
        reviewer_id: note.reviewer_id,
        notes: note.notes,
    };
    review_response(&service, coi_id, request)
}

pub(crate) async fn audit_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Query(params): Query<AuditParams>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let query = match params.into_query() {
        Ok(query) => query,
        Err(response) => return response,
    };

    match service.audit_log(&query) {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn audit_export_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Query(params): Query<AuditParams>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let query = match params.into_query() {
        Ok(query) => query,
        Err(response) => return response,
    };

    let mut entries = match service.audit_entries(&query) {
        Ok(entries) => entries,
        Err(err) => return err.into_response(),
    };
    entries.sort_by(|left, right| {
        left.event
            .at
            .cmp(&right.event.at)
            .then_with(|| left.id.cmp(&right.id))
    });

    match audit_to_csv(&entries) {
        Ok(body) => csv_response("audit-logs.csv", body),
        Err(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn activate_requirement_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(building_id): Path<String>,
    Json(request): Json<ActivateRequirement>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let actor = request
        .actor_id
        .map(AuditActor::Reviewer)
        .unwrap_or(AuditActor::System);

    let building_id = BuildingId(building_id);
    match service.activate_requirement(&building_id, request.terms, actor, Utc::now()) {
        Ok(template) => (StatusCode::CREATED, Json(template)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn requirement_history_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(building_id): Path<String>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    match service.requirements().history(&BuildingId(building_id)) {
        Ok(templates) => (StatusCode::OK, Json(templates)).into_response(),
        Err(err) => LifecycleError::from(err).into_response(),
    }
}

pub(crate) async fn access_handler<R, Q, A>(
    State(service): State<Service<R, Q, A>>,
    Path(building_id): Path<String>,
    Query(params): Query<AccessParams>,
) -> Response
where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
{
    let owner = match owner_from(params.vendor_id, params.tenant_id) {
        Ok(Some(owner)) => owner,
        Ok(None) => return bad_request("vendor_id or tenant_id is required"),
        Err(response) => return response,
    };

    let today = Utc::now().date_naive();
    match service.access_status(&BuildingId(building_id), &owner, today) {
        Ok(check) => (StatusCode::OK, Json(check)).into_response(),
        Err(err) => err.into_response(),
    }
}
