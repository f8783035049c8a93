use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::compliance::domain::{BuildingId, CoiSubmission};
use crate::compliance::lifecycle::CoiLifecycle;
use crate::compliance::memory::{InMemoryAuditLog, InMemoryRequirementStore};
use crate::compliance::router::{compliance_router, submit_handler};

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serializable body")))
        .expect("valid request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("valid request")
}

/// Handlers read the wall clock, so route fixtures stay in force for a long time.
fn standing_submission() -> CoiSubmission {
    submission_with(compliant_snapshot(date(2099, 1, 1)))
}

fn standing_low_limit_submission() -> CoiSubmission {
    let mut submission = standing_submission();
    submission.snapshot.general_liability.each_occurrence = Some(500_000);
    submission
}

fn submission_json() -> Value {
    serde_json::to_value(standing_submission()).expect("submission serializes")
}

#[tokio::test]
async fn submit_route_accepts_certificates() {
    let harness = harness();
    let router = compliance_router(harness.lifecycle.clone());

    let response = router
        .oneshot(json_request("POST", "/api/v1/cois", submission_json()))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["coi"]["status"], "PENDING");
    assert_eq!(payload["coi"]["owner"]["kind"], "vendor");
    assert_eq!(payload["evaluation"]["verdict"], "PASS");
    assert!(payload["coi"]["coi_id"]
        .as_str()
        .unwrap_or_default()
        .starts_with("coi-"));
}

#[tokio::test]
async fn submit_route_needs_a_building_template() {
    let harness = harness();
    let router = compliance_router(harness.lifecycle.clone());
    let mut body = submission_json();
    body["building_id"] = json!("bldg-unconfigured");

    let response = router
        .oneshot(json_request("POST", "/api/v1/cois", body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert!(payload["error"]
        .as_str()
        .unwrap_or_default()
        .contains("bldg-unconfigured"));
}

#[tokio::test]
async fn submit_handler_returns_internal_error_on_repository_failure() {
    let requirements = Arc::new(InMemoryRequirementStore::default());
    let lifecycle = CoiLifecycle::new(
        Arc::new(UnavailableRepository),
        requirements,
        Arc::new(InMemoryAuditLog::default()),
    );
    lifecycle
        .requirements()
        .activate(&building(), standard_terms(), now())
        .expect("requirement activates");

    let response =
        submit_handler::<UnavailableRepository, InMemoryRequirementStore, InMemoryAuditLog>(
            State(Arc::new(lifecycle)),
            axum::Json(standing_submission()),
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn review_route_refuses_unexplained_override() {
    let harness = harness();
    let outcome = harness
        .lifecycle
        .submit(standing_low_limit_submission(), now())
        .expect("submission succeeds");
    let router = compliance_router(harness.lifecycle.clone());

    let response = router
        .oneshot(json_request(
            "PATCH",
            &format!("/api/v1/cois/{}/review", outcome.record.id),
            json!({ "decision": "APPROVE", "reviewer_id": "u_reviewer" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["reasons"], json!(["LIMIT_BELOW_MINIMUM:GL_OCCURRENCE"]));
}

#[tokio::test]
async fn approve_route_records_override_and_conflicts_afterwards() {
    let harness = harness();
    let outcome = harness
        .lifecycle
        .submit(standing_low_limit_submission(), now())
        .expect("submission succeeds");
    let uri = format!("/api/v1/cois/{}/approve", outcome.record.id);
    let body = json!({ "reviewer_id": "u_reviewer", "notes": "Excess policy covers the gap" });

    let approved = compliance_router(harness.lifecycle.clone())
        .oneshot(json_request("PATCH", &uri, body.clone()))
        .await
        .expect("route executes");
    assert_eq!(approved.status(), StatusCode::OK);
    let payload = read_json_body(approved).await;
    assert_eq!(payload["status"], "APPROVED");
    assert!(payload["decision_rationale"]
        .as_str()
        .unwrap_or_default()
        .contains("Excess policy covers the gap"));

    let again = compliance_router(harness.lifecycle.clone())
        .oneshot(json_request(
            "PATCH",
            &format!("/api/v1/cois/{}/reject", outcome.record.id),
            body,
        ))
        .await
        .expect("route executes");
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_route_returns_not_found_for_unknown_certificate() {
    let harness = harness();

    let response = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/cois/coi-unknown"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn evaluate_route_returns_fresh_evaluation() {
    let harness = harness();
    let outcome = harness
        .lifecycle
        .submit(standing_low_limit_submission(), now())
        .expect("submission succeeds");

    let response = compliance_router(harness.lifecycle.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/cois/{}/evaluate", outcome.record.id),
            json!({}),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["verdict"], "FAIL");
    assert_eq!(payload["reasons"][0]["reason"], "limit_below_minimum");
}

#[tokio::test]
async fn list_route_filters_by_status_and_rejects_unknown_ones() {
    let harness = harness();
    harness
        .lifecycle
        .submit(standing_submission(), now())
        .expect("submission succeeds");

    let pending = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/cois?status=pending"))
        .await
        .expect("route executes");
    assert_eq!(pending.status(), StatusCode::OK);
    let payload = read_json_body(pending).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(1));

    let approved = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/cois?status=APPROVED"))
        .await
        .expect("route executes");
    let payload = read_json_body(approved).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(0));

    let unknown = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/cois?status=LAPSED"))
        .await
        .expect("route executes");
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_route_streams_csv() {
    let harness = harness();
    harness
        .lifecycle
        .submit(standing_submission(), now())
        .expect("submission succeeds");

    let response = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/cois/export"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("text/csv")
    );
    let body = read_text_body(response).await;
    let mut lines = body.lines();
    assert_eq!(
        lines.next(),
        Some(
            "id,owner_kind,owner_id,building_id,insured_name,status,effective_date,\
             expiration_date,additional_insured,waiver_of_subrogation"
        )
    );
    let row = lines.next().expect("data row");
    assert!(row.contains(",vendor,vendor-brightline-hvac,bldg-harbor-point,"));
    assert!(row.ends_with("PENDING,2025-01-01,2099-01-01,true,true"));
}

#[tokio::test]
async fn audit_routes_page_and_export_entries() {
    let harness = harness();
    harness
        .lifecycle
        .submit(standing_submission(), now())
        .expect("submission succeeds");
    harness
        .lifecycle
        .submit(standing_submission(), now())
        .expect("submission succeeds");

    let page = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/audit/logs?entity=COI&limit=1&sort=asc"))
        .await
        .expect("route executes");
    assert_eq!(page.status(), StatusCode::OK);
    let payload = read_json_body(page).await;
    assert_eq!(payload["total"], 2);
    assert_eq!(payload["has_next"], true);
    assert_eq!(payload["items"][0]["id"], 1);
    assert_eq!(payload["items"][0]["action"], "COI.SUBMITTED");

    let bad_action = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/audit/logs?action=COI.DELETED"))
        .await
        .expect("route executes");
    assert_eq!(bad_action.status(), StatusCode::BAD_REQUEST);

    let export = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/audit/logs/export?actor_id=system"))
        .await
        .expect("route executes");
    assert_eq!(export.status(), StatusCode::OK);
    let body = read_text_body(export).await;
    assert_eq!(body.lines().count(), 3);
    assert!(body.starts_with("id,entity,entity_id,action,actor,details,at"));
}

#[tokio::test]
async fn requirement_routes_activate_and_list_history() {
    let harness = harness();
    let uri = "/api/v1/buildings/bldg-riverside/requirements";

    let created = compliance_router(harness.lifecycle.clone())
        .oneshot(json_request(
            "POST",
            uri,
            json!({
                "actor_id": "u_admin",
                "general_liability_occurrence_min": 2000000,
                "additional_insured_required": true
            }),
        ))
        .await
        .expect("route executes");
    assert_eq!(created.status(), StatusCode::CREATED);
    let payload = read_json_body(created).await;
    assert_eq!(payload["active"], true);
    assert_eq!(payload["terms"]["general_liability_occurrence_min"], 2000000);

    let history = compliance_router(harness.lifecycle.clone())
        .oneshot(get(uri))
        .await
        .expect("route executes");
    let payload = read_json_body(history).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(1));

    let resolved = harness
        .lifecycle
        .requirements()
        .resolve(&BuildingId("bldg-riverside".to_string()))
        .expect("template active");
    assert!(resolved.terms.additional_insured_required);
}

#[tokio::test]
async fn access_route_reports_clearance() {
    let harness = harness();
    let outcome = harness
        .lifecycle
        .submit(standing_submission(), now())
        .expect("submission succeeds");
    let uri = "/api/v1/buildings/bldg-harbor-point/access?vendor_id=vendor-brightline-hvac";

    let blocked = compliance_router(harness.lifecycle.clone())
        .oneshot(get(uri))
        .await
        .expect("route executes");
    assert_eq!(read_json_body(blocked).await["cleared"], false);

    compliance_router(harness.lifecycle.clone())
        .oneshot(json_request(
            "PATCH",
            &format!("/api/v1/cois/{}/approve", outcome.record.id),
            json!({ "reviewer_id": "u_reviewer" }),
        ))
        .await
        .expect("route executes");

    let cleared = compliance_router(harness.lifecycle.clone())
        .oneshot(get(uri))
        .await
        .expect("route executes");
    let payload = read_json_body(cleared).await;
    assert_eq!(payload["cleared"], true);
    assert_eq!(payload["coi_id"], outcome.record.id.0);

    let missing_owner = compliance_router(harness.lifecycle.clone())
        .oneshot(get("/api/v1/buildings/bldg-harbor-point/access"))
        .await
        .expect("route executes");
    assert_eq!(missing_owner.status(), StatusCode::BAD_REQUEST);
}
