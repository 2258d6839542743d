use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::db::types::SubmitCause;
use crate::services::answer_collector::SubmittedAnswer;
use crate::test_support::{self, instructor, learner, single_choice, test_fixture, TestContext};

/// Runs a passing attempt through the engine and returns its public certificate id.
async fn issue_certificate(ctx: &TestContext) -> String {
    let mut test = test_fixture("cert-test");
    test.issues_certificate = true;
    ctx.store.insert_test(test, vec![single_choice("q1", "cert-test", 0, 2)]).await;

    let learner = learner();
    let orchestrator = ctx.state.orchestrator();
    let started = orchestrator.start(&learner, "cert-test").await.expect("start");
    let answers =
        [SubmittedAnswer { question_id: "q1".to_string(), answer: json!(2) }];
    let outcome = orchestrator
        .submit(&learner, &started.attempt.id, &answers, SubmitCause::Manual)
        .await
        .expect("submit");
    outcome.certificate.expect("certificate").certificate_id
}

async fn call(
    ctx: &TestContext,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(method, uri, token, body))
        .await
        .expect("response");
    let status = response.status();
    (status, test_support::read_json(response).await)
}

#[tokio::test]
async fn certificates_are_publicly_verifiable() {
    let ctx = test_support::setup_test_context().await;
    let certificate_id = issue_certificate(&ctx).await;

    let (status, body) =
        call(&ctx, Method::GET, &format!("/api/v1/certificates/{certificate_id}"), None, None)
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_valid"], true);
    assert_eq!(body["state"], "valid");
    assert_eq!(body["certificate"]["score"], 100.0);
    assert_eq!(body["certificate"]["test_title"], "Test cert-test");
    assert_eq!(body["certificate"]["verification_hash"].as_str().map(str::len), Some(64));

    let (status, _) =
        call(&ctx, Method::GET, "/api/v1/certificates/CERT-NONE-NONE", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_by_email_lists_certificates() {
    let ctx = test_support::setup_test_context().await;
    let certificate_id = issue_certificate(&ctx).await;

    let (status, body) = call(
        &ctx,
        Method::GET,
        "/api/v1/certificates/validate?email=Learner@Example.com",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["certificates"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["certificates"][0]["certificate"]["certificate_id"], certificate_id.as_str());

    let (status, _) =
        call(&ctx, Method::GET, "/api/v1/certificates/validate?email=nope", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_can_revoke_and_reinstate() {
    let ctx = test_support::setup_test_context().await;
    let certificate_id = issue_certificate(&ctx).await;
    let learner_token = test_support::bearer_token(&learner(), ctx.state.settings());
    let staff_token = test_support::bearer_token(&instructor(), ctx.state.settings());
    let revoke_uri = format!("/api/v1/certificates/{certificate_id}/revoke");

    let (status, _) = call(
        &ctx,
        Method::POST,
        &revoke_uri,
        Some(&learner_token),
        Some(json!({"reason": "self-service"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        call(&ctx, Method::POST, &revoke_uri, Some(&staff_token), Some(json!({"reason": "  "})))
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, revoked) = call(
        &ctx,
        Method::POST,
        &revoke_uri,
        Some(&staff_token),
        Some(json!({"reason": "Academic misconduct"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked["is_valid"], false);
    assert_eq!(revoked["state"], "revoked");
    assert_eq!(revoked["certificate"]["revoke_reason"], "Academic misconduct");

    let (_, lookup) =
        call(&ctx, Method::GET, &format!("/api/v1/certificates/{certificate_id}"), None, None)
            .await;
    assert_eq!(lookup["is_valid"], false);

    let (status, reinstated) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/certificates/{certificate_id}/reinstate"),
        Some(&staff_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reinstated["is_valid"], true);
    assert!(reinstated["certificate"]["revoked_at"].is_null());
}
