use axum::http::{Method, StatusCode};
use serde_json::json;
use time::Duration;
use tower::ServiceExt;

use crate::test_support::{
    self, instructor, learner, short_answer, single_choice, test_fixture, true_false, TestContext,
};

async fn seed_certificate_test(ctx: &TestContext) {
    let mut test = test_fixture("test-1");
    test.issues_certificate = true;
    ctx.store
        .insert_test(
            test,
            vec![single_choice("q1", "test-1", 0, 1), single_choice("q2", "test-1", 1, 2)],
        )
        .await;
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
async fn start_requires_a_bearer_token() {
    let ctx = test_support::setup_test_context().await;
    seed_certificate_test(&ctx).await;

    let (status, body) = call(&ctx, Method::POST, "/api/v1/tests/test-1/attempts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid authentication credentials");

    let (status, _) =
        call(&ctx, Method::POST, "/api/v1/tests/test-1/attempts", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn learner_takes_a_certificate_test_end_to_end() {
    let ctx = test_support::setup_test_context().await;
    seed_certificate_test(&ctx).await;
    let token = test_support::bearer_token(&learner(), ctx.state.settings());

    let (status, test) = call(&ctx, Method::GET, "/api/v1/tests/test-1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(test["question_bank_size"], 2);
    assert_eq!(test["issues_certificate"], true);

    let (status, started) =
        call(&ctx, Method::POST, "/api/v1/tests/test-1/attempts", Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(started["resumed"], false);
    let attempt_id = started["attempt"]["id"].as_str().expect("attempt id").to_string();
    let first_question = &started["attempt"]["questions"][0];
    assert_eq!(first_question["kind"], "single_choice");
    assert_eq!(first_question["options"].as_array().map(Vec::len), Some(3));
    assert!(first_question.get("correct_answer").is_none());
    assert!(first_question.get("explanation").is_none());

    let (status, resumed) =
        call(&ctx, Method::POST, "/api/v1/tests/test-1/attempts", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["resumed"], true);
    assert_eq!(resumed["attempt"]["id"], attempt_id.as_str());

    let answers = json!({
        "answers": [
            {"question_id": "q1", "answer": 1},
            {"question_id": "q2", "answer": 2}
        ]
    });
    let submit_uri = format!("/api/v1/attempts/{attempt_id}/submit");
    let (status, submitted) =
        call(&ctx, Method::POST, &submit_uri, Some(&token), Some(answers.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["already_submitted"], false);
    assert_eq!(submitted["attempt"]["status"], "graded");
    assert_eq!(submitted["attempt"]["score"], 100.0);
    assert_eq!(submitted["attempt"]["passed"], true);
    assert_eq!(submitted["detail_withheld"], true);
    assert!(submitted["answers"].is_null());
    let certificate_id = submitted["certificate"]["certificate_id"].as_str().expect("certificate");
    assert!(certificate_id.starts_with("CERT-"));

    let (status, again) = call(&ctx, Method::POST, &submit_uri, Some(&token), Some(answers)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["already_submitted"], true);
    assert_eq!(again["certificate"]["certificate_id"], certificate_id);

    let (status, rejected) =
        call(&ctx, Method::POST, "/api/v1/tests/test-1/attempts", Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(rejected["code"], "max_attempts_reached");
    assert_eq!(rejected["prior_attempts"].as_array().map(Vec::len), Some(1));

    let (status, history) =
        call(&ctx, Method::GET, "/api/v1/tests/test-1/attempts", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history[0]["status"], "graded");
}

#[tokio::test]
async fn late_manual_submit_is_rejected_but_progress_survives() {
    let ctx = test_support::setup_test_context().await;
    let mut test = test_fixture("timed");
    test.time_limit_minutes = Some(1);
    ctx.store
        .insert_test(
            test,
            vec![true_false("t1", "timed", 0, true), true_false("t2", "timed", 1, true)],
        )
        .await;
    let token = test_support::bearer_token(&learner(), ctx.state.settings());

    let (_, started) =
        call(&ctx, Method::POST, "/api/v1/tests/timed/attempts", Some(&token), None).await;
    let attempt_id = started["attempt"]["id"].as_str().expect("attempt id").to_string();

    let (status, progress) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/attempts/{attempt_id}/progress"),
        Some(&token),
        Some(json!({"answers": [
            {"question_id": "t1", "answer": true},
            {"question_id": "t2", "answer": "maybe"}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["saved_answers"], 1);
    assert_eq!(progress["rejected"][0]["question_id"], "t2");
    assert_eq!(progress["rejected"][0]["reason"], "invalid_shape");

    ctx.clock.advance(Duration::minutes(5));
    let (status, expired) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/attempts/{attempt_id}/submit"),
        Some(&token),
        Some(json!({"answers": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(expired["code"], "attempt_expired");

    assert_eq!(ctx.state.orchestrator().expire_overdue().await.expect("sweep"), 0);
    let (status, result) = call(
        &ctx,
        Method::GET,
        &format!("/api/v1/tests/timed/attempts/{attempt_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["attempt"]["submit_cause"], "expiry");
    assert_eq!(result["attempt"]["score"], 50.0);
    assert_eq!(result["answers"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn restart_after_the_deadline_closes_the_stale_attempt() {
    let ctx = test_support::setup_test_context().await;
    let mut test = test_fixture("timed");
    test.time_limit_minutes = Some(1);
    test.max_attempts = 2;
    ctx.store.insert_test(test, vec![true_false("t1", "timed", 0, true)]).await;
    let token = test_support::bearer_token(&learner(), ctx.state.settings());

    let (status, first) =
        call(&ctx, Method::POST, "/api/v1/tests/timed/attempts", Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let stale_id = first["attempt"]["id"].as_str().expect("attempt id").to_string();

    ctx.clock.advance(Duration::minutes(30));
    let (status, second) =
        call(&ctx, Method::POST, "/api/v1/tests/timed/attempts", Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["resumed"], false);
    assert_ne!(second["attempt"]["id"], first["attempt"]["id"]);

    let (status, stale) = call(
        &ctx,
        Method::GET,
        &format!("/api/v1/tests/timed/attempts/{stale_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stale["attempt"]["status"], "graded");
    assert_eq!(stale["attempt"]["submit_cause"], "expiry");
}

#[tokio::test]
async fn staff_grade_short_answers_from_the_queue() {
    let ctx = test_support::setup_test_context().await;
    ctx.store
        .insert_test(
            test_fixture("essay"),
            vec![single_choice("m1", "essay", 0, 0), short_answer("e1", "essay", 1, 4)],
        )
        .await;
    let learner_token = test_support::bearer_token(&learner(), ctx.state.settings());
    let staff_token = test_support::bearer_token(&instructor(), ctx.state.settings());

    let (_, started) =
        call(&ctx, Method::POST, "/api/v1/tests/essay/attempts", Some(&learner_token), None).await;
    let attempt_id = started["attempt"]["id"].as_str().expect("attempt id").to_string();
    let (status, submitted) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/attempts/{attempt_id}/submit"),
        Some(&learner_token),
        Some(json!({"answers": [
            {"question_id": "m1", "answer": 0},
            {"question_id": "e1", "answer": "Because entropy increases."}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["attempt"]["status"], "awaiting_grading");
    assert!(submitted["attempt"]["score"].is_null());

    let (status, _) =
        call(&ctx, Method::GET, "/api/v1/grading/queue", Some(&learner_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, queue) = call(
        &ctx,
        Method::GET,
        "/api/v1/grading/queue?test_id=essay",
        Some(&staff_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.as_array().map(Vec::len), Some(1));

    let (status, detail) = call(
        &ctx,
        Method::GET,
        &format!("/api/v1/attempts/{attempt_id}/answers"),
        Some(&staff_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let essay_answer = detail["answers"]
        .as_array()
        .and_then(|answers| answers.iter().find(|answer| answer["question_id"] == "e1"))
        .expect("essay answer");
    assert_eq!(essay_answer["requires_manual"], true);
    assert_eq!(essay_answer["user_answer"]["value"], "Because entropy increases.");
    let essay_id = essay_answer["id"].as_str().expect("answer id").to_string();

    let (status, graded) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/attempts/{attempt_id}/grades"),
        Some(&staff_token),
        Some(json!({"grades": [
            {"answer_id": essay_id, "points_earned": 12.0, "feedback": "Good"},
            {"answer_id": "nope", "points_earned": 1.0}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["attempt"]["status"], "graded");
    assert_eq!(graded["attempt"]["score"], 100.0);
    assert_eq!(graded["clamped"][0]["applied"], 4.0);
    assert_eq!(graded["rejected"][0]["reason"], "unknown_answer");

    let (status, retried) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/attempts/{attempt_id}/grades"),
        Some(&staff_token),
        Some(json!({"grades": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["already_graded"], true);
}

#[tokio::test]
async fn results_are_scoped_to_their_test_and_owner() {
    let ctx = test_support::setup_test_context().await;
    seed_certificate_test(&ctx).await;
    let token = test_support::bearer_token(&learner(), ctx.state.settings());
    let stranger = crate::services::context::RequestContext::new(
        "user-9",
        "stranger@example.com",
        Default::default(),
    );
    let stranger_token = test_support::bearer_token(&stranger, ctx.state.settings());

    let (_, started) =
        call(&ctx, Method::POST, "/api/v1/tests/test-1/attempts", Some(&token), None).await;
    let attempt_id = started["attempt"]["id"].as_str().expect("attempt id").to_string();

    let (status, _) = call(
        &ctx,
        Method::GET,
        &format!("/api/v1/tests/other/attempts/{attempt_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &ctx,
        Method::POST,
        &format!("/api/v1/attempts/{attempt_id}/submit"),
        Some(&stranger_token),
        Some(json!({"answers": []})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, open) = call(
        &ctx,
        Method::GET,
        &format!("/api/v1/tests/test-1/attempts/{attempt_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open["attempt"]["status"], "in_progress");
    assert_eq!(open["detail_withheld"], false);
    assert!(open["answers"].is_null());
}

#[tokio::test]
async fn unknown_tests_return_404() {
    let ctx = test_support::setup_test_context().await;
    let token = test_support::bearer_token(&learner(), ctx.state.settings());

    let (status, body) = call(&ctx, Method::GET, "/api/v1/tests/missing", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Test not found");
}
