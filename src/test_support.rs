use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sqlx::types::Json;
use time::{macros::datetime, Duration, PrimitiveDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{
    config::Settings,
    security::{self, Claims},
    state::AppState,
    time::Clock,
};
use crate::db::models::{Attempt, Question, QuestionBody, TestDefinition};
use crate::db::types::AttemptStatus;
use crate::repositories::{AssessmentStore, MemoryAssessmentStore};
use crate::services::attempt_orchestrator::AttemptOrchestrator;
use crate::services::certificate_issuer::CertificateIssuer;
use crate::services::context::{ActorRole, RequestContext};
use crate::services::question_selection::OrderedSelector;

const TEST_SECRET_KEY: &str = "test-secret";
pub(crate) const GRACE_SECONDS: i64 = 30;

/// Clock that only moves when a test says so.
#[derive(Debug)]
pub(crate) struct ManualClock {
    now: StdMutex<PrimitiveDateTime>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self { now: StdMutex::new(datetime!(2025-03-01 09:00)) }
    }
}

impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> PrimitiveDateTime {
        *self.now.lock().expect("clock lock")
    }
}

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: Arc<MemoryAssessmentStore>,
    pub(crate) clock: Arc<ManualClock>,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) struct EngineFixture {
    pub(crate) orchestrator: AttemptOrchestrator,
    pub(crate) store: Arc<MemoryAssessmentStore>,
    pub(crate) clock: Arc<ManualClock>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("ASSESS_ENV", "test");
    std::env::set_var("ASSESS_STRICT_CONFIG", "0");
    std::env::set_var("ASSESS_STORAGE", "memory");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("SUBMIT_GRACE_SECONDS", GRACE_SECONDS.to_string());
    std::env::remove_var("ASSESS_SEED_FILE");
    std::env::remove_var("QUESTION_DRAW");
    std::env::remove_var("ALGORITHM");
}

pub(crate) fn engine() -> EngineFixture {
    let store = Arc::new(MemoryAssessmentStore::new());
    let clock = Arc::new(ManualClock::default());
    let orchestrator = orchestrator_for(store.clone(), clock.clone());
    EngineFixture { orchestrator, store, clock }
}

fn orchestrator_for(
    store: Arc<MemoryAssessmentStore>,
    clock: Arc<ManualClock>,
) -> AttemptOrchestrator {
    let dyn_store: Arc<dyn AssessmentStore> = store;
    let issuer = CertificateIssuer::new(dyn_store.clone(), clock.clone(), None);
    AttemptOrchestrator::new(
        dyn_store,
        clock,
        Arc::new(OrderedSelector),
        issuer,
        Duration::seconds(GRACE_SECONDS),
    )
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let store = Arc::new(MemoryAssessmentStore::new());
    let clock = Arc::new(ManualClock::default());
    let orchestrator = orchestrator_for(store.clone(), clock.clone());

    let state = AppState::new(settings, store.clone(), orchestrator);
    let app = api::router::router(state.clone());

    TestContext { state, app, store, clock, _guard: guard }
}

pub(crate) fn learner() -> RequestContext {
    RequestContext::new("user-1", "learner@example.com", ActorRole::Learner)
}

pub(crate) fn instructor() -> RequestContext {
    RequestContext::new("instructor-1", "instructor@example.com", ActorRole::Instructor)
}

pub(crate) fn test_fixture(id: &str) -> TestDefinition {
    let now = datetime!(2025-02-01 12:00);
    TestDefinition {
        id: id.to_string(),
        title: format!("Test {id}"),
        description: None,
        passing_score: 70,
        time_limit_minutes: None,
        max_attempts: 1,
        number_of_questions: 0,
        issues_certificate: false,
        is_active: true,
        lesson_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn question(id: &str, test_id: &str, order_index: i32, points: i32, body: QuestionBody) -> Question {
    Question {
        id: id.to_string(),
        test_id: test_id.to_string(),
        prompt: format!("Prompt for {id}"),
        body: Json(body),
        points,
        explanation: Some(format!("Explanation for {id}")),
        order_index,
    }
}

pub(crate) fn single_choice(id: &str, test_id: &str, order: i32, correct: usize) -> Question {
    let options = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    question(id, test_id, order, 1, QuestionBody::SingleChoice { options, correct_answer: correct })
}

pub(crate) fn multi_choice(id: &str, test_id: &str, order: i32, correct: &[usize]) -> Question {
    let options = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
    let correct_answers: BTreeSet<usize> = correct.iter().copied().collect();
    question(id, test_id, order, 2, QuestionBody::MultiChoice { options, correct_answers })
}

pub(crate) fn true_false(id: &str, test_id: &str, order: i32, correct: bool) -> Question {
    question(id, test_id, order, 1, QuestionBody::TrueFalse { correct_answer: correct })
}

pub(crate) fn short_answer(id: &str, test_id: &str, order: i32, points: i32) -> Question {
    question(id, test_id, order, points, QuestionBody::ShortAnswer { reference_answer: None })
}

pub(crate) fn attempt_fixture(id: &str, attempt_number: i32, status: AttemptStatus) -> Attempt {
    let started = datetime!(2025-03-01 08:00);
    Attempt {
        id: id.to_string(),
        test_id: "test-1".to_string(),
        user_id: "user-1".to_string(),
        user_email: "learner@example.com".to_string(),
        status,
        attempt_number,
        started_at: started,
        expires_at: None,
        submitted_at: None,
        graded_at: None,
        submit_cause: None,
        passing_score_snapshot: 70,
        time_limit_minutes_snapshot: None,
        total_points: 2,
        earned_points: None,
        score: None,
        question_snapshot: Json(Vec::new()),
        draft_answers: Json(Vec::new()),
        last_saved_at: None,
        created_at: started,
        updated_at: started,
    }
}

pub(crate) fn bearer_token(ctx: &RequestContext, settings: &Settings) -> String {
    let claims = Claims {
        sub: ctx.user_id.clone(),
        email: ctx.email.clone(),
        role: ctx.role,
        exp: time::OffsetDateTime::now_utc().unix_timestamp() + 3_600,
    };
    security::create_access_token(&claims, settings).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
