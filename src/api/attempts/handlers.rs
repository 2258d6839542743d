use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentStaff, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::format_primitive;
use crate::db::types::SubmitCause;
use crate::schemas::attempt::{
    answers_response, AnswersRequest, AttemptAnswersResponse, AttemptResponse,
    AttemptResultResponse, AttemptSummary, FinalizeResponse, GradesRequest, GradingQueueQuery,
    ProgressResponse, StartAttemptResponse, SubmitResponse, TestResponse,
};
use crate::schemas::certificate::CertificateResponse;
use crate::services::attempt_orchestrator::{AttemptError, GradeInput};

pub(super) async fn get_test(
    CurrentUser(ctx): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<TestResponse>, ApiError> {
    let (test, bank_size) = state.orchestrator().get_test(&ctx, &test_id).await?;
    Ok(Json(TestResponse::new(test, bank_size)))
}

pub(super) async fn list_attempts(
    CurrentUser(ctx): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<Vec<AttemptSummary>>, ApiError> {
    let attempts = state.orchestrator().list_user_attempts(&ctx, &test_id).await?;
    Ok(Json(attempts.iter().map(AttemptSummary::from).collect()))
}

pub(super) async fn start_attempt(
    CurrentUser(ctx): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<(StatusCode, Json<StartAttemptResponse>), ApiError> {
    let started = state.orchestrator().start(&ctx, &test_id).await?;
    let status = if started.resumed { StatusCode::OK } else { StatusCode::CREATED };

    Ok((
        status,
        Json(StartAttemptResponse {
            resumed: started.resumed,
            attempt: AttemptResponse::from(&started.attempt),
        }),
    ))
}

pub(super) async fn save_progress(
    CurrentUser(ctx): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<AnswersRequest>,
) -> Result<Json<ProgressResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let saved = state.orchestrator().save_progress(&ctx, &attempt_id, &payload.answers).await?;
    Ok(Json(ProgressResponse {
        attempt_id: saved.attempt.id,
        saved_answers: saved.attempt.draft_answers.0.len(),
        last_saved_at: saved.attempt.last_saved_at.map(format_primitive),
        expires_at: saved.attempt.expires_at.map(format_primitive),
        rejected: saved.rejected,
    }))
}

/// A submit that lost the race, or a retry, still answers 200 with the
/// attempt as it now stands.
pub(super) async fn submit_attempt(
    CurrentUser(ctx): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<AnswersRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let orchestrator = state.orchestrator();

    match orchestrator.submit(&ctx, &attempt_id, &payload.answers, SubmitCause::Manual).await {
        Ok(outcome) => {
            let withheld = orchestrator.hides_detail(&ctx, &outcome.attempt).await?;
            Ok(Json(SubmitResponse {
                already_submitted: false,
                used_saved_draft: outcome.used_saved_draft,
                detail_withheld: withheld,
                attempt: AttemptResponse::from(&outcome.attempt),
                answers: (!withheld).then(|| answers_response(outcome.answers)),
                rejected: outcome.rejected,
                certificate: outcome.certificate.map(CertificateResponse::from),
            }))
        }
        Err(AttemptError::AlreadySubmitted { attempt }) => {
            let result = orchestrator.attempt_result(&ctx, &attempt.test_id, &attempt.id).await?;
            Ok(Json(SubmitResponse {
                already_submitted: true,
                used_saved_draft: false,
                detail_withheld: result.detail_withheld,
                attempt: AttemptResponse::from(&result.attempt),
                answers: result.answers.map(answers_response),
                rejected: Vec::new(),
                certificate: result.certificate.map(CertificateResponse::from),
            }))
        }
        Err(err) => Err(err.into()),
    }
}

pub(super) async fn get_attempt_result(
    CurrentUser(ctx): CurrentUser,
    State(state): State<AppState>,
    Path((test_id, attempt_id)): Path<(String, String)>,
) -> Result<Json<AttemptResultResponse>, ApiError> {
    let result = state.orchestrator().attempt_result(&ctx, &test_id, &attempt_id).await?;
    Ok(Json(AttemptResultResponse {
        detail_withheld: result.detail_withheld,
        attempt: AttemptResponse::from(&result.attempt),
        answers: result.answers.map(answers_response),
        certificate: result.certificate.map(CertificateResponse::from),
    }))
}

pub(super) async fn finalize_grading(
    CurrentStaff(ctx): CurrentStaff,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<GradesRequest>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let grades: Vec<GradeInput> = payload.grades.into_iter().map(GradeInput::from).collect();
    let outcome = state.orchestrator().finalize_grading(&ctx, &attempt_id, &grades).await?;

    Ok(Json(FinalizeResponse {
        already_graded: outcome.already_graded,
        attempt: AttemptResponse::from(&outcome.attempt),
        answers: answers_response(outcome.answers),
        clamped: outcome.clamped,
        rejected: outcome.rejected,
        certificate: outcome.certificate.map(CertificateResponse::from),
    }))
}

pub(super) async fn attempt_answers(
    CurrentStaff(ctx): CurrentStaff,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptAnswersResponse>, ApiError> {
    let (attempt, answers) = state.orchestrator().attempt_answers(&ctx, &attempt_id).await?;
    Ok(Json(AttemptAnswersResponse {
        attempt: AttemptResponse::from(&attempt),
        answers: answers_response(answers),
    }))
}

pub(super) async fn grading_queue(
    CurrentStaff(ctx): CurrentStaff,
    State(state): State<AppState>,
    Query(params): Query<GradingQueueQuery>,
) -> Result<Json<Vec<AttemptSummary>>, ApiError> {
    let test_id = params.test_id.as_deref().map(str::trim).filter(|value| !value.is_empty());
    let queue = state.orchestrator().grading_queue(&ctx, test_id).await?;
    Ok(Json(queue.iter().map(AttemptSummary::from).collect()))
}
