use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Answer, Attempt, Question, RecordedAnswer, TestDefinition, UserAnswer};
use crate::db::types::{AttemptStatus, QuestionKind, SubmitCause};
use crate::schemas::certificate::CertificateResponse;
use crate::services::answer_collector::{AnswerRejection, SubmittedAnswer};
use crate::services::attempt_orchestrator::{ClampedGrade, GradeInput, GradeRejection};

/// Upper bound on answers accepted in one request.
const MAX_ANSWERS_PER_REQUEST: u64 = 500;

#[derive(Debug, Serialize)]
pub(crate) struct TestResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) passing_score: i32,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) max_attempts: i32,
    pub(crate) number_of_questions: i32,
    pub(crate) question_bank_size: usize,
    pub(crate) issues_certificate: bool,
    pub(crate) is_active: bool,
    pub(crate) lesson_id: Option<String>,
}

impl TestResponse {
    pub(crate) fn new(test: TestDefinition, question_bank_size: usize) -> Self {
        Self {
            id: test.id,
            title: test.title,
            description: test.description,
            passing_score: test.passing_score,
            time_limit_minutes: test.time_limit_minutes,
            max_attempts: test.max_attempts,
            number_of_questions: test.number_of_questions,
            question_bank_size,
            issues_certificate: test.issues_certificate,
            is_active: test.is_active,
            lesson_id: test.lesson_id,
        }
    }
}

/// Learner-facing question: answer keys and explanations stay server-side.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionView {
    pub(crate) id: String,
    pub(crate) kind: QuestionKind,
    pub(crate) prompt: String,
    pub(crate) options: Option<Vec<String>>,
    pub(crate) points: i32,
    pub(crate) order_index: i32,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            kind: question.kind(),
            prompt: question.prompt.clone(),
            options: question.body.0.options().map(<[String]>::to_vec),
            points: question.points,
            order_index: question.order_index,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptSummary {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) user_id: String,
    pub(crate) user_email: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) submit_cause: Option<SubmitCause>,
    pub(crate) score: Option<f64>,
    pub(crate) passed: bool,
}

impl From<&Attempt> for AttemptSummary {
    fn from(attempt: &Attempt) -> Self {
        Self {
            id: attempt.id.clone(),
            test_id: attempt.test_id.clone(),
            user_id: attempt.user_id.clone(),
            user_email: attempt.user_email.clone(),
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: format_primitive(attempt.started_at),
            submitted_at: attempt.submitted_at.map(format_primitive),
            submit_cause: attempt.submit_cause,
            score: attempt.score,
            passed: attempt.passed(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) user_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) expires_at: Option<String>,
    pub(crate) submitted_at: Option<String>,
    pub(crate) graded_at: Option<String>,
    pub(crate) submit_cause: Option<SubmitCause>,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) passing_score: i32,
    pub(crate) total_points: i32,
    pub(crate) earned_points: Option<f64>,
    pub(crate) score: Option<f64>,
    pub(crate) passed: bool,
    pub(crate) questions: Vec<QuestionView>,
    pub(crate) saved_answers: Vec<RecordedAnswer>,
    pub(crate) last_saved_at: Option<String>,
}

impl From<&Attempt> for AttemptResponse {
    fn from(attempt: &Attempt) -> Self {
        Self {
            id: attempt.id.clone(),
            test_id: attempt.test_id.clone(),
            user_id: attempt.user_id.clone(),
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: format_primitive(attempt.started_at),
            expires_at: attempt.expires_at.map(format_primitive),
            submitted_at: attempt.submitted_at.map(format_primitive),
            graded_at: attempt.graded_at.map(format_primitive),
            submit_cause: attempt.submit_cause,
            time_limit_minutes: attempt.time_limit_minutes_snapshot,
            passing_score: attempt.passing_score_snapshot,
            total_points: attempt.total_points,
            earned_points: attempt.earned_points,
            score: attempt.score,
            passed: attempt.passed(),
            questions: attempt.questions().iter().map(QuestionView::from).collect(),
            saved_answers: attempt.draft_answers.0.clone(),
            last_saved_at: attempt.last_saved_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) user_answer: Option<UserAnswer>,
    pub(crate) is_correct: Option<bool>,
    pub(crate) points_earned: f64,
    pub(crate) max_points: i32,
    pub(crate) requires_manual: bool,
    pub(crate) feedback: Option<String>,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<String>,
}

impl From<Answer> for AnswerResponse {
    fn from(answer: Answer) -> Self {
        Self {
            id: answer.id,
            question_id: answer.question_id,
            user_answer: answer.user_answer.map(|value| value.0),
            is_correct: answer.is_correct,
            points_earned: answer.points_earned,
            max_points: answer.max_points,
            requires_manual: answer.requires_manual,
            feedback: answer.feedback,
            graded_by: answer.graded_by,
            graded_at: answer.graded_at.map(format_primitive),
        }
    }
}

pub(crate) fn answers_response(answers: Vec<Answer>) -> Vec<AnswerResponse> {
    answers.into_iter().map(AnswerResponse::from).collect()
}

#[derive(Debug, Serialize)]
pub(crate) struct StartAttemptResponse {
    pub(crate) resumed: bool,
    pub(crate) attempt: AttemptResponse,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswersRequest {
    #[serde(default)]
    #[validate(length(max = MAX_ANSWERS_PER_REQUEST, message = "too many answers"))]
    pub(crate) answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProgressResponse {
    pub(crate) attempt_id: String,
    pub(crate) saved_answers: usize,
    pub(crate) last_saved_at: Option<String>,
    pub(crate) expires_at: Option<String>,
    pub(crate) rejected: Vec<AnswerRejection>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) already_submitted: bool,
    pub(crate) used_saved_draft: bool,
    pub(crate) detail_withheld: bool,
    pub(crate) attempt: AttemptResponse,
    pub(crate) answers: Option<Vec<AnswerResponse>>,
    pub(crate) rejected: Vec<AnswerRejection>,
    pub(crate) certificate: Option<CertificateResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResultResponse {
    pub(crate) detail_withheld: bool,
    pub(crate) attempt: AttemptResponse,
    pub(crate) answers: Option<Vec<AnswerResponse>>,
    pub(crate) certificate: Option<CertificateResponse>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeItem {
    #[validate(length(min = 1, message = "answer_id must not be empty"))]
    pub(crate) answer_id: String,
    pub(crate) points_earned: f64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "feedback is too long"))]
    pub(crate) feedback: Option<String>,
}

impl From<GradeItem> for GradeInput {
    fn from(item: GradeItem) -> Self {
        Self { answer_id: item.answer_id, points_earned: item.points_earned, feedback: item.feedback }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradesRequest {
    #[serde(default)]
    #[validate(nested)]
    pub(crate) grades: Vec<GradeItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FinalizeResponse {
    pub(crate) already_graded: bool,
    pub(crate) attempt: AttemptResponse,
    pub(crate) answers: Vec<AnswerResponse>,
    pub(crate) clamped: Vec<ClampedGrade>,
    pub(crate) rejected: Vec<GradeRejection>,
    pub(crate) certificate: Option<CertificateResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptAnswersResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) answers: Vec<AnswerResponse>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GradingQueueQuery {
    #[serde(default)]
    pub(crate) test_id: Option<String>,
}
