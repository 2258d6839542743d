//! Storage seam of the attempt engine.
//!
//! Every state transition goes through a single conditional write so that a
//! racing caller observes the winner instead of overwriting it.

pub(crate) mod answers;
pub(crate) mod attempts;
pub(crate) mod certificates;
pub(crate) mod memory;
pub(crate) mod postgres;
pub(crate) mod seed;
pub(crate) mod test_definitions;


use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{Answer, Attempt, Certificate, Question, RecordedAnswer, TestDefinition};
use crate::db::types::{AttemptStatus, SubmitCause};

pub(crate) use memory::MemoryAssessmentStore;
pub(crate) use postgres::PgAssessmentStore;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("conflicting write for attempt {0}")]
    Conflict(String),
    #[error("seed file error: {0}")]
    Seed(String),
}

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) user_id: String,
    pub(crate) user_email: String,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) passing_score_snapshot: i32,
    pub(crate) time_limit_minutes_snapshot: Option<i32>,
    pub(crate) total_points: i32,
    pub(crate) questions: Vec<Question>,
}

impl NewAttempt {
    pub(crate) fn into_attempt(self, attempt_number: i32) -> Attempt {
        Attempt {
            id: self.id,
            test_id: self.test_id,
            user_id: self.user_id,
            user_email: self.user_email,
            status: AttemptStatus::InProgress,
            attempt_number,
            started_at: self.started_at,
            expires_at: self.expires_at,
            submitted_at: None,
            graded_at: None,
            submit_cause: None,
            passing_score_snapshot: self.passing_score_snapshot,
            time_limit_minutes_snapshot: self.time_limit_minutes_snapshot,
            total_points: self.total_points,
            earned_points: None,
            score: None,
            question_snapshot: sqlx::types::Json(self.questions),
            draft_answers: sqlx::types::Json(Vec::new()),
            last_saved_at: None,
            created_at: self.started_at,
            updated_at: self.started_at,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StartOutcome {
    Created(Attempt),
    Resumed(Attempt),
    QuotaExceeded(Vec<Attempt>),
}

#[derive(Debug, Clone)]
pub(crate) struct SubmissionWrite {
    pub(crate) attempt_id: String,
    pub(crate) cause: SubmitCause,
    pub(crate) submitted_at: PrimitiveDateTime,
    pub(crate) answers: Vec<Answer>,
    pub(crate) draft: Vec<RecordedAnswer>,
    pub(crate) status: AttemptStatus,
    pub(crate) earned_points: Option<f64>,
    pub(crate) score: Option<f64>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone)]
pub(crate) struct GradeWrite {
    pub(crate) answer_id: String,
    pub(crate) points_earned: f64,
    pub(crate) is_correct: bool,
    pub(crate) feedback: Option<String>,
    pub(crate) graded_by: String,
}

#[derive(Debug, Clone)]
pub(crate) enum GradeOutcome {
    Applied { attempt: Attempt, answers: Vec<Answer> },
    NotAwaitingGrading(Attempt),
}

#[async_trait]
pub(crate) trait AssessmentStore: Send + Sync {
    async fn find_test(&self, test_id: &str) -> Result<Option<TestDefinition>, StoreError>;

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>, StoreError>;

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError>;

    async fn list_attempts(&self, test_id: &str, user_id: &str)
        -> Result<Vec<Attempt>, StoreError>;

    /// Resumes, rejects or creates under one lock; never leaves two open attempts.
    async fn start_attempt(
        &self,
        new_attempt: NewAttempt,
        max_attempts: i32,
    ) -> Result<StartOutcome, StoreError>;

    /// `None` when the attempt is no longer in progress.
    async fn save_draft(
        &self,
        attempt_id: &str,
        draft: Vec<RecordedAnswer>,
        saved_at: PrimitiveDateTime,
    ) -> Result<Option<Attempt>, StoreError>;

    /// Check-and-set from in-progress. `None` means another caller submitted first.
    async fn complete_submission(
        &self,
        write: SubmissionWrite,
    ) -> Result<Option<Attempt>, StoreError>;

    async fn list_answers(&self, attempt_id: &str) -> Result<Vec<Answer>, StoreError>;

    /// Applies grades while the attempt awaits grading and finalizes it once
    /// every answer is graded.
    async fn record_grades(
        &self,
        attempt_id: &str,
        grades: Vec<GradeWrite>,
        graded_at: PrimitiveDateTime,
    ) -> Result<Option<GradeOutcome>, StoreError>;

    async fn list_overdue(&self, cutoff: PrimitiveDateTime) -> Result<Vec<Attempt>, StoreError>;

    async fn list_awaiting_grading(
        &self,
        test_id: Option<&str>,
    ) -> Result<Vec<Attempt>, StoreError>;

    /// `false` when a certificate for the attempt already exists.
    async fn insert_certificate(&self, certificate: Certificate) -> Result<bool, StoreError>;

    async fn find_certificate_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<Certificate>, StoreError>;

    async fn find_certificate(
        &self,
        certificate_id: &str,
    ) -> Result<Option<Certificate>, StoreError>;

    async fn list_certificates_by_email(&self, email: &str)
        -> Result<Vec<Certificate>, StoreError>;

    async fn set_certificate_revocation(
        &self,
        certificate_id: &str,
        revoked_at: Option<PrimitiveDateTime>,
        reason: Option<String>,
    ) -> Result<Option<Certificate>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Applies a grading pass to loaded answers; shared by both stores.
pub(crate) fn apply_grades(
    attempt: &mut Attempt,
    answers: &mut [Answer],
    grades: &[GradeWrite],
    graded_at: PrimitiveDateTime,
) {
    use crate::services::grader;

    for grade in grades {
        if let Some(answer) = answers.iter_mut().find(|answer| answer.id == grade.answer_id) {
            answer.points_earned = grade.points_earned;
            answer.is_correct = Some(grade.is_correct);
            answer.feedback = grade.feedback.clone();
            answer.graded_by = Some(grade.graded_by.clone());
            answer.graded_at = Some(graded_at);
        }
    }

    attempt.updated_at = graded_at;
    if grader::all_graded(answers) {
        let earned = grader::earned_points(answers);
        attempt.earned_points = Some(earned);
        attempt.score = Some(grader::score_percent(earned, attempt.total_points));
        attempt.status = AttemptStatus::Graded;
        attempt.graded_at = Some(graded_at);
    }
}
