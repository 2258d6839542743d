use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Answer, Attempt, Certificate, Question, RecordedAnswer, TestDefinition};
use crate::db::types::AttemptStatus;
use crate::repositories::{
    answers, apply_grades, attempts, certificates, test_definitions, AssessmentStore, GradeOutcome,
    GradeWrite, NewAttempt, StartOutcome, StoreError, SubmissionWrite,
};
use crate::services::quota::{self, QuotaDecision};

#[derive(Clone)]
pub(crate) struct PgAssessmentStore {
    pool: PgPool,
}

impl PgAssessmentStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssessmentStore for PgAssessmentStore {
    async fn find_test(&self, test_id: &str) -> Result<Option<TestDefinition>, StoreError> {
        Ok(test_definitions::find_by_id(&self.pool, test_id).await?)
    }

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>, StoreError> {
        Ok(test_definitions::list_questions(&self.pool, test_id).await?)
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::find_by_id(&self.pool, attempt_id).await?)
    }

    async fn list_attempts(
        &self,
        test_id: &str,
        user_id: &str,
    ) -> Result<Vec<Attempt>, StoreError> {
        Ok(attempts::list_by_test_and_user(&self.pool, test_id, user_id).await?)
    }

    async fn start_attempt(
        &self,
        new_attempt: NewAttempt,
        max_attempts: i32,
    ) -> Result<StartOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        attempts::acquire_test_user_lock(&mut *tx, &new_attempt.test_id, &new_attempt.user_id)
            .await?;

        let existing =
            attempts::list_by_test_and_user(&mut *tx, &new_attempt.test_id, &new_attempt.user_id)
                .await?;

        let attempt_number = match quota::decide(existing, max_attempts) {
            QuotaDecision::Resume(attempt) => {
                tx.commit().await?;
                return Ok(StartOutcome::Resumed(attempt));
            }
            QuotaDecision::Rejected { prior } => {
                tx.commit().await?;
                return Ok(StartOutcome::QuotaExceeded(prior));
            }
            QuotaDecision::Allowed { attempt_number } => attempt_number,
        };

        let test_id = new_attempt.test_id.clone();
        let user_id = new_attempt.user_id.clone();
        let attempt = new_attempt.into_attempt(attempt_number);
        let inserted = attempts::create(&mut *tx, &attempt).await?;

        if !inserted {
            // The partial unique index caught a concurrent start that bypassed the lock.
            let existing = attempts::list_by_test_and_user(&mut *tx, &test_id, &user_id).await?;
            tx.commit().await?;
            return Ok(match quota::decide(existing, max_attempts) {
                QuotaDecision::Resume(attempt) => StartOutcome::Resumed(attempt),
                QuotaDecision::Rejected { prior } => StartOutcome::QuotaExceeded(prior),
                QuotaDecision::Allowed { .. } => return Err(StoreError::Conflict(attempt.id)),
            });
        }

        tx.commit().await?;
        Ok(StartOutcome::Created(attempt))
    }

    async fn save_draft(
        &self,
        attempt_id: &str,
        draft: Vec<RecordedAnswer>,
        saved_at: PrimitiveDateTime,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::save_draft(&self.pool, attempt_id, &draft, saved_at).await?)
    }

    async fn complete_submission(
        &self,
        write: SubmissionWrite,
    ) -> Result<Option<Attempt>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(attempt) = attempts::mark_submitted(&mut *tx, &write).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        for answer in &write.answers {
            answers::insert(&mut *tx, answer).await?;
        }

        tx.commit().await?;
        Ok(Some(attempt))
    }

    async fn list_answers(&self, attempt_id: &str) -> Result<Vec<Answer>, StoreError> {
        Ok(answers::list_by_attempt(&self.pool, attempt_id).await?)
    }

    async fn record_grades(
        &self,
        attempt_id: &str,
        grades: Vec<GradeWrite>,
        graded_at: PrimitiveDateTime,
    ) -> Result<Option<GradeOutcome>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(mut attempt) = attempts::find_for_update(&mut *tx, attempt_id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if attempt.status != AttemptStatus::AwaitingGrading {
            tx.rollback().await?;
            return Ok(Some(GradeOutcome::NotAwaitingGrading(attempt)));
        }

        for grade in &grades {
            answers::apply_grade(&mut *tx, attempt_id, grade, graded_at).await?;
        }

        let mut current = answers::list_by_attempt(&mut *tx, attempt_id).await?;
        apply_grades(&mut attempt, &mut current, &[], graded_at);
        if attempt.status == AttemptStatus::Graded {
            attempt = attempts::mark_graded(&mut *tx, &attempt).await?;
        }

        tx.commit().await?;
        Ok(Some(GradeOutcome::Applied { attempt, answers: current }))
    }

    async fn list_overdue(&self, cutoff: PrimitiveDateTime) -> Result<Vec<Attempt>, StoreError> {
        Ok(attempts::list_overdue(&self.pool, cutoff).await?)
    }

    async fn list_awaiting_grading(
        &self,
        test_id: Option<&str>,
    ) -> Result<Vec<Attempt>, StoreError> {
        Ok(attempts::list_awaiting_grading(&self.pool, test_id).await?)
    }

    async fn insert_certificate(&self, certificate: Certificate) -> Result<bool, StoreError> {
        Ok(certificates::create(&self.pool, &certificate).await?)
    }

    async fn find_certificate_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        Ok(certificates::find_by_attempt(&self.pool, attempt_id).await?)
    }

    async fn find_certificate(
        &self,
        certificate_id: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        Ok(certificates::find_by_public_id(&self.pool, certificate_id).await?)
    }

    async fn list_certificates_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<Certificate>, StoreError> {
        Ok(certificates::list_by_email(&self.pool, email).await?)
    }

    async fn set_certificate_revocation(
        &self,
        certificate_id: &str,
        revoked_at: Option<PrimitiveDateTime>,
        reason: Option<String>,
    ) -> Result<Option<Certificate>, StoreError> {
        Ok(certificates::set_revocation(&self.pool, certificate_id, revoked_at, reason.as_deref())
            .await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
