use std::collections::HashMap;

use async_trait::async_trait;
use time::PrimitiveDateTime;
use tokio::sync::Mutex;

use crate::db::models::{Answer, Attempt, Certificate, Question, RecordedAnswer, TestDefinition};
use crate::db::types::AttemptStatus;
use crate::repositories::{
    apply_grades, AssessmentStore, GradeOutcome, GradeWrite, NewAttempt, StartOutcome, StoreError,
    SubmissionWrite,
};
use crate::services::quota::{self, QuotaDecision};

/// Process-local store. One mutex guards everything, so each trait call is atomic.
#[derive(Default)]
pub(crate) struct MemoryAssessmentStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    tests: HashMap<String, TestDefinition>,
    questions: HashMap<String, Vec<Question>>,
    attempts: Vec<Attempt>,
    answers: Vec<Answer>,
    certificates: Vec<Certificate>,
}

impl MemoryAssessmentStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replaces a test and its question bank.
    pub(crate) async fn insert_test(&self, test: TestDefinition, questions: Vec<Question>) {
        let mut state = self.inner.lock().await;
        state.questions.insert(test.id.clone(), questions);
        state.tests.insert(test.id.clone(), test);
    }

    #[cfg(test)]
    pub(crate) async fn certificate_count(&self, attempt_id: &str) -> usize {
        let state = self.inner.lock().await;
        state.certificates.iter().filter(|cert| cert.attempt_id == attempt_id).count()
    }
}

impl MemoryState {
    fn attempts_for(&self, test_id: &str, user_id: &str) -> Vec<Attempt> {
        let mut found: Vec<Attempt> = self
            .attempts
            .iter()
            .filter(|attempt| attempt.test_id == test_id && attempt.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|attempt| attempt.attempt_number);
        found
    }

    fn answers_for(&self, attempt_id: &str) -> Vec<Answer> {
        self.answers.iter().filter(|answer| answer.attempt_id == attempt_id).cloned().collect()
    }

    fn attempt_mut(&mut self, attempt_id: &str) -> Option<&mut Attempt> {
        self.attempts.iter_mut().find(|attempt| attempt.id == attempt_id)
    }
}

#[async_trait]
impl AssessmentStore for MemoryAssessmentStore {
    async fn find_test(&self, test_id: &str) -> Result<Option<TestDefinition>, StoreError> {
        Ok(self.inner.lock().await.tests.get(test_id).cloned())
    }

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>, StoreError> {
        let state = self.inner.lock().await;
        let mut questions = state.questions.get(test_id).cloned().unwrap_or_default();
        questions.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        Ok(questions)
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state.attempts.iter().find(|attempt| attempt.id == attempt_id).cloned())
    }

    async fn list_attempts(
        &self,
        test_id: &str,
        user_id: &str,
    ) -> Result<Vec<Attempt>, StoreError> {
        Ok(self.inner.lock().await.attempts_for(test_id, user_id))
    }

    async fn start_attempt(
        &self,
        new_attempt: NewAttempt,
        max_attempts: i32,
    ) -> Result<StartOutcome, StoreError> {
        let mut state = self.inner.lock().await;
        let existing = state.attempts_for(&new_attempt.test_id, &new_attempt.user_id);

        match quota::decide(existing, max_attempts) {
            QuotaDecision::Resume(attempt) => Ok(StartOutcome::Resumed(attempt)),
            QuotaDecision::Rejected { prior } => Ok(StartOutcome::QuotaExceeded(prior)),
            QuotaDecision::Allowed { attempt_number } => {
                let attempt = new_attempt.into_attempt(attempt_number);
                state.attempts.push(attempt.clone());
                Ok(StartOutcome::Created(attempt))
            }
        }
    }

    async fn save_draft(
        &self,
        attempt_id: &str,
        draft: Vec<RecordedAnswer>,
        saved_at: PrimitiveDateTime,
    ) -> Result<Option<Attempt>, StoreError> {
        let mut state = self.inner.lock().await;
        let Some(attempt) = state.attempt_mut(attempt_id) else {
            return Ok(None);
        };
        if attempt.status != AttemptStatus::InProgress {
            return Ok(None);
        }

        attempt.draft_answers.0 = draft;
        attempt.last_saved_at = Some(saved_at);
        attempt.updated_at = saved_at;
        Ok(Some(attempt.clone()))
    }

    async fn complete_submission(
        &self,
        write: SubmissionWrite,
    ) -> Result<Option<Attempt>, StoreError> {
        let mut state = self.inner.lock().await;
        let Some(attempt) = state.attempt_mut(&write.attempt_id) else {
            return Ok(None);
        };
        if attempt.status != AttemptStatus::InProgress {
            return Ok(None);
        }

        attempt.status = write.status;
        attempt.submitted_at = Some(write.submitted_at);
        attempt.submit_cause = Some(write.cause);
        attempt.earned_points = write.earned_points;
        attempt.score = write.score;
        attempt.graded_at = write.graded_at;
        attempt.draft_answers.0 = write.draft;
        attempt.updated_at = write.submitted_at;
        let updated = attempt.clone();

        for answer in write.answers {
            let duplicate = state.answers.iter().any(|existing| {
                existing.attempt_id == answer.attempt_id && existing.question_id == answer.question_id
            });
            if !duplicate {
                state.answers.push(answer);
            }
        }

        Ok(Some(updated))
    }

    async fn list_answers(&self, attempt_id: &str) -> Result<Vec<Answer>, StoreError> {
        Ok(self.inner.lock().await.answers_for(attempt_id))
    }

    async fn record_grades(
        &self,
        attempt_id: &str,
        grades: Vec<GradeWrite>,
        graded_at: PrimitiveDateTime,
    ) -> Result<Option<GradeOutcome>, StoreError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let Some(attempt) = state.attempts.iter_mut().find(|attempt| attempt.id == attempt_id)
        else {
            return Ok(None);
        };
        if attempt.status != AttemptStatus::AwaitingGrading {
            return Ok(Some(GradeOutcome::NotAwaitingGrading(attempt.clone())));
        }

        let mut current: Vec<Answer> =
            state.answers.iter().filter(|answer| answer.attempt_id == attempt_id).cloned().collect();
        apply_grades(attempt, &mut current, &grades, graded_at);
        let attempt = attempt.clone();

        for updated in &current {
            if let Some(stored) = state.answers.iter_mut().find(|answer| answer.id == updated.id) {
                *stored = updated.clone();
            }
        }

        Ok(Some(GradeOutcome::Applied { attempt, answers: current }))
    }

    async fn list_overdue(&self, cutoff: PrimitiveDateTime) -> Result<Vec<Attempt>, StoreError> {
        let state = self.inner.lock().await;
        let mut overdue: Vec<Attempt> = state
            .attempts
            .iter()
            .filter(|attempt| attempt.status == AttemptStatus::InProgress)
            .filter(|attempt| attempt.expires_at.is_some_and(|expires_at| expires_at < cutoff))
            .cloned()
            .collect();
        overdue.sort_by_key(|attempt| attempt.expires_at);
        Ok(overdue)
    }

    async fn list_awaiting_grading(
        &self,
        test_id: Option<&str>,
    ) -> Result<Vec<Attempt>, StoreError> {
        let state = self.inner.lock().await;
        let mut queue: Vec<Attempt> = state
            .attempts
            .iter()
            .filter(|attempt| attempt.status == AttemptStatus::AwaitingGrading)
            .filter(|attempt| test_id.map_or(true, |test_id| attempt.test_id == test_id))
            .cloned()
            .collect();
        queue.sort_by_key(|attempt| attempt.submitted_at);
        Ok(queue)
    }

    async fn insert_certificate(&self, certificate: Certificate) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().await;
        if state.certificates.iter().any(|existing| existing.attempt_id == certificate.attempt_id) {
            return Ok(false);
        }
        state.certificates.push(certificate);
        Ok(true)
    }

    async fn find_certificate_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state.certificates.iter().find(|cert| cert.attempt_id == attempt_id).cloned())
    }

    async fn find_certificate(
        &self,
        certificate_id: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state.certificates.iter().find(|cert| cert.certificate_id == certificate_id).cloned())
    }

    async fn list_certificates_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<Certificate>, StoreError> {
        let state = self.inner.lock().await;
        let mut found: Vec<Certificate> = state
            .certificates
            .iter()
            .filter(|cert| cert.user_email.eq_ignore_ascii_case(email))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(found)
    }

    async fn set_certificate_revocation(
        &self,
        certificate_id: &str,
        revoked_at: Option<PrimitiveDateTime>,
        reason: Option<String>,
    ) -> Result<Option<Certificate>, StoreError> {
        let mut state = self.inner.lock().await;
        let Some(cert) =
            state.certificates.iter_mut().find(|cert| cert.certificate_id == certificate_id)
        else {
            return Ok(None);
        };
        cert.revoked_at = revoked_at;
        cert.revoke_reason = reason;
        Ok(Some(cert.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
