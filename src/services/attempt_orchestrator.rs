//! Attempt state machine.
//!
//! ```text
//! start ──> IN_PROGRESS ──submit/expiry──> GRADED
//!                      └──────────────────> AWAITING_GRADING ──finalize_grading──> GRADED
//! ```
//!
//! Deadlines are always judged with the server clock; a client timer only
//! decides when to ask.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use sqlx::types::Json;
use thiserror::Error;
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::metrics::{
    ATTEMPTS_GRADED, ATTEMPTS_STARTED, ATTEMPTS_SUBMITTED, EXPIRED_ATTEMPTS_CLOSED,
};
use crate::core::time::Clock;
use crate::db::models::{Answer, Attempt, Certificate, RecordedAnswer, TestDefinition, UserAnswer};
use crate::db::types::{AttemptStatus, SubmitCause};
use crate::repositories::{
    AssessmentStore, GradeOutcome, GradeWrite, NewAttempt, StartOutcome, StoreError,
    SubmissionWrite,
};
use crate::services::answer_collector::{self, AnswerRejection, SubmittedAnswer};
use crate::services::certificate_issuer::CertificateIssuer;
use crate::services::context::RequestContext;
use crate::services::grader;
use crate::services::question_selection::QuestionSelector;
use crate::services::quota::{self, QuotaDecision};

#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("test not found")]
    TestNotFound,
    #[error("test is not active")]
    TestInactive,
    #[error("test has no questions worth any points")]
    EmptyTest,
    #[error("attempt not found")]
    AttemptNotFound,
    #[error("access denied")]
    Forbidden,
    #[error("maximum number of attempts reached")]
    MaxAttemptsReached { prior: Vec<Attempt> },
    #[error("attempt was already submitted")]
    AlreadySubmitted { attempt: Box<Attempt> },
    #[error("attempt expired at {expires_at}")]
    AttemptExpiredOnSubmit { expires_at: PrimitiveDateTime },
    #[error("attempt is {}, not awaiting grading", .status.as_str())]
    NotAwaitingGrading { status: AttemptStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub(crate) struct StartedAttempt {
    pub(crate) attempt: Attempt,
    pub(crate) resumed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ProgressSaved {
    pub(crate) attempt: Attempt,
    pub(crate) rejected: Vec<AnswerRejection>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitOutcome {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Vec<Answer>,
    pub(crate) rejected: Vec<AnswerRejection>,
    pub(crate) certificate: Option<Certificate>,
    /// The request arrived after deadline and grace, so the saved draft was scored.
    pub(crate) used_saved_draft: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptResult {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Option<Vec<Answer>>,
    pub(crate) certificate: Option<Certificate>,
    pub(crate) detail_withheld: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct GradeInput {
    pub(crate) answer_id: String,
    pub(crate) points_earned: f64,
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum GradeRejectionReason {
    UnknownAnswer,
    AutoGraded,
    DuplicateAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct GradeRejection {
    pub(crate) answer_id: String,
    pub(crate) reason: GradeRejectionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ClampedGrade {
    pub(crate) answer_id: String,
    pub(crate) requested: f64,
    pub(crate) applied: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct FinalizeOutcome {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Vec<Answer>,
    pub(crate) clamped: Vec<ClampedGrade>,
    pub(crate) rejected: Vec<GradeRejection>,
    pub(crate) certificate: Option<Certificate>,
    pub(crate) already_graded: bool,
}

#[derive(Clone)]
pub(crate) struct AttemptOrchestrator {
    store: Arc<dyn AssessmentStore>,
    clock: Arc<dyn Clock>,
    selector: Arc<dyn QuestionSelector>,
    issuer: CertificateIssuer,
    grace: Duration,
}

impl AttemptOrchestrator {
    pub(crate) fn new(
        store: Arc<dyn AssessmentStore>,
        clock: Arc<dyn Clock>,
        selector: Arc<dyn QuestionSelector>,
        issuer: CertificateIssuer,
        grace: Duration,
    ) -> Self {
        Self { store, clock, selector, issuer, grace }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn issuer(&self) -> &CertificateIssuer {
        &self.issuer
    }

    pub(crate) async fn get_test(
        &self,
        _ctx: &RequestContext,
        test_id: &str,
    ) -> Result<(TestDefinition, usize), AttemptError> {
        let test = self.load_test(test_id).await?;
        let bank_size = self.store.list_questions(test_id).await?.len();
        Ok((test, bank_size))
    }

    pub(crate) async fn list_user_attempts(
        &self,
        ctx: &RequestContext,
        test_id: &str,
    ) -> Result<Vec<Attempt>, AttemptError> {
        self.load_test(test_id).await?;
        Ok(self.store.list_attempts(test_id, &ctx.user_id).await?)
    }

    pub(crate) async fn start(
        &self,
        ctx: &RequestContext,
        test_id: &str,
    ) -> Result<StartedAttempt, AttemptError> {
        let test = self.load_test(test_id).await?;

        loop {
            let existing = self.store.list_attempts(test_id, &ctx.user_id).await?;
            match quota::decide(existing, test.max_attempts) {
                // A stale open attempt is closed with its draft and counted before deciding.
                QuotaDecision::Resume(attempt) if self.is_overdue(&attempt) => {
                    self.close_overdue(attempt).await?;
                }
                QuotaDecision::Resume(attempt) => {
                    return Ok(StartedAttempt { attempt, resumed: true });
                }
                QuotaDecision::Rejected { prior } => {
                    return Err(AttemptError::MaxAttemptsReached { prior });
                }
                QuotaDecision::Allowed { .. } => break,
            }
        }

        if !test.is_active {
            return Err(AttemptError::TestInactive);
        }

        let bank = self.store.list_questions(test_id).await?;
        let questions = self.selector.draw(&bank, test.number_of_questions);
        let total_points = grader::total_points(&questions);
        if questions.is_empty() || total_points <= 0 {
            tracing::error!(test_id, "Test has no gradable questions configured");
            return Err(AttemptError::EmptyTest);
        }

        let now = self.clock.now();
        let expires_at = test
            .time_limit_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| now + Duration::minutes(i64::from(minutes)));

        let new_attempt = NewAttempt {
            id: Uuid::new_v4().to_string(),
            test_id: test.id.clone(),
            user_id: ctx.user_id.clone(),
            user_email: ctx.email.clone(),
            started_at: now,
            expires_at,
            passing_score_snapshot: test.passing_score,
            time_limit_minutes_snapshot: test.time_limit_minutes,
            total_points,
            questions,
        };

        match self.store.start_attempt(new_attempt, test.max_attempts).await? {
            StartOutcome::Created(attempt) => {
                metrics::counter!(ATTEMPTS_STARTED).increment(1);
                tracing::info!(
                    attempt_id = %attempt.id,
                    test_id,
                    user_id = %ctx.user_id,
                    attempt_number = attempt.attempt_number,
                    "Attempt started"
                );
                Ok(StartedAttempt { attempt, resumed: false })
            }
            StartOutcome::Resumed(attempt) => Ok(StartedAttempt { attempt, resumed: true }),
            StartOutcome::QuotaExceeded(prior) => Err(AttemptError::MaxAttemptsReached { prior }),
        }
    }

    pub(crate) async fn save_progress(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
        answers: &[SubmittedAnswer],
    ) -> Result<ProgressSaved, AttemptError> {
        let attempt = self.load_owned(ctx, attempt_id).await?;
        if attempt.status != AttemptStatus::InProgress {
            return Err(AttemptError::AlreadySubmitted { attempt: Box::new(attempt) });
        }

        let now = self.clock.now();
        if let Some(expires_at) = attempt.expires_at {
            if now > expires_at + self.grace {
                return Err(AttemptError::AttemptExpiredOnSubmit { expires_at });
            }
        }

        let (draft, rejected) = answer_collector::normalize(attempt.questions(), answers);
        log_rejections(attempt_id, &rejected);

        match self.store.save_draft(attempt_id, draft, now).await? {
            Some(attempt) => Ok(ProgressSaved { attempt, rejected }),
            None => Err(self.already_submitted(attempt_id).await),
        }
    }

    pub(crate) async fn submit(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
        answers: &[SubmittedAnswer],
        cause: SubmitCause,
    ) -> Result<SubmitOutcome, AttemptError> {
        let attempt = self.load_owned(ctx, attempt_id).await?;
        let (recorded, rejected) = answer_collector::normalize(attempt.questions(), answers);
        log_rejections(attempt_id, &rejected);
        self.submit_loaded(attempt, recorded, rejected, cause).await
    }

    /// Submits answers that were already normalised, e.g. by an `AttemptSession`.
    pub(crate) async fn submit_recorded(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
        recorded: Vec<RecordedAnswer>,
        cause: SubmitCause,
    ) -> Result<SubmitOutcome, AttemptError> {
        let attempt = self.load_owned(ctx, attempt_id).await?;
        self.submit_loaded(attempt, recorded, Vec::new(), cause).await
    }

    async fn submit_loaded(
        &self,
        attempt: Attempt,
        recorded: Vec<RecordedAnswer>,
        rejected: Vec<AnswerRejection>,
        cause: SubmitCause,
    ) -> Result<SubmitOutcome, AttemptError> {
        if attempt.status != AttemptStatus::InProgress {
            self.ensure_certificate(&attempt).await;
            return Err(AttemptError::AlreadySubmitted { attempt: Box::new(attempt) });
        }

        let now = self.clock.now();
        let mut recorded = recorded;
        let mut rejected = rejected;
        let mut cause = cause;
        let mut used_saved_draft = false;
        let mut late_manual = None;

        if let Some(expires_at) = attempt.expires_at {
            if now > expires_at + self.grace {
                if cause == SubmitCause::Manual {
                    // The request is refused, but the attempt still closes with its draft.
                    tracing::warn!(
                        attempt_id = %attempt.id,
                        expires_at = %expires_at,
                        "Rejected manual submit after deadline"
                    );
                    late_manual = Some(expires_at);
                    cause = SubmitCause::Expiry;
                }
                recorded = attempt.draft_answers.0.clone();
                rejected.clear();
                used_saved_draft = true;
            }
        }

        let answers = build_answers(&attempt, &recorded, now);
        let all_graded = grader::all_graded(&answers);
        let (status, earned_points, score, graded_at) = if all_graded {
            let earned = grader::earned_points(&answers);
            (
                AttemptStatus::Graded,
                Some(earned),
                Some(grader::score_percent(earned, attempt.total_points)),
                Some(now),
            )
        } else {
            (AttemptStatus::AwaitingGrading, None, None, None)
        };

        let write = SubmissionWrite {
            attempt_id: attempt.id.clone(),
            cause,
            submitted_at: now,
            answers: answers.clone(),
            draft: recorded,
            status,
            earned_points,
            score,
            graded_at,
        };

        let Some(updated) = self.store.complete_submission(write).await? else {
            if let Some(expires_at) = late_manual {
                return Err(AttemptError::AttemptExpiredOnSubmit { expires_at });
            }
            return Err(self.already_submitted(&attempt.id).await);
        };

        metrics::counter!(
            ATTEMPTS_SUBMITTED,
            "cause" => cause.as_str(),
            "outcome" => status.as_str()
        )
        .increment(1);
        tracing::info!(
            attempt_id = %updated.id,
            test_id = %updated.test_id,
            user_id = %updated.user_id,
            cause = cause.as_str(),
            status = status.as_str(),
            score = ?updated.score,
            "Attempt submitted"
        );

        let certificate = if updated.status == AttemptStatus::Graded {
            metrics::counter!(ATTEMPTS_GRADED).increment(1);
            self.ensure_certificate(&updated).await
        } else {
            None
        };

        if let Some(expires_at) = late_manual {
            metrics::counter!(EXPIRED_ATTEMPTS_CLOSED).increment(1);
            return Err(AttemptError::AttemptExpiredOnSubmit { expires_at });
        }

        Ok(SubmitOutcome { attempt: updated, answers, rejected, certificate, used_saved_draft })
    }

    pub(crate) async fn attempt_result(
        &self,
        ctx: &RequestContext,
        test_id: &str,
        attempt_id: &str,
    ) -> Result<AttemptResult, AttemptError> {
        let attempt = self.load_owned(ctx, attempt_id).await?;
        if attempt.test_id != test_id {
            return Err(AttemptError::AttemptNotFound);
        }

        let certificate = self.store.find_certificate_by_attempt(&attempt.id).await?;
        let detail_withheld = self.hides_detail(ctx, &attempt).await?;

        let answers = if detail_withheld || attempt.status == AttemptStatus::InProgress {
            None
        } else {
            Some(self.store.list_answers(&attempt.id).await?)
        };

        Ok(AttemptResult { attempt, answers, certificate, detail_withheld })
    }

    /// Learners lose per-question detail on certificate tests once they submit.
    pub(crate) async fn hides_detail(
        &self,
        ctx: &RequestContext,
        attempt: &Attempt,
    ) -> Result<bool, AttemptError> {
        if ctx.is_staff() || attempt.status == AttemptStatus::InProgress {
            return Ok(false);
        }
        let test = self.load_test(&attempt.test_id).await?;
        Ok(test.issues_certificate)
    }

    pub(crate) async fn finalize_grading(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
        grades: &[GradeInput],
    ) -> Result<FinalizeOutcome, AttemptError> {
        if !ctx.is_staff() {
            return Err(AttemptError::Forbidden);
        }

        let attempt = self.load_attempt(attempt_id).await?;
        match attempt.status {
            AttemptStatus::InProgress => {
                return Err(AttemptError::NotAwaitingGrading { status: attempt.status });
            }
            AttemptStatus::Graded => return self.regrade_noop(attempt).await,
            AttemptStatus::AwaitingGrading => {}
        }

        let current = self.store.list_answers(attempt_id).await?;
        let by_id: HashMap<&str, &Answer> =
            current.iter().map(|answer| (answer.id.as_str(), answer)).collect();

        let mut seen = HashSet::new();
        let mut writes = Vec::with_capacity(grades.len());
        let mut clamped = Vec::new();
        let mut rejected = Vec::new();

        for grade in grades {
            let reject = |reason| GradeRejection { answer_id: grade.answer_id.clone(), reason };

            if !seen.insert(grade.answer_id.as_str()) {
                rejected.push(reject(GradeRejectionReason::DuplicateAnswer));
                continue;
            }
            let Some(answer) = by_id.get(grade.answer_id.as_str()) else {
                rejected.push(reject(GradeRejectionReason::UnknownAnswer));
                continue;
            };
            if !answer.requires_manual {
                rejected.push(reject(GradeRejectionReason::AutoGraded));
                continue;
            }

            let (points, was_clamped) =
                grader::clamp_manual_points(grade.points_earned, answer.max_points);
            if was_clamped {
                tracing::warn!(
                    attempt_id,
                    answer_id = %answer.id,
                    requested = grade.points_earned,
                    applied = points,
                    "Clamped manual grade to the question's point range"
                );
                clamped.push(ClampedGrade {
                    answer_id: answer.id.clone(),
                    requested: grade.points_earned,
                    applied: points,
                });
            }

            writes.push(GradeWrite {
                answer_id: answer.id.clone(),
                points_earned: points,
                is_correct: grader::manual_is_correct(points, answer.max_points),
                feedback: grade
                    .feedback
                    .as_deref()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string),
                graded_by: ctx.user_id.clone(),
            });
        }

        let now = self.clock.now();
        let outcome = self
            .store
            .record_grades(attempt_id, writes, now)
            .await?
            .ok_or(AttemptError::AttemptNotFound)?;

        let (attempt, answers) = match outcome {
            GradeOutcome::Applied { attempt, answers } => (attempt, answers),
            GradeOutcome::NotAwaitingGrading(attempt) if attempt.status == AttemptStatus::Graded => {
                return self.regrade_noop(attempt).await;
            }
            GradeOutcome::NotAwaitingGrading(attempt) => {
                return Err(AttemptError::NotAwaitingGrading { status: attempt.status });
            }
        };

        let certificate = if attempt.status == AttemptStatus::Graded {
            metrics::counter!(ATTEMPTS_GRADED).increment(1);
            tracing::info!(
                attempt_id,
                test_id = %attempt.test_id,
                grader_id = %ctx.user_id,
                score = ?attempt.score,
                "Attempt grading finalized"
            );
            self.ensure_certificate(&attempt).await
        } else {
            let pending = answers.iter().filter(|answer| !answer.is_graded()).count();
            tracing::info!(attempt_id, pending, "Partial grading recorded");
            None
        };

        Ok(FinalizeOutcome { attempt, answers, clamped, rejected, certificate, already_graded: false })
    }

    pub(crate) async fn grading_queue(
        &self,
        ctx: &RequestContext,
        test_id: Option<&str>,
    ) -> Result<Vec<Attempt>, AttemptError> {
        if !ctx.is_staff() {
            return Err(AttemptError::Forbidden);
        }
        Ok(self.store.list_awaiting_grading(test_id).await?)
    }

    pub(crate) async fn attempt_answers(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
    ) -> Result<(Attempt, Vec<Answer>), AttemptError> {
        if !ctx.is_staff() {
            return Err(AttemptError::Forbidden);
        }
        let attempt = self.load_attempt(attempt_id).await?;
        let answers = self.store.list_answers(attempt_id).await?;
        Ok((attempt, answers))
    }

    /// Force-submits every attempt past deadline and grace with its saved draft.
    pub(crate) async fn expire_overdue(&self) -> Result<usize, AttemptError> {
        let cutoff = self.clock.now() - self.grace;
        let overdue = self.store.list_overdue(cutoff).await?;
        let mut closed = 0usize;

        for attempt in overdue {
            let attempt_id = attempt.id.clone();
            match self.close_overdue(attempt).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(attempt_id = %attempt_id, error = %err, "Failed to expire attempt");
                }
            }
        }

        if closed > 0 {
            tracing::info!(closed, "Closed overdue attempts");
        }
        Ok(closed)
    }

    fn is_overdue(&self, attempt: &Attempt) -> bool {
        attempt.status == AttemptStatus::InProgress
            && attempt
                .expires_at
                .is_some_and(|expires_at| self.clock.now() > expires_at + self.grace)
    }

    /// Expiry-submits an attempt with its saved draft. `false` when another
    /// caller already closed it.
    async fn close_overdue(&self, attempt: Attempt) -> Result<bool, AttemptError> {
        let draft = attempt.draft_answers.0.clone();
        match self.submit_loaded(attempt, draft, Vec::new(), SubmitCause::Expiry).await {
            Ok(outcome) => {
                metrics::counter!(EXPIRED_ATTEMPTS_CLOSED).increment(1);
                tracing::info!(attempt_id = %outcome.attempt.id, "Closed overdue attempt");
                Ok(true)
            }
            Err(AttemptError::AlreadySubmitted { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn regrade_noop(&self, attempt: Attempt) -> Result<FinalizeOutcome, AttemptError> {
        let answers = self.store.list_answers(&attempt.id).await?;
        let certificate = self.ensure_certificate(&attempt).await;
        Ok(FinalizeOutcome {
            attempt,
            answers,
            clamped: Vec::new(),
            rejected: Vec::new(),
            certificate,
            already_graded: true,
        })
    }

    /// Issuer failures are logged; a retried call re-runs the idempotent issuer.
    async fn ensure_certificate(&self, attempt: &Attempt) -> Option<Certificate> {
        if attempt.status != AttemptStatus::Graded {
            return None;
        }

        let test = match self.store.find_test(&attempt.test_id).await {
            Ok(Some(test)) => test,
            Ok(None) => return None,
            Err(err) => {
                tracing::error!(attempt_id = %attempt.id, error = %err, "Failed to load test for certificate");
                return None;
            }
        };

        match self.issuer.on_attempt_graded(&test, attempt).await {
            Ok(certificate) => certificate,
            Err(err) => {
                tracing::error!(attempt_id = %attempt.id, error = %err, "Certificate issuance failed");
                None
            }
        }
    }

    async fn already_submitted(&self, attempt_id: &str) -> AttemptError {
        match self.store.find_attempt(attempt_id).await {
            Ok(Some(attempt)) => AttemptError::AlreadySubmitted { attempt: Box::new(attempt) },
            Ok(None) => AttemptError::AttemptNotFound,
            Err(err) => AttemptError::Store(err),
        }
    }

    async fn load_test(&self, test_id: &str) -> Result<TestDefinition, AttemptError> {
        self.store.find_test(test_id).await?.ok_or(AttemptError::TestNotFound)
    }

    async fn load_attempt(&self, attempt_id: &str) -> Result<Attempt, AttemptError> {
        self.store.find_attempt(attempt_id).await?.ok_or(AttemptError::AttemptNotFound)
    }

    async fn load_owned(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
    ) -> Result<Attempt, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if !ctx.can_access(&attempt.user_id) {
            return Err(AttemptError::Forbidden);
        }
        Ok(attempt)
    }
}

fn build_answers(
    attempt: &Attempt,
    recorded: &[RecordedAnswer],
    now: PrimitiveDateTime,
) -> Vec<Answer> {
    let by_question: HashMap<&str, &UserAnswer> = recorded
        .iter()
        .map(|recorded| (recorded.question_id.as_str(), &recorded.answer))
        .collect();

    attempt
        .questions()
        .iter()
        .map(|question| {
            let user_answer = by_question.get(question.id.as_str()).copied();
            let graded = grader::grade(question, user_answer);
            Answer {
                id: Uuid::new_v4().to_string(),
                attempt_id: attempt.id.clone(),
                question_id: question.id.clone(),
                user_answer: user_answer.cloned().map(Json),
                is_correct: graded.is_correct,
                points_earned: graded.points_earned,
                max_points: question.points,
                requires_manual: graded.requires_manual,
                feedback: None,
                graded_by: None,
                graded_at: graded.is_correct.map(|_| now),
                created_at: now,
            }
        })
        .collect()
}

fn log_rejections(attempt_id: &str, rejected: &[AnswerRejection]) {
    for rejection in rejected {
        tracing::warn!(
            attempt_id,
            question_id = %rejection.question_id,
            reason = ?rejection.reason,
            "Rejected answer with invalid shape"
        );
    }
}
