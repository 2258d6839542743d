//! Client-driver view of one attempt.
//!
//! Embedders that present an attempt in-process hold an `AttemptSession`;
//! the HTTP handlers drive attempts statelessly and do not use it.

use std::sync::Arc;

use serde_json::Value;
use time::Duration;
use tokio::sync::Mutex;

use crate::db::models::UserAnswer;
use crate::db::types::SubmitCause;
use crate::services::answer_collector::{AnswerCollector, AnswerRejection, SubmittedAnswer};
use crate::services::attempt_orchestrator::{
    AttemptError, AttemptOrchestrator, ProgressSaved, StartedAttempt, SubmitOutcome,
};
use crate::services::context::RequestContext;
use crate::services::expiry_timer::{ExpiryTimer, TimerDriver};

type SubmitResult = Result<SubmitOutcome, AttemptError>;

/// One learner's open view of an attempt: collected answers plus the countdown
/// that force-submits them when the time limit lapses.
pub(crate) struct AttemptSession {
    attempt_id: String,
    ctx: RequestContext,
    orchestrator: AttemptOrchestrator,
    collector: Arc<Mutex<AnswerCollector>>,
    timer: Arc<Mutex<ExpiryTimer>>,
    driver: Option<TimerDriver<SubmitResult>>,
}

impl AttemptSession {
    pub(crate) fn open(
        orchestrator: AttemptOrchestrator,
        ctx: RequestContext,
        started: &StartedAttempt,
        tick: std::time::Duration,
    ) -> Self {
        let attempt = &started.attempt;
        let collector = Arc::new(Mutex::new(AnswerCollector::with_draft(
            attempt.questions(),
            &attempt.draft_answers.0,
        )));
        let timer = Arc::new(Mutex::new(ExpiryTimer::new(attempt.expires_at)));

        let on_fire = {
            let orchestrator = orchestrator.clone();
            let ctx = ctx.clone();
            let collector = collector.clone();
            let attempt_id = attempt.id.clone();
            move || async move {
                let answers = collector.lock().await.snapshot();
                tracing::info!(attempt_id = %attempt_id, "Time limit reached, submitting attempt");
                orchestrator.submit_recorded(&ctx, &attempt_id, answers, SubmitCause::Expiry).await
            }
        };

        let driver =
            TimerDriver::spawn(timer.clone(), orchestrator.clock().clone(), tick, on_fire);

        Self {
            attempt_id: attempt.id.clone(),
            ctx,
            orchestrator,
            collector,
            timer,
            driver: Some(driver),
        }
    }

    pub(crate) fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub(crate) async fn answer(&self, question_id: &str, value: &Value) -> Result<(), AnswerRejection> {
        self.collector.lock().await.record(question_id, value)
    }

    pub(crate) async fn clear(&self, question_id: &str) {
        self.collector.lock().await.clear(question_id);
    }

    pub(crate) async fn remaining(&self) -> Option<Duration> {
        let now = self.orchestrator.clock().now();
        self.timer.lock().await.remaining(now)
    }

    pub(crate) async fn save(&self) -> Result<ProgressSaved, AttemptError> {
        let answers = self.collector.lock().await.snapshot();
        let payload: Vec<_> = answers
            .into_iter()
            .map(|recorded| SubmittedAnswer {
                question_id: recorded.question_id,
                answer: answer_value(&recorded.answer),
            })
            .collect();
        self.orchestrator.save_progress(&self.ctx, &self.attempt_id, &payload).await
    }

    /// Cancels the countdown, then submits. A timer that already fired makes this
    /// call observe `AlreadySubmitted`.
    pub(crate) async fn submit(&mut self) -> SubmitResult {
        self.timer.lock().await.cancel();
        if let Some(driver) = &self.driver {
            driver.stop();
        }

        let answers = self.collector.lock().await.snapshot();
        self.orchestrator
            .submit_recorded(&self.ctx, &self.attempt_id, answers, SubmitCause::Manual)
            .await
    }

    /// Waits for the countdown to finish. `None` when it was cancelled.
    pub(crate) async fn wait_for_expiry(&mut self) -> Option<SubmitResult> {
        match self.driver.take() {
            Some(driver) => driver.join().await,
            None => None,
        }
    }
}

impl Drop for AttemptSession {
    fn drop(&mut self) {
        // Closing the view leaves the attempt open server-side.
        if let Some(driver) = &self.driver {
            driver.stop();
        }
    }
}

fn answer_value(answer: &UserAnswer) -> Value {
    match answer {
        UserAnswer::Single(index) => Value::from(*index),
        UserAnswer::Multi(indices) => Value::from(indices.iter().copied().collect::<Vec<_>>()),
        UserAnswer::TrueFalse(value) => Value::from(*value),
        UserAnswer::Text(text) => Value::from(text.clone()),
    }
}
