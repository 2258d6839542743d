use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AttemptStatus, QuestionKind, SubmitCause};
use crate::services::grader;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct TestDefinition {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) passing_score: i32,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) max_attempts: i32,
    pub(crate) number_of_questions: i32,
    pub(crate) issues_certificate: bool,
    pub(crate) is_active: bool,
    pub(crate) lesson_id: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) prompt: String,
    pub(crate) body: Json<QuestionBody>,
    pub(crate) points: i32,
    pub(crate) explanation: Option<String>,
    pub(crate) order_index: i32,
}

impl Question {
    pub(crate) fn kind(&self) -> QuestionKind {
        self.body.0.kind()
    }
}

/// Type-specific part of a question, including its answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum QuestionBody {
    SingleChoice { options: Vec<String>, correct_answer: usize },
    MultiChoice { options: Vec<String>, correct_answers: BTreeSet<usize> },
    TrueFalse { correct_answer: bool },
    ShortAnswer { reference_answer: Option<String> },
}

impl QuestionBody {
    pub(crate) fn kind(&self) -> QuestionKind {
        match self {
            Self::SingleChoice { .. } => QuestionKind::SingleChoice,
            Self::MultiChoice { .. } => QuestionKind::MultiChoice,
            Self::TrueFalse { .. } => QuestionKind::TrueFalse,
            Self::ShortAnswer { .. } => QuestionKind::ShortAnswer,
        }
    }

    pub(crate) fn options(&self) -> Option<&[String]> {
        match self {
            Self::SingleChoice { options, .. } | Self::MultiChoice { options, .. } => {
                Some(options.as_slice())
            }
            Self::TrueFalse { .. } | Self::ShortAnswer { .. } => None,
        }
    }
}

/// A learner's answer, already normalised against the question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub(crate) enum UserAnswer {
    Single(usize),
    Multi(BTreeSet<usize>),
    TrueFalse(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordedAnswer {
    pub(crate) question_id: String,
    pub(crate) answer: UserAnswer,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) user_id: String,
    pub(crate) user_email: String,
    pub(crate) status: AttemptStatus,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) submit_cause: Option<SubmitCause>,
    pub(crate) passing_score_snapshot: i32,
    pub(crate) time_limit_minutes_snapshot: Option<i32>,
    pub(crate) total_points: i32,
    pub(crate) earned_points: Option<f64>,
    pub(crate) score: Option<f64>,
    pub(crate) question_snapshot: Json<Vec<Question>>,
    pub(crate) draft_answers: Json<Vec<RecordedAnswer>>,
    pub(crate) last_saved_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl Attempt {
    pub(crate) fn questions(&self) -> &[Question] {
        &self.question_snapshot.0
    }

    pub(crate) fn passed(&self) -> bool {
        match (self.status, self.earned_points) {
            (AttemptStatus::Graded, Some(earned)) => grader::meets_passing_score(
                earned,
                self.total_points,
                self.passing_score_snapshot,
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Answer {
    pub(crate) id: String,
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) user_answer: Option<Json<UserAnswer>>,
    pub(crate) is_correct: Option<bool>,
    pub(crate) points_earned: f64,
    pub(crate) max_points: i32,
    pub(crate) requires_manual: bool,
    pub(crate) feedback: Option<String>,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
}

impl Answer {
    pub(crate) fn is_graded(&self) -> bool {
        self.is_correct.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Certificate {
    pub(crate) id: String,
    pub(crate) certificate_id: String,
    pub(crate) attempt_id: String,
    pub(crate) test_id: String,
    pub(crate) test_title: String,
    pub(crate) user_id: String,
    pub(crate) user_email: String,
    pub(crate) score: f64,
    pub(crate) verification_hash: String,
    pub(crate) issued_at: PrimitiveDateTime,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) revoked_at: Option<PrimitiveDateTime>,
    pub(crate) revoke_reason: Option<String>,
}
