use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{Question, QuestionBody, RecordedAnswer, UserAnswer};
use crate::db::types::QuestionKind;

/// Raw answer as sent by a client, before it is checked against the question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SubmittedAnswer {
    pub(crate) question_id: String,
    pub(crate) answer: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub(crate) enum RejectionReason {
    UnknownQuestion,
    InvalidShape { expected: QuestionKind },
    OptionOutOfRange { index: u64, options: usize },
    DuplicateQuestion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct AnswerRejection {
    pub(crate) question_id: String,
    #[serde(flatten)]
    pub(crate) reason: RejectionReason,
}

/// In-progress answers for one attempt, keyed by question id.
#[derive(Debug, Clone)]
pub(crate) struct AnswerCollector {
    bodies: BTreeMap<String, QuestionBody>,
    answers: BTreeMap<String, UserAnswer>,
}

impl AnswerCollector {
    pub(crate) fn new(questions: &[Question]) -> Self {
        let bodies = questions
            .iter()
            .map(|question| (question.id.clone(), question.body.0.clone()))
            .collect();
        Self { bodies, answers: BTreeMap::new() }
    }

    /// Restores a saved draft; entries that no longer fit the snapshot are dropped.
    pub(crate) fn with_draft(questions: &[Question], draft: &[RecordedAnswer]) -> Self {
        let mut collector = Self::new(questions);
        for recorded in draft {
            if let Some(body) = collector.bodies.get(&recorded.question_id) {
                if answer_fits(body, &recorded.answer) {
                    collector.answers.insert(recorded.question_id.clone(), recorded.answer.clone());
                }
            }
        }
        collector
    }

    pub(crate) fn record(&mut self, question_id: &str, raw: &Value) -> Result<(), AnswerRejection> {
        let Some(body) = self.bodies.get(question_id) else {
            return Err(AnswerRejection {
                question_id: question_id.to_string(),
                reason: RejectionReason::UnknownQuestion,
            });
        };

        let answer = parse_answer(body, raw).map_err(|reason| AnswerRejection {
            question_id: question_id.to_string(),
            reason,
        })?;
        self.answers.insert(question_id.to_string(), answer);
        Ok(())
    }

    pub(crate) fn clear(&mut self, question_id: &str) {
        self.answers.remove(question_id);
    }

    pub(crate) fn get(&self, question_id: &str) -> Option<&UserAnswer> {
        self.answers.get(question_id)
    }

    pub(crate) fn answered_count(&self) -> usize {
        self.answers.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<RecordedAnswer> {
        self.answers
            .iter()
            .map(|(question_id, answer)| RecordedAnswer {
                question_id: question_id.clone(),
                answer: answer.clone(),
            })
            .collect()
    }
}

/// Checks a whole payload. Rejected entries are reported and left unanswered.
pub(crate) fn normalize(
    questions: &[Question],
    submitted: &[SubmittedAnswer],
) -> (Vec<RecordedAnswer>, Vec<AnswerRejection>) {
    let mut collector = AnswerCollector::new(questions);
    let mut seen = BTreeSet::new();
    let mut rejected = Vec::new();

    for item in submitted {
        if !seen.insert(item.question_id.as_str()) {
            rejected.push(AnswerRejection {
                question_id: item.question_id.clone(),
                reason: RejectionReason::DuplicateQuestion,
            });
            collector.clear(&item.question_id);
            continue;
        }
        if let Err(rejection) = collector.record(&item.question_id, &item.answer) {
            rejected.push(rejection);
        }
    }

    (collector.snapshot(), rejected)
}

fn parse_answer(body: &QuestionBody, raw: &Value) -> Result<UserAnswer, RejectionReason> {
    let invalid = || RejectionReason::InvalidShape { expected: body.kind() };

    match body {
        QuestionBody::SingleChoice { options, .. } => {
            let index = raw.as_u64().ok_or_else(invalid)?;
            Ok(UserAnswer::Single(option_index(index, options.len())?))
        }
        QuestionBody::MultiChoice { options, .. } => {
            let items = raw.as_array().ok_or_else(invalid)?;
            let mut selected = BTreeSet::new();
            for item in items {
                let index = item.as_u64().ok_or_else(invalid)?;
                selected.insert(option_index(index, options.len())?);
            }
            Ok(UserAnswer::Multi(selected))
        }
        QuestionBody::TrueFalse { .. } => raw.as_bool().map(UserAnswer::TrueFalse).ok_or_else(invalid),
        QuestionBody::ShortAnswer { .. } => {
            let text = raw.as_str().ok_or_else(invalid)?;
            Ok(UserAnswer::Text(text.trim().to_string()))
        }
    }
}

fn option_index(index: u64, options: usize) -> Result<usize, RejectionReason> {
    usize::try_from(index)
        .ok()
        .filter(|value| *value < options)
        .ok_or(RejectionReason::OptionOutOfRange { index, options })
}

fn answer_fits(body: &QuestionBody, answer: &UserAnswer) -> bool {
    match (body, answer) {
        (QuestionBody::SingleChoice { options, .. }, UserAnswer::Single(index)) => {
            *index < options.len()
        }
        (QuestionBody::MultiChoice { options, .. }, UserAnswer::Multi(selected)) => {
            selected.iter().all(|index| *index < options.len())
        }
        (QuestionBody::TrueFalse { .. }, UserAnswer::TrueFalse(_))
        | (QuestionBody::ShortAnswer { .. }, UserAnswer::Text(_)) => true,
        _ => false,
    }
}
