//! Scoring rules per question type.
//!
//! Every function here is pure. Choice and boolean questions are all-or-nothing;
//! short answers are never decided automatically.

use crate::db::models::{Answer, Question, QuestionBody, UserAnswer};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GradedAnswer {
    pub(crate) is_correct: Option<bool>,
    pub(crate) points_earned: f64,
    pub(crate) requires_manual: bool,
}

impl GradedAnswer {
    fn decided(is_correct: bool, points: i32) -> Self {
        let points_earned = if is_correct { f64::from(points) } else { 0.0 };
        Self { is_correct: Some(is_correct), points_earned, requires_manual: false }
    }

    fn pending() -> Self {
        Self { is_correct: None, points_earned: 0.0, requires_manual: true }
    }
}

pub(crate) fn is_auto_gradable(body: &QuestionBody) -> bool {
    !matches!(body, QuestionBody::ShortAnswer { .. })
}

/// Unanswered questions of any type are decided as incorrect with zero points.
pub(crate) fn grade(question: &Question, answer: Option<&UserAnswer>) -> GradedAnswer {
    let Some(answer) = answer else {
        return GradedAnswer::decided(false, question.points);
    };

    let is_correct = match (&question.body.0, answer) {
        (QuestionBody::SingleChoice { correct_answer, .. }, UserAnswer::Single(selected)) => {
            selected == correct_answer
        }
        (QuestionBody::MultiChoice { correct_answers, .. }, UserAnswer::Multi(selected)) => {
            selected == correct_answers
        }
        (QuestionBody::TrueFalse { correct_answer }, UserAnswer::TrueFalse(value)) => {
            value == correct_answer
        }
        (QuestionBody::ShortAnswer { .. }, _) => return GradedAnswer::pending(),
        _ => false,
    };

    GradedAnswer::decided(is_correct, question.points)
}

pub(crate) fn total_points(questions: &[Question]) -> i32 {
    questions.iter().map(|question| question.points).sum()
}

pub(crate) fn earned_points(answers: &[Answer]) -> f64 {
    answers.iter().map(|answer| answer.points_earned).sum()
}

pub(crate) fn all_graded(answers: &[Answer]) -> bool {
    answers.iter().all(Answer::is_graded)
}

pub(crate) fn score_percent(earned: f64, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = 100.0 * earned / f64::from(total);
    (raw * 100.0).round() / 100.0
}

/// Pass check on raw points; the rounded percentage is for display only.
pub(crate) fn meets_passing_score(earned: f64, total: i32, passing_score: i32) -> bool {
    total > 0 && earned * 100.0 >= f64::from(passing_score) * f64::from(total)
}

/// Returns the stored value and whether the requested one was out of range.
pub(crate) fn clamp_manual_points(requested: f64, max_points: i32) -> (f64, bool) {
    let max = f64::from(max_points);
    if requested.is_nan() {
        return (0.0, true);
    }
    let clamped = requested.clamp(0.0, max);
    (clamped, clamped != requested)
}

/// Manual grades count as correct only at full credit.
pub(crate) fn manual_is_correct(points_earned: f64, max_points: i32) -> bool {
    points_earned >= f64::from(max_points)
}
