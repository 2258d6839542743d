use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::config::QuestionDraw;
use crate::db::models::Question;

/// Picks the questions an attempt will be snapshotted with.
pub(crate) trait QuestionSelector: Send + Sync {
    fn draw(&self, bank: &[Question], requested: i32) -> Vec<Question>;
}

/// Uniform draw without replacement, seeded per attempt.
#[derive(Debug, Default)]
pub(crate) struct RandomSelector;

#[derive(Debug, Default)]
pub(crate) struct OrderedSelector;

impl QuestionSelector for RandomSelector {
    fn draw(&self, bank: &[Question], requested: i32) -> Vec<Question> {
        let count = draw_size(bank.len(), requested);
        let seed = rand::random::<u64>();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut drawn: Vec<Question> = bank.choose_multiple(&mut rng, count).cloned().collect();
        drawn.sort_by_key(|question| question.order_index);
        drawn
    }
}

impl QuestionSelector for OrderedSelector {
    fn draw(&self, bank: &[Question], requested: i32) -> Vec<Question> {
        let mut ordered = bank.to_vec();
        ordered.sort_by_key(|question| question.order_index);
        ordered.truncate(draw_size(bank.len(), requested));
        ordered
    }
}

pub(crate) fn selector_for(draw: QuestionDraw) -> Box<dyn QuestionSelector> {
    match draw {
        QuestionDraw::Random => Box::new(RandomSelector),
        QuestionDraw::Ordered => Box::new(OrderedSelector),
    }
}

/// Non-positive or oversized requests take the whole bank.
fn draw_size(bank: usize, requested: i32) -> usize {
    match usize::try_from(requested) {
        Ok(0) | Err(_) => bank,
        Ok(count) => count.min(bank),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use sqlx::types::Json;

    use super::*;
    use crate::db::models::QuestionBody;

    fn bank(size: i32) -> Vec<Question> {
        (0..size)
            .rev()
            .map(|index| Question {
                id: format!("q-{index}"),
                test_id: "t-1".to_string(),
                prompt: format!("Question {index}"),
                body: Json(QuestionBody::TrueFalse { correct_answer: true }),
                points: 1,
                explanation: None,
                order_index: index,
            })
            .collect()
    }

    #[test]
    fn ordered_draw_takes_leading_questions() {
        let drawn = OrderedSelector.draw(&bank(5), 2);
        let ids: Vec<&str> = drawn.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q-0", "q-1"]);
    }

    #[test]
    fn random_draw_is_distinct_and_in_bank_order() {
        let drawn = RandomSelector.draw(&bank(10), 4);
        assert_eq!(drawn.len(), 4);
        let unique: BTreeSet<&str> = drawn.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(unique.len(), 4);
        assert!(drawn.windows(2).all(|pair| pair[0].order_index < pair[1].order_index));
    }

    #[test]
    fn zero_negative_or_oversized_requests_take_whole_bank() {
        assert_eq!(RandomSelector.draw(&bank(3), 0).len(), 3);
        assert_eq!(OrderedSelector.draw(&bank(3), -2).len(), 3);
        assert_eq!(RandomSelector.draw(&bank(3), 9).len(), 3);
    }
}
