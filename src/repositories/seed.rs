use std::path::Path;

use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Question, QuestionBody, TestDefinition};
use crate::repositories::{test_definitions, MemoryAssessmentStore, StoreError};

/// Where seeded tests land.
#[derive(Clone, Copy)]
pub(crate) enum SeedTarget<'a> {
    Memory(&'a MemoryAssessmentStore),
    Postgres(&'a PgPool),
}

impl SeedTarget<'_> {
    /// Creates or replaces one test together with its question bank.
    pub(crate) async fn install(
        self,
        test: TestDefinition,
        questions: Vec<Question>,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.insert_test(test, questions).await,
            Self::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                test_definitions::upsert(&mut *tx, &test).await?;
                test_definitions::replace_questions(&mut *tx, &test.id, &questions).await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SeedTest {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    passing_score: i32,
    #[serde(default)]
    time_limit_minutes: Option<i32>,
    max_attempts: i32,
    #[serde(default)]
    number_of_questions: i32,
    #[serde(default)]
    issues_certificate: bool,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default)]
    lesson_id: Option<String>,
    questions: Vec<SeedQuestion>,
}

#[derive(Debug, Deserialize)]
struct SeedQuestion {
    #[serde(default)]
    id: Option<String>,
    prompt: String,
    points: i32,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(flatten)]
    body: QuestionBody,
}

fn default_active() -> bool {
    true
}

/// Loads tests from a JSON file. Returns how many were loaded.
pub(crate) async fn load_seed_file(target: SeedTarget<'_>, path: &Path) -> Result<usize, StoreError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| StoreError::Seed(format!("{}: {err}", path.display())))?;
    load_seed(target, &raw).await
}

pub(crate) async fn load_seed(target: SeedTarget<'_>, raw: &str) -> Result<usize, StoreError> {
    let tests: Vec<SeedTest> = serde_json::from_str(raw)?;
    let now = primitive_now_utc();
    let count = tests.len();

    for seed in tests {
        validate(&seed)?;

        let questions = seed
            .questions
            .into_iter()
            .enumerate()
            .map(|(index, question)| Question {
                id: question.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                test_id: seed.id.clone(),
                prompt: question.prompt,
                body: Json(question.body),
                points: question.points,
                explanation: question.explanation,
                order_index: i32::try_from(index).unwrap_or(i32::MAX),
            })
            .collect();

        let test = TestDefinition {
            id: seed.id,
            title: seed.title,
            description: seed.description,
            passing_score: seed.passing_score,
            time_limit_minutes: seed.time_limit_minutes,
            max_attempts: seed.max_attempts,
            number_of_questions: seed.number_of_questions,
            issues_certificate: seed.issues_certificate,
            is_active: seed.is_active,
            lesson_id: seed.lesson_id,
            created_at: now,
            updated_at: now,
        };
        target.install(test, questions).await?;
    }

    Ok(count)
}

fn validate(seed: &SeedTest) -> Result<(), StoreError> {
    if !(0..=100).contains(&seed.passing_score) {
        return Err(StoreError::Seed(format!("test {}: passing_score out of range", seed.id)));
    }
    if seed.max_attempts < 1 {
        return Err(StoreError::Seed(format!("test {}: max_attempts must be >= 1", seed.id)));
    }
    if seed.time_limit_minutes.is_some_and(|minutes| minutes <= 0) {
        return Err(StoreError::Seed(format!("test {}: time limit must be positive", seed.id)));
    }
    if let Some(question) = seed.questions.iter().find(|question| question.points <= 0) {
        return Err(StoreError::Seed(format!(
            "test {}: question '{}' must be worth at least one point",
            seed.id, question.prompt
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::AssessmentStore;

    const SEED: &str = r#"[
        {
            "id": "intro-quiz",
            "title": "Intro quiz",
            "passing_score": 70,
            "time_limit_minutes": 15,
            "max_attempts": 2,
            "issues_certificate": true,
            "questions": [
                {"id": "q1", "prompt": "2 + 2?", "points": 1, "type": "single_choice",
                 "options": ["3", "4"], "correct_answer": 1},
                {"prompt": "Explain", "points": 3, "type": "short_answer", "reference_answer": null}
            ]
        }
    ]"#;

    #[tokio::test]
    async fn seed_populates_tests_and_questions() {
        let store = MemoryAssessmentStore::new();
        let loaded = load_seed(SeedTarget::Memory(&store), SEED).await.expect("seed");
        assert_eq!(loaded, 1);

        let test = store.find_test("intro-quiz").await.expect("find").expect("test");
        assert!(test.is_active);
        assert_eq!(test.time_limit_minutes, Some(15));

        let questions = store.list_questions("intro-quiz").await.expect("questions");
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].id, "q1");
        assert_eq!(questions[1].order_index, 1);
    }

    #[tokio::test]
    async fn seed_rejects_zero_point_questions() {
        let raw = SEED.replace("\"points\": 3", "\"points\": 0");
        let store = MemoryAssessmentStore::new();
        let error = load_seed(SeedTarget::Memory(&store), &raw).await.expect_err("invalid");
        assert!(matches!(error, StoreError::Seed(_)));
    }
}
