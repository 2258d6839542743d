use sqlx::PgExecutor;

use crate::db::models::{Question, TestDefinition};

pub(crate) const COLUMNS: &str = "\
    id, title, description, passing_score, time_limit_minutes, max_attempts, \
    number_of_questions, issues_certificate, is_active, lesson_id, created_at, updated_at";

pub(crate) const QUESTION_COLUMNS: &str =
    "id, test_id, prompt, body, points, explanation, order_index";

pub(crate) async fn find_by_id(
    executor: impl PgExecutor<'_>,
    id: &str,
) -> Result<Option<TestDefinition>, sqlx::Error> {
    sqlx::query_as::<_, TestDefinition>(&format!("SELECT {COLUMNS} FROM tests WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn list_questions(
    executor: impl PgExecutor<'_>,
    test_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE test_id = $1 ORDER BY order_index, id"
    ))
    .bind(test_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn upsert(
    executor: impl PgExecutor<'_>,
    test: &TestDefinition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO tests (
            id, title, description, passing_score, time_limit_minutes, max_attempts,
            number_of_questions, issues_certificate, is_active, lesson_id, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            passing_score = EXCLUDED.passing_score,
            time_limit_minutes = EXCLUDED.time_limit_minutes,
            max_attempts = EXCLUDED.max_attempts,
            number_of_questions = EXCLUDED.number_of_questions,
            issues_certificate = EXCLUDED.issues_certificate,
            is_active = EXCLUDED.is_active,
            lesson_id = EXCLUDED.lesson_id,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(&test.id)
    .bind(&test.title)
    .bind(&test.description)
    .bind(test.passing_score)
    .bind(test.time_limit_minutes)
    .bind(test.max_attempts)
    .bind(test.number_of_questions)
    .bind(test.issues_certificate)
    .bind(test.is_active)
    .bind(&test.lesson_id)
    .bind(test.created_at)
    .bind(test.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Swaps the whole question bank. Open attempts keep their own snapshot.
pub(crate) async fn replace_questions(
    conn: &mut sqlx::PgConnection,
    test_id: &str,
    questions: &[Question],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM questions WHERE test_id = $1").bind(test_id).execute(&mut *conn).await?;

    for question in questions {
        sqlx::query(&format!(
            "INSERT INTO questions ({QUESTION_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7)"
        ))
        .bind(&question.id)
        .bind(&question.test_id)
        .bind(&question.prompt)
        .bind(&question.body)
        .bind(question.points)
        .bind(&question.explanation)
        .bind(question.order_index)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
