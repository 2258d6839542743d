use sqlx::PgExecutor;
use time::PrimitiveDateTime;

use crate::db::models::Answer;
use crate::repositories::GradeWrite;

pub(crate) const COLUMNS: &str = "\
    id, attempt_id, question_id, user_answer, is_correct, points_earned, max_points, \
    requires_manual, feedback, graded_by, graded_at, created_at";

pub(crate) async fn insert(
    executor: impl PgExecutor<'_>,
    answer: &Answer,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO answers (
            id, attempt_id, question_id, user_answer, is_correct, points_earned, max_points,
            requires_manual, feedback, graded_by, graded_at, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        ON CONFLICT (attempt_id, question_id) DO NOTHING",
    )
    .bind(&answer.id)
    .bind(&answer.attempt_id)
    .bind(&answer.question_id)
    .bind(&answer.user_answer)
    .bind(answer.is_correct)
    .bind(answer.points_earned)
    .bind(answer.max_points)
    .bind(answer.requires_manual)
    .bind(&answer.feedback)
    .bind(&answer.graded_by)
    .bind(answer.graded_at)
    .bind(answer.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn list_by_attempt(
    executor: impl PgExecutor<'_>,
    attempt_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE attempt_id = $1 ORDER BY created_at, id"
    ))
    .bind(attempt_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn apply_grade(
    executor: impl PgExecutor<'_>,
    attempt_id: &str,
    grade: &GradeWrite,
    graded_at: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE answers SET points_earned = $1, is_correct = $2, feedback = $3, \
         graded_by = $4, graded_at = $5 WHERE id = $6 AND attempt_id = $7",
    )
    .bind(grade.points_earned)
    .bind(grade.is_correct)
    .bind(&grade.feedback)
    .bind(&grade.graded_by)
    .bind(graded_at)
    .bind(&grade.answer_id)
    .bind(attempt_id)
    .execute(executor)
    .await?;
    Ok(())
}
