use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::{Attempt, RecordedAnswer};
use crate::db::types::AttemptStatus;
use crate::repositories::SubmissionWrite;

pub(crate) const COLUMNS: &str = "\
    id, test_id, user_id, user_email, status, attempt_number, started_at, expires_at, \
    submitted_at, graded_at, submit_cause, passing_score_snapshot, time_limit_minutes_snapshot, \
    total_points, earned_points, score, question_snapshot, draft_answers, last_saved_at, \
    created_at, updated_at";

/// Serialises `start` per (test, user) for the rest of the transaction.
pub(crate) async fn acquire_test_user_lock(
    executor: impl PgExecutor<'_>,
    test_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
        .bind(test_id)
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn find_by_id(
    executor: impl PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_for_update(
    executor: impl PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_by_test_and_user(
    executor: impl PgExecutor<'_>,
    test_id: &str,
    user_id: &str,
) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE test_id = $1 AND user_id = $2 \
         ORDER BY attempt_number"
    ))
    .bind(test_id)
    .bind(user_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn create(
    executor: impl PgExecutor<'_>,
    attempt: &Attempt,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO attempts (
            id, test_id, user_id, user_email, status, attempt_number, started_at, expires_at,
            passing_score_snapshot, time_limit_minutes_snapshot, total_points,
            question_snapshot, draft_answers, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
        ON CONFLICT DO NOTHING",
    )
    .bind(&attempt.id)
    .bind(&attempt.test_id)
    .bind(&attempt.user_id)
    .bind(&attempt.user_email)
    .bind(attempt.status)
    .bind(attempt.attempt_number)
    .bind(attempt.started_at)
    .bind(attempt.expires_at)
    .bind(attempt.passing_score_snapshot)
    .bind(attempt.time_limit_minutes_snapshot)
    .bind(attempt.total_points)
    .bind(&attempt.question_snapshot)
    .bind(&attempt.draft_answers)
    .bind(attempt.created_at)
    .bind(attempt.updated_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn save_draft(
    executor: impl PgExecutor<'_>,
    id: &str,
    draft: &[RecordedAnswer],
    saved_at: PrimitiveDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts SET draft_answers = $1, last_saved_at = $2, updated_at = $2 \
         WHERE id = $3 AND status = $4 RETURNING {COLUMNS}"
    ))
    .bind(Json(draft))
    .bind(saved_at)
    .bind(id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

/// Conditional on the attempt still being in progress.
pub(crate) async fn mark_submitted(
    executor: impl PgExecutor<'_>,
    write: &SubmissionWrite,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts SET status = $1, submitted_at = $2, submit_cause = $3, \
         earned_points = $4, score = $5, graded_at = $6, draft_answers = $7, updated_at = $2 \
         WHERE id = $8 AND status = $9 RETURNING {COLUMNS}"
    ))
    .bind(write.status)
    .bind(write.submitted_at)
    .bind(write.cause)
    .bind(write.earned_points)
    .bind(write.score)
    .bind(write.graded_at)
    .bind(Json(&write.draft))
    .bind(&write.attempt_id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn mark_graded(
    executor: impl PgExecutor<'_>,
    attempt: &Attempt,
) -> Result<Attempt, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts SET status = $1, earned_points = $2, score = $3, graded_at = $4, \
         updated_at = $5 WHERE id = $6 RETURNING {COLUMNS}"
    ))
    .bind(attempt.status)
    .bind(attempt.earned_points)
    .bind(attempt.score)
    .bind(attempt.graded_at)
    .bind(attempt.updated_at)
    .bind(&attempt.id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_overdue(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts \
         WHERE status = $1 AND expires_at IS NOT NULL AND expires_at < $2 \
         ORDER BY expires_at"
    ))
    .bind(AttemptStatus::InProgress)
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_awaiting_grading(
    pool: &PgPool,
    test_id: Option<&str>,
) -> Result<Vec<Attempt>, sqlx::Error> {
    let mut builder =
        QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM attempts WHERE status = "));
    builder.push_bind(AttemptStatus::AwaitingGrading);
    if let Some(test_id) = test_id {
        builder.push(" AND test_id = ").push_bind(test_id);
    }
    builder.push(" ORDER BY submitted_at");

    builder.build_query_as::<Attempt>().fetch_all(pool).await
}
