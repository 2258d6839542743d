use sqlx::PgExecutor;
use time::PrimitiveDateTime;

use crate::db::models::Certificate;

pub(crate) const COLUMNS: &str = "\
    id, certificate_id, attempt_id, test_id, test_title, user_id, user_email, score, \
    verification_hash, issued_at, expires_at, revoked_at, revoke_reason";

/// Returns `false` when the attempt already has a certificate.
pub(crate) async fn create(
    executor: impl PgExecutor<'_>,
    certificate: &Certificate,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO certificates (
            id, certificate_id, attempt_id, test_id, test_title, user_id, user_email, score,
            verification_hash, issued_at, expires_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        ON CONFLICT (attempt_id) DO NOTHING",
    )
    .bind(&certificate.id)
    .bind(&certificate.certificate_id)
    .bind(&certificate.attempt_id)
    .bind(&certificate.test_id)
    .bind(&certificate.test_title)
    .bind(&certificate.user_id)
    .bind(&certificate.user_email)
    .bind(certificate.score)
    .bind(&certificate.verification_hash)
    .bind(certificate.issued_at)
    .bind(certificate.expires_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn find_by_attempt(
    executor: impl PgExecutor<'_>,
    attempt_id: &str,
) -> Result<Option<Certificate>, sqlx::Error> {
    sqlx::query_as::<_, Certificate>(&format!(
        "SELECT {COLUMNS} FROM certificates WHERE attempt_id = $1"
    ))
    .bind(attempt_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_by_public_id(
    executor: impl PgExecutor<'_>,
    certificate_id: &str,
) -> Result<Option<Certificate>, sqlx::Error> {
    sqlx::query_as::<_, Certificate>(&format!(
        "SELECT {COLUMNS} FROM certificates WHERE certificate_id = $1"
    ))
    .bind(certificate_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_by_email(
    executor: impl PgExecutor<'_>,
    email: &str,
) -> Result<Vec<Certificate>, sqlx::Error> {
    sqlx::query_as::<_, Certificate>(&format!(
        "SELECT {COLUMNS} FROM certificates WHERE LOWER(user_email) = LOWER($1) \
         ORDER BY issued_at DESC"
    ))
    .bind(email)
    .fetch_all(executor)
    .await
}

pub(crate) async fn set_revocation(
    executor: impl PgExecutor<'_>,
    certificate_id: &str,
    revoked_at: Option<PrimitiveDateTime>,
    reason: Option<&str>,
) -> Result<Option<Certificate>, sqlx::Error> {
    sqlx::query_as::<_, Certificate>(&format!(
        "UPDATE certificates SET revoked_at = $1, revoke_reason = $2 \
         WHERE certificate_id = $3 RETURNING {COLUMNS}"
    ))
    .bind(revoked_at)
    .bind(reason)
    .bind(certificate_id)
    .fetch_optional(executor)
    .await
}
