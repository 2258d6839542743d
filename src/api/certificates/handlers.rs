use axum::extract::{Path, Query, State};
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStaff;
use crate::core::state::AppState;
use crate::schemas::certificate::{
    RevokeRequest, ValidateQuery, ValidationListResponse, VerificationResponse,
};

pub(super) async fn get_certificate(
    State(state): State<AppState>,
    Path(certificate_id): Path<String>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let verification = state
        .certificates()
        .verify(certificate_id.trim())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load certificate"))?
        .ok_or_else(|| ApiError::NotFound("Certificate not found".to_string()))?;

    Ok(Json(verification.into()))
}

pub(super) async fn validate_by_email(
    State(state): State<AppState>,
    Query(params): Query<ValidateQuery>,
) -> Result<Json<ValidationListResponse>, ApiError> {
    params.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let certificates = state
        .certificates()
        .validate_by_email(&params.email)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list certificates"))?;

    Ok(Json(ValidationListResponse {
        email: params.email.trim().to_string(),
        certificates: certificates.into_iter().map(VerificationResponse::from).collect(),
    }))
}

pub(super) async fn revoke_certificate(
    CurrentStaff(staff): CurrentStaff,
    State(state): State<AppState>,
    Path(certificate_id): Path<String>,
    Json(payload): Json<RevokeRequest>,
) -> Result<Json<VerificationResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if payload.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be blank".to_string()));
    }

    let certificate = state
        .certificates()
        .revoke(&certificate_id, &payload.reason)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to revoke certificate"))?
        .ok_or_else(|| ApiError::NotFound("Certificate not found".to_string()))?;

    tracing::info!(
        certificate_id = %certificate_id,
        revoked_by = %staff.user_id,
        "Certificate revocation recorded"
    );
    Ok(Json(state.certificates().describe(certificate).into()))
}

pub(super) async fn reinstate_certificate(
    CurrentStaff(staff): CurrentStaff,
    State(state): State<AppState>,
    Path(certificate_id): Path<String>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let certificate = state
        .certificates()
        .reinstate(&certificate_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reinstate certificate"))?
        .ok_or_else(|| ApiError::NotFound("Certificate not found".to_string()))?;

    tracing::info!(
        certificate_id = %certificate_id,
        reinstated_by = %staff.user_id,
        "Certificate reinstatement recorded"
    );
    Ok(Json(state.certificates().describe(certificate).into()))
}
