use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Certificate;
use crate::services::certificate_issuer::{CertificateState, CertificateVerification};

#[derive(Debug, Serialize)]
pub(crate) struct CertificateResponse {
    pub(crate) certificate_id: String,
    pub(crate) attempt_id: String,
    pub(crate) test_id: String,
    pub(crate) test_title: String,
    pub(crate) user_email: String,
    pub(crate) score: f64,
    pub(crate) verification_hash: String,
    pub(crate) issued_at: String,
    pub(crate) expires_at: Option<String>,
    pub(crate) revoked_at: Option<String>,
    pub(crate) revoke_reason: Option<String>,
}

impl From<Certificate> for CertificateResponse {
    fn from(certificate: Certificate) -> Self {
        Self {
            certificate_id: certificate.certificate_id,
            attempt_id: certificate.attempt_id,
            test_id: certificate.test_id,
            test_title: certificate.test_title,
            user_email: certificate.user_email,
            score: certificate.score,
            verification_hash: certificate.verification_hash,
            issued_at: format_primitive(certificate.issued_at),
            expires_at: certificate.expires_at.map(format_primitive),
            revoked_at: certificate.revoked_at.map(format_primitive),
            revoke_reason: certificate.revoke_reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct VerificationResponse {
    pub(crate) is_valid: bool,
    pub(crate) state: CertificateState,
    pub(crate) message: String,
    pub(crate) certificate: CertificateResponse,
}

impl From<CertificateVerification> for VerificationResponse {
    fn from(verification: CertificateVerification) -> Self {
        Self {
            is_valid: verification.is_valid,
            state: verification.state,
            message: verification.message,
            certificate: verification.certificate.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ValidationListResponse {
    pub(crate) email: String,
    pub(crate) certificates: Vec<VerificationResponse>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ValidateQuery {
    #[validate(email(message = "email must be a valid address"))]
    pub(crate) email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RevokeRequest {
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub(crate) reason: String,
}
