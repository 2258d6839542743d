use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::metrics::CERTIFICATES_ISSUED;
use crate::core::time::{format_primitive, Clock};
use crate::db::models::{Attempt, Certificate, TestDefinition};
use crate::repositories::{AssessmentStore, StoreError};

const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CertificateState {
    Valid,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CertificateVerification {
    pub(crate) is_valid: bool,
    pub(crate) state: CertificateState,
    pub(crate) certificate: Certificate,
    pub(crate) message: String,
}

/// Issues certificates for passing attempts and answers verification lookups.
#[derive(Clone)]
pub(crate) struct CertificateIssuer {
    store: Arc<dyn AssessmentStore>,
    clock: Arc<dyn Clock>,
    validity_days: Option<u32>,
}

impl CertificateIssuer {
    pub(crate) fn new(
        store: Arc<dyn AssessmentStore>,
        clock: Arc<dyn Clock>,
        validity_days: Option<u32>,
    ) -> Self {
        Self { store, clock, validity_days }
    }

    pub(crate) fn is_eligible(test: &TestDefinition, attempt: &Attempt) -> bool {
        test.issues_certificate && attempt.test_id == test.id && attempt.passed()
    }

    /// Idempotent: repeated calls for one attempt return the same certificate.
    pub(crate) async fn on_attempt_graded(
        &self,
        test: &TestDefinition,
        attempt: &Attempt,
    ) -> Result<Option<Certificate>, StoreError> {
        if !Self::is_eligible(test, attempt) {
            return Ok(None);
        }

        if let Some(existing) = self.store.find_certificate_by_attempt(&attempt.id).await? {
            return Ok(Some(existing));
        }

        let certificate = self.build(test, attempt);
        if self.store.insert_certificate(certificate.clone()).await? {
            metrics::counter!(CERTIFICATES_ISSUED).increment(1);
            tracing::info!(
                attempt_id = %attempt.id,
                test_id = %test.id,
                user_id = %attempt.user_id,
                certificate_id = %certificate.certificate_id,
                "Certificate issued"
            );
            return Ok(Some(certificate));
        }

        // Lost the insert race; the winner's row is authoritative.
        self.store.find_certificate_by_attempt(&attempt.id).await
    }

    pub(crate) async fn verify(
        &self,
        certificate_id: &str,
    ) -> Result<Option<CertificateVerification>, StoreError> {
        let certificate = self.store.find_certificate(certificate_id).await?;
        Ok(certificate.map(|certificate| self.describe(certificate)))
    }

    pub(crate) async fn validate_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<CertificateVerification>, StoreError> {
        let certificates = self.store.list_certificates_by_email(email.trim()).await?;
        Ok(certificates.into_iter().map(|certificate| self.describe(certificate)).collect())
    }

    pub(crate) async fn revoke(
        &self,
        certificate_id: &str,
        reason: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        let revoked = self
            .store
            .set_certificate_revocation(
                certificate_id,
                Some(self.clock.now()),
                Some(reason.trim().to_string()),
            )
            .await?;
        if revoked.is_some() {
            tracing::warn!(certificate_id, reason, "Certificate revoked");
        }
        Ok(revoked)
    }

    pub(crate) async fn reinstate(
        &self,
        certificate_id: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        let reinstated = self.store.set_certificate_revocation(certificate_id, None, None).await?;
        if reinstated.is_some() {
            tracing::info!(certificate_id, "Certificate reinstated");
        }
        Ok(reinstated)
    }

    pub(crate) fn describe(&self, certificate: Certificate) -> CertificateVerification {
        let now = self.clock.now();
        let state = if certificate.revoked_at.is_some() {
            CertificateState::Revoked
        } else if certificate.expires_at.is_some_and(|expires_at| expires_at <= now) {
            CertificateState::Expired
        } else {
            CertificateState::Valid
        };

        let message = match state {
            CertificateState::Valid => "Certificate is valid".to_string(),
            CertificateState::Revoked => match certificate.revoke_reason.as_deref() {
                Some(reason) if !reason.is_empty() => format!("Certificate was revoked: {reason}"),
                _ => "Certificate was revoked".to_string(),
            },
            CertificateState::Expired => "Certificate has expired".to_string(),
        };

        CertificateVerification {
            is_valid: state == CertificateState::Valid,
            state,
            certificate,
            message,
        }
    }

    fn build(&self, test: &TestDefinition, attempt: &Attempt) -> Certificate {
        let issued_at = self.clock.now();
        let certificate_id = generate_certificate_id();
        let score = attempt.score.unwrap_or_default();
        let expires_at =
            self.validity_days.map(|days| issued_at + Duration::days(i64::from(days)));

        Certificate {
            id: Uuid::new_v4().to_string(),
            verification_hash: verification_hash(
                &certificate_id,
                &attempt.id,
                &attempt.user_id,
                score,
                issued_at,
            ),
            certificate_id,
            attempt_id: attempt.id.clone(),
            test_id: test.id.clone(),
            test_title: test.title.clone(),
            user_id: attempt.user_id.clone(),
            user_email: attempt.user_email.clone(),
            score,
            issued_at,
            expires_at,
            revoked_at: None,
            revoke_reason: None,
        }
    }
}

/// Public identifier printed on the certificate, e.g. `CERT-7KQ2-MX9D`.
pub(crate) fn generate_certificate_id() -> String {
    let mut rng = rand::thread_rng();
    let mut block = || -> String {
        (0..4).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
    };
    let first = block();
    let second = block();
    format!("CERT-{first}-{second}")
}

pub(crate) fn verification_hash(
    certificate_id: &str,
    attempt_id: &str,
    user_id: &str,
    score: f64,
    issued_at: PrimitiveDateTime,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(certificate_id.as_bytes());
    hasher.update(b"|");
    hasher.update(attempt_id.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{score:.2}").as_bytes());
    hasher.update(b"|");
    hasher.update(format_primitive(issued_at).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::AttemptStatus;
    use crate::repositories::MemoryAssessmentStore;
    use crate::test_support::{attempt_fixture, test_fixture, ManualClock};

    fn graded(score: f64) -> Attempt {
        let mut attempt = attempt_fixture("attempt-1", 1, AttemptStatus::Graded);
        attempt.total_points = 100;
        attempt.earned_points = Some(score);
        attempt.score = Some(score);
        attempt.passing_score_snapshot = 70;
        attempt
    }

    fn issuer(store: Arc<MemoryAssessmentStore>, validity_days: Option<u32>) -> CertificateIssuer {
        CertificateIssuer::new(store, Arc::new(ManualClock::default()), validity_days)
    }

    #[test]
    fn certificate_ids_use_the_unambiguous_alphabet() {
        let id = generate_certificate_id();
        assert_eq!(id.len(), "CERT-XXXX-XXXX".len());
        assert!(id.starts_with("CERT-"));
        assert!(id.chars().skip(5).filter(|ch| *ch != '-').all(|ch| ALPHABET.contains(&(ch as u8))));
    }

    #[test]
    fn eligibility_requires_flag_grade_and_passing_score() {
        let mut test = test_fixture("test-1");
        test.issues_certificate = true;
        assert!(CertificateIssuer::is_eligible(&test, &graded(70.0)));
        assert!(!CertificateIssuer::is_eligible(&test, &graded(69.99)));
        assert!(!CertificateIssuer::is_eligible(&test, &graded(69.996)));

        let mut awaiting = graded(100.0);
        awaiting.status = AttemptStatus::AwaitingGrading;
        assert!(!CertificateIssuer::is_eligible(&test, &awaiting));

        test.issues_certificate = false;
        assert!(!CertificateIssuer::is_eligible(&test, &graded(100.0)));
    }

    #[tokio::test]
    async fn repeated_grading_completion_issues_once() {
        let store = Arc::new(MemoryAssessmentStore::new());
        let issuer = issuer(store.clone(), None);
        let mut test = test_fixture("test-1");
        test.issues_certificate = true;
        let attempt = graded(100.0);

        let first = issuer.on_attempt_graded(&test, &attempt).await.expect("issue").expect("cert");
        let second = issuer.on_attempt_graded(&test, &attempt).await.expect("retry").expect("cert");

        assert_eq!(first.certificate_id, second.certificate_id);
        assert_eq!(store.certificate_count("attempt-1").await, 1);
        assert_eq!(first.verification_hash.len(), 64);
    }

    #[tokio::test]
    async fn concurrent_issuers_converge_on_one_certificate() {
        let store = Arc::new(MemoryAssessmentStore::new());
        let issuer = issuer(store.clone(), Some(365));
        let mut test = test_fixture("test-1");
        test.issues_certificate = true;
        let attempt = graded(90.0);

        let (left, right) = tokio::join!(
            issuer.on_attempt_graded(&test, &attempt),
            issuer.on_attempt_graded(&test, &attempt)
        );
        let left = left.expect("left").expect("cert");
        let right = right.expect("right").expect("cert");

        assert_eq!(left.certificate_id, right.certificate_id);
        assert_eq!(store.certificate_count("attempt-1").await, 1);
        assert!(left.expires_at.is_some());
    }

    #[tokio::test]
    async fn revoke_and_reinstate_flip_validity() {
        let store = Arc::new(MemoryAssessmentStore::new());
        let issuer = issuer(store.clone(), None);
        let mut test = test_fixture("test-1");
        test.issues_certificate = true;
        let cert = issuer
            .on_attempt_graded(&test, &graded(80.0))
            .await
            .expect("issue")
            .expect("cert");

        let revoked =
            issuer.revoke(&cert.certificate_id, "academic misconduct").await.expect("revoke");
        assert!(revoked.is_some());
        let verification =
            issuer.verify(&cert.certificate_id).await.expect("verify").expect("found");
        assert!(!verification.is_valid);
        assert_eq!(verification.state, CertificateState::Revoked);
        assert!(verification.message.contains("academic misconduct"));

        issuer.reinstate(&cert.certificate_id).await.expect("reinstate");
        let verification =
            issuer.verify(&cert.certificate_id).await.expect("verify").expect("found");
        assert!(verification.is_valid);

        let by_email =
            issuer.validate_by_email("LEARNER@example.com").await.expect("validate");
        assert_eq!(by_email.len(), 1);
    }
}
