use crate::db::models::Attempt;
use crate::db::types::AttemptStatus;

#[derive(Debug, Clone)]
pub(crate) enum QuotaDecision {
    Resume(Attempt),
    Allowed { attempt_number: i32 },
    Rejected { prior: Vec<Attempt> },
}

pub(crate) fn finalized_count(attempts: &[Attempt]) -> usize {
    attempts.iter().filter(|attempt| attempt.status.is_finalized()).count()
}

/// Decides what `start` may do given every attempt the user has on the test.
pub(crate) fn decide(attempts: Vec<Attempt>, max_attempts: i32) -> QuotaDecision {
    if let Some(open) = attempts.iter().find(|attempt| attempt.status == AttemptStatus::InProgress)
    {
        return QuotaDecision::Resume(open.clone());
    }

    let limit = usize::try_from(max_attempts.max(1)).unwrap_or(1);
    if finalized_count(&attempts) >= limit {
        return QuotaDecision::Rejected { prior: attempts };
    }

    let next = attempts.iter().map(|attempt| attempt.attempt_number).max().unwrap_or(0) + 1;
    QuotaDecision::Allowed { attempt_number: next }
}
