use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ActorRole {
    #[default]
    Learner,
    Instructor,
    Admin,
}

/// Identity of whoever drives an engine call. Every orchestrator operation takes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestContext {
    pub(crate) user_id: String,
    pub(crate) email: String,
    pub(crate) role: ActorRole,
}

impl RequestContext {
    pub(crate) fn new(user_id: impl Into<String>, email: impl Into<String>, role: ActorRole) -> Self {
        Self { user_id: user_id.into(), email: email.into(), role }
    }

    pub(crate) fn is_staff(&self) -> bool {
        matches!(self.role, ActorRole::Instructor | ActorRole::Admin)
    }

    pub(crate) fn can_access(&self, owner_id: &str) -> bool {
        self.is_staff() || self.user_id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learners_only_reach_their_own_attempts() {
        let learner = RequestContext::new("u-1", "a@example.com", ActorRole::Learner);
        assert!(learner.can_access("u-1"));
        assert!(!learner.can_access("u-2"));

        let instructor = RequestContext::new("u-9", "t@example.com", ActorRole::Instructor);
        assert!(instructor.can_access("u-2"));
        let admin = RequestContext::new("u-0", "admin@example.com", ActorRole::Admin);
        assert!(admin.is_staff());
    }
}
