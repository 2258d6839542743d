pub(crate) mod answer_collector;
pub(crate) mod attempt_orchestrator;
// Client-driver seams; only embedders and tests reach them.
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) mod attempt_session;
pub(crate) mod certificate_issuer;
pub(crate) mod context;
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) mod expiry_timer;
pub(crate) mod grader;
pub(crate) mod question_selection;
pub(crate) mod quota;
