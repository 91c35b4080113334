use std::time::Duration;

/// Failure taxonomy for a single automation run.
///
/// Everything here is fatal for the run that produced it except where the
/// orchestrator documents otherwise; a redirect to the login view is not an
/// error and is modeled as `NavOutcome::RedirectedToLogin` instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AutomationError {
    #[error("failed to navigate: {0}")]
    Navigation(String),

    #[error("navigation failed after login: {0}")]
    NavigationAfterLogin(String),

    #[error("login form not found")]
    LoginFormMissing,

    #[error("login verification failed")]
    LoginVerificationFailed,

    #[error("{0} not found on page")]
    CapabilityMissing(&'static str),

    #[error("service error: {0}")]
    Service(String),

    #[error("timeout waiting for vehicle data after {0:?}")]
    Timeout(Duration),

    #[error("page interaction failed: {0}")]
    Page(String),

    #[error("automation run canceled")]
    Canceled,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
