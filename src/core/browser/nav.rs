use std::time::Duration;

use tracing::{debug, info};

use super::PageDriver;
use crate::error::AutomationError;

pub const MAIN_URL: &str = "https://theearth-np.com/WebVenus/F-AAV0001[VenusMain].aspx";

/// Where a navigation attempt actually landed. A bounce to the login view is
/// an expected signal (expired session), not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Arrived,
    RedirectedToLogin,
}

/// Navigates to the main application view and classifies the landing URL.
pub async fn navigate_to_main(page: &dyn PageDriver) -> Result<NavOutcome, AutomationError> {
    page.goto(MAIN_URL).await?;
    page.wait_for_ready(Duration::from_secs(10)).await?;

    let url = page.current_url().await?;
    if is_login_url(&url) {
        info!(%url, "Redirected to login view");
        return Ok(NavOutcome::RedirectedToLogin);
    }
    debug!(%url, "Arrived at main view");
    Ok(NavOutcome::Arrived)
}

/// The application bounces expired sessions to its login form; both the
/// friendly path and the raw form name identify it.
pub fn is_login_url(url: &str) -> bool {
    url.contains("Login") || url.contains("OES1010")
}
