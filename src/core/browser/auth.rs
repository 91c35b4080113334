use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::PageDriver;
use crate::config::Config;
use crate::core::storage::{Session, Storage};
use crate::error::AutomationError;

pub const LOGIN_URL: &str = "https://theearth-np.com/F-OES1010[Login].aspx?mode=timeout";

const PASSWORD_FIELD: &str = "#txtPass";
const COMPANY_FIELD: &str = "#txtID2";
const USER_FIELD: &str = "#txtID1";
const LOGIN_BUTTON: &str = "#imgLogin";
const POST_LOGIN_MARKER: &str = "#Button1st_7";
const INTERSTITIAL_POPUP: &str = "#popup_1";

/// Performs the scripted login against the remote application's form and
/// persists the resulting session and cookies.
pub struct AuthController {
    storage: Arc<Storage>,
    config: Config,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl AuthController {
    pub fn new(storage: Arc<Storage>, config: Config) -> Self {
        Self {
            storage,
            config,
            poll_attempts: 20,
            poll_interval: Duration::from_millis(250),
        }
    }

    #[cfg(test)]
    fn with_pacing(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Drives the login form end to end. Exactly one submission per call;
    /// verification failure after the click is terminal for the run.
    pub async fn login(
        &self,
        page: &dyn PageDriver,
        cancel: &CancellationToken,
    ) -> Result<Session, AutomationError> {
        info!("Starting login flow");
        page.goto(LOGIN_URL).await?;
        page.wait_for_ready(Duration::from_secs(10)).await?;

        if !self.wait_for_element(page, PASSWORD_FIELD, cancel).await? {
            return Err(AutomationError::LoginFormMissing);
        }

        // A promotional interstitial sometimes covers the form.
        self.dismiss_popup(page).await?;

        page.type_text(COMPANY_FIELD, &self.config.comp_id).await?;
        page.type_text(USER_FIELD, &self.config.user_name).await?;
        page.type_text(PASSWORD_FIELD, &self.config.user_pass).await?;
        page.click(LOGIN_BUTTON).await?;

        page.wait_for_ready(Duration::from_secs(10)).await?;
        let mut verified = self.wait_for_element(page, POST_LOGIN_MARKER, cancel).await?;
        if !verified && page.is_visible(INTERSTITIAL_POPUP).await? {
            // The interstitial can also appear after submission, hiding the
            // already-loaded main view.
            self.dismiss_popup(page).await?;
            verified = self.wait_for_element(page, POST_LOGIN_MARKER, cancel).await?;
        }
        if !verified {
            return Err(AutomationError::LoginVerificationFailed);
        }
        info!("Login verified");

        let session = self.mint_session();
        // The page is authenticated regardless of whether we manage to
        // record that fact; persistence only costs a future warm start.
        if let Err(e) = self.storage.create_session(&session).await {
            warn!("Failed to save session: {}", e);
        } else {
            self.persist_cookies(page, &session.id).await;
        }
        Ok(session)
    }

    fn mint_session(&self) -> Session {
        let now = Utc::now();
        Session {
            id: format!("session_{}", Uuid::new_v4()),
            created_at: now,
            updated_at: now,
            expires_at: now
                + chrono::Duration::from_std(self.config.session_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(10)),
            user_id: self.config.user_name.clone(),
            company_id: self.config.comp_id.clone(),
        }
    }

    /// Cookie capture is best effort: a failure here costs a future warm
    /// start, not this run.
    async fn persist_cookies(&self, page: &dyn PageDriver, session_id: &str) {
        let cookies = match page.cookies().await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read browser cookies: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.save_cookies(session_id, &cookies).await {
            warn!("Failed to persist session cookies: {}", e);
        } else {
            info!(count = cookies.len(), "Session cookies saved");
        }
    }

    async fn dismiss_popup(&self, page: &dyn PageDriver) -> Result<(), AutomationError> {
        if page.is_visible(INTERSTITIAL_POPUP).await? {
            info!("Dismissing interstitial popup");
            page.click(INTERSTITIAL_POPUP).await?;
        }
        Ok(())
    }

    /// Bounded presence poll; returns false on budget exhaustion.
    async fn wait_for_element(
        &self,
        page: &dyn PageDriver,
        selector: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, AutomationError> {
        for _ in 0..self.poll_attempts {
            if cancel.is_cancelled() {
                return Err(AutomationError::Canceled);
            }
            if page.has_element(selector).await? {
                return Ok(true);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::browser::testing::FakePage;
    use crate::core::storage::{test_storage, Cookie};

    fn test_config() -> Config {
        let mut cfg = Config::from_env();
        cfg.comp_id = "C0001".into();
        cfg.user_name = "user01".into();
        cfg.user_pass = "hunter2".into();
        cfg
    }

    fn controller(storage: Arc<Storage>) -> AuthController {
        AuthController::new(storage, test_config())
            .with_pacing(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn successful_login_persists_session_and_cookies() {
        let (storage, _dir) = test_storage();
        let storage = Arc::new(storage);
        let page = FakePage::new();
        page.add_element(PASSWORD_FIELD);
        page.cookie_jar.lock().unwrap().push(Cookie {
            name: "ASP.NET_SessionId".into(),
            value: "abc123".into(),
            domain: "theearth-np.com".into(),
            path: "/".into(),
            expires_at: Utc::now() + chrono::Duration::hours(24),
            http_only: true,
            secure: true,
        });
        // Submitting the form reveals the post-login marker.
        let elements = page.elements.clone();
        page.set_on_click(move |selector| {
            if selector == LOGIN_BUTTON {
                elements.lock().unwrap().insert(POST_LOGIN_MARKER.to_string());
            }
        });

        let session = controller(storage.clone())
            .login(&page, &CancellationToken::new())
            .await
            .unwrap();
        assert!(session.id.starts_with("session_"));
        assert_eq!(session.company_id, "C0001");

        let typed = page.typed.lock().unwrap().clone();
        assert_eq!(
            typed,
            vec![
                (COMPANY_FIELD.to_string(), "C0001".to_string()),
                (USER_FIELD.to_string(), "user01".to_string()),
                (PASSWORD_FIELD.to_string(), "hunter2".to_string()),
            ]
        );
        // One submission only.
        let clicks = page.clicks.lock().unwrap().clone();
        assert_eq!(clicks.iter().filter(|c| *c == LOGIN_BUTTON).count(), 1);

        let stored = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, "user01");
        let cookies = storage.get_cookies(&session.id).await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "ASP.NET_SessionId");
    }

    #[tokio::test]
    async fn session_save_failure_does_not_abort_login() {
        let (storage, _dir) = test_storage();
        let storage = Arc::new(storage);
        storage.execute_raw("DROP TABLE sessions").await.unwrap();

        let page = FakePage::new();
        page.add_element(PASSWORD_FIELD);
        let elements = page.elements.clone();
        page.set_on_click(move |selector| {
            if selector == LOGIN_BUTTON {
                elements.lock().unwrap().insert(POST_LOGIN_MARKER.to_string());
            }
        });

        // The page is authenticated; the broken store costs the warm start,
        // not the run.
        let session = controller(storage)
            .login(&page, &CancellationToken::new())
            .await
            .unwrap();
        assert!(session.id.starts_with("session_"));
    }

    #[tokio::test]
    async fn missing_form_fails_without_submitting() {
        let (storage, _dir) = test_storage();
        let page = FakePage::new();

        let err = controller(Arc::new(storage))
            .login(&page, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::LoginFormMissing));
        assert!(page.clicks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_submit_popup_is_dismissed_then_verified() {
        let (storage, _dir) = test_storage();
        let page = FakePage::new();
        page.add_element(PASSWORD_FIELD);
        // Marker exists but the popup covers the view after submission.
        let visible = page.visible.clone();
        let elements = page.elements.clone();
        page.set_on_click(move |selector| {
            if selector == LOGIN_BUTTON {
                visible.lock().unwrap().insert(INTERSTITIAL_POPUP.to_string());
            }
            if selector == INTERSTITIAL_POPUP {
                visible.lock().unwrap().remove(INTERSTITIAL_POPUP);
                elements.lock().unwrap().insert(POST_LOGIN_MARKER.to_string());
            }
        });

        let session = controller(Arc::new(storage))
            .login(&page, &CancellationToken::new())
            .await
            .unwrap();
        assert!(session.id.starts_with("session_"));
        let clicks = page.clicks.lock().unwrap().clone();
        assert!(clicks.contains(&INTERSTITIAL_POPUP.to_string()));
    }

    #[tokio::test]
    async fn marker_never_appearing_fails_verification() {
        let (storage, _dir) = test_storage();
        let page = FakePage::new();
        page.add_element(PASSWORD_FIELD);

        let err = controller(Arc::new(storage))
            .login(&page, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::LoginVerificationFailed));
    }

    #[tokio::test]
    async fn cancellation_aborts_mid_flow() {
        let (storage, _dir) = test_storage();
        let page = FakePage::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = controller(Arc::new(storage))
            .login(&page, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Canceled));
    }
}
