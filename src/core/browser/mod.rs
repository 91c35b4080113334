pub mod auth;
pub mod bridge;
pub mod nav;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::storage::Cookie;
use crate::error::AutomationError;

/// Abstraction over a single browser page. The automation controllers
/// (navigation, auth, extraction bridge) only ever talk to this trait, so
/// they can be exercised against a scripted double without Chrome.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), AutomationError>;
    async fn current_url(&self) -> Result<String, AutomationError>;
    /// Bounded readiness wait: document loaded and the network quiet.
    async fn wait_for_ready(&self, budget: Duration) -> Result<(), AutomationError>;
    async fn has_element(&self, selector: &str) -> Result<bool, AutomationError>;
    async fn is_visible(&self, selector: &str) -> Result<bool, AutomationError>;
    async fn click(&self, selector: &str) -> Result<(), AutomationError>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AutomationError>;
    async fn evaluate(&self, js: &str) -> Result<serde_json::Value, AutomationError>;
    async fn cookies(&self) -> Result<Vec<Cookie>, AutomationError>;
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), AutomationError>;
    async fn close(&self) -> Result<(), AutomationError>;
}

/// Source of fresh, independent pages. One page per orchestrator call.
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn acquire_page(&self) -> Result<PageGuard>;
}

/// RAII guard that guarantees page release on every exit path.
///
/// Prefer the explicit async `close()`; the `Drop` fallback spawns a
/// background cleanup task so error paths cannot leak CDP targets.
pub struct PageGuard {
    driver: Option<Box<dyn PageDriver>>,
}

impl PageGuard {
    pub fn new(driver: Box<dyn PageDriver>) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    pub fn driver(&self) -> &dyn PageDriver {
        self.driver
            .as_deref()
            .expect("PageGuard: page already consumed")
    }

    pub async fn close(mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.close().await {
                warn!("Failed to close page: {}", e);
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = driver.close().await {
                        debug!("Background page cleanup failed: {}", e);
                    }
                });
            }
        }
    }
}

/// Shared Chromium instance. Hosts one independent page per call; the
/// browser itself lives for the whole daemon.
pub struct BrowserEngine {
    browser: tokio::sync::Mutex<Browser>,
}

impl BrowserEngine {
    pub async fn launch(config: &Config) -> Result<Self> {
        let headless = if config.browser_headless {
            HeadlessMode::New
        } else {
            HeadlessMode::False
        };

        let mut builder = BrowserConfig::builder()
            .headless_mode(headless)
            .arg("--no-sandbox")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .window_size(1280, 800);
        if config.browser_debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }
        let browser_cfg = builder
            .build()
            .map_err(|e| anyhow::anyhow!("browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_cfg).await?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Browser handler error: {}", e);
                    break;
                }
            }
            info!("Browser handler ended");
        });

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
        })
    }

    pub async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
    }
}

#[async_trait]
impl PageFactory for BrowserEngine {
    async fn acquire_page(&self) -> Result<PageGuard> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await?
        };
        Ok(PageGuard::new(Box::new(CdpPage { page })))
    }
}

fn page_err(e: impl std::fmt::Display) -> AutomationError {
    AutomationError::Page(e.to_string())
}

/// `PageDriver` over a live CDP page.
pub struct CdpPage {
    page: chromiumoxide::Page,
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AutomationError::Navigation(e.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| AutomationError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        Ok(self.page.url().await.map_err(page_err)?.unwrap_or_default())
    }

    async fn wait_for_ready(&self, budget: Duration) -> Result<(), AutomationError> {
        settle_page(self, budget, Duration::from_millis(250)).await
    }

    async fn has_element(&self, selector: &str) -> Result<bool, AutomationError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, AutomationError> {
        let js = format!(
            r#"() => {{
                const el = document.querySelector("{}");
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                return style.display !== 'none' &&
                       style.visibility !== 'hidden' &&
                       style.opacity !== '0' &&
                       (rect.width > 0 || rect.height > 0);
            }}"#,
            selector.replace('"', "\\\"")
        );
        Ok(self
            .evaluate(&js)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn click(&self, selector: &str) -> Result<(), AutomationError> {
        let element = self.page.find_element(selector).await.map_err(page_err)?;
        element.click().await.map_err(page_err)?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AutomationError> {
        let element = self.page.find_element(selector).await.map_err(page_err)?;
        element.click().await.map_err(page_err)?;
        element.type_str(text).await.map_err(page_err)?;
        Ok(())
    }

    async fn evaluate(&self, js: &str) -> Result<serde_json::Value, AutomationError> {
        let result = self.page.evaluate(js).await.map_err(page_err)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, AutomationError> {
        let raw = self.page.get_cookies().await.map_err(page_err)?;
        Ok(raw
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires_at: epoch_to_datetime(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), AutomationError> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let param = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .expires(TimeSinceEpoch::new(cookie.expires_at.timestamp() as f64))
                .http_only(cookie.http_only)
                .secure(cookie.secure)
                .build()
                .map_err(page_err)?;
            params.push(param);
        }
        self.page.set_cookies(params).await.map_err(page_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.page.clone().close().await.map_err(page_err)?;
        Ok(())
    }
}

fn epoch_to_datetime(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or_else(Utc::now)
}

const READY_STATE_COMPLETE: &str = "() => document.readyState === 'complete'";
const RESOURCE_COUNT: &str = "() => performance.getEntriesByType('resource').length";

/// Bounded settle poll: the document must be loaded and the resource log
/// quiet across two consecutive samples. The budget is an upper bound;
/// exhaustion is not an error, callers verify page state themselves.
pub(crate) async fn settle_page(
    page: &dyn PageDriver,
    budget: Duration,
    interval: Duration,
) -> Result<(), AutomationError> {
    let deadline = tokio::time::Instant::now() + budget;
    let mut last_resources: Option<i64> = None;
    loop {
        let ready = page
            .evaluate(READY_STATE_COMPLETE)
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if ready {
            // An unreadable resource log counts as quiet; there is nothing
            // left to observe.
            let resources = page.evaluate(RESOURCE_COUNT).await.ok().and_then(|v| v.as_i64());
            if resources.is_none() || resources == last_resources {
                return Ok(());
            }
            last_resources = resources;
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::FakePage;
    use super::*;

    #[tokio::test]
    async fn settle_waits_for_resource_log_to_stabilize() {
        let page = FakePage::new();
        let samples = Arc::new(AtomicI64::new(0));
        let samples_clone = samples.clone();
        page.set_eval(move |js| {
            if js.contains("readyState") {
                Ok(json!(true))
            } else if js.contains("getEntriesByType") {
                // Log grows for the first three samples, then goes quiet.
                let n = samples_clone.fetch_add(1, Ordering::SeqCst);
                Ok(json!(n.min(3)))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        settle_page(&page, Duration::from_secs(1), Duration::from_millis(1))
            .await
            .unwrap();
        // Two consecutive equal samples are needed to declare quiet.
        assert!(samples.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn settle_gives_up_at_the_budget() {
        let page = FakePage::new();
        let samples = Arc::new(AtomicI64::new(0));
        let samples_clone = samples.clone();
        page.set_eval(move |js| {
            if js.contains("readyState") {
                Ok(json!(true))
            } else if js.contains("getEntriesByType") {
                // Never quiet.
                Ok(json!(samples_clone.fetch_add(1, Ordering::SeqCst)))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        settle_page(&page, Duration::from_millis(20), Duration::from_millis(1))
            .await
            .unwrap();
        assert!(samples.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn settle_holds_until_document_is_loaded() {
        let page = FakePage::new();
        let polls = Arc::new(AtomicI64::new(0));
        let polls_clone = polls.clone();
        page.set_eval(move |js| {
            if js.contains("readyState") {
                Ok(json!(polls_clone.fetch_add(1, Ordering::SeqCst) >= 2))
            } else if js.contains("getEntriesByType") {
                Ok(json!(7))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        settle_page(&page, Duration::from_secs(1), Duration::from_millis(1))
            .await
            .unwrap();
        assert!(polls.load(Ordering::SeqCst) >= 3);
    }
}

/// Scripted `PageDriver` double shared by the controller tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;

    type EvalFn = dyn Fn(&str) -> Result<serde_json::Value, AutomationError> + Send + Sync;
    type ClickFn = dyn Fn(&str) + Send + Sync;
    type GotoFn = dyn Fn(&str) -> Result<String, AutomationError> + Send + Sync;

    pub(crate) struct FakePage {
        pub url: Arc<Mutex<String>>,
        pub elements: Arc<Mutex<HashSet<String>>>,
        pub visible: Arc<Mutex<HashSet<String>>>,
        pub clicks: Arc<Mutex<Vec<String>>>,
        pub typed: Arc<Mutex<Vec<(String, String)>>>,
        pub cookie_jar: Arc<Mutex<Vec<Cookie>>>,
        pub closed: Arc<Mutex<bool>>,
        eval: Mutex<Option<Box<EvalFn>>>,
        on_click: Mutex<Option<Box<ClickFn>>>,
        on_goto: Mutex<Option<Box<GotoFn>>>,
    }

    impl FakePage {
        pub fn new() -> Self {
            Self {
                url: Arc::new(Mutex::new(String::new())),
                elements: Arc::new(Mutex::new(HashSet::new())),
                visible: Arc::new(Mutex::new(HashSet::new())),
                clicks: Arc::new(Mutex::new(Vec::new())),
                typed: Arc::new(Mutex::new(Vec::new())),
                cookie_jar: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(Mutex::new(false)),
                eval: Mutex::new(None),
                on_click: Mutex::new(None),
                on_goto: Mutex::new(None),
            }
        }

        pub fn add_element(&self, selector: &str) {
            self.elements.lock().unwrap().insert(selector.to_string());
        }

        pub fn set_eval<F>(&self, f: F)
        where
            F: Fn(&str) -> Result<serde_json::Value, AutomationError> + Send + Sync + 'static,
        {
            *self.eval.lock().unwrap() = Some(Box::new(f));
        }

        pub fn set_on_click<F>(&self, f: F)
        where
            F: Fn(&str) + Send + Sync + 'static,
        {
            *self.on_click.lock().unwrap() = Some(Box::new(f));
        }

        pub fn set_on_goto<F>(&self, f: F)
        where
            F: Fn(&str) -> Result<String, AutomationError> + Send + Sync + 'static,
        {
            *self.on_goto.lock().unwrap() = Some(Box::new(f));
        }
    }

    #[async_trait]
    impl PageDriver for FakePage {
        async fn goto(&self, url: &str) -> Result<(), AutomationError> {
            let landed = match &*self.on_goto.lock().unwrap() {
                Some(f) => f(url)?,
                None => url.to_string(),
            };
            *self.url.lock().unwrap() = landed;
            Ok(())
        }

        async fn current_url(&self) -> Result<String, AutomationError> {
            Ok(self.url.lock().unwrap().clone())
        }

        async fn wait_for_ready(&self, _budget: Duration) -> Result<(), AutomationError> {
            Ok(())
        }

        async fn has_element(&self, selector: &str) -> Result<bool, AutomationError> {
            Ok(self.elements.lock().unwrap().contains(selector))
        }

        async fn is_visible(&self, selector: &str) -> Result<bool, AutomationError> {
            Ok(self.visible.lock().unwrap().contains(selector))
        }

        async fn click(&self, selector: &str) -> Result<(), AutomationError> {
            self.clicks.lock().unwrap().push(selector.to_string());
            if let Some(f) = &*self.on_click.lock().unwrap() {
                f(selector);
            }
            Ok(())
        }

        async fn type_text(&self, selector: &str, text: &str) -> Result<(), AutomationError> {
            self.typed
                .lock()
                .unwrap()
                .push((selector.to_string(), text.to_string()));
            Ok(())
        }

        async fn evaluate(&self, js: &str) -> Result<serde_json::Value, AutomationError> {
            match &*self.eval.lock().unwrap() {
                Some(f) => f(js),
                None => Ok(serde_json::Value::Null),
            }
        }

        async fn cookies(&self) -> Result<Vec<Cookie>, AutomationError> {
            Ok(self.cookie_jar.lock().unwrap().clone())
        }

        async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), AutomationError> {
            *self.cookie_jar.lock().unwrap() = cookies.to_vec();
            Ok(())
        }

        async fn close(&self) -> Result<(), AutomationError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }
}
