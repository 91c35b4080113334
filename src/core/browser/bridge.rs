use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PageDriver;
use crate::error::AutomationError;

const GRID_SELECTOR: &str = "#igGrid-VenusMain-VehicleList";
const SERVICE_NAME: &str = "VenusBridgeService";

const CAPABILITY_PROBE: &str = r#"() =>
    typeof VenusBridgeService !== 'undefined' &&
    typeof VenusBridgeService.VehicleStateTableForBranchEx === 'function'
"#;

const GRID_PRESENT: &str = r#"() =>
    document.querySelector('#igGrid-VenusMain-VehicleList') !== null
"#;

// The page shows a shared wait overlay (id prefix pMsg_wait) while any
// server round trip is in flight; extraction must not start under it.
const LOADING_OVERLAY_VISIBLE: &str = r#"() => {
    const overlays = document.querySelectorAll('[id^="pMsg_wait"]');
    for (const el of overlays) {
        const style = window.getComputedStyle(el);
        if (style.display !== 'none' && style.visibility !== 'hidden') {
            return true;
        }
    }
    return false;
}"#;

const COMPLETED_FLAG: &str = "() => window.__vehicleDataCompleted === true";
const ERROR_FLAG: &str = "() => window.__vehicleDataError !== null && window.__vehicleDataError !== undefined";
const ERROR_MESSAGE: &str = "() => String(window.__vehicleDataError)";
const RESULT_VALUE: &str = "() => window.__vehicleDataResult";

/// Drives the remote application's in-page service object to extract the
/// vehicle state table, using window-scoped flags as the completion channel.
pub struct ExtractionBridge<'a> {
    page: &'a dyn PageDriver,
    cancel: CancellationToken,
    timeout: Duration,
    poll_interval: Duration,
    ready_attempts: u32,
    ready_interval: Duration,
}

impl<'a> ExtractionBridge<'a> {
    pub fn new(page: &'a dyn PageDriver, cancel: CancellationToken) -> Self {
        Self {
            page,
            cancel,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            ready_attempts: 30,
            ready_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_pacing(mut self, timeout: Duration, poll: Duration) -> Self {
        self.timeout = timeout;
        self.poll_interval = poll;
        self.ready_attempts = 2;
        self.ready_interval = Duration::from_millis(1);
        self
    }

    /// Runs the full extraction: capability probe, readiness wait, service
    /// invocation, then a bounded poll for the completion flags.
    pub async fn extract(&self, branch_id: &str, filter_id: &str) -> Result<Value, AutomationError> {
        self.probe_capability().await?;
        self.wait_until_ready().await?;
        self.invoke(branch_id, filter_id).await?;
        self.collect().await
    }

    /// Fails fast when the page lacks the service object, e.g. after landing
    /// on the wrong view.
    pub async fn probe_capability(&self) -> Result<(), AutomationError> {
        let present = self
            .page
            .evaluate(CAPABILITY_PROBE)
            .await?
            .as_bool()
            .unwrap_or(false);
        if !present {
            return Err(AutomationError::CapabilityMissing(SERVICE_NAME));
        }
        Ok(())
    }

    /// Bounded wait for the vehicle grid to exist and the wait overlay to
    /// clear. Exhausting the budget is logged but not fatal: the service
    /// invocation itself is the authoritative check.
    pub async fn wait_until_ready(&self) -> Result<(), AutomationError> {
        let mut grid_seen = false;
        for _ in 0..self.ready_attempts {
            self.check_canceled()?;
            if !grid_seen {
                grid_seen = self
                    .page
                    .evaluate(GRID_PRESENT)
                    .await?
                    .as_bool()
                    .unwrap_or(false);
            }
            if grid_seen {
                let loading = self
                    .page
                    .evaluate(LOADING_OVERLAY_VISIBLE)
                    .await?
                    .as_bool()
                    .unwrap_or(false);
                if !loading {
                    debug!("Vehicle grid ready");
                    return Ok(());
                }
            }
            tokio::time::sleep(self.ready_interval).await;
        }
        if grid_seen {
            warn!("Loading overlay still visible after readiness budget, proceeding");
        } else {
            warn!("Vehicle grid {} never appeared, proceeding", GRID_SELECTOR);
        }
        Ok(())
    }

    /// Resets the window flags and kicks off the asynchronous service call.
    async fn invoke(&self, branch_id: &str, filter_id: &str) -> Result<(), AutomationError> {
        let js = format!(
            r#"() => {{
                window.__vehicleDataResult = null;
                window.__vehicleDataError = null;
                window.__vehicleDataCompleted = false;
                try {{
                    VenusBridgeService.VehicleStateTableForBranchEx(
                        '{branch}', '{filter}',
                        function(result) {{
                            window.__vehicleDataResult = result;
                            window.__vehicleDataCompleted = true;
                        }},
                        function(error) {{
                            window.__vehicleDataError = String(error);
                            window.__vehicleDataCompleted = true;
                        }}
                    );
                }} catch (e) {{
                    window.__vehicleDataError = String(e);
                    window.__vehicleDataCompleted = true;
                }}
                return true;
            }}"#,
            branch = branch_id,
            filter = filter_id,
        );
        info!(branch_id, filter_id, "Invoking vehicle state extraction");
        self.page.evaluate(&js).await?;
        Ok(())
    }

    /// Polls the completion flag until it flips, the budget runs out, or the
    /// run is canceled. Evaluation hiccups mid-poll are treated as
    /// not-yet-complete rather than failures.
    async fn collect(&self) -> Result<Value, AutomationError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            self.check_canceled()?;
            if tokio::time::Instant::now() >= deadline {
                return Err(AutomationError::Timeout(self.timeout));
            }
            match self.page.evaluate(COMPLETED_FLAG).await {
                Ok(v) if v.as_bool().unwrap_or(false) => break,
                Ok(_) => {}
                Err(e) => debug!("Completion poll read failed, retrying: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let errored = self
            .page
            .evaluate(ERROR_FLAG)
            .await?
            .as_bool()
            .unwrap_or(false);
        if errored {
            let message = self
                .page
                .evaluate(ERROR_MESSAGE)
                .await?
                .as_str()
                .unwrap_or("unknown service error")
                .to_string();
            return Err(AutomationError::Service(message));
        }

        self.page.evaluate(RESULT_VALUE).await
    }

    fn check_canceled(&self) -> Result<(), AutomationError> {
        if self.cancel.is_cancelled() {
            return Err(AutomationError::Canceled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::core::browser::testing::FakePage;

    fn bridge<'a>(page: &'a FakePage, cancel: CancellationToken) -> ExtractionBridge<'a> {
        ExtractionBridge::new(page, cancel)
            .with_pacing(Duration::from_millis(200), Duration::from_millis(1))
    }

    fn script_ready(page: &FakePage) {
        // Capability present, grid present, overlay gone.
        page.set_eval(|js| {
            if js.contains("typeof VenusBridgeService") {
                Ok(json!(true))
            } else if js.contains("igGrid-VenusMain-VehicleList") {
                Ok(json!(true))
            } else if js.contains("pMsg_wait") {
                Ok(json!(false))
            } else {
                Ok(serde_json::Value::Null)
            }
        });
    }

    #[tokio::test]
    async fn extract_returns_result_when_service_completes() {
        let page = FakePage::new();
        let polls = Arc::new(AtomicU32::new(0));
        let polls_clone = polls.clone();
        page.set_eval(move |js| {
            if js.contains("typeof VenusBridgeService") || js.contains("igGrid-VenusMain") {
                Ok(json!(true))
            } else if js.contains("pMsg_wait") {
                Ok(json!(false))
            } else if js.contains("__vehicleDataCompleted === true") {
                // Completes on the third poll.
                Ok(json!(polls_clone.fetch_add(1, Ordering::SeqCst) >= 2))
            } else if js.contains("__vehicleDataError !== null") {
                Ok(json!(false))
            } else if js.contains("window.__vehicleDataResult") && js.starts_with("() =>") {
                Ok(json!([{"VehicleCD": "V001"}]))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        let result = bridge(&page, CancellationToken::new())
            .extract("00000000", "0")
            .await
            .unwrap();
        assert_eq!(result, json!([{"VehicleCD": "V001"}]));
        assert!(polls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn extract_surfaces_service_error() {
        let page = FakePage::new();
        page.set_eval(|js| {
            if js.contains("typeof VenusBridgeService") || js.contains("igGrid-VenusMain") {
                Ok(json!(true))
            } else if js.contains("pMsg_wait") {
                Ok(json!(false))
            } else if js.contains("__vehicleDataCompleted === true") {
                Ok(json!(true))
            } else if js.contains("__vehicleDataError !== null") {
                Ok(json!(true))
            } else if js.contains("String(window.__vehicleDataError)") {
                Ok(json!("session invalidated"))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        let err = bridge(&page, CancellationToken::new())
            .extract("00000000", "0")
            .await
            .unwrap_err();
        match err {
            AutomationError::Service(msg) => assert_eq!(msg, "session invalidated"),
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn extract_times_out_when_flag_never_flips() {
        let page = FakePage::new();
        page.set_eval(|js| {
            if js.contains("typeof VenusBridgeService") || js.contains("igGrid-VenusMain") {
                Ok(json!(true))
            } else if js.contains("pMsg_wait") {
                Ok(json!(false))
            } else if js.contains("__vehicleDataCompleted === true") {
                Ok(json!(false))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        let err = bridge(&page, CancellationToken::new())
            .extract("00000000", "0")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Timeout(_)));
    }

    #[tokio::test]
    async fn probe_fails_when_service_object_absent() {
        let page = FakePage::new();
        page.set_eval(|js| {
            if js.contains("typeof VenusBridgeService") {
                Ok(json!(false))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        let err = bridge(&page, CancellationToken::new())
            .extract("00000000", "0")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::CapabilityMissing(_)));
    }

    #[tokio::test]
    async fn transient_poll_read_errors_are_retried() {
        let page = FakePage::new();
        let polls = Arc::new(AtomicU32::new(0));
        let polls_clone = polls.clone();
        page.set_eval(move |js| {
            if js.contains("typeof VenusBridgeService") || js.contains("igGrid-VenusMain") {
                Ok(json!(true))
            } else if js.contains("pMsg_wait") {
                Ok(json!(false))
            } else if js.contains("__vehicleDataCompleted === true") {
                let n = polls_clone.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(AutomationError::Page("execution context destroyed".into()))
                } else {
                    Ok(json!(n >= 2))
                }
            } else if js.contains("__vehicleDataError !== null") {
                Ok(json!(false))
            } else if js.contains("window.__vehicleDataResult") {
                Ok(json!([]))
            } else {
                Ok(serde_json::Value::Null)
            }
        });

        let result = bridge(&page, CancellationToken::new())
            .extract("00000000", "0")
            .await
            .unwrap();
        assert_eq!(result, json!([]));
    }

    #[tokio::test]
    async fn canceled_token_aborts_the_poll() {
        let page = FakePage::new();
        script_ready(&page);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = bridge(&page, cancel)
            .extract("00000000", "0")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Canceled));
    }
}
