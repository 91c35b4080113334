use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::browser::auth::AuthController;
use crate::core::browser::bridge::ExtractionBridge;
use crate::core::browser::nav::{navigate_to_main, NavOutcome};
use crate::core::browser::{PageDriver, PageFactory};
use crate::core::sink::{IngestOutcome, IngestSink};
use crate::core::storage::Storage;
use crate::error::AutomationError;

// Branch "00000000" is the all-branches scope; filter "0" excludes
// soft-deleted rows (filter "" would include them).
const BRANCH_ID: &str = "00000000";
const FILTER_ID: &str = "0";
const RECORD_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// One extracted vehicle row. Promotion of the well-known fields is best
/// effort; everything else rides along in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    #[serde(rename = "VehicleCD")]
    pub vehicle_cd: String,
    #[serde(rename = "VehicleName")]
    pub vehicle_name: String,
    #[serde(rename = "Status")]
    pub status: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub records: Vec<VehicleRecord>,
    pub session_id: Option<String>,
    pub ingest: IngestOutcome,
}

/// Orchestrates one full retrieval: page acquisition, session warm start,
/// navigation with a single login fallback, extraction, normalization,
/// caching, and best-effort delivery downstream.
pub struct Renderer {
    pages: Arc<dyn PageFactory>,
    storage: Arc<Storage>,
    sink: Arc<dyn IngestSink>,
    auth: AuthController,
}

impl Renderer {
    pub fn new(
        pages: Arc<dyn PageFactory>,
        storage: Arc<Storage>,
        sink: Arc<dyn IngestSink>,
        config: Config,
    ) -> Self {
        let auth = AuthController::new(storage.clone(), config);
        Self {
            pages,
            storage,
            sink,
            auth,
        }
    }

    pub async fn fetch_vehicle_data(
        &self,
        session_id: Option<&str>,
        force_login: bool,
        cancel: CancellationToken,
    ) -> Result<FetchResult, AutomationError> {
        let guard = self
            .pages
            .acquire_page()
            .await
            .map_err(|e| AutomationError::Page(e.to_string()))?;
        let result = self
            .run(guard.driver(), session_id, force_login, &cancel)
            .await;
        guard.close().await;
        result
    }

    async fn run(
        &self,
        page: &dyn PageDriver,
        session_id: Option<&str>,
        force_login: bool,
        cancel: &CancellationToken,
    ) -> Result<FetchResult, AutomationError> {
        let mut active_session = session_id.map(str::to_string);
        let mut logged_in = false;

        if force_login {
            info!("Forced login requested");
            let session = self.auth.login(page, cancel).await?;
            active_session = Some(session.id);
            logged_in = true;
        } else if let Some(id) = active_session.clone() {
            // Only a live session's cookies are worth restoring; an expired
            // or unknown id is dropped so a stale id is never echoed back.
            match self.storage.get_session(&id).await {
                Ok(Some(_)) => self.restore_cookies(page, &id).await,
                Ok(None) => {
                    info!(session_id = %id, "Session not found or expired, cold start");
                    active_session = None;
                }
                Err(e) => {
                    warn!("Failed to look up session: {}", e);
                    active_session = None;
                }
            }
        }

        let needs_login = match navigate_to_main(page).await {
            Ok(NavOutcome::Arrived) => false,
            Ok(NavOutcome::RedirectedToLogin) => true,
            Err(e) if !logged_in => {
                warn!("Initial navigation failed, falling back to login: {}", e);
                true
            }
            Err(e) => return Err(AutomationError::NavigationAfterLogin(e.to_string())),
        };

        if needs_login {
            if logged_in {
                return Err(AutomationError::NavigationAfterLogin(
                    "redirected back to login".to_string(),
                ));
            }
            let session = self.auth.login(page, cancel).await?;
            active_session = Some(session.id);
            match navigate_to_main(page).await {
                Ok(NavOutcome::Arrived) => {}
                Ok(NavOutcome::RedirectedToLogin) => {
                    return Err(AutomationError::NavigationAfterLogin(
                        "redirected to login again".to_string(),
                    ));
                }
                Err(e) => return Err(AutomationError::NavigationAfterLogin(e.to_string())),
            }
        }

        let bridge = ExtractionBridge::new(page, cancel.clone());
        let raw = bridge.extract(BRANCH_ID, FILTER_ID).await?;
        let raw_records: Vec<Value> = match raw {
            Value::Array(items) => items,
            other => {
                warn!(
                    "Expected an array of vehicle rows, got {}",
                    type_name(&other)
                );
                Vec::new()
            }
        };

        let records = normalize_records(&raw_records);
        info!(
            raw = raw_records.len(),
            normalized = records.len(),
            "Vehicle data extracted"
        );
        self.cache_records(&records).await;

        let ingest = self.sink.deliver(&raw_records).await;

        Ok(FetchResult {
            records,
            session_id: active_session,
            ingest,
        })
    }

    /// Warm start from a previous session's cookie jar. Any failure here
    /// just means a cold navigation.
    async fn restore_cookies(&self, page: &dyn PageDriver, session_id: &str) {
        let cookies = match self.storage.get_cookies(session_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to load stored cookies: {}", e);
                return;
            }
        };
        if cookies.is_empty() {
            return;
        }
        match page.set_cookies(&cookies).await {
            Ok(()) => info!(count = cookies.len(), "Restored session cookies"),
            Err(e) => warn!("Failed to restore cookies into browser: {}", e),
        }
    }

    async fn cache_records(&self, records: &[VehicleRecord]) {
        for record in records {
            if record.vehicle_cd.is_empty() {
                continue;
            }
            let key = format!("vehicle:{}", record.vehicle_cd);
            let value = match serde_json::to_value(record) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Err(e) = self
                .storage
                .cache_record(&key, &value, RECORD_CACHE_TTL)
                .await
            {
                warn!(%key, "Failed to cache vehicle record: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::core::jobs::VehicleFetcher for Renderer {
    async fn fetch(&self, cancel: CancellationToken) -> Result<FetchResult, AutomationError> {
        self.fetch_vehicle_data(None, false, cancel).await
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Non-object entries are skipped; promoted fields default to empty strings.
pub fn normalize_records(raw: &[Value]) -> Vec<VehicleRecord> {
    raw.iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let mut record = VehicleRecord {
                vehicle_cd: String::new(),
                vehicle_name: String::new(),
                status: String::new(),
                metadata: BTreeMap::new(),
            };
            for (key, value) in obj {
                let text = stringify(value);
                match key.as_str() {
                    "VehicleCD" => record.vehicle_cd = text,
                    "VehicleName" => record.vehicle_name = text,
                    "Status" => record.status = text,
                    _ => {
                        record.metadata.insert(key.clone(), text);
                    }
                }
            }
            Some(record)
        })
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
