use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Result of one delivery attempt. Delivery is best effort; the caller
/// records the outcome but never fails a run over it.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub success: bool,
    pub records_added: usize,
    pub message: String,
}

/// Downstream consumer of raw extracted records.
#[async_trait]
pub trait IngestSink: Send + Sync {
    async fn deliver(&self, records: &[Value]) -> IngestOutcome;
}

/// Posts record batches to an HTTP ingestion endpoint as a single JSON array.
pub struct HttpIngestSink {
    client: reqwest::Client,
    url: String,
}

impl HttpIngestSink {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl IngestSink for HttpIngestSink {
    async fn deliver(&self, records: &[Value]) -> IngestOutcome {
        if records.is_empty() {
            return IngestOutcome {
                success: true,
                records_added: 0,
                message: "no records to deliver".to_string(),
            };
        }

        let body = match serde_json::to_vec(records) {
            Ok(b) => b,
            Err(e) => {
                return IngestOutcome {
                    success: false,
                    records_added: 0,
                    message: format!("failed to encode records: {e}"),
                };
            }
        };

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(count = records.len(), "Delivered records to ingest endpoint");
                IngestOutcome {
                    success: true,
                    records_added: records.len(),
                    message: format!("delivered {} records", records.len()),
                }
            }
            Ok(resp) => {
                let status = resp.status();
                warn!(%status, "Ingest endpoint rejected delivery");
                IngestOutcome {
                    success: false,
                    records_added: 0,
                    message: format!("ingest endpoint returned {status}"),
                }
            }
            Err(e) => {
                warn!("Ingest delivery failed: {}", e);
                IngestOutcome {
                    success: false,
                    records_added: 0,
                    message: format!("ingest request failed: {e}"),
                }
            }
        }
    }
}
