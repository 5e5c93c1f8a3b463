//! Job-record persistence
//!
//! The controller only ever writes status patches. Every field other than the
//! status is merged into a per-job `metadata` bag, so new fields need no
//! schema change.

use crate::job::{JobStatus, JobUpdate};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TABLE: &str = "explainers";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("job {0} not found")]
    NotFound(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn update_status(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError>;
}

/// Write `update` and swallow failures. A store outage must never abort a run.
pub async fn persist(store: &dyn JobStore, job_id: &str, update: JobUpdate) {
    if let Err(err) = store.update_status(job_id, &update).await {
        tracing::warn!(
            job_id,
            status = update.status.as_str(),
            error = %err,
            "failed to persist job update"
        );
    }
}

/// Merge the non-status fields of `update` into `metadata`. Absent fields
/// leave existing keys alone.
pub fn merge_metadata(metadata: &mut Map<String, Value>, update: &JobUpdate) {
    if let Some(count) = update.retry_count {
        metadata.insert("retry_count".to_string(), Value::from(count));
    }
    let text_fields = [
        ("last_error", &update.last_error),
        ("manim_code", &update.manim_code),
        ("logs", &update.logs),
        ("stderr", &update.stderr),
        ("output_url", &update.output_url),
    ];
    for (key, value) in text_fields {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            metadata.insert(key.to_string(), Value::from(value));
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ═══════════════════════════════════════════════════════════════════════════
//  IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub status: JobStatus,
    pub metadata: Map<String, Value>,
    pub updated_at: String,
    /// Every patch received, in order.
    pub history: Vec<JobUpdate>,
}

/// Process-local store. Keeps the full update history for inspection.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs().get(job_id).cloned()
    }

    pub fn history(&self, job_id: &str) -> Vec<JobUpdate> {
        self.record(job_id).map(|r| r.history).unwrap_or_default()
    }

    /// `retry_count` values in the order they were written.
    pub fn retry_counts(&self, job_id: &str) -> Vec<usize> {
        self.history(job_id)
            .iter()
            .filter_map(|update| update.retry_count)
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn update_status(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError> {
        let mut jobs = self.jobs();
        let record = jobs.entry(job_id.to_string()).or_insert_with(|| JobRecord {
            status: update.status,
            metadata: Map::new(),
            updated_at: String::new(),
            history: Vec::new(),
        });
        record.status = update.status;
        record.updated_at = now_rfc3339();
        merge_metadata(&mut record.metadata, update);
        record.history.push(update.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  REST STORE (PostgREST-style table)
// ═══════════════════════════════════════════════════════════════════════════

/// Connection settings for a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestStoreSettings {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub connect_timeout: Duration,
}

pub struct RestJobStore {
    client: reqwest::Client,
    settings: RestStoreSettings,
}

impl RestJobStore {
    pub fn new(settings: RestStoreSettings) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    fn row_url(&self, job_id: &str) -> String {
        format!(
            "{}/rest/v1/{}?id=eq.{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.table,
            job_id
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.settings.api_key)
            .bearer_auth(&self.settings.api_key)
    }

    async fn fetch_metadata(&self, job_id: &str) -> Result<Map<String, Value>, StoreError> {
        let url = format!("{}&select=metadata", self.row_url(job_id));
        let response = self.authorized(self.client.get(url)).send().await?;
        let rows: Value = ensure_success(response).await?.json().await?;
        let row = rows
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        Ok(row
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobStore for RestJobStore {
    async fn update_status(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError> {
        let mut body = Map::new();
        body.insert("status".to_string(), Value::from(update.status.as_str()));
        body.insert("updated_at".to_string(), Value::from(now_rfc3339()));

        if update.has_metadata() {
            let mut metadata = self.fetch_metadata(job_id).await?;
            merge_metadata(&mut metadata, update);
            body.insert("metadata".to_string(), Value::Object(metadata));
        }

        let response = self
            .authorized(self.client.patch(self.row_url(job_id)))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        body: crate::util::truncate(&body, 300),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_additive() {
        let mut metadata = Map::new();
        metadata.insert("owner".to_string(), json!("someone"));
        merge_metadata(
            &mut metadata,
            &JobUpdate::processing().retry_count(0).manim_code("code v1"),
        );
        merge_metadata(
            &mut metadata,
            &JobUpdate::processing()
                .retry_count(1)
                .last_error(Some("boom")),
        );

        assert_eq!(metadata["owner"], "someone");
        assert_eq!(metadata["retry_count"], 1);
        assert_eq!(metadata["manim_code"], "code v1");
        assert_eq!(metadata["last_error"], "boom");
    }

    #[test]
    fn empty_strings_do_not_clear_existing_values() {
        let mut metadata = Map::new();
        merge_metadata(&mut metadata, &JobUpdate::processing().logs(Some("rendered")));
        merge_metadata(&mut metadata, &JobUpdate::processing().logs(Some("")));
        assert_eq!(metadata["logs"], "rendered");
    }

    #[tokio::test]
    async fn memory_store_tracks_status_and_history() {
        let store = MemoryJobStore::new();
        store
            .update_status("job-1", &JobUpdate::processing().retry_count(0))
            .await
            .unwrap();
        store
            .update_status("job-1", &JobUpdate::completed().output_url("out.mp4"))
            .await
            .unwrap();

        let record = store.record("job-1").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.metadata["output_url"], "out.mp4");
        assert_eq!(record.history.len(), 2);
        assert!(!record.updated_at.is_empty());
        assert_eq!(store.retry_counts("job-1"), vec![0]);
        assert!(store.record("missing").is_none());
    }

    #[test]
    fn rest_row_url_is_postgrest_filter() {
        let store = RestJobStore::new(RestStoreSettings {
            base_url: "https://db.example.invalid/".to_string(),
            api_key: "key".to_string(),
            table: DEFAULT_TABLE.to_string(),
            connect_timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(
            store.row_url("abc"),
            "https://db.example.invalid/rest/v1/explainers?id=eq.abc"
        );
    }
}
