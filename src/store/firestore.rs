//! Firestore backend over the REST v1 API.

use super::value::{
    area_from_document, disaster_fields, disaster_from_document, parse_timestamp,
    report_from_document, string_value, timestamp_value, Document, Fields, Value,
};
use super::{DisasterStore, Lease};
use crate::config::{ApiKey, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::models::{Area, Disaster, DisasterType, Report, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Firestore caps a commit at 500 writes.
const MAX_BATCH_WRITES: usize = 500;
const LIST_PAGE_SIZE: u32 = 300;
const LOCK_DOCUMENT: &str = "aggregation_lock";
const GENERATION_DOCUMENT: &str = "current_generation";

/// Connection settings for [`FirestoreStore`].
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database: String,
    pub emulator_host: Option<String>,
    /// OAuth bearer token. Not needed against the emulator.
    pub token: Option<ApiKey>,
    pub timeout_seconds: u64,
    pub reports_collection: String,
    pub areas_collection: String,
    pub disasters_collection: String,
    pub meta_collection: String,
}

impl FirestoreConfig {
    pub fn from_store_config(store: &StoreConfig, token: Option<ApiKey>, timeout_seconds: u64) -> Self {
        Self {
            project_id: store.project_id.clone(),
            database: store.database.clone(),
            emulator_host: store.emulator_host.clone(),
            token,
            timeout_seconds,
            reports_collection: store.reports_collection.clone(),
            areas_collection: store.areas_collection.clone(),
            disasters_collection: store.disasters_collection.clone(),
            meta_collection: store.meta_collection.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Precondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_time: Option<String>,
}

pub struct FirestoreStore {
    config: FirestoreConfig,
    http_client: reqwest::Client,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> StoreResult<Self> {
        info!(
            "Connecting to Firestore project {} (database {})",
            config.project_id, config.database
        );
        if let Some(host) = &config.emulator_host {
            info!("Using Firestore emulator at {}", host);
        }

        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn api_root(&self) -> String {
        match &self.config.emulator_host {
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => "https://firestore.googleapis.com/v1".to_string(),
        }
    }

    /// `projects/{p}/databases/{d}/documents`
    fn documents_path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.config.project_id, self.config.database
        )
    }

    /// Full resource name of a document.
    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path(), collection, id)
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.api_root(), self.documents_path(), suffix)
    }

    /// REST URL of a document. Each path segment is percent-encoded.
    fn document_url(&self, collection: &str, id: &str) -> String {
        self.url(&document_path(collection, id))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.config.token {
            Some(token) if !token.is_empty() => builder.bearer_auth(token.expose()),
            _ => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> StoreResult<Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { status, body })
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let url = self.document_url(collection, id);
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }
        Ok(Some(response.json().await?))
    }

    async fn commit(&self, body: &serde_json::Value) -> StoreResult<()> {
        let url = self.url(":commit");
        self.send(self.request(Method::POST, url).json(body)).await?;
        Ok(())
    }

    fn lock_name(&self) -> String {
        self.document_name(&self.config.meta_collection, LOCK_DOCUMENT)
    }
}

/// `/{collection}/{id}` with both segments percent-encoded.
fn document_path(collection: &str, id: &str) -> String {
    format!(
        "/{}/{}",
        urlencoding::encode(collection),
        urlencoding::encode(id)
    )
}

/// Firestore reports a failed precondition as 400 or 409 with this status.
fn is_precondition_failure(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Status { status, body }
            if (*status == 400 || *status == 409)
                && (body.contains("FAILED_PRECONDITION") || body.contains("ALREADY_EXISTS"))
    )
}

/// Structured query for reports at or after `since`.
fn window_query(collection: &str, since: DateTime<Utc>) -> serde_json::Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "timestamp" },
                    "op": "GREATER_THAN_OR_EQUAL",
                    "value": timestamp_value(since)
                }
            }
        }
    })
}

/// Decode query rows into reports. Rows that do not decode are skipped.
fn decode_reports(items: &[RunQueryItem]) -> Vec<Report> {
    items
        .iter()
        .filter_map(|item| item.document.as_ref())
        .filter_map(|doc| match report_from_document(doc) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Skipping unreadable report: {}", e);
                None
            }
        })
        .collect()
}

/// `updateMask.fieldPaths` query pairs. Fields outside the mask are left alone.
fn update_mask(fields: &Fields) -> Vec<(&'static str, String)> {
    fields
        .keys()
        .map(|k| ("updateMask.fieldPaths", k.clone()))
        .collect()
}

/// Commit bodies deleting `names`, at most [`MAX_BATCH_WRITES`] per commit.
fn delete_commits(names: &[String]) -> Vec<serde_json::Value> {
    names
        .chunks(MAX_BATCH_WRITES)
        .map(|chunk| {
            let writes: Vec<serde_json::Value> =
                chunk.iter().map(|name| json!({ "delete": name })).collect();
            json!({ "writes": writes })
        })
        .collect()
}

/// Guard for replacing the lock document: it must still be absent, or
/// unchanged since it was read.
fn lease_precondition(existing: Option<&Document>) -> Precondition {
    match existing {
        Some(doc) => Precondition {
            exists: None,
            update_time: doc.update_time.clone(),
        },
        None => Precondition {
            exists: Some(false),
            update_time: None,
        },
    }
}

fn lease_commit(
    name: &str,
    holder: &str,
    expires_at: DateTime<Utc>,
    precondition: Precondition,
) -> serde_json::Value {
    let mut fields = Fields::new();
    fields.insert("holder".into(), string_value(holder));
    fields.insert("expiresAt".into(), timestamp_value(expires_at));

    json!({
        "writes": [{
            "update": { "name": name, "fields": fields },
            "currentDocument": precondition,
        }]
    })
}

fn release_commit(name: &str, lock: &Document) -> serde_json::Value {
    json!({
        "writes": [{
            "delete": name,
            "currentDocument": Precondition { exists: None, update_time: lock.update_time.clone() },
        }]
    })
}

fn lease_holder(doc: &Document) -> Option<(String, Option<DateTime<Utc>>)> {
    let holder = match doc.fields.get("holder")? {
        Value::StringValue(h) => h.clone(),
        _ => return None,
    };
    let expires_at = match doc.fields.get("expiresAt") {
        Some(Value::TimestampValue(ts)) => parse_timestamp(ts).ok(),
        _ => None,
    };
    Some((holder, expires_at))
}

#[async_trait]
impl DisasterStore for FirestoreStore {
    async fn reports_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Report>> {
        let url = self.url(":runQuery");
        let body = window_query(&self.config.reports_collection, since);
        let items: Vec<RunQueryItem> = self
            .send(self.request(Method::POST, url).json(&body))
            .await?
            .json()
            .await?;

        let reports = decode_reports(&items);
        debug!("Window query returned {} reports", reports.len());
        Ok(reports)
    }

    async fn area(&self, id: &str) -> StoreResult<Option<Area>> {
        Ok(self
            .get_document(&self.config.areas_collection, id)
            .await?
            .as_ref()
            .map(area_from_document))
    }

    async fn list_disasters(&self) -> StoreResult<Vec<Disaster>> {
        let mut disasters = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = self.url(&format!(
                "/{}",
                urlencoding::encode(&self.config.disasters_collection)
            ));
            let mut builder = self
                .request(Method::GET, url)
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token)]);
            }

            let page: ListDocumentsResponse = self.send(builder).await?.json().await?;
            for doc in &page.documents {
                match disaster_from_document(doc) {
                    Ok(d) => disasters.push(d),
                    // Still listed so a clear can remove it.
                    Err(e) => {
                        warn!("Unreadable disaster document: {}", e);
                        disasters.push(Disaster {
                            disaster_id: doc.id().to_string(),
                            ..placeholder_disaster()
                        });
                    }
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(disasters)
    }

    async fn delete_disasters(&self, ids: &[String]) -> StoreResult<()> {
        let names: Vec<String> = ids
            .iter()
            .map(|id| self.document_name(&self.config.disasters_collection, id))
            .collect();

        for body in delete_commits(&names) {
            self.commit(&body).await?;
        }
        debug!("Deleted {} disasters", ids.len());
        Ok(())
    }

    async fn upsert_disaster(&self, disaster: &Disaster) -> StoreResult<()> {
        let fields = disaster_fields(disaster);
        let url = self.document_url(&self.config.disasters_collection, &disaster.disaster_id);
        self.send(
            self.request(Method::PATCH, url)
                .query(&update_mask(&fields))
                .json(&json!({ "fields": fields })),
        )
        .await?;
        Ok(())
    }

    async fn set_current_generation(&self, generation: &str) -> StoreResult<()> {
        let mut fields = Fields::new();
        fields.insert("generation".into(), string_value(generation));
        fields.insert("updatedAt".into(), timestamp_value(Utc::now()));

        let url = self.document_url(&self.config.meta_collection, GENERATION_DOCUMENT);
        self.send(self.request(Method::PATCH, url).json(&json!({ "fields": fields })))
            .await?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Lease> {
        let existing = self
            .get_document(&self.config.meta_collection, LOCK_DOCUMENT)
            .await?;

        if let Some((current, expires_at)) = existing.as_ref().and_then(lease_holder) {
            let live = expires_at.is_some_and(|t| t > now);
            if current != holder && live {
                return Ok(Lease::Held { holder: current });
            }
        }

        let body = lease_commit(
            &self.lock_name(),
            holder,
            now + ttl,
            lease_precondition(existing.as_ref()),
        );

        match self.commit(&body).await {
            Ok(()) => Ok(Lease::Acquired),
            Err(e) if is_precondition_failure(&e) => {
                let holder = self
                    .get_document(&self.config.meta_collection, LOCK_DOCUMENT)
                    .await?
                    .as_ref()
                    .and_then(lease_holder)
                    .map(|(h, _)| h)
                    .unwrap_or_else(|| "another run".to_string());
                Ok(Lease::Held { holder })
            }
            Err(e) => Err(e),
        }
    }

    async fn release_lease(&self, holder: &str) -> StoreResult<()> {
        let Some(doc) = self
            .get_document(&self.config.meta_collection, LOCK_DOCUMENT)
            .await?
        else {
            return Ok(());
        };

        if lease_holder(&doc).map(|(h, _)| h).as_deref() != Some(holder) {
            return Ok(());
        }

        match self.commit(&release_commit(&self.lock_name(), &doc)).await {
            Err(e) if is_precondition_failure(&e) => {
                debug!("Lease changed hands before release");
                Ok(())
            }
            other => other,
        }
    }
}

/// Stand-in for a document that no longer decodes.
fn placeholder_disaster() -> Disaster {
    Disaster {
        disaster_id: String::new(),
        disaster_type: DisasterType::Other,
        severity: Severity::Medium,
        title: String::new(),
        description: String::new(),
        location_label: String::new(),
        affected_area_ids: Vec::new(),
        affected_count: 0,
        case_count: 0,
        updated_at: DateTime::<Utc>::default(),
        generation: None,
    }
}
