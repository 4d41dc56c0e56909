use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{InsertOutcome, OrderStore, StoreError};
use crate::models::Order;

const DOCUMENT_TYPE: &str = "order";

/// Connection settings for the headless content store
#[derive(Clone)]
pub struct SanitySettings {
    /// e.g. `https://<project>.api.sanity.io`
    pub base_url: String,
    pub dataset: String,
    pub api_version: String,
    pub token: String,
    pub timeout: Duration,
}

impl SanitySettings {
    /// Builds the project-scoped API URL from a host such as `https://api.sanity.io`.
    pub fn project_url(project_id: &str, api_host: &str) -> String {
        let host = api_host
            .trim_end_matches('/')
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        format!("https://{}.{}", project_id, host)
    }
}

/// Orders stored as documents with a deterministic id derived from the payment id,
/// so `createIfNotExists` acts as a unique constraint.
#[derive(Clone)]
pub struct SanityOrderStore {
    http: reqwest::Client,
    settings: SanitySettings,
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    documents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MutationResult {
    #[serde(default)]
    operation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MutateResponse {
    #[serde(default)]
    results: Vec<MutationResult>,
}

impl SanityOrderStore {
    pub fn new(settings: SanitySettings) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { http, settings })
    }

    pub fn document_id(payment_id: &str) -> String {
        let safe: String = payment_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("order-mp-{}", safe)
    }

    fn data_url(&self, endpoint: &str) -> String {
        format!(
            "{}/v{}/data/{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.api_version,
            endpoint,
            self.settings.dataset
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(300)
            .collect();
        Err(StoreError::Response {
            status: status.as_u16(),
            body,
        })
    }
}

fn connection_error(err: reqwest::Error) -> StoreError {
    StoreError::Connection(err.to_string())
}

#[async_trait]
impl OrderStore for SanityOrderStore {
    fn backend(&self) -> &'static str {
        "sanity"
    }

    #[instrument(skip(self))]
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>, StoreError> {
        let url = format!("{}/{}", self.data_url("doc"), Self::document_id(payment_id));
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.settings.token)
            .send()
            .await
            .map_err(connection_error)?;
        let response = Self::check(response).await?;
        let docs: DocumentsResponse = response.json().await.map_err(connection_error)?;

        match docs.documents.into_iter().next() {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, order), fields(payment_id = %order.payment_id))]
    async fn insert_if_absent(&self, order: &Order) -> Result<InsertOutcome, StoreError> {
        let mut document = serde_json::to_value(order)?;
        if let Value::Object(fields) = &mut document {
            fields.insert("_id".into(), json!(Self::document_id(&order.payment_id)));
            fields.insert("_type".into(), json!(DOCUMENT_TYPE));
        }

        let response = self
            .http
            .post(self.data_url("mutate"))
            .query(&[("returnIds", "true"), ("visibility", "sync")])
            .bearer_auth(&self.settings.token)
            .json(&json!({ "mutations": [{ "createIfNotExists": document }] }))
            .send()
            .await
            .map_err(connection_error)?;
        let response = Self::check(response).await?;
        let result: MutateResponse = response.json().await.map_err(connection_error)?;

        let created = result
            .results
            .iter()
            .any(|r| r.operation.as_deref() == Some("create"));
        debug!(created, "order mutation applied");
        Ok(if created {
            InsertOutcome::Created
        } else {
            InsertOutcome::AlreadyExists
        })
    }
}
