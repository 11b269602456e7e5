use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use crate::config::SharePointFieldMappingsConfig;
use crate::error::SorClientError;
use crate::token_provider::TokenProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NOT_INDEXED_HEADER: &str = "Prefer";
const NOT_INDEXED_HEADER_VALUE: &str = "HonorNonIndexedQueriesWarningMayFailRandomly";

#[derive(Debug, Clone)]
pub struct StatusAndDue {
    pub status: Option<String>,
    pub due_date_utc: Option<DateTime<Utc>>,
}

/// Two operations on system-of-record list items (spec.md §4.5).
#[async_trait]
pub trait SorClient: Send + Sync {
    async fn get_status_and_due_utc(&self, list_id: &str, item_id: &str) -> Result<Option<StatusAndDue>>;

    async fn update_chaser_fields(
        &self,
        list_id: &str,
        item_id: &str,
        important: bool,
        increment_chase: bool,
        next_chase_at_utc: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_completed(
        &self,
        list_id: &str,
        item_id: &str,
        ack_by_name: &str,
        ack_by_email_or_upn: &str,
    ) -> Result<()>;
}

pub struct HttpSorClient {
    client: Client,
    base_url: String,
    field_mappings: Arc<SharePointFieldMappingsConfig>,
    token_provider: Arc<dyn TokenProvider>,
}

impl HttpSorClient {
    pub fn new(base_url: String, field_mappings: Arc<SharePointFieldMappingsConfig>, token_provider: Arc<dyn TokenProvider>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config always builds");
        Self { client, base_url, field_mappings, token_provider }
    }

    fn item_url(&self, list_id: &str, item_id: &str) -> String {
        format!("{}/lists/{list_id}/items/{item_id}", self.base_url.trim_end_matches('/'))
    }

    async fn bearer(&self) -> Result<String> {
        self.token_provider.get_bearer_token("system-of-record").await
    }
}

#[async_trait]
impl SorClient for HttpSorClient {
    async fn get_status_and_due_utc(&self, list_id: &str, item_id: &str) -> Result<Option<StatusAndDue>> {
        let token = self.bearer().await?;
        let status_field = self.field_mappings.resolve("Status");
        let due_field = self.field_mappings.resolve("DueDateUtc");
        let url = self.item_url(list_id, item_id);

        let mut response = self.client.get(&url).bearer_auth(&token).send().await.map_err(SorClientError::Transport)?;

        if response.status().as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("not indexed") {
                warn!(list_id, item_id, "system-of-record reported unindexed query, retrying once");
                response = self
                    .client
                    .get(&url)
                    .bearer_auth(&token)
                    .header(NOT_INDEXED_HEADER, NOT_INDEXED_HEADER_VALUE)
                    .send()
                    .await
                    .map_err(SorClientError::Transport)?;
            } else {
                return Err(SorClientError::Status { status: 400, body }.into());
            }
        }

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SorClientError::Status { status, body }.into());
        }

        let body: serde_json::Value = response.json().await.map_err(SorClientError::Transport)?;
        let status = body.get(status_field).and_then(|v| v.as_str()).map(str::to_string);
        let due_date_utc = body
            .get(due_field)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Some(StatusAndDue { status, due_date_utc }))
    }

    async fn update_chaser_fields(
        &self,
        list_id: &str,
        item_id: &str,
        important: bool,
        increment_chase: bool,
        next_chase_at_utc: DateTime<Utc>,
    ) -> Result<()> {
        let token = self.bearer().await?;
        let url = self.item_url(list_id, item_id);

        let important_field = self.field_mappings.resolve("Important");
        let chase_count_field = self.field_mappings.resolve("ChaseCount");
        let next_chase_field = self.field_mappings.resolve("NextChaseAtUtc");

        let mut body = json!({
            important_field: important,
            next_chase_field: next_chase_at_utc.to_rfc3339(),
        });
        if increment_chase {
            // The system of record has no atomic increment operator; read the
            // current count and write back one higher.
            let current = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(SorClientError::Transport)?
                .json::<serde_json::Value>()
                .await
                .map_err(SorClientError::Transport)?;
            let current_count = current.get(chase_count_field).and_then(|v| v.as_i64()).unwrap_or(0);
            body[chase_count_field] = json!(current_count + 1);
        }

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(SorClientError::Transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SorClientError::Status { status, body }.into());
        }
        Ok(())
    }

    async fn mark_completed(&self, list_id: &str, item_id: &str, ack_by_name: &str, ack_by_email_or_upn: &str) -> Result<()> {
        let existing = self.get_status_and_due_utc(list_id, item_id).await?;
        if let Some(current) = &existing {
            if current.status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("completed")) {
                return Ok(());
            }
        } else {
            return Err(SorClientError::NotFound(item_id.to_string()).into());
        }

        let token = self.bearer().await?;
        let url = self.item_url(list_id, item_id);
        let status_field = self.field_mappings.resolve("Status");
        let ack_by_field = self.field_mappings.resolve("AcknowledgedBy");
        let ack_email_field = self.field_mappings.resolve("AcknowledgedByEmailOrUpn");

        let body = json!({
            status_field: "Completed",
            ack_by_field: ack_by_name,
            ack_email_field: ack_by_email_or_upn,
        });

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(SorClientError::Transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SorClientError::Status { status, body }.into());
        }
        Ok(())
    }
}
