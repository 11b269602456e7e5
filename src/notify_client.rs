use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use crate::error::NotifyError;
use crate::token_provider::TokenProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a post attempt (spec.md §4.6): whether it succeeded, and a new
/// root message id if the thread had to be re-rooted.
pub struct PostResult {
    pub ok: bool,
    pub new_root_message_id: Option<String>,
}

#[async_trait]
pub trait NotifyClient: Send + Sync {
    async fn post_reminder(
        &self,
        team_id: &str,
        channel_id: &str,
        root_message_id: Option<&str>,
        body_html: &str,
        mention_id: Option<&str>,
        thread_fallback: bool,
    ) -> Result<PostResult>;
}

pub struct HttpNotifyClient {
    client: Client,
    base_url: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl HttpNotifyClient {
    pub fn new(base_url: String, token_provider: Arc<dyn TokenProvider>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config always builds");
        Self { client, base_url, token_provider }
    }

    fn thread_reply_url(&self, team_id: &str, channel_id: &str, root_message_id: &str) -> String {
        format!(
            "{}/teams/{team_id}/channels/{channel_id}/messages/{root_message_id}/replies",
            self.base_url.trim_end_matches('/')
        )
    }

    fn new_root_url(&self, team_id: &str, channel_id: &str) -> String {
        format!("{}/teams/{team_id}/channels/{channel_id}/messages", self.base_url.trim_end_matches('/'))
    }

    async fn post_message(&self, url: &str, body_html: &str, mention_id: Option<&str>) -> Result<reqwest::Response> {
        let token = self.token_provider.get_bearer_token("chat").await?;
        let mut payload = json!({ "body": { "contentType": "html", "content": body_html } });
        if let Some(mention_id) = mention_id {
            payload["mentions"] = json!([{ "id": mention_id }]);
        }
        self.client
            .post(url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e).into())
    }
}

#[async_trait]
impl NotifyClient for HttpNotifyClient {
    async fn post_reminder(
        &self,
        team_id: &str,
        channel_id: &str,
        root_message_id: Option<&str>,
        body_html: &str,
        mention_id: Option<&str>,
        thread_fallback: bool,
    ) -> Result<PostResult> {
        if let Some(root) = root_message_id.filter(|r| !r.is_empty()) {
            let url = self.thread_reply_url(team_id, channel_id, root);
            let response = self.post_message(&url, body_html, mention_id).await?;
            let status = response.status();

            if status.is_success() {
                return Ok(PostResult { ok: true, new_root_message_id: None });
            }

            let root_lost = status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE;
            if !root_lost || !thread_fallback {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::Status { status: status.as_u16(), body }.into());
            }

            warn!(team_id, channel_id, root, "root message lost, posting new root");
        }

        let url = self.new_root_url(team_id, channel_id);
        let response = self.post_message(&url, body_html, mention_id).await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body }.into());
        }

        let body: serde_json::Value = response.json().await.map_err(NotifyError::Transport)?;
        let new_root_message_id = body.get("id").and_then(|v| v.as_str()).map(str::to_string);
        Ok(PostResult { ok: true, new_root_message_id })
    }
}
