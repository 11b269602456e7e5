use anyhow::Result;
use async_trait::async_trait;

/// Supplies bearer tokens for the system-of-record and chat API clients.
/// OAuth bootstrap and refresh are out of scope for the core (spec.md §2) —
/// the core only consumes a valid token on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_bearer_token(&self, scope: &str) -> Result<String>;
}

/// A provider that returns a fixed token regardless of scope. Useful for
/// deployments fronted by a sidecar that already handles OAuth, and for
/// local testing.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_bearer_token(&self, _scope: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}
