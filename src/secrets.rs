use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::store;

/// Key/value interface to secret material. The core only ever calls
/// `get("LinkSigningKey")`; `save_refresh_token` exists for completeness of
/// the contract (spec.md §6) even though the chaser core does not use it.
#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn get(&self, key_name: &str) -> Result<Option<String>>;
    async fn save_refresh_token(&self, key_name: &str, value: &str) -> Result<()>;
}

/// Backs the secrets collaborator with the `config_store` table. A real
/// deployment would point this at a managed secret vault instead; this
/// implementation is the one the embedded store ships with.
pub struct SqliteSecretsStore {
    pool: SqlitePool,
}

impl SqliteSecretsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretsStore for SqliteSecretsStore {
    async fn get(&self, key_name: &str) -> Result<Option<String>> {
        store::get_config_value(&self.pool, key_name).await
    }

    async fn save_refresh_token(&self, key_name: &str, value: &str) -> Result<()> {
        store::set_config_value(&self.pool, key_name, value).await
    }
}
