use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::error::SignerError;
use crate::secrets::SecretsStore;

type HmacSha256 = Hmac<Sha256>;

const KEY_RELOAD_DEADLINE: Duration = Duration::from_secs(60);
const SIGNING_KEY_NAME: &str = "LinkSigningKey";

struct CachedKey {
    bytes: Vec<u8>,
    fetched_at: Instant,
}

/// Keyed HMAC-SHA256 signer producing base64url (no padding) output. The
/// decoded key is cached for `KEY_RELOAD_DEADLINE`; the cache swap is a
/// single write-lock acquisition so concurrent readers never observe a torn
/// key.
pub struct Signer {
    secrets: Arc<dyn SecretsStore>,
    cache: RwLock<Option<CachedKey>>,
}

impl Signer {
    pub fn new(secrets: Arc<dyn SecretsStore>) -> Self {
        Self { secrets, cache: RwLock::new(None) }
    }

    async fn current_key(&self) -> Result<Vec<u8>> {
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < KEY_RELOAD_DEADLINE {
                    return Ok(cached.bytes.clone());
                }
            }
        }

        let raw = self
            .secrets
            .get(SIGNING_KEY_NAME)
            .await?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SignerError::MissingKey(SIGNING_KEY_NAME.to_string()))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&raw)
            .unwrap_or_else(|_| raw.into_bytes());

        let mut guard = self.cache.write().await;
        *guard = Some(CachedKey { bytes: bytes.clone(), fetched_at: Instant::now() });
        Ok(bytes)
    }

    /// Sign `payload`, returning base64url-without-padding.
    pub async fn sign(&self, payload: &str) -> Result<String> {
        let key = self.current_key().await?;
        let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        let tag = mac.finalize().into_bytes();
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag))
    }

    /// Verify `sig` against `payload` using constant-time comparison.
    pub async fn verify(&self, payload: &str, sig: &str) -> Result<bool> {
        let expected = self.sign(payload).await?;
        Ok(bool::from(expected.as_bytes().ct_eq(sig.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FixedSecretsStore {
        value: StdMutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl SecretsStore for FixedSecretsStore {
        async fn get(&self, _key_name: &str) -> Result<Option<String>> {
            Ok(self.value.lock().unwrap().clone())
        }
        async fn save_refresh_token(&self, _key_name: &str, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn signs_and_verifies() {
        let secrets = Arc::new(FixedSecretsStore { value: StdMutex::new(Some("dGVzdC1rZXk=".to_string())) });
        let signer = Signer::new(secrets);
        let sig = signer.sign("42|1|1700000000").await.unwrap();
        assert!(signer.verify("42|1|1700000000", &sig).await.unwrap());
        assert!(!signer.verify("42|1|1700000000", "not-the-signature").await.unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_utf8_when_not_base64() {
        let secrets = Arc::new(FixedSecretsStore { value: StdMutex::new(Some("not valid base64!!".to_string())) });
        let signer = Signer::new(secrets);
        let sig = signer.sign("payload").await.unwrap();
        assert!(signer.verify("payload", &sig).await.unwrap());
    }

    #[tokio::test]
    async fn missing_key_fails_loudly() {
        let secrets = Arc::new(FixedSecretsStore { value: StdMutex::new(None) });
        let signer = Signer::new(secrets);
        assert!(signer.sign("payload").await.is_err());
    }

    #[tokio::test]
    async fn empty_key_fails_loudly() {
        let secrets = Arc::new(FixedSecretsStore { value: StdMutex::new(Some(String::new())) });
        let signer = Signer::new(secrets);
        assert!(signer.sign("payload").await.is_err());
    }
}
