use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::AckError;
use crate::signer::Signer;

/// Build the canonical §4.3 payload: `"<TaskId>|<AckVersion>|<ExpUnix>"`.
pub fn canonical_payload(task_id: i64, ack_version: i64, exp_unix: i64) -> String {
    format!("{task_id}|{ack_version}|{exp_unix}")
}

/// Build the legacy §4.8 payload: `"id=<id>&exp=<exp>[&c=<corr>]"`.
pub fn legacy_canonical_payload(sp_item_id: &str, exp_unix: i64, correlation_id: Option<&str>) -> String {
    match correlation_id.filter(|c| !c.is_empty()) {
        Some(corr) => format!("id={sp_item_id}&exp={exp_unix}&c={corr}"),
        None => format!("id={sp_item_id}&exp={exp_unix}"),
    }
}

pub struct AckLinkBuilder {
    signer: Arc<Signer>,
    base_url: String,
}

impl AckLinkBuilder {
    pub fn new(signer: Arc<Signer>, base_url: String) -> Self {
        Self { signer, base_url }
    }

    /// Assemble the §4.3 ack URL: `{baseUrl}/ack?tid=...&v=...&exp=...&sig=...[&r=...][&a=...]`.
    pub async fn build(
        &self,
        task_id: i64,
        ack_version: i64,
        expires_utc: DateTime<Utc>,
        region: Option<&str>,
        anchor_date_type: Option<&str>,
    ) -> Result<String> {
        let exp_unix = expires_utc.timestamp();
        let payload = canonical_payload(task_id, ack_version, exp_unix);
        let sig = self.signer.sign(&payload).await?;

        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut().map_err(|_| anyhow::anyhow!("base_url cannot be a base"))?.push("ack");
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("tid", &task_id.to_string());
            pairs.append_pair("v", &ack_version.to_string());
            pairs.append_pair("exp", &exp_unix.to_string());
            pairs.append_pair("sig", &sig);
            if let Some(region) = region {
                pairs.append_pair("r", region);
            }
            if let Some(anchor) = anchor_date_type {
                pairs.append_pair("a", anchor);
            }
        }
        Ok(url.to_string())
    }
}

/// Outcome of verifying an ack click against the §4.3 payload shape.
pub struct VerifiedAck {
    pub task_id: i64,
    pub presented_version: i64,
}

pub struct AckVerifier {
    signer: Arc<Signer>,
}

impl AckVerifier {
    pub fn new(signer: Arc<Signer>) -> Self {
        Self { signer }
    }

    /// Verify the §4.3 (current) payload shape: signature matches, `exp` is
    /// in the future, and `v >= stored_ack_version - 1` (accepts the one
    /// version of replay tolerance the write-through race requires; anything
    /// strictly smaller is a distinguishable replay).
    pub async fn verify_current(
        &self,
        task_id: i64,
        presented_version: i64,
        exp_unix: i64,
        sig: &str,
        stored_ack_version: i64,
        now: DateTime<Utc>,
    ) -> Result<VerifiedAck, AckError> {
        let payload = canonical_payload(task_id, presented_version, exp_unix);
        let matches = self.signer.verify(&payload, sig).await.map_err(|_| AckError::BadSignature)?;
        if !matches {
            return Err(AckError::BadSignature);
        }
        if exp_unix <= now.timestamp() {
            return Err(AckError::Expired);
        }

        let minimum_accepted = stored_ack_version - 1;
        if presented_version < minimum_accepted {
            return Err(AckError::Replay { presented: presented_version, minimum_accepted });
        }

        Ok(VerifiedAck { task_id, presented_version })
    }

    /// Verify the §4.8 legacy payload shape, keyed by `SpItemId` rather than
    /// `TaskId`. Returns the verified item id on success.
    pub async fn verify_legacy(
        &self,
        sp_item_id: &str,
        exp_unix: i64,
        sig: &str,
        correlation_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AckError> {
        let payload = legacy_canonical_payload(sp_item_id, exp_unix, correlation_id);
        let matches = self.signer.verify(&payload, sig).await.map_err(|_| AckError::BadSignature)?;
        if !matches {
            return Err(AckError::BadSignature);
        }
        if exp_unix <= now.timestamp() {
            return Err(AckError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretsStore;
    use chrono::TimeZone as _;
    use std::sync::Mutex as StdMutex;

    struct FixedSecretsStore(StdMutex<Option<String>>);

    #[async_trait::async_trait]
    impl SecretsStore for FixedSecretsStore {
        async fn get(&self, _key_name: &str) -> Result<Option<String>> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn save_refresh_token(&self, _key_name: &str, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    fn signer() -> Arc<Signer> {
        Arc::new(Signer::new(Arc::new(FixedSecretsStore(StdMutex::new(Some("dGVzdC1rZXk=".to_string()))))))
    }

    #[tokio::test]
    async fn builds_url_with_expected_query_params() {
        let builder = AckLinkBuilder::new(signer(), "https://chaser.example.test".to_string());
        let expires = Utc.with_ymd_and_hms(2025, 1, 7, 10, 0, 0).unwrap();
        let url = builder.build(42, 2, expires, Some("EMEA"), Some("GoLive")).await.unwrap();

        assert!(url.starts_with("https://chaser.example.test/ack?"));
        assert!(url.contains("tid=42"));
        assert!(url.contains("v=2"));
        assert!(url.contains("r=EMEA"));
        assert!(url.contains("a=GoLive"));
    }

    #[tokio::test]
    async fn verify_current_accepts_exact_and_one_behind() {
        let signer = signer();
        let verifier = AckVerifier::new(signer.clone());
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let future_exp = (now + chrono::Duration::hours(1)).timestamp();

        let payload = canonical_payload(42, 2, future_exp);
        let sig = signer.sign(&payload).await.unwrap();

        // presented v=2, stored AckVersion=2 (equality accepted).
        assert!(verifier.verify_current(42, 2, future_exp, &sig, 2, now).await.is_ok());
        // presented v=2, stored AckVersion=3 (one behind accepted).
        assert!(verifier.verify_current(42, 2, future_exp, &sig, 3, now).await.is_ok());
    }

    #[tokio::test]
    async fn verify_current_rejects_stale_replay() {
        let signer = signer();
        let verifier = AckVerifier::new(signer.clone());
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let future_exp = (now + chrono::Duration::hours(1)).timestamp();

        let payload = canonical_payload(42, 1, future_exp);
        let sig = signer.sign(&payload).await.unwrap();

        // presented v=1, stored AckVersion=3: too far behind.
        let err = verifier.verify_current(42, 1, future_exp, &sig, 3, now).await.unwrap_err();
        assert!(matches!(err, AckError::Replay { .. }));
    }

    #[tokio::test]
    async fn verify_current_rejects_expired_and_bad_signature() {
        let signer = signer();
        let verifier = AckVerifier::new(signer.clone());
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let past_exp = (now - chrono::Duration::hours(1)).timestamp();
        let payload = canonical_payload(42, 2, past_exp);
        let sig = signer.sign(&payload).await.unwrap();

        let err = verifier.verify_current(42, 2, past_exp, &sig, 2, now).await.unwrap_err();
        assert!(matches!(err, AckError::Expired));

        let future_exp = (now + chrono::Duration::hours(1)).timestamp();
        let err = verifier.verify_current(42, 2, future_exp, "garbage-sig", 2, now).await.unwrap_err();
        assert!(matches!(err, AckError::BadSignature));
    }

    #[tokio::test]
    async fn verify_legacy_payload_shape() {
        let signer = signer();
        let verifier = AckVerifier::new(signer.clone());
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let future_exp = (now + chrono::Duration::hours(1)).timestamp();

        let payload = legacy_canonical_payload("sp-item-1", future_exp, Some("corr-1"));
        let sig = signer.sign(&payload).await.unwrap();

        assert!(verifier.verify_legacy("sp-item-1", future_exp, &sig, Some("corr-1"), now).await.is_ok());
        assert!(verifier.verify_legacy("sp-item-1", future_exp, &sig, None, now).await.is_err());
    }
}
