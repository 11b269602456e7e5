use axum::http::HeaderMap;
use base64::Engine as _;
use serde::Deserialize;

use crate::config::IdentityConfig;

/// Resolved caller identity (spec.md §6). `display_name` is the only field
/// guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub display_name: String,
    pub upn: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientPrincipalHeader {
    #[serde(rename = "userDetails")]
    user_details: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    claims: Vec<ClientPrincipalClaim>,
}

#[derive(Debug, Deserialize)]
struct ClientPrincipalClaim {
    typ: String,
    val: String,
}

/// Resolve identity from request headers, trying in order: trusted
/// front-proxy headers, then the base64-JSON `X-MS-CLIENT-PRINCIPAL` header.
/// A platform-injected claims principal (JWT bearer validated upstream) is
/// represented by the same front-proxy headers once the gateway has
/// terminated the token, so no separate JWT-parsing path is needed here.
pub fn resolve_identity(headers: &HeaderMap, config: &IdentityConfig) -> Option<Identity> {
    if let Some(identity) = resolve_from_proxy_headers(headers, config) {
        return Some(identity);
    }
    resolve_from_client_principal(headers)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|s| !s.is_empty())
}

fn resolve_from_proxy_headers(headers: &HeaderMap, config: &IdentityConfig) -> Option<Identity> {
    let email = header_str(headers, &config.header_email).map(str::to_string);
    let name = header_str(headers, &config.header_name).map(str::to_string);
    let upn = header_str(headers, &config.header_upn).map(str::to_string);

    let display_name = name.or_else(|| upn.clone()).or_else(|| email.clone())?;
    Some(Identity { display_name, upn, email })
}

fn resolve_from_client_principal(headers: &HeaderMap) -> Option<Identity> {
    let raw = header_str(headers, "X-MS-CLIENT-PRINCIPAL")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
    let principal: ClientPrincipalHeader = serde_json::from_slice(&decoded).ok()?;

    let email = principal
        .claims
        .iter()
        .find(|c| {
            c.typ.eq_ignore_ascii_case("email")
                || c.typ.eq_ignore_ascii_case("emailaddress")
                || c.typ.ends_with("/emailaddress")
        })
        .map(|c| c.val.clone());
    let upn = principal
        .claims
        .iter()
        .find(|c| c.typ.eq_ignore_ascii_case("upn"))
        .map(|c| c.val.clone())
        .or_else(|| principal.user_id.clone());

    let display_name = principal.user_details.or_else(|| email.clone()).or_else(|| upn.clone())?;
    Some(Identity { display_name, upn, email })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> IdentityConfig {
        IdentityConfig {
            header_email: "X-User-Email".to_string(),
            header_name: "X-User-Name".to_string(),
            header_upn: "X-User-UPN".to_string(),
        }
    }

    #[test]
    fn resolves_from_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-User-Name", HeaderValue::from_static("Jane Doe"));
        headers.insert("X-User-Email", HeaderValue::from_static("jane@example.test"));

        let identity = resolve_identity(&headers, &config()).unwrap();
        assert_eq!(identity.display_name, "Jane Doe");
        assert_eq!(identity.email.as_deref(), Some("jane@example.test"));
    }

    #[test]
    fn resolves_from_client_principal_header() {
        let payload = serde_json::json!({
            "userDetails": "Jane Doe",
            "userId": "jane-id",
            "claims": [{"typ": "emailaddress", "val": "jane@example.test"}],
        });
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload.to_string());

        let mut headers = HeaderMap::new();
        headers.insert("X-MS-CLIENT-PRINCIPAL", HeaderValue::from_str(&encoded).unwrap());

        let identity = resolve_identity(&headers, &config()).unwrap();
        assert_eq!(identity.display_name, "Jane Doe");
        assert_eq!(identity.email.as_deref(), Some("jane@example.test"));
    }

    #[test]
    fn returns_none_when_nothing_present() {
        let headers = HeaderMap::new();
        assert!(resolve_identity(&headers, &config()).is_none());
    }
}
