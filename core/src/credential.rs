use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

/// Delegated-access credential as persisted by the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Absolute expiry. Token files written by other OAuth clients use `expiry`.
    #[serde(alias = "expiry")]
    pub expires_at: DateTime<Utc>,
}

/// Token endpoint response body (RFC 6749 section 5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CredentialRecord {
    /// Out-of-range `expires_in` values fall back to the default lifetime.
    pub fn from_token_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let default_expiry = || now + Duration::seconds(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = response
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(default_expiry);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.unwrap_or_default(),
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expires_at,
        }
    }

    /// Apply a refresh response. Authorization servers may omit the refresh
    /// token on refresh, in which case the current one stays valid.
    pub fn refreshed_with(&self, response: TokenResponse, now: DateTime<Utc>) -> Self {
        let mut next = Self::from_token_response(response, now);
        if next.refresh_token.is_empty() {
            next.refresh_token = self.refresh_token.clone();
        }
        next
    }

    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now + margin >= self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_within(Duration::zero(), now)
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Source of bearer tokens for backend calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns an `Authorization` header value that is valid right now.
    async fn authorization_header(&self) -> Result<String, CredentialError>;
}

/// Fixed bearer token supplied by the operator; never refreshed.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn authorization_header(&self) -> Result<String, CredentialError> {
        Ok(format!("Bearer {}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(expires_at: DateTime<Utc>) -> CredentialRecord {
        CredentialRecord {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_type: "Bearer".to_string(),
            expires_at,
        }
    }

    #[test]
    fn token_response_sets_absolute_expiry() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "ya29.a",
            "refresh_token": "1//r",
            "token_type": "Bearer",
            "expires_in": 3599
        }))
        .unwrap();
        let record = CredentialRecord::from_token_response(response, now);
        assert_eq!(record.expires_at, now + Duration::seconds(3599));
        assert_eq!(record.refresh_token, "1//r");
        assert_eq!(record.authorization_header(), "Bearer ya29.a");
    }

    #[test]
    fn out_of_range_lifetime_uses_default() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for expires_in in [i64::MAX, 9_000_000_000_000] {
            let response: TokenResponse = serde_json::from_value(serde_json::json!({
                "access_token": "ya29.a",
                "expires_in": expires_in
            }))
            .unwrap();
            let record = CredentialRecord::from_token_response(response, now);
            assert_eq!(record.expires_at, now + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
        }
    }

    #[test]
    fn refresh_keeps_previous_refresh_token_when_omitted() {
        let now = Utc::now();
        let current = record(now);
        let response: TokenResponse =
            serde_json::from_value(serde_json::json!({ "access_token": "new", "expires_in": 60 }))
                .unwrap();
        let next = current.refreshed_with(response, now);
        assert_eq!(next.access_token, "new");
        assert_eq!(next.refresh_token, "rt");
        assert_eq!(next.token_type, "Bearer");
    }

    #[test]
    fn expiry_margin() {
        let now = Utc::now();
        let current = record(now + Duration::minutes(3));
        assert!(current.expires_within(Duration::minutes(5), now));
        assert!(!current.expires_within(Duration::minutes(1), now));
        assert!(!current.is_expired(now));
        assert!(current.is_expired(now + Duration::minutes(3)));
    }

    #[test]
    fn reads_token_files_using_expiry_key() {
        let parsed: CredentialRecord = serde_json::from_str(
            r#"{"access_token":"a","token_type":"Bearer","refresh_token":"r","expiry":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.expires_at,
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn static_token_is_bearer() {
        let source = StaticToken::new("abc");
        assert_eq!(source.authorization_header().await.unwrap(), "Bearer abc");
    }
}
