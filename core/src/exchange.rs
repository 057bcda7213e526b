use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::config::OAuthConfig;
use crate::credential::{CredentialRecord, TokenResponse};
use crate::error::ExchangeError;

/// Talks to the authorization server's token endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Trade an authorization code (plus PKCE verifier) for a fresh record.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, ExchangeError>;

    /// Renew `current` using its refresh token.
    async fn refresh(&self, current: &CredentialRecord) -> Result<CredentialRecord, ExchangeError>;
}

/// Google OAuth 2.0 token endpoint client.
#[derive(Debug, Clone)]
pub struct GoogleTokenClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl GoogleTokenClient {
    pub fn new(http: reqwest::Client, config: &OAuthConfig) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ExchangeError> {
        let resp = self
            .http
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl TokenExchanger for GoogleTokenClient {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, ExchangeError> {
        let response = self
            .post_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;
        Ok(CredentialRecord::from_token_response(response, Utc::now()))
    }

    async fn refresh(&self, current: &CredentialRecord) -> Result<CredentialRecord, ExchangeError> {
        if !current.has_refresh_token() {
            return Err(ExchangeError::MissingRefreshToken);
        }
        let response = self
            .post_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &current.refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;
        tracing::debug!("access token refreshed");
        Ok(current.refreshed_with(response, Utc::now()))
    }
}
