//! OAuth client configuration discovery.
//!
//! Resolution order:
//! 1. `GOOGLE_OAUTH_CLIENT_ID` + `GOOGLE_OAUTH_CLIENT_SECRET`
//! 2. a Google client-secrets file (`GOOGLE_OAUTH_CREDENTIALS`, then
//!    `<config_dir>/mcp-google-sheets/oauth_credentials.json`, then
//!    `./oauth_credentials.json`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const APP_DIR_NAME: &str = "mcp-google-sheets";
pub const TOKEN_FILE_NAME: &str = "token.json";
pub const CREDENTIALS_FILE_NAME: &str = "oauth_credentials.json";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/oauth/callback";
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

pub const ENV_CLIENT_ID: &str = "GOOGLE_OAUTH_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "GOOGLE_OAUTH_CLIENT_SECRET";
pub const ENV_CREDENTIALS_FILE: &str = "GOOGLE_OAUTH_CREDENTIALS";
pub const ENV_REDIRECT_URI: &str = "GOOGLE_OAUTH_REDIRECT_URI";
pub const ENV_TOKEN_FILE: &str = "GOOGLE_OAUTH_TOKEN_FILE";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub token_file: PathBuf,
    pub scopes: Vec<String>,
    pub auth_url: Url,
    pub token_url: Url,
    pub callback_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecretsSection>,
    #[serde(default)]
    web: Option<ClientSecretsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSecretsSection {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl OAuthConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve using an injected environment lookup.
    pub fn resolve(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

        if let (Some(client_id), Some(client_secret)) =
            (non_empty(ENV_CLIENT_ID), non_empty(ENV_CLIENT_SECRET))
        {
            let redirect = non_empty(ENV_REDIRECT_URI)
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
            return Self::build(
                client_id,
                client_secret,
                &redirect,
                token_file_path(non_empty(ENV_TOKEN_FILE)),
            );
        }

        let path = non_empty(ENV_CREDENTIALS_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(default_credentials_path);
        let data = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::CredentialsFile { path, source })?;
        let (client_id, client_secret, redirect_uris) = parse_client_secrets(&data)?;
        let redirect = redirect_uris
            .into_iter()
            .next()
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        Self::build(
            client_id,
            client_secret,
            &redirect,
            token_file_path(non_empty(ENV_TOKEN_FILE)),
        )
    }

    fn build(
        client_id: String,
        client_secret: String,
        redirect_uri: &str,
        token_file: PathBuf,
    ) -> Result<Self, ConfigError> {
        let parse = |field: &'static str, raw: &str| {
            Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
        };
        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: parse("redirect_uri", redirect_uri)?,
            token_file,
            scopes: vec![SPREADSHEETS_SCOPE.to_string()],
            auth_url: parse("auth_url", GOOGLE_AUTH_URL)?,
            token_url: parse("token_url", GOOGLE_TOKEN_URL)?,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        })
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn token_file(&self) -> &Path {
        &self.token_file
    }
}

/// Returns `(client_id, client_secret, redirect_uris)`; `installed` wins over `web`.
fn parse_client_secrets(data: &str) -> Result<(String, String, Vec<String>), ConfigError> {
    let file: ClientSecretsFile = serde_json::from_str(data).map_err(ConfigError::Parse)?;
    [file.installed, file.web]
        .into_iter()
        .flatten()
        .find(|section| !section.client_id.is_empty())
        .map(|section| {
            (
                section.client_id,
                section.client_secret,
                section.redirect_uris,
            )
        })
        .ok_or(ConfigError::NoClient)
}

pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME))
}

fn default_credentials_path() -> PathBuf {
    app_config_dir()
        .map(|dir| dir.join(CREDENTIALS_FILE_NAME))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(CREDENTIALS_FILE_NAME))
}

/// Token file location from `GOOGLE_OAUTH_TOKEN_FILE`, else the default.
/// Needs no OAuth client configuration.
pub fn token_file_from_env() -> PathBuf {
    token_file_path(std::env::var(ENV_TOKEN_FILE).ok().filter(|v| !v.is_empty()))
}

fn token_file_path(explicit: Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    app_config_dir()
        .map(|dir| dir.join(TOKEN_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(TOKEN_FILE_NAME))
}
