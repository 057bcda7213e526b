use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use serde_json::json;
use sheets_mcp_core::{
    AuthorizationFlow, ConfigError, ConsolePrompt, CredentialError, CredentialProvider,
    FileCredentialStore, GoogleTokenClient, OAuthConfig, StoreError, TokenExchanger,
};
use sheets_mcp_runtime::{DEFAULT_API_BASE_URL, ServeError};

pub mod auth;
pub mod serve;

#[derive(Debug, Clone, Args)]
pub struct AuthArgs {
    /// Use this access token as-is instead of the stored credential
    /// (for use behind a credential-injecting proxy)
    #[arg(long, env = "GOOGLE_SHEETS_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Sheets API base URL
    #[arg(long, env = "SHEETS_API_BASE_URL", default_value = DEFAULT_API_BASE_URL, global = true)]
    pub api_base_url: String,

    /// Seconds to wait for the OAuth browser callback
    #[arg(long, env = "GOOGLE_OAUTH_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub auth_timeout_secs: u64,

    /// Print the authorization URL without opening a browser
    #[arg(long, env = "SHEETS_MCP_NO_BROWSER", global = true)]
    pub no_browser: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid API base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error(transparent)]
    Serve(#[from] ServeError),
}

impl CommandError {
    fn kind(&self) -> &'static str {
        match self {
            CommandError::Config(_) => "oauth_config_error",
            CommandError::Credential(err) => err.kind(),
            CommandError::Store(_) => "credential_store_error",
            CommandError::Http(_) | CommandError::BaseUrl(_) => "startup_error",
            CommandError::Serve(_) => "mcp_server_error",
        }
    }
}

/// Print a machine-readable error to stderr and return the exit code.
pub fn exit_error(err: &CommandError) -> i32 {
    let payload = json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| err.to_string())
    );
    1
}

pub fn oauth_config(args: &AuthArgs) -> Result<OAuthConfig, ConfigError> {
    Ok(OAuthConfig::from_env()?.with_callback_timeout(Duration::from_secs(args.auth_timeout_secs)))
}

pub fn credential_provider(
    config: &OAuthConfig,
    http: reqwest::Client,
    open_browser: bool,
) -> CredentialProvider {
    let exchanger: Arc<dyn TokenExchanger> = Arc::new(GoogleTokenClient::new(http, config));
    let flow = AuthorizationFlow::new(
        config.clone(),
        Arc::clone(&exchanger),
        Arc::new(ConsolePrompt::new(open_browser)),
    );
    CredentialProvider::new(
        Arc::new(FileCredentialStore::new(config.token_file())),
        Arc::new(flow),
        exchanger,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheets_mcp_core::FlowError;

    #[test]
    fn error_kinds_follow_the_failure() {
        let cancelled = CommandError::from(CredentialError::from(FlowError::Cancelled));
        assert_eq!(cancelled.kind(), "authorization_cancelled");
        assert_eq!(CommandError::from(ConfigError::NoClient).kind(), "oauth_config_error");
        assert_eq!(exit_error(&cancelled), 1);
    }
}
