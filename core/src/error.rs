use std::path::PathBuf;
use std::time::Duration;

/// Failures reading or writing the stored credential record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no credential stored at {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("credential store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored credential at {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to serialize credential: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Failures resolving the OAuth client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "unable to read OAuth credentials file {}: {source}. Set GOOGLE_OAUTH_CLIENT_ID and GOOGLE_OAUTH_CLIENT_SECRET or provide oauth_credentials.json",
        .path.display()
    )]
    CredentialsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse OAuth credentials: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("no valid OAuth credentials found in file")]
    NoClient,
    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Failures talking to the authorization server's token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("stored credential has no refresh token")]
    MissingRefreshToken,
}

/// Terminal failures of one authorization handshake.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("invalid redirect URI {uri}: {reason}")]
    InvalidRedirect { uri: String, reason: String },
    #[error("failed to start OAuth callback listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("OAuth callback error: {0}")]
    Callback(String),
    #[error("authorization cancelled")]
    Cancelled,
    #[error("no OAuth callback received within {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("unable to exchange code for token: {0}")]
    Exchange(#[source] ExchangeError),
}

/// Failures obtaining or renewing a usable credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("unable to get token from web: {0}")]
    Flow(#[from] FlowError),
    #[error("unable to refresh access token: {0}")]
    Refresh(#[source] ExchangeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CredentialError {
    /// Short machine-readable kind, used in the CLI's JSON error output.
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::Flow(FlowError::Cancelled) => "authorization_cancelled",
            CredentialError::Flow(FlowError::TimedOut(_)) => "authorization_timed_out",
            CredentialError::Flow(_) => "authorization_failed",
            CredentialError::Refresh(_) => "refresh_failed",
            CredentialError::Store(_) => "credential_store_error",
        }
    }
}
