//! Browser-mediated OAuth handshake.
//!
//! One [`AuthorizationSession`] per attempt: a local callback listener, the
//! expected `state` token and PKCE verifier, and a pair of single-use
//! channels (code, error) written by whichever callback arrives first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{generate_code_challenge, generate_code_verifier, generate_state_token, state_matches};
use crate::config::OAuthConfig;
use crate::credential::CredentialRecord;
use crate::error::FlowError;
use crate::exchange::TokenExchanger;

const LISTENER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Handshake progress. `Idle` is the state of a flow before
/// [`AuthorizationFlow::begin`] binds the listener; a session starts out
/// `Listening`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Listening,
    AwaitingCallback,
    Exchanging,
    Done,
    Failed,
}

/// Runs a complete handshake and yields a fresh credential.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, cancel: &CancellationToken) -> Result<CredentialRecord, FlowError>;
}

/// Shows the authorization URL to the operator.
pub trait AuthorizationPrompt: Send + Sync {
    fn present(&self, url: &Url);
}

/// Prints the URL to stderr and optionally opens the default browser.
#[derive(Debug, Clone, Copy)]
pub struct ConsolePrompt {
    open_browser: bool,
}

impl ConsolePrompt {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

impl AuthorizationPrompt for ConsolePrompt {
    fn present(&self, url: &Url) {
        eprintln!();
        eprintln!("=== Google Sheets authorization required ===");
        eprintln!("Open the following URL in your browser and grant access:");
        eprintln!();
        eprintln!("{url}");
        eprintln!();
        eprintln!("Waiting for the OAuth callback...");
        if self.open_browser {
            if let Err(err) = open::that(url.as_str()) {
                tracing::debug!(error = %err, "could not open browser");
            }
        }
    }
}

pub struct AuthorizationFlow {
    config: OAuthConfig,
    exchanger: Arc<dyn TokenExchanger>,
    prompt: Arc<dyn AuthorizationPrompt>,
}

impl AuthorizationFlow {
    pub fn new(
        config: OAuthConfig,
        exchanger: Arc<dyn TokenExchanger>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        Self {
            config,
            exchanger,
            prompt,
        }
    }

    /// Bind the callback listener and prepare a session (`Idle -> Listening`).
    pub async fn begin(&self) -> Result<AuthorizationSession, FlowError> {
        AuthorizationSession::start(&self.config).await
    }
}

#[async_trait]
impl Authorizer for AuthorizationFlow {
    async fn authorize(&self, cancel: &CancellationToken) -> Result<CredentialRecord, FlowError> {
        let mut session = self.begin().await?;
        session.announce(self.prompt.as_ref());
        session.finish(self.exchanger.as_ref(), cancel).await
    }
}

struct CallbackSenders {
    code: oneshot::Sender<String>,
    error: oneshot::Sender<String>,
}

struct CallbackReceivers {
    code: oneshot::Receiver<String>,
    error: oneshot::Receiver<String>,
}

struct CallbackState {
    expected_state: String,
    // Taken by the first callback; later callbacks find `None`.
    senders: Mutex<Option<CallbackSenders>>,
}

pub struct AuthorizationSession {
    state: FlowState,
    code_verifier: String,
    redirect_uri: Url,
    authorization_url: Url,
    timeout: Duration,
    receivers: Option<CallbackReceivers>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl AuthorizationSession {
    async fn start(config: &OAuthConfig) -> Result<Self, FlowError> {
        let mut redirect_uri = config.redirect_uri.clone();
        let invalid = |reason: &str| FlowError::InvalidRedirect {
            uri: config.redirect_uri.to_string(),
            reason: reason.to_string(),
        };
        if redirect_uri.scheme() != "http" {
            return Err(invalid("callback listener only serves plain http"));
        }
        let host = match redirect_uri.host_str() {
            Some("localhost") | None => "127.0.0.1".to_string(),
            Some(host) => host.to_string(),
        };
        let port = redirect_uri.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| FlowError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let bound = listener.local_addr().map_err(|source| FlowError::Bind {
            addr: addr.clone(),
            source,
        })?;
        if port == 0 {
            redirect_uri
                .set_port(Some(bound.port()))
                .map_err(|()| invalid("cannot carry a port"))?;
        }

        let state_token = generate_state_token();
        let code_verifier = generate_code_verifier();
        let authorization_url = build_authorization_url(
            config,
            &redirect_uri,
            &state_token,
            &generate_code_challenge(&code_verifier),
        );

        let (code_tx, code_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let shared = Arc::new(CallbackState {
            expected_state: state_token,
            senders: Mutex::new(Some(CallbackSenders {
                code: code_tx,
                error: error_tx,
            })),
        });

        let app = Router::new()
            .route(redirect_uri.path(), get(handle_callback))
            .with_state(shared);
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(err) = result {
                tracing::warn!(error = %err, "OAuth callback listener failed");
            }
        });

        tracing::info!(addr = %bound, path = redirect_uri.path(), "OAuth callback listener started");

        Ok(Self {
            state: FlowState::Listening,
            code_verifier,
            redirect_uri,
            authorization_url,
            timeout: config.callback_timeout,
            receivers: Some(CallbackReceivers {
                code: code_rx,
                error: error_rx,
            }),
            shutdown,
            server: Some(server),
        })
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }

    /// Redirect URI as advertised to the authorization server, with the
    /// actual port when an ephemeral one was requested.
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Emit the authorization URL (`Listening -> AwaitingCallback`).
    pub fn announce(&mut self, prompt: &dyn AuthorizationPrompt) {
        prompt.present(&self.authorization_url);
        self.state = FlowState::AwaitingCallback;
    }

    /// Wait for the first of callback, error, cancellation or deadline, tear
    /// down the listener, then exchange the code. Single use.
    pub async fn finish(
        &mut self,
        exchanger: &dyn TokenExchanger,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord, FlowError> {
        let result = self.run(exchanger, cancel).await;
        self.state = match result {
            Ok(_) => FlowState::Done,
            Err(_) => FlowState::Failed,
        };
        if let Err(err) = &result {
            tracing::warn!(error = %err, "authorization failed");
        }
        result
    }

    async fn run(
        &mut self,
        exchanger: &dyn TokenExchanger,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord, FlowError> {
        let Some(CallbackReceivers { code, error }) = self.receivers.take() else {
            return Err(FlowError::Callback(
                "authorization session already used".to_string(),
            ));
        };
        self.state = FlowState::AwaitingCallback;

        let outcome = tokio::select! {
            Ok(code) = code => Ok(code),
            Ok(message) = error => Err(FlowError::Callback(message)),
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
            _ = tokio::time::sleep(self.timeout) => Err(FlowError::TimedOut(self.timeout)),
        };
        self.shutdown_listener().await;
        let code = outcome?;

        // Cancellation is no longer honored from here on.
        self.state = FlowState::Exchanging;
        exchanger
            .exchange_code(&code, &self.code_verifier, self.redirect_uri.as_str())
            .await
            .map_err(FlowError::Exchange)
    }

    async fn shutdown_listener(&mut self) {
        self.shutdown.cancel();
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(LISTENER_SHUTDOWN_GRACE, &mut server)
                .await
                .is_err()
            {
                server.abort();
                let _ = server.await;
            }
        }
        tracing::debug!("OAuth callback listener stopped");
    }
}

impl Drop for AuthorizationSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

fn build_authorization_url(
    config: &OAuthConfig,
    redirect_uri: &Url,
    state_token: &str,
    code_challenge: &str,
) -> Url {
    let mut url = config.auth_url.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("response_type", "code")
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", state_token)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");
    url
}

async fn handle_callback(
    State(shared): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let senders = shared.senders.lock().ok().and_then(|mut slot| slot.take());
    let Some(senders) = senders else {
        return (
            StatusCode::CONFLICT,
            Html("<html><body><h1>Already handled</h1><p>This authorization request has already completed. You can close this tab.</p></body></html>"),
        );
    };

    let failure = if let Some(error) = params.get("error") {
        Some(format!("authorization denied: {error}"))
    } else if !params
        .get("state")
        .is_some_and(|received| state_matches(&shared.expected_state, received))
    {
        Some("state mismatch in OAuth callback".to_string())
    } else if params.get("code").is_none_or(|code| code.is_empty()) {
        Some("no code in OAuth callback".to_string())
    } else {
        None
    };

    match failure {
        Some(message) => {
            let _ = senders.error.send(message);
            (
                StatusCode::BAD_REQUEST,
                Html("<html><body><h1>Authorization failed</h1><p>Return to the terminal for details.</p></body></html>"),
            )
        }
        None => {
            let code = params.get("code").cloned().unwrap_or_default();
            let _ = senders.code.send(code);
            (
                StatusCode::OK,
                Html("<html><body><h1>Authorization successful!</h1><p>You can close this window and return to the terminal.</p></body></html>"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENV_REDIRECT_URI;
    use crate::error::ExchangeError;
    use chrono::Utc;

    struct FakeExchanger;

    #[async_trait]
    impl TokenExchanger for FakeExchanger {
        async fn exchange_code(
            &self,
            code: &str,
            code_verifier: &str,
            _redirect_uri: &str,
        ) -> Result<CredentialRecord, ExchangeError> {
            assert!(!code_verifier.is_empty());
            Ok(CredentialRecord {
                access_token: format!("access-for-{code}"),
                refresh_token: "refresh".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }

        async fn refresh(
            &self,
            _current: &CredentialRecord,
        ) -> Result<CredentialRecord, ExchangeError> {
            Err(ExchangeError::MissingRefreshToken)
        }
    }

    struct SilentPrompt;

    impl AuthorizationPrompt for SilentPrompt {
        fn present(&self, _url: &Url) {}
    }

    fn config(redirect: &str) -> OAuthConfig {
        let redirect = redirect.to_string();
        OAuthConfig::resolve(move |key| match key {
            "GOOGLE_OAUTH_CLIENT_ID" => Some("test-client-id".to_string()),
            "GOOGLE_OAUTH_CLIENT_SECRET" => Some("test-client-secret".to_string()),
            k if k == ENV_REDIRECT_URI => Some(redirect.clone()),
            _ => None,
        })
        .unwrap()
    }

    async fn armed_session(config: &OAuthConfig) -> AuthorizationSession {
        let flow = AuthorizationFlow::new(
            config.clone(),
            Arc::new(FakeExchanger),
            Arc::new(SilentPrompt),
        );
        let mut session = flow.begin().await.unwrap();
        assert_eq!(session.state(), FlowState::Listening);
        session.announce(&SilentPrompt);
        assert_eq!(session.state(), FlowState::AwaitingCallback);
        session
    }

    fn query_param(url: &Url, key: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn callback(session: &AuthorizationSession, params: &[(&str, &str)]) -> Url {
        let mut url = session.redirect_uri().clone();
        url.query_pairs_mut().extend_pairs(params);
        url
    }

    #[tokio::test]
    async fn callback_with_code_completes_flow() {
        let config = config("http://127.0.0.1:0/oauth/callback");
        let mut session = armed_session(&config).await;
        let state = query_param(session.authorization_url(), "state");
        let port = session.redirect_uri().port().unwrap();
        assert_ne!(port, 0);

        let url = callback(&session, &[("code", "abc"), ("state", state.as_str())]);
        let resp = reqwest::get(url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let record = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.access_token, "access-for-abc");
        assert_eq!(session.state(), FlowState::Done);

        // Listener is gone once the session resolves.
        assert!(
            tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn callback_without_code_fails() {
        let config = config("http://127.0.0.1:0/oauth/callback");
        let mut session = armed_session(&config).await;
        let state = query_param(session.authorization_url(), "state");
        let port = session.redirect_uri().port().unwrap();

        let resp = reqwest::get(callback(&session, &[("state", state.as_str())]))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let err = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Callback(ref m) if m.contains("no code")));
        assert_eq!(session.state(), FlowState::Failed);
        assert!(
            tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn state_mismatch_and_denied_consent_fail() {
        let config = config("http://127.0.0.1:0/oauth/callback");

        let mut session = armed_session(&config).await;
        reqwest::get(callback(&session, &[("code", "abc"), ("state", "forged")]))
            .await
            .unwrap();
        let err = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("state mismatch"));

        let mut session = armed_session(&config).await;
        reqwest::get(callback(&session, &[("error", "access_denied")]))
            .await
            .unwrap();
        let err = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn duplicate_callback_is_rejected_without_state_change() {
        let config = config("http://127.0.0.1:0/oauth/callback");
        let mut session = armed_session(&config).await;
        let state = query_param(session.authorization_url(), "state");

        let first = reqwest::get(callback(&session, &[("code", "first"), ("state", state.as_str())]))
            .await
            .unwrap();
        let second = reqwest::get(callback(&session, &[("code", "second"), ("state", state.as_str())]))
            .await
            .unwrap();
        assert_eq!(first.status(), 200);
        assert_eq!(second.status(), 409);

        let record = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.access_token, "access-for-first");
    }

    #[tokio::test]
    async fn cancellation_while_waiting() {
        let config = config("http://127.0.0.1:0/oauth/callback");
        let mut session = armed_session(&config).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session.finish(&FakeExchanger, &cancel).await.unwrap_err();
        assert!(matches!(err, FlowError::Cancelled));
        assert_eq!(session.state(), FlowState::Failed);

        // Single use.
        let again = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(again, FlowError::Callback(_)));
    }

    #[tokio::test]
    async fn deadline_expiry_times_out() {
        let config = config("http://127.0.0.1:0/oauth/callback")
            .with_callback_timeout(Duration::from_millis(50));
        let mut session = armed_session(&config).await;
        let err = session
            .finish(&FakeExchanger, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::TimedOut(_)));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();
        let config = config(&format!("http://127.0.0.1:{port}/oauth/callback"));
        let flow = AuthorizationFlow::new(config, Arc::new(FakeExchanger), Arc::new(SilentPrompt));
        let err = flow.authorize(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::Bind { .. }));
    }

    #[tokio::test]
    async fn https_redirect_is_rejected() {
        let config = config("https://localhost:8080/oauth/callback");
        let flow = AuthorizationFlow::new(config, Arc::new(FakeExchanger), Arc::new(SilentPrompt));
        assert!(matches!(
            flow.begin().await,
            Err(FlowError::InvalidRedirect { .. })
        ));
    }

    #[tokio::test]
    async fn authorization_url_requests_offline_access_with_pkce() {
        let config = config("http://127.0.0.1:0/oauth/callback");
        let session = armed_session(&config).await;
        let url = session.authorization_url();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(query_param(url, "access_type"), "offline");
        assert_eq!(query_param(url, "prompt"), "consent");
        assert_eq!(query_param(url, "code_challenge_method"), "S256");
        assert_eq!(query_param(url, "response_type"), "code");
        assert_eq!(
            query_param(url, "scope"),
            "https://www.googleapis.com/auth/spreadsheets"
        );
        assert_eq!(
            query_param(url, "redirect_uri"),
            session.redirect_uri().as_str()
        );
    }
}
