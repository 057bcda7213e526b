use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::credential::{CredentialRecord, TokenSource};
use crate::error::{CredentialError, ExchangeError};
use crate::exchange::TokenExchanger;
use crate::flow::Authorizer;
use crate::store::CredentialStore;

/// Access tokens are renewed when they expire within this many minutes.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Loads the stored credential, or runs the browser handshake when there is none.
pub struct CredentialProvider {
    store: Arc<dyn CredentialStore>,
    authorizer: Arc<dyn Authorizer>,
    exchanger: Arc<dyn TokenExchanger>,
}

impl CredentialProvider {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        authorizer: Arc<dyn Authorizer>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Self {
        Self {
            store,
            authorizer,
            exchanger,
        }
    }

    pub async fn obtain(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AuthorizedCredential, CredentialError> {
        let record = match self.store.load() {
            Ok(record) => {
                tracing::info!(expires_at = %record.expires_at, "using stored credential");
                record
            }
            Err(err) => {
                tracing::info!(reason = %err, "no usable stored credential, starting authorization");
                self.reauthorize(cancel).await?
            }
        };
        Ok(AuthorizedCredential {
            record: Mutex::new(record),
            store: Arc::clone(&self.store),
            exchanger: Arc::clone(&self.exchanger),
        })
    }

    /// Run the handshake unconditionally and persist the result.
    pub async fn reauthorize(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord, CredentialError> {
        let record = self.authorizer.authorize(cancel).await?;
        self.store.save(&record)?;
        tracing::info!("credential saved");
        Ok(record)
    }
}

/// A credential in use. Refreshes itself before handing out an expiring
/// token and writes the refreshed record back in the background.
pub struct AuthorizedCredential {
    record: Mutex<CredentialRecord>,
    store: Arc<dyn CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
}

impl AuthorizedCredential {
    pub async fn record(&self) -> CredentialRecord {
        self.record.lock().await.clone()
    }

    fn persist_in_background(&self, record: CredentialRecord) {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || match store.save(&record) {
            Ok(()) => tracing::debug!("refreshed credential persisted"),
            Err(err) => tracing::warn!(error = %err, "failed to persist refreshed credential"),
        });
    }
}

#[async_trait]
impl TokenSource for AuthorizedCredential {
    async fn authorization_header(&self) -> Result<String, CredentialError> {
        let mut record = self.record.lock().await;
        let now = Utc::now();
        if record.expires_within(Duration::minutes(REFRESH_MARGIN_MINUTES), now) {
            if record.has_refresh_token() {
                let refreshed = self
                    .exchanger
                    .refresh(&record)
                    .await
                    .map_err(CredentialError::Refresh)?;
                *record = refreshed.clone();
                self.persist_in_background(refreshed);
            } else if record.is_expired(now) {
                return Err(CredentialError::Refresh(ExchangeError::MissingRefreshToken));
            }
        }
        Ok(record.authorization_header())
    }
}
