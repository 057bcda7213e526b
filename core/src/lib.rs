pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod provider;
pub mod store;

pub use config::OAuthConfig;
pub use credential::{CredentialRecord, StaticToken, TokenSource};
pub use error::{ConfigError, CredentialError, ExchangeError, FlowError, StoreError};
pub use exchange::{GoogleTokenClient, TokenExchanger};
pub use flow::{AuthorizationFlow, AuthorizationPrompt, Authorizer, ConsolePrompt, FlowState};
pub use provider::{AuthorizedCredential, CredentialProvider};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
