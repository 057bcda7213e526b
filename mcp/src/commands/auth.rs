use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use sheets_mcp_core::config::token_file_from_env;
use sheets_mcp_core::{CredentialStore, FileCredentialStore, StoreError};
use sheets_mcp_runtime::http_client;
use tokio_util::sync::CancellationToken;

use super::{AuthArgs, CommandError, credential_provider, exit_error, oauth_config};

fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

pub async fn login(args: &AuthArgs, cancel: &CancellationToken) -> i32 {
    let result = async {
        let config = oauth_config(args)?;
        let provider = credential_provider(&config, http_client()?, !args.no_browser);
        let record = provider.reauthorize(cancel).await?;
        Ok::<_, CommandError>(json!({
            "status": "authenticated",
            "expires_at": record.expires_at,
            "token_file": config.token_file().to_string_lossy(),
        }))
    }
    .await;

    match result {
        Ok(output) => {
            print_json(&output);
            0
        }
        Err(err) => exit_error(&err),
    }
}

pub fn logout() -> i32 {
    let store = FileCredentialStore::new(token_file_from_env());
    match store.remove() {
        Ok(removed) => {
            print_json(&json!({
                "status": "logged_out",
                "removed": removed,
                "token_file": store.path().to_string_lossy(),
            }));
            0
        }
        Err(err) => exit_error(&CommandError::Store(err)),
    }
}

pub fn status() -> i32 {
    match status_report(&token_file_from_env()) {
        Ok(report) => {
            print_json(&report);
            0
        }
        Err(err) => exit_error(&CommandError::Store(err)),
    }
}

fn status_report(path: &Path) -> Result<Value, StoreError> {
    let store = FileCredentialStore::new(path);
    let record = match store.load() {
        Ok(record) => record,
        Err(StoreError::NotFound { .. }) => {
            return Ok(json!({
                "status": "not_authenticated",
                "token_file": path.to_string_lossy(),
            }));
        }
        Err(err) => return Err(err),
    };

    let status = if record.is_expired(Utc::now()) {
        "expired"
    } else {
        "authenticated"
    };
    Ok(json!({
        "status": status,
        "expires_at": record.expires_at,
        "has_refresh_token": record.has_refresh_token(),
        "token_file": path.to_string_lossy(),
    }))
}
