use std::sync::Arc;

use sheets_mcp_core::{StaticToken, TokenSource};
use sheets_mcp_runtime::{McpServer, SheetsClient, http_client, serve_stdio};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{AuthArgs, CommandError, credential_provider, exit_error, oauth_config};

pub async fn run(args: &AuthArgs, cancel: &CancellationToken) -> i32 {
    match serve(args, cancel).await {
        Ok(()) => 0,
        Err(err) => exit_error(&err),
    }
}

async fn serve(args: &AuthArgs, cancel: &CancellationToken) -> Result<(), CommandError> {
    let http = http_client()?;
    let base_url = Url::parse(&args.api_base_url)?;

    let tokens: Arc<dyn TokenSource> = match &args.token {
        Some(token) => {
            tracing::info!("using explicit access token");
            Arc::new(StaticToken::new(token.clone()))
        }
        None => {
            let config = oauth_config(args)?;
            let provider = credential_provider(&config, http.clone(), !args.no_browser);
            Arc::new(provider.obtain(cancel).await?)
        }
    };

    let backend = SheetsClient::new(http, base_url, tokens);
    let server = Arc::new(McpServer::new(Arc::new(backend)));

    tokio::select! {
        result = serve_stdio(server) => result?,
        _ = cancel.cancelled() => tracing::info!("MCP server stopped"),
    }
    Ok(())
}
