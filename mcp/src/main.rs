use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::AuthArgs;

const DEFAULT_LOG_FILTER: &str = "mcp_google_sheets=info,sheets_mcp_core=info,sheets_mcp_runtime=info";

#[derive(Parser)]
#[command(
    name = "mcp-google-sheets",
    version,
    about = "Google Sheets MCP server over stdio"
)]
struct Cli {
    /// Log output format (logs always go to stderr)
    #[arg(long, env = "SHEETS_MCP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    auth: AuthArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout (default)
    Serve,
    /// Run the browser authorization now and store the credential
    Login,
    /// Delete the stored credential
    Logout,
    /// Show whether a credential is stored and when it expires
    Status,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            on_interrupt.cancel();
        }
    });

    let code = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::serve::run(&cli.auth, &cancel).await,
        Commands::Login => commands::auth::login(&cli.auth, &cancel).await,
        Commands::Logout => commands::auth::logout(),
        Commands::Status => commands::auth::status(),
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["mcp-google-sheets"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.auth.auth_timeout_secs, 300);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mcp-google-sheets",
            "login",
            "--no-browser",
            "--log-format",
            "json",
            "--auth-timeout-secs",
            "30",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Login)));
        assert!(cli.auth.no_browser);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.auth.auth_timeout_secs, 30);
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["mcp-google-sheets", "delete"]).is_err());
    }
}
