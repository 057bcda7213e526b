use async_trait::async_trait;
use serde_json::{Map, Value};
use sheets_mcp_core::CredentialError;

/// One operation per tool. Implementations return a JSON summary of the
/// remote call; dropping the returned future abandons the call.
#[async_trait]
pub trait SpreadsheetBackend: Send + Sync {
    async fn read_sheet(&self, spreadsheet_id: &str, range: Option<&str>)
    -> Result<Value, BackendError>;

    async fn write_sheet(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<Value, BackendError>;

    async fn append_sheet(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<Value, BackendError>;

    async fn create_spreadsheet(&self, title: &str, sheets: &[String])
    -> Result<Value, BackendError>;

    async fn get_spreadsheet_info(&self, spreadsheet_id: &str) -> Result<Value, BackendError>;

    async fn add_sheet(&self, spreadsheet_id: &str, sheet_name: &str)
    -> Result<Value, BackendError>;

    async fn clear_sheet(&self, spreadsheet_id: &str, range: &str) -> Result<Value, BackendError>;

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        requests: &[Map<String, Value>],
    ) -> Result<Value, BackendError>;
}

/// Backend failure. `context` names the operation ("unable to clear sheet")
/// and leads the rendered message.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{context}: {source}")]
    Credential {
        context: &'static str,
        #[source]
        source: CredentialError,
    },
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context}: {message} (HTTP {status})")]
    Status {
        context: &'static str,
        status: u16,
        message: String,
    },
    #[error("{context}: invalid API base URL")]
    BaseUrl { context: &'static str },
}

impl BackendError {
    pub fn context(&self) -> &'static str {
        match self {
            BackendError::Credential { context, .. }
            | BackendError::Http { context, .. }
            | BackendError::Status { context, .. }
            | BackendError::BaseUrl { context } => context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_leads_with_operation_context() {
        let err = BackendError::Status {
            context: "unable to retrieve data from sheet",
            status: 404,
            message: "Requested entity was not found.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unable to retrieve data from sheet: Requested entity was not found. (HTTP 404)"
        );
        assert_eq!(err.context(), "unable to retrieve data from sheet");
    }
}
